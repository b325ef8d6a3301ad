// CourseCache - Local-folder course learning cache
// Copyright (C) 2025 Henning Berge
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License
// along with this program. If not, see <https://www.gnu.org/licenses/>.


//! Database query functions
//!
//! One group of functions per collection. Components above this layer own
//! the policy (throttling, reconciliation, coalescing); these functions only
//! move rows.
//!
//! # Query Patterns
//! - Async/await for all database operations
//! - Upserts via `ON CONFLICT ... DO UPDATE`
//! - Transactions for read-then-write steps that must not interleave

use crate::error::Result;
use crate::file::handle::HandleRef;
use crate::storage::models::*;
use chrono::Utc;
use sqlx::{Executor, Sqlite, SqliteConnection, SqlitePool};

// ============================================================================
// DIRECTORY HANDLE QUERIES
// ============================================================================

/// Insert or overwrite the directory grant for a course
pub async fn upsert_handle(pool: &SqlitePool, course_id: &str, handle: &HandleRef) -> Result<()> {
    let handle_json = serde_json::to_string(handle)?;

    sqlx::query(
        r#"
        INSERT INTO DirectoryHandles (course_id, handle_ref, granted_at)
        VALUES (?, ?, ?)
        ON CONFLICT(course_id) DO UPDATE SET
            handle_ref = excluded.handle_ref,
            granted_at = excluded.granted_at
        "#,
    )
    .bind(course_id)
    .bind(&handle_json)
    .bind(Utc::now())
    .execute(pool)
    .await?;

    Ok(())
}

/// Find the directory grant for a course
pub async fn find_handle(pool: &SqlitePool, course_id: &str) -> Result<Option<DirectoryHandleRecord>> {
    let row = sqlx::query_as::<_, DirectoryHandleRow>(
        "SELECT course_id, handle_ref, granted_at FROM DirectoryHandles WHERE course_id = ?",
    )
    .bind(course_id)
    .fetch_optional(pool)
    .await?;

    row.map(DirectoryHandleRecord::try_from).transpose()
}

/// Delete the directory grant for a course
///
/// Returns whether a record existed.
pub async fn delete_handle(pool: &SqlitePool, course_id: &str) -> Result<bool> {
    let result = sqlx::query("DELETE FROM DirectoryHandles WHERE course_id = ?")
        .bind(course_id)
        .execute(pool)
        .await?;

    Ok(result.rows_affected() > 0)
}

// ============================================================================
// VIDEO METADATA QUERIES
// ============================================================================

/// Find the cached scan for a course
pub async fn find_metadata(pool: &SqlitePool, course_id: &str) -> Result<Option<MetadataCacheEntry>> {
    let row = sqlx::query_as::<_, VideoMetadataRow>(
        "SELECT course_id, fingerprint, entries, scanned_at FROM VideoMetadata WHERE course_id = ?",
    )
    .bind(course_id)
    .fetch_optional(pool)
    .await?;

    row.map(MetadataCacheEntry::try_from).transpose()
}

/// Store a scan, replacing any previous scan of the course
pub async fn upsert_metadata(pool: &SqlitePool, entry: &MetadataCacheEntry) -> Result<()> {
    let entries_json = serde_json::to_string(&entry.entries)?;

    sqlx::query(
        r#"
        INSERT INTO VideoMetadata (course_id, fingerprint, entries, scanned_at)
        VALUES (?, ?, ?, ?)
        ON CONFLICT(course_id) DO UPDATE SET
            fingerprint = excluded.fingerprint,
            entries = excluded.entries,
            scanned_at = excluded.scanned_at
        "#,
    )
    .bind(&entry.course_id)
    .bind(&entry.fingerprint)
    .bind(&entries_json)
    .bind(entry.scanned_at)
    .execute(pool)
    .await?;

    Ok(())
}

/// Drop the cached scan for a course
pub async fn delete_metadata(pool: &SqlitePool, course_id: &str) -> Result<bool> {
    let result = sqlx::query("DELETE FROM VideoMetadata WHERE course_id = ?")
        .bind(course_id)
        .execute(pool)
        .await?;

    Ok(result.rows_affected() > 0)
}

// ============================================================================
// PROGRESS QUERIES
// ============================================================================

const UPSERT_PROGRESS: &str = r#"
    INSERT INTO VideoProgress (
        course_id, lecture_key, progress_percent, current_time_seconds,
        total_duration_seconds, completed, last_watched_at
    ) VALUES (?, ?, ?, ?, ?, ?, ?)
    ON CONFLICT(course_id, lecture_key) DO UPDATE SET
        progress_percent = excluded.progress_percent,
        current_time_seconds = excluded.current_time_seconds,
        total_duration_seconds = excluded.total_duration_seconds,
        completed = excluded.completed,
        last_watched_at = excluded.last_watched_at
"#;

/// Insert or overwrite progress for a lecture
///
/// Accepts the pool or an open transaction, so callers can pair the write
/// with its sync queue item.
pub async fn upsert_progress<'e, E>(executor: E, record: &ProgressRecord) -> Result<()>
where
    E: Executor<'e, Database = Sqlite>,
{
    sqlx::query(UPSERT_PROGRESS)
        .bind(&record.course_id)
        .bind(&record.lecture_key)
        .bind(record.progress_percent)
        .bind(record.current_time_seconds)
        .bind(record.total_duration_seconds)
        .bind(record.completed)
        .bind(record.last_watched_at)
        .execute(executor)
        .await?;

    Ok(())
}

/// Write progress only if it is newer than what is stored
///
/// Used by write-back repair so a stale copy never overwrites a fresh save.
/// Returns whether the row changed.
pub async fn upsert_progress_if_newer(pool: &SqlitePool, record: &ProgressRecord) -> Result<bool> {
    let query = format!(
        "{} WHERE excluded.last_watched_at > VideoProgress.last_watched_at",
        UPSERT_PROGRESS
    );

    let result = sqlx::query(&query)
        .bind(&record.course_id)
        .bind(&record.lecture_key)
        .bind(record.progress_percent)
        .bind(record.current_time_seconds)
        .bind(record.total_duration_seconds)
        .bind(record.completed)
        .bind(record.last_watched_at)
        .execute(pool)
        .await?;

    Ok(result.rows_affected() > 0)
}

/// Find progress for a lecture
pub async fn find_progress(
    pool: &SqlitePool,
    course_id: &str,
    lecture_key: &str,
) -> Result<Option<ProgressRecord>> {
    let row = sqlx::query_as::<_, VideoProgressRow>(
        r#"
        SELECT course_id, lecture_key, progress_percent, current_time_seconds,
               total_duration_seconds, last_watched_at
        FROM VideoProgress
        WHERE course_id = ? AND lecture_key = ?
        "#,
    )
    .bind(course_id)
    .bind(lecture_key)
    .fetch_optional(pool)
    .await?;

    Ok(row.map(ProgressRecord::from))
}

/// List progress for every lecture of a course, most recently watched first
pub async fn list_progress(pool: &SqlitePool, course_id: &str) -> Result<Vec<ProgressRecord>> {
    let rows = sqlx::query_as::<_, VideoProgressRow>(
        r#"
        SELECT course_id, lecture_key, progress_percent, current_time_seconds,
               total_duration_seconds, last_watched_at
        FROM VideoProgress
        WHERE course_id = ?
        ORDER BY last_watched_at DESC
        "#,
    )
    .bind(course_id)
    .fetch_all(pool)
    .await?;

    Ok(rows.into_iter().map(ProgressRecord::from).collect())
}

// ============================================================================
// SYNC QUEUE QUERIES
// ============================================================================

const SYNC_COLUMNS: &str =
    "item_id, device_id, payload, status, attempts, last_error, enqueued_at";

/// Append a record to the sync queue, coalescing with a pending item
///
/// If an item for the same (course, lecture) is still `pending`, its payload
/// is replaced and it keeps its queue position. Items already `in_flight`
/// are never touched; a new row is appended instead.
///
/// Returns the id of the item now carrying the record and whether it was
/// coalesced.
pub async fn enqueue_sync_item(
    pool: &SqlitePool,
    device_id: &str,
    record: &ProgressRecord,
) -> Result<(i64, bool)> {
    let mut tx = pool.begin().await?;
    let outcome = enqueue_sync_item_in(&mut *tx, device_id, record).await?;
    tx.commit().await?;
    Ok(outcome)
}

/// `enqueue_sync_item` on a caller-owned connection or transaction
///
/// The coalescing update is a single guarded statement, so an item claimed
/// by a concurrent drain is never rewritten; the record then gets its own
/// row.
pub async fn enqueue_sync_item_in(
    conn: &mut SqliteConnection,
    device_id: &str,
    record: &ProgressRecord,
) -> Result<(i64, bool)> {
    let payload = serde_json::to_string(record)?;
    let now = now_ms();

    let coalesced: Option<i64> = sqlx::query_scalar(
        r#"
        UPDATE SyncQueue SET payload = ?, enqueued_at = ?
        WHERE status = 'pending' AND item_id = (
            SELECT item_id FROM SyncQueue
            WHERE course_id = ? AND lecture_key = ? AND device_id = ? AND status = 'pending'
            ORDER BY item_id DESC
            LIMIT 1
        )
        RETURNING item_id
        "#,
    )
    .bind(&payload)
    .bind(now)
    .bind(&record.course_id)
    .bind(&record.lecture_key)
    .bind(device_id)
    .fetch_optional(&mut *conn)
    .await?;

    if let Some(item_id) = coalesced {
        return Ok((item_id, true));
    }

    let result = sqlx::query(
        r#"
        INSERT INTO SyncQueue (device_id, course_id, lecture_key, payload, status, enqueued_at)
        VALUES (?, ?, ?, ?, 'pending', ?)
        "#,
    )
    .bind(device_id)
    .bind(&record.course_id)
    .bind(&record.lecture_key)
    .bind(&payload)
    .bind(now)
    .execute(&mut *conn)
    .await?;

    Ok((result.last_insert_rowid(), false))
}

/// Claim the oldest pending item by marking it `in_flight`
///
/// Selection and status change are one statement, so a concurrent enqueue
/// either coalesces into the item before the claim or lands in a new row.
pub async fn claim_next_sync_item(pool: &SqlitePool) -> Result<Option<SyncQueueItem>> {
    let row = sqlx::query_as::<_, SyncQueueRow>(&format!(
        r#"
        UPDATE SyncQueue SET status = 'in_flight', attempts = attempts + 1
        WHERE item_id = (
            SELECT item_id FROM SyncQueue WHERE status = 'pending' ORDER BY item_id ASC LIMIT 1
        )
        RETURNING {}
        "#,
        SYNC_COLUMNS
    ))
    .fetch_optional(pool)
    .await?;

    row.map(SyncQueueItem::try_from).transpose()
}

/// Remove an acknowledged item
pub async fn delete_sync_item(pool: &SqlitePool, item_id: i64) -> Result<()> {
    sqlx::query("DELETE FROM SyncQueue WHERE item_id = ?")
        .bind(item_id)
        .execute(pool)
        .await?;
    Ok(())
}

/// Return a failed item to `pending`, keeping its queue position
pub async fn release_sync_item(pool: &SqlitePool, item_id: i64, error: &str) -> Result<()> {
    sqlx::query("UPDATE SyncQueue SET status = 'pending', last_error = ? WHERE item_id = ?")
        .bind(error)
        .bind(item_id)
        .execute(pool)
        .await?;
    Ok(())
}

/// Turn items left `in_flight` by a crash back into `pending`
pub async fn reset_in_flight_sync_items(pool: &SqlitePool) -> Result<u64> {
    let result = sqlx::query("UPDATE SyncQueue SET status = 'pending' WHERE status = 'in_flight'")
        .execute(pool)
        .await?;
    Ok(result.rows_affected())
}

/// List every queued item in delivery order
pub async fn list_sync_items(pool: &SqlitePool) -> Result<Vec<SyncQueueItem>> {
    let rows = sqlx::query_as::<_, SyncQueueRow>(&format!(
        "SELECT {} FROM SyncQueue ORDER BY item_id ASC",
        SYNC_COLUMNS
    ))
    .fetch_all(pool)
    .await?;

    rows.into_iter().map(SyncQueueItem::try_from).collect()
}

/// Count items that still await delivery
pub async fn count_pending_sync_items(pool: &SqlitePool) -> Result<i64> {
    let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM SyncQueue")
        .fetch_one(pool)
        .await?;
    Ok(count)
}
