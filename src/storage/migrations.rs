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


//! Database migrations
//!
//! # Migration Strategy
//! Since sqlx's compile-time migration system requires build-time database connection,
//! migrations are runtime SQL executed in order and tracked in `_migrations`.

use crate::error::Result;
use sqlx::{Executor, SqlitePool};

/// Run all database migrations
pub async fn run_migrations(pool: &SqlitePool) -> Result<()> {
    create_migrations_table(pool).await?;

    run_migration(pool, 1, "initial_schema", create_initial_schema(pool)).await?;

    Ok(())
}

/// Create migrations tracking table
async fn create_migrations_table(pool: &SqlitePool) -> Result<()> {
    pool.execute(
        r#"
        CREATE TABLE IF NOT EXISTS _migrations (
            id INTEGER PRIMARY KEY,
            name TEXT NOT NULL UNIQUE,
            applied_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP
        )
        "#,
    )
    .await?;

    Ok(())
}

/// Run a single migration if it hasn't been applied yet
async fn run_migration(
    pool: &SqlitePool,
    id: i32,
    name: &str,
    migration_fn: impl std::future::Future<Output = Result<()>>,
) -> Result<()> {
    let applied: Option<i32> = sqlx::query_scalar("SELECT id FROM _migrations WHERE id = ?")
        .bind(id)
        .fetch_optional(pool)
        .await?;

    if applied.is_some() {
        return Ok(());
    }

    migration_fn.await?;

    sqlx::query("INSERT INTO _migrations (id, name) VALUES (?, ?)")
        .bind(id)
        .bind(name)
        .execute(pool)
        .await?;

    tracing::debug!(id, name, "Applied migration");

    Ok(())
}

/// Create initial database schema
///
/// One table per collection: directory handles, video progress, sync queue
/// and video metadata.
async fn create_initial_schema(pool: &SqlitePool) -> Result<()> {
    pool.execute(
        r#"
-- Directory grants, one per course. Only removed by explicit user action.
CREATE TABLE IF NOT EXISTS DirectoryHandles (
    course_id TEXT PRIMARY KEY NOT NULL,
    handle_ref TEXT NOT NULL,       -- JSON HandleRef
    granted_at TEXT NOT NULL
);

-- Watch progress per (course, lecture). The lecture key is the video path.
CREATE TABLE IF NOT EXISTS VideoProgress (
    course_id TEXT NOT NULL,
    lecture_key TEXT NOT NULL,
    progress_percent REAL NOT NULL DEFAULT 0.0,
    current_time_seconds REAL NOT NULL DEFAULT 0.0,
    total_duration_seconds REAL NOT NULL DEFAULT 0.0,
    completed INTEGER NOT NULL DEFAULT 0,
    last_watched_at INTEGER NOT NULL,  -- epoch ms
    PRIMARY KEY (course_id, lecture_key)
);

CREATE INDEX IF NOT EXISTS idx_video_progress_recent
    ON VideoProgress(course_id, last_watched_at DESC);

-- Outbox of progress records awaiting acknowledgment by the sync endpoint.
CREATE TABLE IF NOT EXISTS SyncQueue (
    item_id INTEGER PRIMARY KEY AUTOINCREMENT,
    device_id TEXT NOT NULL,
    course_id TEXT NOT NULL,
    lecture_key TEXT NOT NULL,
    payload TEXT NOT NULL,                    -- JSON ProgressRecord
    status TEXT NOT NULL DEFAULT 'pending',   -- pending | in_flight
    attempts INTEGER NOT NULL DEFAULT 0,
    last_error TEXT,
    enqueued_at INTEGER NOT NULL              -- epoch ms
);

CREATE INDEX IF NOT EXISTS idx_sync_queue_key
    ON SyncQueue(course_id, lecture_key, status);

-- Scan results, replaced whenever the directory fingerprint changes.
CREATE TABLE IF NOT EXISTS VideoMetadata (
    course_id TEXT PRIMARY KEY NOT NULL,
    fingerprint TEXT NOT NULL,
    entries TEXT NOT NULL,          -- JSON array of VideoEntry
    scanned_at TEXT NOT NULL
);
        "#,
    )
    .await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use crate::storage::Database;

    #[tokio::test]
    async fn test_migrations_create_collections() {
        let db = Database::new_in_memory().await.unwrap();

        for table in ["DirectoryHandles", "VideoProgress", "SyncQueue", "VideoMetadata"] {
            let count: i64 = sqlx::query_scalar(
                "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = ?",
            )
            .bind(table)
            .fetch_one(db.pool())
            .await
            .unwrap();
            assert_eq!(count, 1, "missing table {}", table);
        }
    }

    #[tokio::test]
    async fn test_migrations_are_idempotent() {
        let db = Database::new_in_memory().await.unwrap();
        db.migrate().await.unwrap();

        let applied: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM _migrations")
            .fetch_one(db.pool())
            .await
            .unwrap();
        assert_eq!(applied, 1);
    }
}
