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


//! Dual-backend progress store
//!
//! Every save lands in the local database before `save` returns. When the
//! course folder is attached and writable, saves are also mirrored into the
//! portable file inside it. The two copies form a last-write-wins replica
//! pair:
//!
//! - `get` reads both and returns the record with the later `lastWatchedAt`
//!   (the database wins ties)
//! - the losing side is repaired in the background; repair failures are
//!   logged and otherwise ignored
//!
//! # Mirror throttling
//! The first save after a quiet period is mirrored immediately; later saves
//! are held in a per-course pending set and written with the next save
//! after `mirror_interval`. `flush` writes the pending set right away but
//! never sooner than `min_flush_spacing` after the previous write. The
//! portable file can therefore lag the database by up to one interval.

use crate::config::CacheConfig;
use crate::error::Result;
use crate::file::handle::{check_access, AccessMode, DirectoryHandle};
use crate::file::locks::CourseLocks;
use crate::progress::portable::PortableFile;
use crate::storage::models::ProgressRecord;
use crate::storage::queries;
use crate::sync::SyncQueue;
use sqlx::SqlitePool;
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{Mutex, RwLock};
use tokio_util::task::TaskTracker;

#[derive(Debug, Default)]
struct MirrorState {
    /// Saved but not yet mirrored, newest per lecture
    pending: BTreeMap<String, ProgressRecord>,
    last_write: Option<Instant>,
}

struct Inner {
    pool: SqlitePool,
    portable_file_name: String,
    mirror_interval: Duration,
    min_flush_spacing: Duration,
    directories: RwLock<HashMap<String, Arc<dyn DirectoryHandle>>>,
    mirrors: Mutex<HashMap<String, MirrorState>>,
    locks: CourseLocks,
    sync: Option<Arc<SyncQueue>>,
    repairs: TaskTracker,
}

/// Progress store shared by the player and the workspace
///
/// Cloning is cheap; clones share state.
#[derive(Clone)]
pub struct ProgressStore {
    inner: Arc<Inner>,
}

impl fmt::Debug for ProgressStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProgressStore")
            .field("portable_file_name", &self.inner.portable_file_name)
            .field("mirror_interval", &self.inner.mirror_interval)
            .field("sync", &self.inner.sync.is_some())
            .finish_non_exhaustive()
    }
}

impl ProgressStore {
    pub fn new(
        pool: SqlitePool,
        config: &CacheConfig,
        locks: CourseLocks,
        sync: Option<Arc<SyncQueue>>,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                pool,
                portable_file_name: config.portable_file_name.clone(),
                mirror_interval: config.mirror_interval(),
                min_flush_spacing: config.min_flush_spacing(),
                directories: RwLock::new(HashMap::new()),
                mirrors: Mutex::new(HashMap::new()),
                locks,
                sync,
                repairs: TaskTracker::new(),
            }),
        }
    }

    /// Enable mirroring for a course folder
    pub async fn attach_directory(&self, course_id: &str, handle: Arc<dyn DirectoryHandle>) {
        self.inner
            .directories
            .write()
            .await
            .insert(course_id.to_string(), handle);
    }

    /// Stop mirroring; pending records wait for the next attach
    pub async fn detach_directory(&self, course_id: &str) {
        self.inner.directories.write().await.remove(course_id);
    }

    /// Save progress
    ///
    /// Returns the record as stored, with `completed` derived from the
    /// percentage. The progress row and its sync queue item commit together
    /// or not at all.
    pub async fn save(&self, record: ProgressRecord) -> Result<ProgressRecord> {
        let record = record.normalized();

        // The progress write comes first, so the transaction holds the
        // database write lock before the queue is read
        let mut tx = self.inner.pool.begin().await?;
        queries::upsert_progress(&mut *tx, &record).await?;
        if let Some(sync) = &self.inner.sync {
            sync.enqueue_in(&mut *tx, &record).await?;
        }
        tx.commit().await?;

        if let Some(handle) = self.writable_handle(&record.course_id).await {
            let due = {
                let mut mirrors = self.inner.mirrors.lock().await;
                let state = mirrors.entry(record.course_id.clone()).or_default();
                state
                    .pending
                    .insert(record.lecture_key.clone(), record.clone());
                state
                    .last_write
                    .map_or(true, |at| at.elapsed() >= self.inner.mirror_interval)
            };

            if due {
                self.write_pending(&record.course_id, handle.as_ref()).await;
            }
        }

        Ok(record)
    }

    /// Mirror pending saves now, respecting the minimum write spacing
    ///
    /// Returns whether the portable file was written. Portable file failures
    /// are logged and reported as `false`.
    pub async fn flush(&self, course_id: &str) -> Result<bool> {
        let Some(handle) = self.writable_handle(course_id).await else {
            return Ok(false);
        };

        let wait = {
            let mirrors = self.inner.mirrors.lock().await;
            match mirrors.get(course_id) {
                Some(state) if !state.pending.is_empty() => state
                    .last_write
                    .map(|at| self.inner.min_flush_spacing.saturating_sub(at.elapsed()))
                    .unwrap_or(Duration::ZERO),
                _ => return Ok(false),
            }
        };

        if !wait.is_zero() {
            tokio::time::sleep(wait).await;
        }

        Ok(self.write_pending(course_id, handle.as_ref()).await)
    }

    /// Flush every course with pending saves
    pub async fn flush_all(&self) -> Result<()> {
        let courses: Vec<String> = {
            let mirrors = self.inner.mirrors.lock().await;
            mirrors
                .iter()
                .filter(|(_, state)| !state.pending.is_empty())
                .map(|(course_id, _)| course_id.clone())
                .collect()
        };

        for course_id in courses {
            self.flush(&course_id).await?;
        }
        Ok(())
    }

    /// Read progress, reconciling the database with the portable file
    pub async fn get(&self, course_id: &str, lecture_key: &str) -> Result<Option<ProgressRecord>> {
        let local = queries::find_progress(&self.inner.pool, course_id, lecture_key).await;
        let handle = self.writable_handle(course_id).await;

        let local = match (local, &handle) {
            (Ok(record), _) => record,
            (Err(e), None) => return Err(e),
            (Err(e), Some(_)) => {
                tracing::warn!(course_id, lecture_key, error = %e, "Database read failed, using portable file");
                None
            }
        };

        let Some(handle) = handle else {
            return Ok(local);
        };

        let portable = match PortableFile::read(handle.as_ref(), &self.inner.portable_file_name).await {
            Ok(file) => file.get(course_id, lecture_key),
            Err(e) => {
                tracing::warn!(course_id, error = %e, "Portable progress file unreadable, using local progress");
                return Ok(local);
            }
        };

        match (local, portable) {
            (Some(local), Some(portable)) if portable.is_newer_than(&local) => {
                self.repair_database(portable.clone());
                Ok(Some(portable))
            }
            (Some(local), portable) => {
                if portable.as_ref() != Some(&local) {
                    self.repair_portable(local.clone(), handle);
                }
                Ok(Some(local))
            }
            (None, Some(portable)) => {
                self.repair_database(portable.clone());
                Ok(Some(portable))
            }
            (None, None) => Ok(None),
        }
    }

    /// Progress for every lecture of a course, most recent first
    ///
    /// Reads the database only.
    pub async fn list(&self, course_id: &str) -> Result<Vec<ProgressRecord>> {
        queries::list_progress(&self.inner.pool, course_id).await
    }

    /// Wait for background repairs started so far
    pub async fn settle(&self) {
        self.inner.repairs.close();
        self.inner.repairs.wait().await;
        self.inner.repairs.reopen();
    }

    async fn writable_handle(&self, course_id: &str) -> Option<Arc<dyn DirectoryHandle>> {
        let handle = self.inner.directories.read().await.get(course_id).cloned()?;

        let status = check_access(handle.as_ref(), AccessMode::ReadWrite).await;
        if status.is_granted() {
            Some(handle)
        } else {
            tracing::debug!(course_id, ?status, "No write access, progress stays local");
            None
        }
    }

    fn repair_database(&self, record: ProgressRecord) {
        let pool = self.inner.pool.clone();
        self.inner.repairs.spawn(async move {
            match queries::upsert_progress_if_newer(&pool, &record).await {
                Ok(changed) => tracing::debug!(
                    course_id = %record.course_id,
                    lecture_key = %record.lecture_key,
                    changed,
                    "Repaired local progress from portable file"
                ),
                Err(e) => tracing::warn!(
                    course_id = %record.course_id,
                    lecture_key = %record.lecture_key,
                    error = %e,
                    "Local progress repair failed"
                ),
            }
        });
    }

    fn repair_portable(&self, record: ProgressRecord, handle: Arc<dyn DirectoryHandle>) {
        let store = self.clone();
        self.inner.repairs.spawn(async move {
            let course_id = record.course_id.clone();
            {
                let mut mirrors = store.inner.mirrors.lock().await;
                let state = mirrors.entry(course_id.clone()).or_default();
                let newer_pending = state
                    .pending
                    .get(&record.lecture_key)
                    .is_some_and(|pending| pending.last_watched_at >= record.last_watched_at);
                if !newer_pending {
                    state.pending.insert(record.lecture_key.clone(), record);
                }
            }
            store.write_pending(&course_id, handle.as_ref()).await;
        });
    }

    /// Merge the pending set into the portable file
    ///
    /// Serialized per course. On failure the pending set is kept for the
    /// next attempt.
    async fn write_pending(&self, course_id: &str, handle: &dyn DirectoryHandle) -> bool {
        let _guard = self.inner.locks.acquire(course_id).await;

        let pending: Vec<ProgressRecord> = {
            let mirrors = self.inner.mirrors.lock().await;
            match mirrors.get(course_id) {
                Some(state) => state.pending.values().cloned().collect(),
                None => return false,
            }
        };
        if pending.is_empty() {
            return false;
        }

        let path = &self.inner.portable_file_name;
        let outcome = async {
            let mut file = PortableFile::read(handle, path).await?;
            let mut changed = false;
            for record in &pending {
                changed |= file.merge(record);
            }
            if changed {
                file.write(handle, path).await?;
            }
            Ok::<_, crate::error::CourseCacheError>(changed)
        }
        .await;

        let mut mirrors = self.inner.mirrors.lock().await;
        let state = mirrors.entry(course_id.to_string()).or_default();
        state.last_write = Some(Instant::now());

        match outcome {
            Ok(changed) => {
                // Keep anything saved while the write was running
                for record in &pending {
                    if state.pending.get(&record.lecture_key) == Some(record) {
                        state.pending.remove(&record.lecture_key);
                    }
                }
                tracing::debug!(course_id, records = pending.len(), changed, "Mirrored progress to course folder");
                true
            }
            Err(e) => {
                tracing::warn!(
                    course_id,
                    records = pending.len(),
                    error = %e,
                    "Portable progress mirror failed, keeping progress local"
                );
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::file::local::LocalDirectory;
    use crate::file::PermissionState;
    use crate::storage::Database;
    use crate::sync::{DeviceId, SyncTransport};
    use async_trait::async_trait;
    use tempfile::TempDir;

    const FILE: &str = ".course-progress.json";

    struct AcceptAll;

    #[async_trait]
    impl SyncTransport for AcceptAll {
        async fn send(&self, _device_id: &str, _record: &ProgressRecord) -> Result<()> {
            Ok(())
        }
    }

    fn config(interval_ms: u64, spacing_ms: u64) -> CacheConfig {
        CacheConfig::default()
            .with_mirror_interval(Duration::from_millis(interval_ms))
            .with_min_flush_spacing(Duration::from_millis(spacing_ms))
    }

    async fn setup(cfg: CacheConfig) -> (Database, ProgressStore, TempDir, Arc<LocalDirectory>) {
        let db = Database::new_in_memory().await.unwrap();
        let store = ProgressStore::new(db.pool().clone(), &cfg, CourseLocks::new(), None);
        let temp_dir = TempDir::new().unwrap();
        let handle = Arc::new(LocalDirectory::new(temp_dir.path()));
        (db, store, temp_dir, handle)
    }

    fn read_file(dir: &TempDir) -> PortableFile {
        let bytes = std::fs::read(dir.path().join(FILE)).unwrap();
        PortableFile::parse(FILE, &bytes).unwrap()
    }

    #[tokio::test]
    async fn test_completed_is_derived() {
        let (_db, store, _dir, _) = setup(config(60_000, 0)).await;

        let mut record = ProgressRecord::at("c1", "a.mp4", 10.0, 100.0, 1);
        record.completed = true;
        let saved = store.save(record).await.unwrap();
        assert!(!saved.completed);

        let mut record = ProgressRecord::at("c1", "b.mp4", 96.0, 100.0, 2);
        record.completed = false;
        store.save(record).await.unwrap();
        assert!(store.get("c1", "b.mp4").await.unwrap().unwrap().completed);
    }

    #[tokio::test]
    async fn test_save_queues_sync_item_atomically() {
        let db = Database::new_in_memory().await.unwrap();
        let queue = SyncQueue::new(
            db.pool().clone(),
            Some(DeviceId::new("device-1").unwrap()),
            Arc::new(AcceptAll),
        )
        .await
        .unwrap();
        let store = ProgressStore::new(
            db.pool().clone(),
            &config(60_000, 0),
            CourseLocks::new(),
            Some(Arc::new(queue)),
        );

        store
            .save(ProgressRecord::at("c1", "a.mp4", 10.0, 100.0, 1))
            .await
            .unwrap();
        assert_eq!(queries::count_pending_sync_items(db.pool()).await.unwrap(), 1);

        sqlx::query(
            "CREATE TRIGGER reject_sync_items BEFORE INSERT ON SyncQueue \
             BEGIN SELECT RAISE(ABORT, 'queue unavailable'); END",
        )
        .execute(db.pool())
        .await
        .unwrap();

        let result = store.save(ProgressRecord::at("c1", "b.mp4", 20.0, 100.0, 2)).await;
        assert!(result.is_err());
        assert!(store.get("c1", "b.mp4").await.unwrap().is_none());
        assert_eq!(queries::count_pending_sync_items(db.pool()).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_save_is_idempotent() {
        let (db, store, _dir, _) = setup(config(60_000, 0)).await;
        let record = ProgressRecord::at("c1", "a.mp4", 10.0, 100.0, 1);

        store.save(record.clone()).await.unwrap();
        store.save(record.clone()).await.unwrap();

        let rows: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM VideoProgress")
            .fetch_one(db.pool())
            .await
            .unwrap();
        assert_eq!(rows, 1);
        assert_eq!(store.get("c1", "a.mp4").await.unwrap(), Some(record));
    }

    #[tokio::test]
    async fn test_mirror_is_throttled_until_flush() {
        let (_db, store, dir, handle) = setup(config(60_000, 0)).await;
        store.attach_directory("c1", handle).await;

        store.save(ProgressRecord::at("c1", "a.mp4", 10.0, 100.0, 1)).await.unwrap();
        store.save(ProgressRecord::at("c1", "a.mp4", 20.0, 100.0, 2)).await.unwrap();

        // Leading edge written, second save held back
        let file = read_file(&dir);
        assert_eq!(file.get("c1", "a.mp4").unwrap().current_time_seconds, 10.0);

        assert!(store.flush("c1").await.unwrap());
        let file = read_file(&dir);
        assert_eq!(file.get("c1", "a.mp4").unwrap().current_time_seconds, 20.0);

        // Nothing left to write
        assert!(!store.flush("c1").await.unwrap());
    }

    #[tokio::test]
    async fn test_flush_respects_min_spacing() {
        let (_db, store, _dir, handle) = setup(config(60_000, 150)).await;
        store.attach_directory("c1", handle).await;

        store.save(ProgressRecord::at("c1", "a.mp4", 10.0, 100.0, 1)).await.unwrap();
        store.save(ProgressRecord::at("c1", "a.mp4", 20.0, 100.0, 2)).await.unwrap();

        let started = Instant::now();
        assert!(store.flush("c1").await.unwrap());
        assert!(started.elapsed() >= Duration::from_millis(100));
    }

    #[tokio::test]
    async fn test_newer_portable_record_wins_and_repairs_database() {
        let (_db, store, dir, handle) = setup(config(60_000, 0)).await;
        store.save(ProgressRecord::at("c1", "a.mp4", 10.0, 100.0, 1)).await.unwrap();

        // Written by another device into the copied folder, under another course id
        let mut file = PortableFile::default();
        file.merge(&ProgressRecord::at("other-course", "a.mp4", 70.0, 100.0, 50));
        std::fs::write(dir.path().join(FILE), file.to_bytes().unwrap()).unwrap();

        store.attach_directory("c1", handle).await;
        let got = store.get("c1", "a.mp4").await.unwrap().unwrap();
        assert_eq!(got.current_time_seconds, 70.0);
        assert_eq!(got.course_id, "c1");

        store.settle().await;
        store.detach_directory("c1").await;
        let local = store.get("c1", "a.mp4").await.unwrap().unwrap();
        assert_eq!(local.current_time_seconds, 70.0);
        assert_eq!(local.last_watched_at, 50);
    }

    #[tokio::test]
    async fn test_newer_local_record_repairs_portable_file() {
        let (_db, store, dir, handle) = setup(config(60_000, 0)).await;
        store.save(ProgressRecord::at("c1", "a.mp4", 40.0, 100.0, 30)).await.unwrap();

        let mut file = PortableFile::default();
        file.merge(&ProgressRecord::at("c1", "a.mp4", 5.0, 100.0, 10));
        std::fs::write(dir.path().join(FILE), file.to_bytes().unwrap()).unwrap();

        store.attach_directory("c1", handle).await;
        let got = store.get("c1", "a.mp4").await.unwrap().unwrap();
        assert_eq!(got.current_time_seconds, 40.0);

        store.settle().await;
        assert_eq!(read_file(&dir).get("c1", "a.mp4").unwrap().current_time_seconds, 40.0);
    }

    #[tokio::test]
    async fn test_read_only_folder_stays_local() {
        let (_db, store, dir, handle) = setup(config(0, 0)).await;
        handle.set_permission(AccessMode::ReadWrite, PermissionState::Denied);
        store.attach_directory("c1", handle).await;

        store.save(ProgressRecord::at("c1", "a.mp4", 10.0, 100.0, 1)).await.unwrap();
        assert!(!store.flush("c1").await.unwrap());
        assert!(!dir.path().join(FILE).exists());
        assert!(store.get("c1", "a.mp4").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_malformed_file_degrades_to_local() {
        let (_db, store, dir, handle) = setup(config(0, 0)).await;
        std::fs::write(dir.path().join(FILE), b"{not json").unwrap();
        store.attach_directory("c1", handle).await;

        let saved = store.save(ProgressRecord::at("c1", "a.mp4", 10.0, 100.0, 1)).await.unwrap();
        assert_eq!(store.get("c1", "a.mp4").await.unwrap(), Some(saved));
        // The unreadable file is left for the user, not overwritten
        assert_eq!(std::fs::read(dir.path().join(FILE)).unwrap(), b"{not json");
    }
}
