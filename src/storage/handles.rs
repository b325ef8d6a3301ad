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


//! Directory handle storage
//!
//! Maps course ids to the folder grant the learner picked. The store keeps
//! only a `HandleRef`; the live handle is rebuilt through a `HandleOpener`
//! and must pass `verify` before it is used for anything.
//!
//! A failed verification never deletes or rewrites the record. Only
//! `forget`, which callers wire to an explicit user action, removes it.

use crate::error::Result;
use crate::file::handle::{check_access, AccessMode, DirectoryHandle, HandleOpener, PermissionStatus};
use crate::storage::models::DirectoryHandleRecord;
use crate::storage::queries;
use sqlx::SqlitePool;
use std::fmt;
use std::sync::Arc;

/// Whether a course folder can be used right now
#[derive(Debug, Clone)]
pub enum HandleReadiness {
    /// Permission verified; safe to scan and read
    Ready(Arc<dyn DirectoryHandle>),
    /// The learner never picked a folder for this course
    NotSelected,
    /// A folder was picked but the grant does not currently hold
    NeedsRegrant {
        handle: Option<Arc<dyn DirectoryHandle>>,
        status: PermissionStatus,
    },
}

impl HandleReadiness {
    pub fn is_ready(&self) -> bool {
        matches!(self, HandleReadiness::Ready(_))
    }
}

/// Durable course-to-folder mapping
pub struct HandleStore {
    pool: SqlitePool,
    opener: Arc<dyn HandleOpener>,
}

impl fmt::Debug for HandleStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HandleStore").finish_non_exhaustive()
    }
}

impl HandleStore {
    pub fn new(pool: SqlitePool, opener: Arc<dyn HandleOpener>) -> Self {
        Self { pool, opener }
    }

    /// Remember the folder picked for a course, replacing any earlier pick
    pub async fn save(&self, course_id: &str, handle: &dyn DirectoryHandle) -> Result<()> {
        queries::upsert_handle(&self.pool, course_id, &handle.handle_ref()).await?;
        tracing::info!(course_id, folder = %handle.display_name(), "Saved directory handle");
        Ok(())
    }

    /// Load the stored handle without checking permission
    ///
    /// Returns `None` both when nothing was stored and when the host cannot
    /// materialize the stored reference; the record itself is left alone.
    pub async fn load(&self, course_id: &str) -> Result<Option<Arc<dyn DirectoryHandle>>> {
        let Some(record) = queries::find_handle(&self.pool, course_id).await? else {
            return Ok(None);
        };

        let handle = self.opener.open(&record.handle);
        if handle.is_none() {
            tracing::warn!(
                course_id,
                kind = %record.handle.kind,
                "Stored directory handle cannot be opened by this host"
            );
        }
        Ok(handle)
    }

    /// Live permission check against the host grant
    pub async fn verify(&self, handle: &dyn DirectoryHandle, mode: AccessMode) -> PermissionStatus {
        check_access(handle, mode).await
    }

    /// Load and verify in one step
    pub async fn resolve(&self, course_id: &str, mode: AccessMode) -> Result<HandleReadiness> {
        let record_exists = queries::find_handle(&self.pool, course_id).await?.is_some();
        if !record_exists {
            return Ok(HandleReadiness::NotSelected);
        }

        let Some(handle) = self.load(course_id).await? else {
            return Ok(HandleReadiness::NeedsRegrant {
                handle: None,
                status: PermissionStatus::Revoked,
            });
        };

        let status = self.verify(handle.as_ref(), mode).await;
        if status.is_granted() {
            Ok(HandleReadiness::Ready(handle))
        } else {
            tracing::debug!(course_id, ?status, "Directory handle needs re-grant");
            Ok(HandleReadiness::NeedsRegrant {
                handle: Some(handle),
                status,
            })
        }
    }

    /// Stored record, for diagnostics
    pub async fn record(&self, course_id: &str) -> Result<Option<DirectoryHandleRecord>> {
        queries::find_handle(&self.pool, course_id).await
    }

    /// Remove the stored handle; only for explicit user action
    pub async fn forget(&self, course_id: &str) -> Result<bool> {
        let removed = queries::delete_handle(&self.pool, course_id).await?;
        if removed {
            tracing::info!(course_id, "Forgot directory handle");
        }
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::file::local::{LocalDirectory, LocalOpener};
    use crate::storage::Database;
    use tempfile::TempDir;

    async fn setup() -> (Database, HandleStore, Arc<LocalOpener>) {
        let db = Database::new_in_memory().await.unwrap();
        let opener = Arc::new(LocalOpener::new());
        let store = HandleStore::new(db.pool().clone(), opener.clone());
        (db, store, opener)
    }

    #[tokio::test]
    async fn test_not_selected_is_not_an_error() {
        let (_db, store, _) = setup().await;

        assert!(store.load("unknown").await.unwrap().is_none());
        assert!(matches!(
            store.resolve("unknown", AccessMode::Read).await.unwrap(),
            HandleReadiness::NotSelected
        ));
    }

    #[tokio::test]
    async fn test_save_load_and_resolve() {
        let temp_dir = TempDir::new().unwrap();
        let (_db, store, opener) = setup().await;
        let picked = LocalDirectory::new(temp_dir.path());
        opener.register(&picked);

        store.save("rust-101", &picked).await.unwrap();

        let loaded = store.load("rust-101").await.unwrap().unwrap();
        assert_eq!(loaded.handle_ref(), picked.handle_ref());
        assert!(store.resolve("rust-101", AccessMode::Read).await.unwrap().is_ready());
    }

    #[tokio::test]
    async fn test_failed_verify_keeps_record() {
        let temp_dir = TempDir::new().unwrap();
        let (_db, store, opener) = setup().await;
        let picked = LocalDirectory::new(temp_dir.path());
        opener.register(&picked);
        store.save("rust-101", &picked).await.unwrap();

        picked.revoke();
        let readiness = store.resolve("rust-101", AccessMode::Read).await.unwrap();
        assert!(matches!(
            readiness,
            HandleReadiness::NeedsRegrant { status: PermissionStatus::Revoked, .. }
        ));

        // Still there, untouched
        let record = store.record("rust-101").await.unwrap().unwrap();
        assert_eq!(record.handle, picked.handle_ref());
    }

    #[tokio::test]
    async fn test_forget_removes_record() {
        let temp_dir = TempDir::new().unwrap();
        let (_db, store, _) = setup().await;
        store.save("rust-101", &LocalDirectory::new(temp_dir.path())).await.unwrap();

        assert!(store.forget("rust-101").await.unwrap());
        assert!(!store.forget("rust-101").await.unwrap());
        assert!(store.record("rust-101").await.unwrap().is_none());
    }
}
