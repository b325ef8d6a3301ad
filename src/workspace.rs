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


//! Course workspace
//!
//! Wires the handle store, metadata cache, progress store and sync queue
//! over one database, following the usual flow: a validated folder handle
//! feeds the scan, the scan feeds the player, and the player's progress
//! feeds the sync queue.

use crate::config::CacheConfig;
use crate::error::Result;
use crate::file::capabilities::{CapabilityDetector, PlatformSupport};
use crate::file::handle::{AccessMode, DirectoryHandle, HandleOpener, PermissionState, PermissionStatus};
use crate::file::locks::CourseLocks;
use crate::library::cache::{MetadataCache, ScanOutcome};
use crate::player::session::PlayerSession;
use crate::player::surface::PlaybackSurface;
use crate::progress::ProgressStore;
use crate::storage::handles::{HandleReadiness, HandleStore};
use crate::storage::models::{ProgressRecord, VideoEntry};
use crate::storage::Database;
use crate::sync::{DeviceId, DrainReport, HttpSyncTransport, SyncQueue, SyncTransport};
use std::sync::Arc;

/// What the learner sees when opening a course
#[derive(Debug, Clone)]
pub enum CourseView {
    /// No folder was ever picked for this course
    NotSelected,
    /// A folder was picked but access has to be granted again
    NeedsRegrant { status: PermissionStatus },
    Ready {
        handle: Arc<dyn DirectoryHandle>,
        videos: Vec<VideoEntry>,
        progress: Vec<ProgressRecord>,
    },
}

impl CourseView {
    pub fn is_ready(&self) -> bool {
        matches!(self, CourseView::Ready { .. })
    }
}

#[derive(Debug)]
pub struct CourseWorkspace {
    config: CacheConfig,
    database: Database,
    support: PlatformSupport,
    handles: HandleStore,
    metadata: MetadataCache,
    progress: ProgressStore,
    sync: Option<Arc<SyncQueue>>,
}

impl CourseWorkspace {
    /// Open the workspace on the configured database file
    pub async fn open(
        config: CacheConfig,
        opener: Arc<dyn HandleOpener>,
        detector: &dyn CapabilityDetector,
    ) -> Result<Self> {
        config.validate()?;
        let support = PlatformSupport::detect(detector);
        support.ensure_supported()?;

        let database = Database::new(&config.database_path).await?;
        Self::assemble(config, database, support, opener, None).await
    }

    /// Open on an existing database, optionally with a custom sync transport
    pub async fn with_database(
        config: CacheConfig,
        database: Database,
        opener: Arc<dyn HandleOpener>,
        detector: &dyn CapabilityDetector,
        transport: Option<Arc<dyn SyncTransport>>,
    ) -> Result<Self> {
        config.validate()?;
        let support = PlatformSupport::detect(detector);
        support.ensure_supported()?;

        Self::assemble(config, database, support, opener, transport).await
    }

    async fn assemble(
        config: CacheConfig,
        database: Database,
        support: PlatformSupport,
        opener: Arc<dyn HandleOpener>,
        transport: Option<Arc<dyn SyncTransport>>,
    ) -> Result<Self> {
        let pool = database.pool().clone();
        let sync = open_sync_queue(&config, &database, transport).await?;
        let locks = CourseLocks::new();

        Ok(Self {
            handles: HandleStore::new(pool.clone(), opener),
            metadata: MetadataCache::new(pool.clone(), locks.clone()),
            progress: ProgressStore::new(pool, &config, locks, sync.clone()),
            sync,
            support,
            database,
            config,
        })
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    pub fn support(&self) -> PlatformSupport {
        self.support
    }

    pub fn handles(&self) -> &HandleStore {
        &self.handles
    }

    pub fn metadata(&self) -> &MetadataCache {
        &self.metadata
    }

    pub fn progress(&self) -> &ProgressStore {
        &self.progress
    }

    pub fn sync(&self) -> Option<&Arc<SyncQueue>> {
        self.sync.as_ref()
    }

    /// Record the folder the learner picked for a course
    ///
    /// Asks for write access when the host supports it so progress can be
    /// mirrored into the folder; read access alone is enough to continue.
    pub async fn select_directory(
        &self,
        course_id: &str,
        handle: Arc<dyn DirectoryHandle>,
    ) -> Result<HandleReadiness> {
        self.request_access(handle.as_ref()).await;
        self.handles.save(course_id, handle.as_ref()).await?;
        self.handles.resolve(course_id, AccessMode::Read).await
    }

    /// Ask again for access to a course's stored folder
    pub async fn regrant(&self, course_id: &str) -> Result<HandleReadiness> {
        if let Some(handle) = self.handles.load(course_id).await? {
            self.request_access(handle.as_ref()).await;
        }
        self.handles.resolve(course_id, AccessMode::Read).await
    }

    /// Open a course: verify its folder, list its videos and progress
    pub async fn resume_course(&self, course_id: &str) -> Result<CourseView> {
        let handle = match self.handles.resolve(course_id, AccessMode::Read).await? {
            HandleReadiness::Ready(handle) => handle,
            HandleReadiness::NotSelected => return Ok(CourseView::NotSelected),
            HandleReadiness::NeedsRegrant { status, .. } => {
                self.progress.detach_directory(course_id).await;
                return Ok(CourseView::NeedsRegrant { status });
            }
        };

        let videos = match self.metadata.get_or_scan(course_id, handle.as_ref()).await? {
            ScanOutcome::Ready(videos) => videos,
            ScanOutcome::NeedsRegrant(status) => {
                self.progress.detach_directory(course_id).await;
                return Ok(CourseView::NeedsRegrant { status });
            }
        };

        if self.support.write_access {
            self.progress.attach_directory(course_id, handle.clone()).await;
        }
        let progress = self.progress.list(course_id).await?;

        Ok(CourseView::Ready {
            handle,
            videos,
            progress,
        })
    }

    /// Player for a course whose folder is ready
    pub fn new_player(
        &self,
        course_id: &str,
        handle: Arc<dyn DirectoryHandle>,
        surface: Arc<dyn PlaybackSurface>,
    ) -> PlayerSession {
        PlayerSession::new(course_id, handle, surface, self.progress.clone(), &self.config)
    }

    /// Try to deliver queued progress; a no-op without a device id
    pub async fn drain_sync(&self) -> Result<DrainReport> {
        match &self.sync {
            Some(queue) => queue.drain().await,
            None => Ok(DrainReport::default()),
        }
    }

    /// Drop everything remembered about a course folder
    ///
    /// Progress is kept; only the folder grant and its scan go away.
    pub async fn forget(&self, course_id: &str) -> Result<bool> {
        self.progress.flush(course_id).await?;
        self.progress.detach_directory(course_id).await;
        self.metadata.invalidate(course_id).await?;
        self.handles.forget(course_id).await
    }

    /// SQLite integrity check of the cache database
    pub async fn check_integrity(&self) -> Result<bool> {
        let ok = self.database.check_integrity().await?;
        if !ok {
            tracing::warn!("Cache database failed its integrity check");
        }
        Ok(ok)
    }

    /// Flush pending mirrors, wait for repairs and close the database
    pub async fn shutdown(self) -> Result<()> {
        self.progress.flush_all().await?;
        self.progress.settle().await;
        self.database.close().await
    }

    async fn request_access(&self, handle: &dyn DirectoryHandle) {
        if self.support.write_access
            && handle.request_permission(AccessMode::ReadWrite).await == PermissionState::Granted
        {
            return;
        }

        let state = handle.request_permission(AccessMode::Read).await;
        if state != PermissionState::Granted {
            tracing::info!(folder = %handle.display_name(), ?state, "Folder access not granted");
        }
    }
}

async fn open_sync_queue(
    config: &CacheConfig,
    database: &Database,
    transport: Option<Arc<dyn SyncTransport>>,
) -> Result<Option<Arc<SyncQueue>>> {
    let Some(device_id) = config.sync.device_id.as_deref().filter(|d| !d.trim().is_empty()) else {
        return Ok(None);
    };

    let transport: Arc<dyn SyncTransport> = match transport {
        Some(transport) => transport,
        None => match HttpSyncTransport::from_config(&config.sync)? {
            Some(http) => Arc::new(http),
            None => {
                tracing::info!("Device id set but no sync endpoint, remote sync disabled");
                return Ok(None);
            }
        },
    };

    let queue = SyncQueue::new(
        database.pool().clone(),
        Some(DeviceId::new(device_id)?),
        transport,
    )
    .await?;
    Ok(Some(Arc::new(queue)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::CourseCacheError;
    use crate::file::capabilities::{NativeDetector, StaticDetector};
    use crate::file::handle::HandleRef;
    use crate::file::local::{LocalDirectory, LocalOpener};
    use crate::file::testing::FlakyDirectory;
    use tempfile::TempDir;

    struct FixedOpener(Arc<FlakyDirectory>);

    impl HandleOpener for FixedOpener {
        fn open(&self, _handle_ref: &HandleRef) -> Option<Arc<dyn DirectoryHandle>> {
            Some(self.0.clone())
        }
    }

    async fn workspace(opener: Arc<LocalOpener>) -> CourseWorkspace {
        let db = Database::new_in_memory().await.unwrap();
        CourseWorkspace::with_database(CacheConfig::default(), db, opener, &NativeDetector, None)
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_select_then_resume() {
        let temp_dir = TempDir::new().unwrap();
        std::fs::write(temp_dir.path().join("1 - Intro.mp4"), b"x").unwrap();
        let opener = Arc::new(LocalOpener::new());
        let picked = LocalDirectory::new(temp_dir.path());
        opener.register(&picked);
        let ws = workspace(opener).await;

        assert!(matches!(ws.resume_course("c1").await.unwrap(), CourseView::NotSelected));
        assert!(ws.select_directory("c1", Arc::new(picked)).await.unwrap().is_ready());

        match ws.resume_course("c1").await.unwrap() {
            CourseView::Ready { videos, progress, .. } => {
                assert_eq!(videos.len(), 1);
                assert!(progress.is_empty());
            }
            other => panic!("unexpected view: {:?}", other),
        }
        assert!(ws.sync().is_none());
    }

    #[tokio::test]
    async fn test_regrant_after_lapse() {
        let temp_dir = TempDir::new().unwrap();
        let opener = Arc::new(LocalOpener::new());
        let picked = LocalDirectory::new(temp_dir.path());
        opener.register(&picked);
        let ws = workspace(opener).await;
        ws.select_directory("c1", Arc::new(picked.clone())).await.unwrap();

        picked.revoke();
        assert!(matches!(
            ws.resume_course("c1").await.unwrap(),
            CourseView::NeedsRegrant { status: PermissionStatus::Revoked }
        ));

        picked.set_prompt_response(PermissionState::Granted);
        assert!(ws.regrant("c1").await.unwrap().is_ready());
        assert!(ws.resume_course("c1").await.unwrap().is_ready());
    }

    #[tokio::test]
    async fn test_unsupported_environment() {
        let db = Database::new_in_memory().await.unwrap();
        let detector = StaticDetector(PlatformSupport {
            directory_access: false,
            write_access: false,
            persistent_handles: false,
        });

        let err = CourseWorkspace::with_database(
            CacheConfig::default(),
            db,
            Arc::new(LocalOpener::new()),
            &detector,
            None,
        )
        .await
        .unwrap_err();
        assert!(matches!(err, CourseCacheError::UnsupportedEnvironment(_)));
    }

    #[tokio::test]
    async fn test_forget_keeps_progress() {
        let temp_dir = TempDir::new().unwrap();
        std::fs::write(temp_dir.path().join("a.mp4"), b"x").unwrap();
        let opener = Arc::new(LocalOpener::new());
        let picked = LocalDirectory::new(temp_dir.path());
        opener.register(&picked);
        let ws = workspace(opener).await;
        ws.select_directory("c1", Arc::new(picked)).await.unwrap();
        ws.resume_course("c1").await.unwrap();
        ws.progress()
            .save(ProgressRecord::at("c1", "a.mp4", 5.0, 10.0, 1))
            .await
            .unwrap();

        assert!(ws.forget("c1").await.unwrap());
        assert!(matches!(ws.resume_course("c1").await.unwrap(), CourseView::NotSelected));
        assert!(ws.metadata().cached("c1").await.unwrap().is_none());
        assert_eq!(ws.progress().list("c1").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_access_lost_during_scan_stops_mirroring() {
        let temp_dir = TempDir::new().unwrap();
        std::fs::write(temp_dir.path().join("a.mp4"), b"x").unwrap();
        let folder = Arc::new(FlakyDirectory::new(temp_dir.path()));
        let db = Database::new_in_memory().await.unwrap();
        let ws = CourseWorkspace::with_database(
            CacheConfig::default(),
            db,
            Arc::new(FixedOpener(folder.clone())),
            &NativeDetector,
            None,
        )
        .await
        .unwrap();

        ws.select_directory("c1", folder.clone()).await.unwrap();
        assert!(ws.resume_course("c1").await.unwrap().is_ready());

        folder.deny_listing("");
        assert!(matches!(
            ws.resume_course("c1").await.unwrap(),
            CourseView::NeedsRegrant { status: PermissionStatus::Revoked }
        ));

        ws.progress()
            .save(ProgressRecord::at("c1", "a.mp4", 5.0, 10.0, 1))
            .await
            .unwrap();
        assert!(!temp_dir.path().join(&ws.config().portable_file_name).exists());
    }

    #[tokio::test]
    async fn test_integrity_check() {
        let ws = workspace(Arc::new(LocalOpener::new())).await;
        assert!(ws.check_integrity().await.unwrap());
    }
}
