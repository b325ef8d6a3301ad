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


//! Metadata cache
//!
//! Remembers the scan of each course folder keyed by a directory
//! fingerprint. A repeat visit with an unchanged folder costs one listing
//! walk and no re-sort or rewrite of the cached entries.
//!
//! # Flow
//! 1. Verify read permission; a missing grant short-circuits before the
//!    cache is read or written
//! 2. Walk the folder and fingerprint the result
//! 3. Reuse the stored entries on a fingerprint match, otherwise sort and
//!    replace them
//!
//! Concurrent calls for the same course are serialized by a per-course lock.

use crate::error::Result;
use crate::file::handle::{check_access, AccessMode, DirectoryHandle, PermissionStatus};
use crate::file::locks::CourseLocks;
use crate::library::fingerprint::fingerprint;
use crate::library::order::sort_entries;
use crate::library::scanner;
use crate::storage::models::{MetadataCacheEntry, VideoEntry};
use crate::storage::queries;
use chrono::Utc;
use sqlx::SqlitePool;
use std::sync::atomic::{AtomicU64, Ordering};

/// Result of `get_or_scan`
#[derive(Debug, Clone, PartialEq)]
pub enum ScanOutcome {
    /// Videos in natural order
    Ready(Vec<VideoEntry>),
    /// The folder grant does not hold; nothing was scanned or cached
    NeedsRegrant(PermissionStatus),
}

impl ScanOutcome {
    pub fn entries(&self) -> Option<&[VideoEntry]> {
        match self {
            ScanOutcome::Ready(entries) => Some(entries),
            ScanOutcome::NeedsRegrant(_) => None,
        }
    }

    pub fn into_entries(self) -> Option<Vec<VideoEntry>> {
        match self {
            ScanOutcome::Ready(entries) => Some(entries),
            ScanOutcome::NeedsRegrant(_) => None,
        }
    }
}

/// Scan cache backed by the `VideoMetadata` collection
#[derive(Debug)]
pub struct MetadataCache {
    pool: SqlitePool,
    locks: CourseLocks,
    scans: AtomicU64,
}

impl MetadataCache {
    /// `locks` must be shared with the progress store so scans and portable
    /// writes for one course never overlap
    pub fn new(pool: SqlitePool, locks: CourseLocks) -> Self {
        Self {
            pool,
            locks,
            scans: AtomicU64::new(0),
        }
    }

    /// Return the course's videos, scanning only when the folder changed
    pub async fn get_or_scan(
        &self,
        course_id: &str,
        handle: &dyn DirectoryHandle,
    ) -> Result<ScanOutcome> {
        let status = check_access(handle, AccessMode::Read).await;
        if !status.is_granted() {
            tracing::info!(course_id, ?status, "Skipping scan, folder needs re-grant");
            return Ok(ScanOutcome::NeedsRegrant(status));
        }

        let _guard = self.locks.acquire(course_id).await;

        let walked = match scanner::walk(handle).await {
            Ok(walked) => walked,
            Err(e) if e.needs_regrant() => {
                tracing::warn!(course_id, error = %e, "Permission lost during scan");
                return Ok(ScanOutcome::NeedsRegrant(PermissionStatus::Revoked));
            }
            Err(e) => {
                // Serve the last good scan rather than nothing
                return match self.cached(course_id).await? {
                    Some(entry) => {
                        tracing::warn!(course_id, error = %e, "Scan failed, serving cached entries");
                        Ok(ScanOutcome::Ready(entry.entries))
                    }
                    None => Err(e),
                };
            }
        };

        let current = fingerprint(&walked.videos);
        if let Some(entry) = self.cached(course_id).await? {
            if entry.fingerprint == current {
                tracing::debug!(course_id, fingerprint = %current, "Metadata cache hit");
                return Ok(ScanOutcome::Ready(entry.entries));
            }
        }

        let mut videos = walked.videos;
        sort_entries(&mut videos);

        let entry = MetadataCacheEntry {
            course_id: course_id.to_string(),
            fingerprint: current,
            entries: videos,
            scanned_at: Utc::now(),
        };
        queries::upsert_metadata(&self.pool, &entry).await?;
        self.scans.fetch_add(1, Ordering::Relaxed);

        tracing::info!(
            course_id,
            videos = entry.entries.len(),
            skipped_dirs = walked.skipped_dirs.len(),
            "Scanned course folder"
        );

        Ok(ScanOutcome::Ready(entry.entries))
    }

    /// Stored scan for a course, if any
    ///
    /// A row that no longer decodes is reported as absent so the next call
    /// rescans and overwrites it.
    pub async fn cached(&self, course_id: &str) -> Result<Option<MetadataCacheEntry>> {
        match queries::find_metadata(&self.pool, course_id).await {
            Ok(entry) => Ok(entry),
            Err(e @ crate::error::CourseCacheError::InvalidDatabaseEntity { .. }) => {
                tracing::warn!(course_id, error = %e, "Discarding unreadable metadata cache entry");
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    /// Drop the stored scan so the next call rescans
    pub async fn invalidate(&self, course_id: &str) -> Result<bool> {
        let _guard = self.locks.acquire(course_id).await;
        queries::delete_metadata(&self.pool, course_id).await
    }

    /// Number of full scans written since construction
    pub fn scan_count(&self) -> u64 {
        self.scans.load(Ordering::Relaxed)
    }
}
