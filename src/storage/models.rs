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


//! Data models for the learning cache
//!
//! # Model Categories
//! - **Directory grants**: `DirectoryHandleRecord` (one per course)
//! - **Scanned metadata**: `VideoEntry`, `SubtitleTrack`, `MetadataCacheEntry`
//! - **Progress**: `ProgressRecord`, shared by the database, the portable
//!   progress file and the sync queue
//! - **Sync**: `SyncQueueItem`, `SyncStatus`
//!
//! Row structs (`*Row`) mirror table columns; the public models are what the
//! rest of the crate works with.

use crate::error::{CourseCacheError, Result};
use crate::file::handle::HandleRef;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// A lecture is completed once this much of it has been watched
pub const COMPLETION_THRESHOLD_PERCENT: f64 = 95.0;

/// Current wall-clock time in epoch milliseconds
pub fn now_ms() -> i64 {
    Utc::now().timestamp_millis()
}

// ============================================================================
// DIRECTORY HANDLES
// ============================================================================

/// Persisted directory grant for a course
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DirectoryHandleRecord {
    pub course_id: String,
    pub handle: HandleRef,
    pub granted_at: DateTime<Utc>,
}

#[derive(Debug, Clone, FromRow)]
pub(crate) struct DirectoryHandleRow {
    pub course_id: String,
    pub handle_ref: String,
    pub granted_at: DateTime<Utc>,
}

impl TryFrom<DirectoryHandleRow> for DirectoryHandleRecord {
    type Error = CourseCacheError;

    fn try_from(row: DirectoryHandleRow) -> Result<Self> {
        let handle = serde_json::from_str(&row.handle_ref).map_err(|e| {
            CourseCacheError::InvalidDatabaseEntity {
                entity_type: "DirectoryHandle".to_string(),
                message: e.to_string(),
            }
        })?;

        Ok(Self {
            course_id: row.course_id,
            handle,
            granted_at: row.granted_at,
        })
    }
}

// ============================================================================
// SCANNED METADATA
// ============================================================================

/// Playable video found under a course folder
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VideoEntry {
    /// Path relative to the course root, `/`-separated
    pub path: String,
    pub size: u64,
    /// Modification time in epoch milliseconds
    pub last_modified_at: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_hint: Option<f64>,
}

impl VideoEntry {
    /// File name without directories
    pub fn file_name(&self) -> &str {
        crate::file::handle::split_relative(&self.path).1
    }

    /// Lecture key used for progress records
    pub fn lecture_key(&self) -> &str {
        &self.path
    }
}

/// Subtitle file associated with a video by naming convention
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubtitleTrack {
    /// Language code, `"und"` when the file name carries none
    pub language: String,
    pub label: String,
    pub source_path: String,
    /// First discovered track is the default one
    #[serde(default)]
    pub is_default: bool,
}

/// Cached scan result for a course
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetadataCacheEntry {
    pub course_id: String,
    pub fingerprint: String,
    pub entries: Vec<VideoEntry>,
    pub scanned_at: DateTime<Utc>,
}

#[derive(Debug, Clone, FromRow)]
pub(crate) struct VideoMetadataRow {
    pub course_id: String,
    pub fingerprint: String,
    pub entries: String,
    pub scanned_at: DateTime<Utc>,
}

impl TryFrom<VideoMetadataRow> for MetadataCacheEntry {
    type Error = CourseCacheError;

    fn try_from(row: VideoMetadataRow) -> Result<Self> {
        let entries = serde_json::from_str(&row.entries).map_err(|e| {
            CourseCacheError::InvalidDatabaseEntity {
                entity_type: "VideoMetadata".to_string(),
                message: e.to_string(),
            }
        })?;

        Ok(Self {
            course_id: row.course_id,
            fingerprint: row.fingerprint,
            entries,
            scanned_at: row.scanned_at,
        })
    }
}

// ============================================================================
// PROGRESS
// ============================================================================

/// Watch progress for one lecture of one course
///
/// `completed` is always derived from `progress_percent`; whatever a caller
/// puts there is overwritten by `normalized()` before anything is stored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressRecord {
    pub course_id: String,
    pub lecture_key: String,
    pub progress_percent: f64,
    #[serde(rename = "currentTime")]
    pub current_time_seconds: f64,
    #[serde(rename = "totalDuration")]
    pub total_duration_seconds: f64,
    pub completed: bool,
    /// Epoch milliseconds; the larger value wins between backends
    pub last_watched_at: i64,
}

impl ProgressRecord {
    /// Build a record from a playback position, stamped with the current time
    pub fn from_position<C: Into<String>, L: Into<String>>(
        course_id: C,
        lecture_key: L,
        current_time_seconds: f64,
        total_duration_seconds: f64,
    ) -> Self {
        Self::at(
            course_id,
            lecture_key,
            current_time_seconds,
            total_duration_seconds,
            now_ms(),
        )
    }

    /// Build a record with an explicit `last_watched_at`
    pub fn at<C: Into<String>, L: Into<String>>(
        course_id: C,
        lecture_key: L,
        current_time_seconds: f64,
        total_duration_seconds: f64,
        last_watched_at: i64,
    ) -> Self {
        let progress_percent = if total_duration_seconds > 0.0 {
            current_time_seconds * 100.0 / total_duration_seconds
        } else {
            0.0
        };

        Self {
            course_id: course_id.into(),
            lecture_key: lecture_key.into(),
            progress_percent,
            current_time_seconds,
            total_duration_seconds,
            completed: false,
            last_watched_at,
        }
        .normalized()
    }

    /// Clamp values into range and derive `completed`
    pub fn normalized(mut self) -> Self {
        if !self.progress_percent.is_finite() {
            self.progress_percent = 0.0;
        }
        self.progress_percent = self.progress_percent.clamp(0.0, 100.0);
        if !self.current_time_seconds.is_finite() || self.current_time_seconds < 0.0 {
            self.current_time_seconds = 0.0;
        }
        if !self.total_duration_seconds.is_finite() || self.total_duration_seconds < 0.0 {
            self.total_duration_seconds = 0.0;
        }
        self.completed = self.progress_percent >= COMPLETION_THRESHOLD_PERCENT;
        self
    }

    /// Whether `self` should replace `other` under last-write-wins
    pub fn is_newer_than(&self, other: &ProgressRecord) -> bool {
        self.last_watched_at > other.last_watched_at
    }

    /// Position to resume playback from
    ///
    /// Completed lectures start over from the beginning.
    pub fn resume_position(&self) -> f64 {
        if self.completed {
            0.0
        } else {
            self.current_time_seconds
        }
    }
}

#[derive(Debug, Clone, FromRow)]
pub(crate) struct VideoProgressRow {
    pub course_id: String,
    pub lecture_key: String,
    pub progress_percent: f64,
    pub current_time_seconds: f64,
    pub total_duration_seconds: f64,
    pub last_watched_at: i64,
}

impl From<VideoProgressRow> for ProgressRecord {
    fn from(row: VideoProgressRow) -> Self {
        ProgressRecord {
            course_id: row.course_id,
            lecture_key: row.lecture_key,
            progress_percent: row.progress_percent,
            current_time_seconds: row.current_time_seconds,
            total_duration_seconds: row.total_duration_seconds,
            completed: false,
            last_watched_at: row.last_watched_at,
        }
        .normalized()
    }
}

// ============================================================================
// SYNC QUEUE
// ============================================================================

/// Delivery state of a queued item
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SyncStatus {
    #[serde(rename = "pending")]
    Pending,
    #[serde(rename = "in_flight")]
    InFlight,
}

impl SyncStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncStatus::Pending => "pending",
            SyncStatus::InFlight => "in_flight",
        }
    }

    pub fn from_str(s: &str) -> Result<Self> {
        match s {
            "pending" => Ok(SyncStatus::Pending),
            "in_flight" => Ok(SyncStatus::InFlight),
            _ => Err(CourseCacheError::InvalidInput(format!("Invalid sync status: {}", s))),
        }
    }
}

/// Progress record waiting for acknowledgment by the sync endpoint
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncQueueItem {
    pub item_id: i64,
    pub device_id: String,
    pub progress: ProgressRecord,
    pub status: SyncStatus,
    pub attempts: i64,
    pub last_error: Option<String>,
    /// Epoch milliseconds
    pub enqueued_at: i64,
}

#[derive(Debug, Clone, FromRow)]
pub(crate) struct SyncQueueRow {
    pub item_id: i64,
    pub device_id: String,
    pub payload: String,
    pub status: String,
    pub attempts: i64,
    pub last_error: Option<String>,
    pub enqueued_at: i64,
}

impl TryFrom<SyncQueueRow> for SyncQueueItem {
    type Error = CourseCacheError;

    fn try_from(row: SyncQueueRow) -> Result<Self> {
        let progress: ProgressRecord = serde_json::from_str(&row.payload).map_err(|e| {
            CourseCacheError::InvalidDatabaseEntity {
                entity_type: "SyncQueueItem".to_string(),
                message: e.to_string(),
            }
        })?;

        Ok(Self {
            item_id: row.item_id,
            device_id: row.device_id,
            progress,
            status: SyncStatus::from_str(&row.status)?,
            attempts: row.attempts,
            last_error: row.last_error,
            enqueued_at: row.enqueued_at,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_completed_is_derived() {
        let mut record = ProgressRecord::at("c", "a.mp4", 10.0, 100.0, 1);
        assert!(!record.completed);

        record.completed = true;
        assert!(!record.clone().normalized().completed);

        record.progress_percent = 95.0;
        record.completed = false;
        assert!(record.normalized().completed);
    }

    #[test]
    fn test_percent_is_clamped() {
        let record = ProgressRecord::at("c", "a.mp4", 130.0, 100.0, 1);
        assert_eq!(record.progress_percent, 100.0);
        assert!(record.completed);

        let unknown_duration = ProgressRecord::at("c", "a.mp4", 30.0, 0.0, 1);
        assert_eq!(unknown_duration.progress_percent, 0.0);
    }

    #[test]
    fn test_resume_position() {
        assert_eq!(ProgressRecord::at("c", "a", 42.0, 100.0, 1).resume_position(), 42.0);
        assert_eq!(ProgressRecord::at("c", "a", 97.0, 100.0, 1).resume_position(), 0.0);
    }

    #[test]
    fn test_progress_json_shape() {
        let record = ProgressRecord::at("c", "a.mp4", 50.0, 100.0, 7);
        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json["lectureKey"], "a.mp4");
        assert_eq!(json["currentTime"], 50.0);
        assert_eq!(json["lastWatchedAt"], 7);
    }
}
