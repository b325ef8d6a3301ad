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


//! Database storage and models
//!
//! This module handles all local database operations using SQLite through sqlx.
//!
//! # Database Schema
//! - DirectoryHandles: course id -> persisted folder grant reference
//! - VideoProgress: watch progress per (course, lecture)
//! - SyncQueue: outbox of progress records awaiting server acknowledgment
//! - VideoMetadata: cached folder scans keyed by fingerprint
//!
//! # Usage Example
//! ```no_run
//! use course_cache::storage::{Database, queries, ProgressRecord};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let db = Database::new("./cache.db").await?;
//!
//! let record = ProgressRecord::from_position("rust-101", "01 - Intro.mp4", 42.0, 600.0);
//! queries::upsert_progress(db.pool(), &record).await?;
//!
//! let stored = queries::find_progress(db.pool(), "rust-101", "01 - Intro.mp4").await?;
//! # Ok(())
//! # }
//! ```

pub mod database;
pub mod handles;
pub mod migrations;
pub mod models;
pub mod queries;

// Re-export commonly used types
pub use database::Database;
pub use handles::{HandleReadiness, HandleStore};
pub use models::{
    DirectoryHandleRecord, MetadataCacheEntry, ProgressRecord, SubtitleTrack, SyncQueueItem,
    SyncStatus, VideoEntry, COMPLETION_THRESHOLD_PERCENT,
};
