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


//! Portable progress file
//!
//! A JSON array kept inside the course folder so progress travels with a
//! copied folder. The format is read tolerantly:
//!
//! - missing fields take their defaults
//! - unknown fields are kept and written back unchanged
//! - entries that do not decode are kept verbatim and otherwise ignored
//!
//! Entries are matched on `lectureKey` alone. The `courseId` stored in the
//! file is informational; a folder copied under another course id keeps its
//! progress.

use crate::error::{CourseCacheError, Result};
use crate::file::handle::DirectoryHandle;
use crate::storage::models::ProgressRecord;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// One progress entry as stored in the file
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PortableEntry {
    pub course_id: String,
    pub lecture_key: String,
    pub progress_percent: f64,
    pub current_time: f64,
    pub total_duration: f64,
    pub completed: bool,
    pub last_watched_at: i64,
    /// Fields written by other versions
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl PortableEntry {
    fn to_record(&self, course_id: &str) -> ProgressRecord {
        ProgressRecord {
            course_id: course_id.to_string(),
            lecture_key: self.lecture_key.clone(),
            progress_percent: self.progress_percent,
            current_time_seconds: self.current_time,
            total_duration_seconds: self.total_duration,
            completed: self.completed,
            last_watched_at: self.last_watched_at,
        }
        .normalized()
    }

    fn apply(&mut self, record: &ProgressRecord) {
        self.course_id = record.course_id.clone();
        self.lecture_key = record.lecture_key.clone();
        self.progress_percent = record.progress_percent;
        self.current_time = record.current_time_seconds;
        self.total_duration = record.total_duration_seconds;
        self.completed = record.completed;
        self.last_watched_at = record.last_watched_at;
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Slot {
    Entry(PortableEntry),
    /// Kept as-is so a newer writer's data survives our rewrite
    Opaque(Value),
}

/// In-memory image of the portable file
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PortableFile {
    slots: Vec<Slot>,
}

impl PortableFile {
    /// Parse file contents
    ///
    /// Fails only when the document is not a JSON array.
    pub fn parse(path: &str, bytes: &[u8]) -> Result<Self> {
        if bytes.iter().all(|b| b.is_ascii_whitespace()) {
            return Ok(Self::default());
        }

        let values: Vec<Value> =
            serde_json::from_slice(bytes).map_err(|e| CourseCacheError::MalformedProgressFile {
                path: path.to_string(),
                message: e.to_string(),
            })?;

        let slots = values
            .into_iter()
            .map(|value| match serde_json::from_value::<PortableEntry>(value.clone()) {
                Ok(entry) if !entry.lecture_key.is_empty() => Slot::Entry(entry),
                _ => {
                    tracing::debug!(path, "Ignoring unrecognised progress entry");
                    Slot::Opaque(value)
                }
            })
            .collect();

        Ok(Self { slots })
    }

    /// Read from the course folder; a missing file is an empty one
    pub async fn read(handle: &dyn DirectoryHandle, path: &str) -> Result<Self> {
        match handle.read_file(path).await {
            Ok(bytes) => Self::parse(path, &bytes),
            Err(CourseCacheError::FileNotFound(_)) => Ok(Self::default()),
            Err(e) => Err(e),
        }
    }

    pub async fn write(&self, handle: &dyn DirectoryHandle, path: &str) -> Result<()> {
        handle.write_file(path, &self.to_bytes()?).await
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        let values = self
            .slots
            .iter()
            .map(|slot| match slot {
                Slot::Entry(entry) => serde_json::to_value(entry),
                Slot::Opaque(value) => Ok(value.clone()),
            })
            .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(serde_json::to_vec_pretty(&values)?)
    }

    fn entry(&self, lecture_key: &str) -> Option<&PortableEntry> {
        self.slots.iter().find_map(|slot| match slot {
            Slot::Entry(entry) if entry.lecture_key == lecture_key => Some(entry),
            _ => None,
        })
    }

    fn entry_mut(&mut self, lecture_key: &str) -> Option<&mut PortableEntry> {
        self.slots.iter_mut().find_map(|slot| match slot {
            Slot::Entry(entry) if entry.lecture_key == lecture_key => Some(entry),
            _ => None,
        })
    }

    /// Progress for a lecture, attributed to `course_id`
    pub fn get(&self, course_id: &str, lecture_key: &str) -> Option<ProgressRecord> {
        self.entry(lecture_key).map(|entry| entry.to_record(course_id))
    }

    /// Merge a record under last-write-wins
    ///
    /// An entry with a strictly later `lastWatchedAt` is kept. Returns whether
    /// the file changed.
    pub fn merge(&mut self, record: &ProgressRecord) -> bool {
        match self.entry_mut(&record.lecture_key) {
            Some(entry) => {
                if entry.last_watched_at > record.last_watched_at {
                    return false;
                }
                let before = entry.clone();
                entry.apply(record);
                *entry != before
            }
            None => {
                let mut entry = PortableEntry::default();
                entry.apply(record);
                self.slots.push(Slot::Entry(entry));
                true
            }
        }
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }
}
