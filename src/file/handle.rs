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


//! Directory capability abstraction
//!
//! A `DirectoryHandle` is the opaque, user-granted reference to a course
//! folder. The cache never assumes a handle is usable just because it exists:
//! every scan or read goes through `check_access` first.
//!
//! # Paths
//! All paths handed to a handle are relative to the course root and use `/`
//! as separator, e.g. `"Section 1/01 - Intro.mp4"`. The empty string is the
//! root itself.

use crate::error::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// Access level requested from a directory grant
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AccessMode {
    Read,
    ReadWrite,
}

impl AccessMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            AccessMode::Read => "read",
            AccessMode::ReadWrite => "readwrite",
        }
    }
}

impl fmt::Display for AccessMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Raw permission state reported by the host for a handle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PermissionState {
    Granted,
    /// The grant lapsed; asking again may succeed
    Prompt,
    Denied,
}

/// Outcome of a live permission check
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PermissionStatus {
    Granted,
    /// The user refused access
    Denied,
    /// The grant lapsed or the folder is gone
    Revoked,
}

impl PermissionStatus {
    pub fn is_granted(&self) -> bool {
        matches!(self, PermissionStatus::Granted)
    }
}

/// Serializable reference to a directory grant
///
/// This is what the handle store persists. A `HandleOpener` turns it back into
/// a live handle; the reference alone carries no permission.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct HandleRef {
    /// Handle family, e.g. `"local"`
    pub kind: String,
    /// Family-specific locator
    pub location: String,
}

impl HandleRef {
    pub fn new<K: Into<String>, L: Into<String>>(kind: K, location: L) -> Self {
        Self {
            kind: kind.into(),
            location: location.into(),
        }
    }
}

/// Kind and metadata of a directory entry
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EntryKind {
    File {
        size: u64,
        /// Modification time in epoch milliseconds
        modified_ms: i64,
    },
    Directory,
}

/// Single directory listing entry
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirEntry {
    pub name: String,
    pub kind: EntryKind,
}

impl DirEntry {
    pub fn is_dir(&self) -> bool {
        matches!(self.kind, EntryKind::Directory)
    }

    /// Hidden entries (dot files) are never part of a course listing
    pub fn is_hidden(&self) -> bool {
        self.name.starts_with('.')
    }
}

/// User-granted directory capability
#[async_trait]
pub trait DirectoryHandle: Send + Sync + fmt::Debug {
    /// Reference persisted by the handle store
    fn handle_ref(&self) -> HandleRef;

    /// Human readable name of the folder
    fn display_name(&self) -> String;

    /// Current permission state without prompting
    async fn query_permission(&self, mode: AccessMode) -> PermissionState;

    /// Ask the host (and possibly the user) for access
    async fn request_permission(&self, mode: AccessMode) -> PermissionState;

    /// Whether the folder itself still exists
    async fn is_reachable(&self) -> bool;

    async fn list(&self, dir: &str) -> Result<Vec<DirEntry>>;

    async fn read_file(&self, path: &str) -> Result<Vec<u8>>;

    async fn write_file(&self, path: &str, contents: &[u8]) -> Result<()>;
}

/// Materializes live handles from stored references
pub trait HandleOpener: Send + Sync {
    fn open(&self, handle_ref: &HandleRef) -> Option<Arc<dyn DirectoryHandle>>;
}

/// Live permission check used before every scan, read or mirror
///
/// `Prompt` is reported as `Revoked`: a grant existed once but no longer
/// covers the request. An unreachable folder is `Revoked` as well.
pub async fn check_access(handle: &dyn DirectoryHandle, mode: AccessMode) -> PermissionStatus {
    match handle.query_permission(mode).await {
        PermissionState::Granted => {
            if handle.is_reachable().await {
                PermissionStatus::Granted
            } else {
                PermissionStatus::Revoked
            }
        }
        PermissionState::Prompt => PermissionStatus::Revoked,
        PermissionState::Denied => PermissionStatus::Denied,
    }
}

/// Join a relative directory and an entry name
pub fn join_relative(dir: &str, name: &str) -> String {
    if dir.is_empty() {
        name.to_string()
    } else {
        format!("{}/{}", dir.trim_end_matches('/'), name)
    }
}

/// Split a relative path into parent directory and file name
pub fn split_relative(path: &str) -> (&str, &str) {
    match path.rfind('/') {
        Some(idx) => (&path[..idx], &path[idx + 1..]),
        None => ("", path),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_join_and_split() {
        assert_eq!(join_relative("", "a.mp4"), "a.mp4");
        assert_eq!(join_relative("Part 1", "a.mp4"), "Part 1/a.mp4");
        assert_eq!(split_relative("Part 1/Sub/a.mp4"), ("Part 1/Sub", "a.mp4"));
        assert_eq!(split_relative("a.mp4"), ("", "a.mp4"));
    }

    #[test]
    fn test_handle_ref_serializes() {
        let handle_ref = HandleRef::new("local", "/courses/rust");
        let json = serde_json::to_string(&handle_ref).unwrap();
        let back: HandleRef = serde_json::from_str(&json).unwrap();
        assert_eq!(back, handle_ref);
    }
}
