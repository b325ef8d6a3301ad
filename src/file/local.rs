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


//! Local filesystem directory handles
//!
//! `LocalDirectory` backs the directory capability with `tokio::fs` for native
//! hosts. Operating-system permissions still apply, but the handle also keeps
//! its own grant table so a host can model lapsed or refused grants the same
//! way a browser does.
//!
//! # Key Operations
//! - Path confinement (no `..`, no absolute paths)
//! - Listing with size and modification time
//! - Atomic writes (temp file + rename, with retry)

use crate::error::{CourseCacheError, Result};
use crate::file::handle::{
    AccessMode, DirEntry, DirectoryHandle, EntryKind, HandleOpener, HandleRef, PermissionState,
};
use async_trait::async_trait;
use std::collections::HashMap;
use std::io::ErrorKind;
use std::path::{Component, Path, PathBuf};
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, UNIX_EPOCH};
use tokio::fs;
use tokio::time::sleep;

/// Handle family name stored in `HandleRef::kind`
pub const LOCAL_HANDLE_KIND: &str = "local";

/// Maximum retry attempts for the final rename of a write
const MAX_RETRY_ATTEMPTS: u32 = 3;

/// Delay between retry attempts
const RETRY_DELAY: Duration = Duration::from_millis(100);

fn encode(state: PermissionState) -> u8 {
    match state {
        PermissionState::Granted => 0,
        PermissionState::Prompt => 1,
        PermissionState::Denied => 2,
    }
}

fn decode(value: u8) -> PermissionState {
    match value {
        0 => PermissionState::Granted,
        1 => PermissionState::Prompt,
        _ => PermissionState::Denied,
    }
}

/// Grant table shared by every clone of a local handle
#[derive(Debug)]
struct Grants {
    read: AtomicU8,
    write: AtomicU8,
    /// What a permission request resolves to when the state is `Prompt`
    prompt_response: AtomicU8,
}

/// Directory handle backed by the local filesystem
#[derive(Debug, Clone)]
pub struct LocalDirectory {
    root: PathBuf,
    grants: Arc<Grants>,
}

impl LocalDirectory {
    /// Create a handle with read-write access granted
    pub fn new<P: Into<PathBuf>>(root: P) -> Self {
        Self {
            root: root.into(),
            grants: Arc::new(Grants {
                read: AtomicU8::new(encode(PermissionState::Granted)),
                write: AtomicU8::new(encode(PermissionState::Granted)),
                prompt_response: AtomicU8::new(encode(PermissionState::Granted)),
            }),
        }
    }

    /// Create a handle that only allows reading (no portable progress file)
    pub fn read_only<P: Into<PathBuf>>(root: P) -> Self {
        let handle = Self::new(root);
        handle.set_permission(AccessMode::ReadWrite, PermissionState::Denied);
        handle
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Override the grant for an access mode
    ///
    /// Setting `Read` also caps `ReadWrite`, since write access implies read.
    pub fn set_permission(&self, mode: AccessMode, state: PermissionState) {
        match mode {
            AccessMode::Read => {
                self.grants.read.store(encode(state), Ordering::SeqCst);
                if state != PermissionState::Granted {
                    self.grants.write.store(encode(state), Ordering::SeqCst);
                }
            }
            AccessMode::ReadWrite => {
                self.grants.write.store(encode(state), Ordering::SeqCst);
            }
        }
    }

    /// Let every grant lapse, as happens when a browser drops permissions
    pub fn revoke(&self) {
        self.set_permission(AccessMode::Read, PermissionState::Prompt);
    }

    /// Decide how future permission requests resolve
    pub fn set_prompt_response(&self, state: PermissionState) {
        self.grants.prompt_response.store(encode(state), Ordering::SeqCst);
    }

    /// Resolve a relative path inside the root, rejecting escapes
    fn resolve(&self, relative: &str) -> Result<PathBuf> {
        let mut path = self.root.clone();
        if relative.is_empty() {
            return Ok(path);
        }

        for component in Path::new(relative).components() {
            match component {
                Component::Normal(part) => path.push(part),
                Component::CurDir => {}
                _ => {
                    return Err(CourseCacheError::InvalidPath(format!(
                        "Path escapes course folder: {}",
                        relative
                    )))
                }
            }
        }

        Ok(path)
    }

    fn ensure(&self, mode: AccessMode) -> Result<()> {
        let state = match mode {
            AccessMode::Read => decode(self.grants.read.load(Ordering::SeqCst)),
            AccessMode::ReadWrite => decode(self.grants.write.load(Ordering::SeqCst)),
        };

        if state == PermissionState::Granted {
            Ok(())
        } else {
            Err(CourseCacheError::PermissionDenied {
                directory: self.display_name(),
                mode: mode.to_string(),
            })
        }
    }

    fn map_io(&self, err: std::io::Error, relative: &str, action: &str) -> CourseCacheError {
        match err.kind() {
            ErrorKind::NotFound => CourseCacheError::FileNotFound(relative.to_string()),
            ErrorKind::PermissionDenied => CourseCacheError::PermissionDenied {
                directory: self.display_name(),
                mode: if action == "write" { "readwrite" } else { "read" }.to_string(),
            },
            _ => CourseCacheError::FileIoError(format!(
                "Failed to {} {}: {}",
                action,
                self.root.join(relative).display(),
                err
            )),
        }
    }
}

#[async_trait]
impl DirectoryHandle for LocalDirectory {
    fn handle_ref(&self) -> HandleRef {
        HandleRef::new(LOCAL_HANDLE_KIND, self.root.to_string_lossy())
    }

    fn display_name(&self) -> String {
        self.root
            .file_name()
            .map(|name| name.to_string_lossy().to_string())
            .unwrap_or_else(|| self.root.display().to_string())
    }

    async fn query_permission(&self, mode: AccessMode) -> PermissionState {
        match mode {
            AccessMode::Read => decode(self.grants.read.load(Ordering::SeqCst)),
            AccessMode::ReadWrite => {
                let state = decode(self.grants.write.load(Ordering::SeqCst));
                if state != PermissionState::Granted {
                    return state;
                }
                // The grant table says yes; the filesystem may still say no
                match fs::metadata(&self.root).await {
                    Ok(meta) if meta.permissions().readonly() => PermissionState::Denied,
                    _ => state,
                }
            }
        }
    }

    async fn request_permission(&self, mode: AccessMode) -> PermissionState {
        let current = self.query_permission(mode).await;
        if current != PermissionState::Prompt {
            return current;
        }

        let response = decode(self.grants.prompt_response.load(Ordering::SeqCst));
        self.set_permission(mode, response);
        if mode == AccessMode::ReadWrite && response == PermissionState::Granted {
            self.set_permission(AccessMode::Read, response);
        }
        response
    }

    async fn is_reachable(&self) -> bool {
        matches!(fs::metadata(&self.root).await, Ok(meta) if meta.is_dir())
    }

    async fn list(&self, dir: &str) -> Result<Vec<DirEntry>> {
        self.ensure(AccessMode::Read)?;
        let path = self.resolve(dir)?;

        let mut reader = fs::read_dir(&path)
            .await
            .map_err(|e| self.map_io(e, dir, "read directory"))?;

        let mut entries = Vec::new();
        while let Some(entry) = reader
            .next_entry()
            .await
            .map_err(|e| self.map_io(e, dir, "read directory entry in"))?
        {
            // Relative paths are UTF-8; such a name could never be opened
            let name = match entry.file_name().into_string() {
                Ok(name) => name,
                Err(raw) => {
                    tracing::debug!(dir, name = ?raw, "Skipping entry with a non-UTF-8 name");
                    continue;
                }
            };
            let metadata = match entry.metadata().await {
                Ok(metadata) => metadata,
                Err(e) => {
                    tracing::debug!(dir, name = %name, error = %e, "Skipping unreadable entry");
                    continue;
                }
            };

            let kind = if metadata.is_dir() {
                EntryKind::Directory
            } else if metadata.is_file() {
                let modified_ms = metadata
                    .modified()
                    .ok()
                    .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
                    .map(|d| d.as_millis() as i64)
                    .unwrap_or(0);
                EntryKind::File {
                    size: metadata.len(),
                    modified_ms,
                }
            } else {
                continue;
            };

            entries.push(DirEntry { name, kind });
        }

        Ok(entries)
    }

    async fn read_file(&self, path: &str) -> Result<Vec<u8>> {
        self.ensure(AccessMode::Read)?;
        let full = self.resolve(path)?;
        fs::read(&full).await.map_err(|e| self.map_io(e, path, "read"))
    }

    async fn write_file(&self, path: &str, contents: &[u8]) -> Result<()> {
        self.ensure(AccessMode::ReadWrite)?;
        let full = self.resolve(path)?;
        let temp = full.with_extension("tmp");

        fs::write(&temp, contents)
            .await
            .map_err(|e| self.map_io(e, path, "write"))?;

        let mut attempts = 0;
        loop {
            attempts += 1;
            match fs::rename(&temp, &full).await {
                Ok(()) => return Ok(()),
                Err(e) if attempts >= MAX_RETRY_ATTEMPTS => {
                    let _ = fs::remove_file(&temp).await;
                    return Err(self.map_io(e, path, "write"));
                }
                Err(_) => sleep(RETRY_DELAY).await,
            }
        }
    }
}

/// Opens `local` handle references, returning the same live handle per folder
///
/// Reusing the instance keeps grant changes visible to every holder.
#[derive(Debug, Default)]
pub struct LocalOpener {
    opened: Mutex<HashMap<String, LocalDirectory>>,
}

impl LocalOpener {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handle picked by the user so later opens share its grants
    pub fn register(&self, handle: &LocalDirectory) {
        let mut opened = self.opened.lock().unwrap_or_else(|e| e.into_inner());
        opened.insert(handle.root.to_string_lossy().to_string(), handle.clone());
    }
}

impl HandleOpener for LocalOpener {
    fn open(&self, handle_ref: &HandleRef) -> Option<Arc<dyn DirectoryHandle>> {
        if handle_ref.kind != LOCAL_HANDLE_KIND {
            return None;
        }

        let mut opened = self.opened.lock().unwrap_or_else(|e| e.into_inner());
        let handle = opened
            .entry(handle_ref.location.clone())
            .or_insert_with(|| LocalDirectory::new(PathBuf::from(&handle_ref.location)))
            .clone();

        Some(Arc::new(handle))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::file::handle::{check_access, PermissionStatus};
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_list_and_read() {
        let temp_dir = TempDir::new().unwrap();
        std::fs::create_dir(temp_dir.path().join("Part 1")).unwrap();
        std::fs::write(temp_dir.path().join("Part 1/a.mp4"), b"video").unwrap();

        let handle = LocalDirectory::new(temp_dir.path());
        let root = handle.list("").await.unwrap();
        assert_eq!(root.len(), 1);
        assert!(root[0].is_dir());

        let part = handle.list("Part 1").await.unwrap();
        assert_eq!(part[0].name, "a.mp4");
        assert!(matches!(part[0].kind, EntryKind::File { size: 5, .. }));

        assert_eq!(handle.read_file("Part 1/a.mp4").await.unwrap(), b"video");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_list_skips_non_utf8_names() {
        use std::ffi::OsStr;
        use std::os::unix::ffi::OsStrExt;

        let temp_dir = TempDir::new().unwrap();
        std::fs::write(temp_dir.path().join(OsStr::from_bytes(b"bad\xff.mp4")), b"x").unwrap();
        std::fs::write(temp_dir.path().join("good.mp4"), b"y").unwrap();

        let handle = LocalDirectory::new(temp_dir.path());
        let names: Vec<_> = handle.list("").await.unwrap().into_iter().map(|e| e.name).collect();

        assert_eq!(names, vec!["good.mp4".to_string()]);
    }

    #[tokio::test]
    async fn test_rejects_escaping_paths() {
        let temp_dir = TempDir::new().unwrap();
        let handle = LocalDirectory::new(temp_dir.path());

        let err = handle.read_file("../secret").await.unwrap_err();
        assert!(matches!(err, CourseCacheError::InvalidPath(_)));
    }

    #[tokio::test]
    async fn test_revoked_handle_refuses_reads() {
        let temp_dir = TempDir::new().unwrap();
        std::fs::write(temp_dir.path().join("a.mp4"), b"video").unwrap();
        let handle = LocalDirectory::new(temp_dir.path());

        handle.revoke();
        assert_eq!(check_access(&handle, AccessMode::Read).await, PermissionStatus::Revoked);
        assert!(handle.read_file("a.mp4").await.unwrap_err().needs_regrant());

        assert_eq!(handle.request_permission(AccessMode::Read).await, PermissionState::Granted);
        assert_eq!(check_access(&handle, AccessMode::Read).await, PermissionStatus::Granted);
    }

    #[tokio::test]
    async fn test_missing_root_is_revoked() {
        let temp_dir = TempDir::new().unwrap();
        let handle = LocalDirectory::new(temp_dir.path().join("moved-away"));
        assert_eq!(check_access(&handle, AccessMode::Read).await, PermissionStatus::Revoked);
    }

    #[tokio::test]
    async fn test_read_only_handle_cannot_write() {
        let temp_dir = TempDir::new().unwrap();
        let handle = LocalDirectory::read_only(temp_dir.path());

        assert_eq!(check_access(&handle, AccessMode::Read).await, PermissionStatus::Granted);
        assert_eq!(check_access(&handle, AccessMode::ReadWrite).await, PermissionStatus::Denied);
        assert!(handle.write_file("x.json", b"[]").await.is_err());
    }

    #[tokio::test]
    async fn test_opener_shares_grants() {
        let temp_dir = TempDir::new().unwrap();
        let picked = LocalDirectory::new(temp_dir.path());
        let opener = LocalOpener::new();
        opener.register(&picked);

        let reopened = opener.open(&picked.handle_ref()).unwrap();
        picked.revoke();
        assert_eq!(reopened.query_permission(AccessMode::Read).await, PermissionState::Prompt);

        assert!(opener.open(&HandleRef::new("browser", "opaque-id")).is_none());
    }
}
