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



//! Test doubles for directory handles

use crate::error::{CourseCacheError, Result};
use crate::file::handle::{AccessMode, DirEntry, DirectoryHandle, HandleRef, PermissionState};
use crate::file::local::LocalDirectory;
use async_trait::async_trait;
use std::collections::HashMap;
use std::path::Path;
use std::sync::Mutex;

#[derive(Debug, Clone, Copy)]
enum Failure {
    Io,
    Denied,
}

/// Local folder whose listing fails for chosen directories
///
/// `""` stands for the root. Permission queries keep answering `Granted`,
/// so the failure only shows up once the folder is actually read.
#[derive(Debug)]
pub struct FlakyDirectory {
    inner: LocalDirectory,
    failing: Mutex<HashMap<String, Failure>>,
}

impl FlakyDirectory {
    pub fn new<P: AsRef<Path>>(root: P) -> Self {
        Self {
            inner: LocalDirectory::new(root.as_ref()),
            failing: Mutex::new(HashMap::new()),
        }
    }

    /// Listing `dir` fails with an I/O error
    pub fn fail_listing(&self, dir: &str) {
        self.failing.lock().unwrap().insert(dir.to_string(), Failure::Io);
    }

    /// Listing `dir` is refused by the host
    pub fn deny_listing(&self, dir: &str) {
        self.failing.lock().unwrap().insert(dir.to_string(), Failure::Denied);
    }
}

#[async_trait]
impl DirectoryHandle for FlakyDirectory {
    fn handle_ref(&self) -> HandleRef {
        self.inner.handle_ref()
    }

    fn display_name(&self) -> String {
        self.inner.display_name()
    }

    async fn query_permission(&self, mode: AccessMode) -> PermissionState {
        self.inner.query_permission(mode).await
    }

    async fn request_permission(&self, mode: AccessMode) -> PermissionState {
        self.inner.request_permission(mode).await
    }

    async fn is_reachable(&self) -> bool {
        self.inner.is_reachable().await
    }

    async fn list(&self, dir: &str) -> Result<Vec<DirEntry>> {
        let failure = self.failing.lock().unwrap().get(dir).copied();
        match failure {
            Some(Failure::Io) => Err(CourseCacheError::FileIoError(format!(
                "Failed to read directory {}: input/output error",
                dir
            ))),
            Some(Failure::Denied) => Err(CourseCacheError::PermissionDenied {
                directory: self.display_name(),
                mode: AccessMode::Read.to_string(),
            }),
            None => self.inner.list(dir).await,
        }
    }

    async fn read_file(&self, path: &str) -> Result<Vec<u8>> {
        self.inner.read_file(path).await
    }

    async fn write_file(&self, path: &str, contents: &[u8]) -> Result<()> {
        self.inner.write_file(path, contents).await
    }
}
