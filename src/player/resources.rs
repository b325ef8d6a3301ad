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


//! Playback resources
//!
//! A `MediaResource` stands for the decoded media of one video and a
//! `SubtitleResource` for one WebVTT track. Both are released when dropped,
//! and every acquisition and release is counted in a shared
//! `ResourceLedger`.
//!
//! A media resource keeps the folder handle it was resolved through, so the
//! surface reads the video via the resource and never needs a handle of its
//! own.

use crate::error::{CourseCacheError, Result};
use crate::file::handle::{split_relative, DirectoryHandle, EntryKind};
use crate::library::scanner::extension;
use crate::library::subtitles::load_as_vtt;
use crate::storage::models::{SubtitleTrack, VideoEntry};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

#[derive(Debug, Default)]
struct Counters {
    media_acquired: AtomicUsize,
    media_released: AtomicUsize,
    media_peak: AtomicUsize,
    subtitles_acquired: AtomicUsize,
    subtitles_released: AtomicUsize,
}

/// Acquire/release accounting, shared by all resources of a session
#[derive(Debug, Clone, Default)]
pub struct ResourceLedger {
    counters: Arc<Counters>,
}

impl ResourceLedger {
    pub fn new() -> Self {
        Self::default()
    }

    fn acquire_media(&self) {
        let acquired = self.counters.media_acquired.fetch_add(1, Ordering::SeqCst) + 1;
        let live = acquired - self.counters.media_released.load(Ordering::SeqCst);
        self.counters.media_peak.fetch_max(live, Ordering::SeqCst);
    }

    fn release_media(&self) {
        self.counters.media_released.fetch_add(1, Ordering::SeqCst);
    }

    fn acquire_subtitle(&self) {
        self.counters.subtitles_acquired.fetch_add(1, Ordering::SeqCst);
    }

    fn release_subtitle(&self) {
        self.counters.subtitles_released.fetch_add(1, Ordering::SeqCst);
    }

    pub fn media_acquired(&self) -> usize {
        self.counters.media_acquired.load(Ordering::SeqCst)
    }

    pub fn media_released(&self) -> usize {
        self.counters.media_released.load(Ordering::SeqCst)
    }

    /// Media resources currently held
    pub fn live_media(&self) -> usize {
        self.media_acquired() - self.media_released()
    }

    /// Most media resources ever held at once
    pub fn peak_media(&self) -> usize {
        self.counters.media_peak.load(Ordering::SeqCst)
    }

    pub fn live_subtitles(&self) -> usize {
        self.counters.subtitles_acquired.load(Ordering::SeqCst)
            - self.counters.subtitles_released.load(Ordering::SeqCst)
    }
}

/// Container type for a video file
pub fn mime_type(path: &str) -> &'static str {
    match extension(path).as_deref() {
        Some("mp4") | Some("m4v") => "video/mp4",
        Some("webm") => "video/webm",
        Some("mkv") => "video/x-matroska",
        Some("mov") => "video/quicktime",
        Some("ogv") | Some("ogg") => "video/ogg",
        _ => "application/octet-stream",
    }
}

/// The playable source of the active video
#[derive(Debug)]
pub struct MediaResource {
    handle: Arc<dyn DirectoryHandle>,
    path: String,
    size: u64,
    mime_type: &'static str,
    ledger: ResourceLedger,
}

impl MediaResource {
    /// Resolve a video entry to a playable source
    ///
    /// Fails with a media error when the file has disappeared or the folder
    /// can no longer be read.
    pub async fn acquire(
        handle: &Arc<dyn DirectoryHandle>,
        entry: &VideoEntry,
        ledger: &ResourceLedger,
    ) -> Result<Self> {
        let (dir, name) = split_relative(&entry.path);
        let listing = handle
            .list(dir)
            .await
            .map_err(|e| CourseCacheError::media(entry.path.clone(), e.to_string()))?;

        let size = listing
            .into_iter()
            .find_map(|item| match item.kind {
                EntryKind::File { size, .. } if item.name == name => Some(size),
                _ => None,
            })
            .ok_or_else(|| {
                CourseCacheError::media(entry.path.clone(), "File is missing from the course folder")
            })?;

        ledger.acquire_media();
        tracing::debug!(path = %entry.path, size, "Acquired media resource");

        Ok(Self {
            handle: Arc::clone(handle),
            path: entry.path.clone(),
            size,
            mime_type: mime_type(&entry.path),
            ledger: ledger.clone(),
        })
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn size(&self) -> u64 {
        self.size
    }

    pub fn mime_type(&self) -> &'static str {
        self.mime_type
    }

    /// Read the video through the course folder handle
    ///
    /// Fails with a media error when the file vanished or the grant lapsed
    /// after the resource was acquired.
    pub async fn read(&self) -> Result<Vec<u8>> {
        let bytes = self
            .handle
            .read_file(&self.path)
            .await
            .map_err(|e| CourseCacheError::media(self.path.clone(), e.to_string()))?;

        if bytes.len() as u64 != self.size {
            tracing::debug!(
                path = %self.path,
                expected = self.size,
                actual = bytes.len(),
                "Video size changed since acquisition"
            );
        }
        Ok(bytes)
    }
}

impl Drop for MediaResource {
    fn drop(&mut self) {
        self.ledger.release_media();
        tracing::debug!(path = %self.path, "Released media resource");
    }
}

/// One subtitle track converted to WebVTT
#[derive(Debug)]
pub struct SubtitleResource {
    track: SubtitleTrack,
    vtt: String,
    ledger: ResourceLedger,
}

impl SubtitleResource {
    pub async fn acquire(
        handle: &dyn DirectoryHandle,
        track: SubtitleTrack,
        ledger: &ResourceLedger,
    ) -> Result<Self> {
        let vtt = load_as_vtt(handle, &track).await?;
        ledger.acquire_subtitle();

        Ok(Self {
            track,
            vtt,
            ledger: ledger.clone(),
        })
    }

    pub fn track(&self) -> &SubtitleTrack {
        &self.track
    }

    pub fn vtt(&self) -> &str {
        &self.vtt
    }
}

impl Drop for SubtitleResource {
    fn drop(&mut self) {
        self.ledger.release_subtitle();
    }
}
