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


//! Rendering surface seam
//!
//! The surface shows whatever the session attaches and reports playback
//! events back through the session's `play`/`time_update`/`pause`/`ended`
//! methods.

use crate::error::Result;
use crate::player::resources::{MediaResource, SubtitleResource};
use async_trait::async_trait;

#[async_trait]
pub trait PlaybackSurface: Send + Sync {
    /// Show a media source with its subtitle tracks
    async fn attach(&self, media: &MediaResource, subtitles: &[SubtitleResource]) -> Result<()>;

    /// Stop showing the current source
    async fn detach(&self);

    async fn seek(&self, seconds: f64) -> Result<()>;

    /// Start playback; `false` when the host refused (e.g. autoplay policy)
    async fn try_play(&self) -> bool;
}
