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


//! Course library
//!
//! Everything derived from the contents of a course folder: the video
//! listing and its cache, ordering, and subtitle tracks.

pub mod cache;
pub mod fingerprint;
pub mod order;
pub mod scanner;
pub mod subtitles;

pub use cache::{MetadataCache, ScanOutcome};
pub use fingerprint::fingerprint;
pub use order::{compare_paths, natural_cmp, sort_entries};
pub use scanner::{is_video_file, VIDEO_EXTENSIONS};
pub use subtitles::{find_subtitles, load_as_vtt, srt_to_vtt, SubtitleFormat};
