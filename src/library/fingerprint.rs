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


//! Directory fingerprints
//!
//! A fingerprint summarizes a course folder by video count, total size and
//! modification times. Equal fingerprints are taken as proof that the folder
//! did not change and the cached scan is reused.
//!
//! This is a deliberate trade-off: a change that keeps every file's size and
//! timestamp (or that cancels out in the aggregate) goes unnoticed until some
//! other change alters the fingerprint. Hashing file contents would close the
//! gap but costs a full read of every video.

use crate::storage::models::VideoEntry;
use sha2::{Digest, Sha256};

/// Version prefix, bumped whenever the aggregate inputs change
const FINGERPRINT_VERSION: &str = "v1";

/// Compute the fingerprint of a set of scanned videos
///
/// Order-independent: the same files listed in a different order produce the
/// same fingerprint.
pub fn fingerprint(videos: &[VideoEntry]) -> String {
    let count = videos.len() as u64;
    let total_size: u128 = videos.iter().map(|v| v.size as u128).sum();
    let mtime_sum: i128 = videos.iter().map(|v| v.last_modified_at as i128).sum();
    let mtime_max = videos.iter().map(|v| v.last_modified_at).max().unwrap_or(0);

    let mut hasher = Sha256::new();
    hasher.update(FINGERPRINT_VERSION.as_bytes());
    hasher.update(count.to_le_bytes());
    hasher.update(total_size.to_le_bytes());
    hasher.update(mtime_sum.to_le_bytes());
    hasher.update(mtime_max.to_le_bytes());
    let digest = hasher.finalize();

    format!("{}-{}-{}", FINGERPRINT_VERSION, count, hex::encode(&digest[..16]))
}
