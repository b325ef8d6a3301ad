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


//! Course folder scanner
//!
//! Walks a course folder through its `DirectoryHandle` and collects every
//! playable video with its size and modification time. Only directory
//! listings are read; file contents never are.
//!
//! Unreadable subfolders are logged and skipped so one bad folder does not
//! hide the rest of the course. Failure to list the root is an error.

use crate::error::Result;
use crate::file::handle::{join_relative, DirectoryHandle, EntryKind};
use crate::storage::models::VideoEntry;
use futures_util::future::BoxFuture;

/// Extensions treated as playable video
pub const VIDEO_EXTENSIONS: &[&str] = &["mp4", "m4v", "webm", "mkv", "mov", "ogv", "ogg"];

/// Result of walking a course folder
#[derive(Debug, Clone, Default)]
pub struct WalkResult {
    /// Videos in listing order (not yet sorted)
    pub videos: Vec<VideoEntry>,
    /// Subfolders that could not be listed
    pub skipped_dirs: Vec<String>,
}

impl WalkResult {
    pub fn is_partial(&self) -> bool {
        !self.skipped_dirs.is_empty()
    }
}

/// Check if a file name has a video extension
pub fn is_video_file(name: &str) -> bool {
    extension(name)
        .map(|ext| VIDEO_EXTENSIONS.contains(&ext.as_str()))
        .unwrap_or(false)
}

/// Lower-cased extension of a file name
pub(crate) fn extension(name: &str) -> Option<String> {
    let (stem, ext) = name.rsplit_once('.')?;
    if stem.is_empty() {
        return None;
    }
    Some(ext.to_lowercase())
}

/// Walk the whole course folder
pub async fn walk(handle: &dyn DirectoryHandle) -> Result<WalkResult> {
    let mut result = WalkResult::default();

    // The root must be listable; subfolders are best effort
    let root = handle.list("").await?;
    visit(handle, "", root, &mut result).await;

    Ok(result)
}

fn visit<'a>(
    handle: &'a dyn DirectoryHandle,
    dir: &'a str,
    entries: Vec<crate::file::handle::DirEntry>,
    result: &'a mut WalkResult,
) -> BoxFuture<'a, ()> {
    Box::pin(async move {
        for entry in entries {
            if entry.is_hidden() {
                continue;
            }

            let path = join_relative(dir, &entry.name);
            match entry.kind {
                EntryKind::Directory => match handle.list(&path).await {
                    Ok(children) => visit(handle, &path, children, result).await,
                    Err(e) => {
                        tracing::warn!(dir = %path, error = %e, "Skipping unreadable folder");
                        result.skipped_dirs.push(path);
                    }
                },
                EntryKind::File { size, modified_ms } => {
                    if is_video_file(&entry.name) {
                        result.videos.push(VideoEntry {
                            path,
                            size,
                            last_modified_at: modified_ms,
                            duration_hint: None,
                        });
                    }
                }
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::file::local::LocalDirectory;
    use crate::file::testing::FlakyDirectory;
    use tempfile::TempDir;

    #[test]
    fn test_video_extensions() {
        assert!(is_video_file("01 - Intro.MP4"));
        assert!(is_video_file("clip.webm"));
        assert!(!is_video_file("notes.pdf"));
        assert!(!is_video_file("01 - Intro.vtt"));
        assert!(!is_video_file(".mp4"));
    }

    #[tokio::test]
    async fn test_scan_empty_directory() {
        let temp_dir = TempDir::new().unwrap();
        let handle = LocalDirectory::new(temp_dir.path());

        let result = walk(&handle).await.unwrap();
        assert!(result.videos.is_empty());
        assert!(!result.is_partial());
    }

    #[tokio::test]
    async fn test_unreadable_subfolder_gives_partial_result() {
        let temp_dir = TempDir::new().unwrap();
        let root = temp_dir.path();
        std::fs::create_dir_all(root.join("Sub")).unwrap();
        std::fs::create_dir_all(root.join("Other")).unwrap();
        std::fs::write(root.join("intro.mp4"), b"1").unwrap();
        std::fs::write(root.join("Sub/hidden-by-error.mp4"), b"2").unwrap();
        std::fs::write(root.join("Other/b.mp4"), b"3").unwrap();

        let handle = FlakyDirectory::new(root);
        handle.fail_listing("Sub");

        let result = walk(&handle).await.unwrap();
        let mut paths: Vec<_> = result.videos.iter().map(|v| v.path.as_str()).collect();
        paths.sort();

        assert_eq!(paths, vec!["Other/b.mp4", "intro.mp4"]);
        assert_eq!(result.skipped_dirs, vec!["Sub".to_string()]);
        assert!(result.is_partial());
    }

    #[tokio::test]
    async fn test_unreadable_root_is_an_error() {
        let temp_dir = TempDir::new().unwrap();
        let handle = FlakyDirectory::new(temp_dir.path());
        handle.fail_listing("");

        assert!(walk(&handle).await.is_err());
    }

    #[tokio::test]
    async fn test_walk_is_recursive_and_skips_hidden() {
        let temp_dir = TempDir::new().unwrap();
        let root = temp_dir.path();
        std::fs::create_dir_all(root.join("Part 1/Extras")).unwrap();
        std::fs::create_dir_all(root.join(".trash")).unwrap();
        std::fs::write(root.join("intro.mp4"), b"1").unwrap();
        std::fs::write(root.join("Part 1/a.mkv"), b"22").unwrap();
        std::fs::write(root.join("Part 1/a.srt"), b"sub").unwrap();
        std::fs::write(root.join("Part 1/Extras/b.webm"), b"333").unwrap();
        std::fs::write(root.join(".trash/old.mp4"), b"x").unwrap();
        std::fs::write(root.join(".course-progress.json"), b"[]").unwrap();

        let handle = LocalDirectory::new(root);
        let mut paths: Vec<_> = walk(&handle)
            .await
            .unwrap()
            .videos
            .into_iter()
            .map(|v| (v.path, v.size))
            .collect();
        paths.sort();

        assert_eq!(
            paths,
            vec![
                ("Part 1/Extras/b.webm".to_string(), 3),
                ("Part 1/a.mkv".to_string(), 2),
                ("intro.mp4".to_string(), 1),
            ]
        );
    }
}
