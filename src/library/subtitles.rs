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


//! Subtitle discovery and conversion
//!
//! Subtitles sit next to their video and share its stem:
//!
//! - `Lesson 1.vtt` (no language)
//! - `Lesson 1.en.srt`, `Lesson 1_de.vtt`, `Lesson 1-pt-BR.srt`
//!
//! SRT files are converted to WebVTT before they are handed to a player.

use crate::error::{CourseCacheError, Result};
use crate::file::handle::{join_relative, split_relative, DirectoryHandle, EntryKind};
use crate::library::order::natural_cmp;
use crate::storage::models::{SubtitleTrack, VideoEntry};
use regex::Regex;

/// Language code used when the file name carries none
pub const UNDETERMINED_LANGUAGE: &str = "und";

/// Subtitle file format
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubtitleFormat {
    WebVtt,
    Srt,
}

impl SubtitleFormat {
    pub fn from_path(path: &str) -> Option<Self> {
        match crate::library::scanner::extension(path)?.as_str() {
            "vtt" => Some(SubtitleFormat::WebVtt),
            "srt" => Some(SubtitleFormat::Srt),
            _ => None,
        }
    }
}

/// Find subtitle tracks for a video
///
/// Lists only the video's own folder. Tracks are ordered by file name and
/// the first one becomes the default.
pub async fn find_subtitles(
    handle: &dyn DirectoryHandle,
    video: &VideoEntry,
) -> Result<Vec<SubtitleTrack>> {
    let (dir, file_name) = split_relative(&video.path);
    let stem = match file_name.rsplit_once('.') {
        Some((stem, _)) if !stem.is_empty() => stem,
        _ => file_name,
    };

    let pattern = subtitle_pattern(stem)?;
    let mut names: Vec<String> = handle
        .list(dir)
        .await?
        .into_iter()
        .filter(|entry| matches!(entry.kind, EntryKind::File { .. }))
        .map(|entry| entry.name)
        .filter(|name| pattern.is_match(name))
        .collect();
    names.sort_by(|a, b| natural_cmp(a, b));

    let tracks = names
        .into_iter()
        .enumerate()
        .map(|(index, name)| {
            let language = pattern
                .captures(&name)
                .and_then(|caps| caps.get(1))
                .map(|m| normalize_language(m.as_str()))
                .unwrap_or_else(|| UNDETERMINED_LANGUAGE.to_string());

            SubtitleTrack {
                label: language_label(&language),
                language,
                source_path: join_relative(dir, &name),
                is_default: index == 0,
            }
        })
        .collect::<Vec<_>>();

    tracing::debug!(video = %video.path, count = tracks.len(), "Discovered subtitles");
    Ok(tracks)
}

fn subtitle_pattern(stem: &str) -> Result<Regex> {
    let source = format!(
        r"(?i)^{}(?:[._-]([a-z]{{2,3}}(?:[-_][a-z0-9]{{2,8}})?))?\.(?:vtt|srt)$",
        regex::escape(stem)
    );
    Regex::new(&source).map_err(|e| CourseCacheError::invalid_input(e.to_string()))
}

/// `pt_br` / `PT-BR` become `pt-BR`
fn normalize_language(raw: &str) -> String {
    let mut parts = raw.split(['-', '_']);
    let primary = parts.next().unwrap_or_default().to_lowercase();
    match parts.next() {
        Some(region) => format!("{}-{}", primary, region.to_uppercase()),
        None => primary,
    }
}

/// Display label for a language code
pub fn language_label(language: &str) -> String {
    let primary = language.split('-').next().unwrap_or(language);
    let name = match primary {
        "und" => "Subtitles",
        "en" | "eng" => "English",
        "de" | "deu" | "ger" => "Deutsch",
        "fr" | "fra" | "fre" => "Français",
        "es" | "spa" => "Español",
        "it" | "ita" => "Italiano",
        "pt" | "por" => "Português",
        "nl" | "nld" => "Nederlands",
        "no" | "nb" | "nob" => "Norsk",
        "sv" | "swe" => "Svenska",
        "da" | "dan" => "Dansk",
        "pl" | "pol" => "Polski",
        "ru" | "rus" => "Русский",
        "ja" | "jpn" => "日本語",
        "zh" | "zho" | "chi" => "中文",
        "ko" | "kor" => "한국어",
        _ => return language.to_string(),
    };

    if primary != language && primary != "und" {
        format!("{} ({})", name, &language[primary.len() + 1..])
    } else {
        name.to_string()
    }
}

/// Convert SubRip text to WebVTT
///
/// Cue numbers are dropped and the millisecond separator becomes `.`.
pub fn srt_to_vtt(srt: &str) -> String {
    let text = srt.trim_start_matches('\u{feff}').replace("\r\n", "\n");
    let mut out = String::from("WEBVTT\n\n");

    for block in text.split("\n\n") {
        let mut lines = block.lines().skip_while(|l| l.trim().is_empty()).peekable();

        // Optional numeric cue identifier
        if let Some(first) = lines.peek() {
            if !first.contains("-->") && first.trim().chars().all(|c| c.is_ascii_digit()) {
                lines.next();
            }
        }

        let Some(timing) = lines.next() else {
            continue;
        };
        if !timing.contains("-->") {
            continue;
        }

        out.push_str(&timing.replace(',', "."));
        out.push('\n');
        for line in lines {
            out.push_str(line);
            out.push('\n');
        }
        out.push('\n');
    }

    out
}

/// Read a subtitle track as WebVTT text
pub async fn load_as_vtt(handle: &dyn DirectoryHandle, track: &SubtitleTrack) -> Result<String> {
    let bytes = handle.read_file(&track.source_path).await?;
    let text = String::from_utf8_lossy(&bytes);

    match SubtitleFormat::from_path(&track.source_path) {
        Some(SubtitleFormat::Srt) => Ok(srt_to_vtt(&text)),
        Some(SubtitleFormat::WebVtt) => Ok(text.into_owned()),
        None => Err(CourseCacheError::media(
            track.source_path.clone(),
            "Unsupported subtitle format",
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::file::local::LocalDirectory;
    use tempfile::TempDir;

    fn video(path: &str) -> VideoEntry {
        VideoEntry {
            path: path.to_string(),
            size: 1,
            last_modified_at: 0,
            duration_hint: None,
        }
    }

    #[tokio::test]
    async fn test_find_subtitles_by_naming_convention() {
        let temp_dir = TempDir::new().unwrap();
        let dir = temp_dir.path().join("Part 1");
        std::fs::create_dir_all(&dir).unwrap();
        for name in [
            "Lesson 1.mp4",
            "Lesson 1.vtt",
            "Lesson 1.en.srt",
            "Lesson 1_pt_br.vtt",
            "Lesson 10.en.vtt",
            "Lesson 1 notes.txt",
        ] {
            std::fs::write(dir.join(name), b"x").unwrap();
        }

        let handle = LocalDirectory::new(temp_dir.path());
        let tracks = find_subtitles(&handle, &video("Part 1/Lesson 1.mp4")).await.unwrap();

        let langs: Vec<_> = tracks.iter().map(|t| t.language.as_str()).collect();
        assert_eq!(langs, vec!["en", "und", "pt-BR"]);
        assert!(tracks[0].is_default);
        assert!(tracks[1..].iter().all(|t| !t.is_default));
        assert_eq!(tracks[0].source_path, "Part 1/Lesson 1.en.srt");
        assert_eq!(tracks[0].label, "English");
        assert_eq!(tracks[1].label, "Subtitles");
        assert_eq!(tracks[2].label, "Português (BR)");
    }

    #[tokio::test]
    async fn test_stem_with_regex_characters() {
        let temp_dir = TempDir::new().unwrap();
        std::fs::write(temp_dir.path().join("Intro (part 1).mp4"), b"x").unwrap();
        std::fs::write(temp_dir.path().join("Intro (part 1).de.vtt"), b"x").unwrap();

        let handle = LocalDirectory::new(temp_dir.path());
        let tracks = find_subtitles(&handle, &video("Intro (part 1).mp4")).await.unwrap();
        assert_eq!(tracks.len(), 1);
        assert_eq!(tracks[0].language, "de");
    }

    #[test]
    fn test_srt_to_vtt() {
        let srt = "1\r\n00:00:01,000 --> 00:00:02,500\r\nHello\r\n\r\n2\r\n00:00:03,000 --> 00:00:04,000\r\nWorld\r\nagain\r\n";
        let vtt = srt_to_vtt(srt);

        assert_eq!(
            vtt,
            "WEBVTT\n\n00:00:01.000 --> 00:00:02.500\nHello\n\n00:00:03.000 --> 00:00:04.000\nWorld\nagain\n\n"
        );
    }
}
