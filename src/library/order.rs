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


//! Natural ordering for course listings
//!
//! Course folders are usually numbered by hand ("2 - Setup", "10 - Wrap up"),
//! so digit runs compare by value and letters compare case-insensitively.

use crate::file::handle::split_relative;
use crate::storage::models::VideoEntry;
use std::cmp::Ordering;

/// Compare two names in natural order
pub fn natural_cmp(a: &str, b: &str) -> Ordering {
    let mut left = Chunks::new(a);
    let mut right = Chunks::new(b);

    loop {
        match (left.next(), right.next()) {
            (None, None) => return a.cmp(b),
            (None, Some(_)) => return Ordering::Less,
            (Some(_), None) => return Ordering::Greater,
            (Some(l), Some(r)) => {
                let ordering = compare_chunks(l, r);
                if ordering != Ordering::Equal {
                    return ordering;
                }
            }
        }
    }
}

/// Compare two relative paths: directory position first, then file name
pub fn compare_paths(a: &str, b: &str) -> Ordering {
    let (dir_a, file_a) = split_relative(a);
    let (dir_b, file_b) = split_relative(b);

    compare_dirs(dir_a, dir_b).then_with(|| natural_cmp(file_a, file_b))
}

fn compare_dirs(a: &str, b: &str) -> Ordering {
    let mut left = a.split('/').filter(|s| !s.is_empty());
    let mut right = b.split('/').filter(|s| !s.is_empty());

    loop {
        match (left.next(), right.next()) {
            (None, None) => return Ordering::Equal,
            // Files directly in a folder come before its subfolders
            (None, Some(_)) => return Ordering::Less,
            (Some(_), None) => return Ordering::Greater,
            (Some(l), Some(r)) => {
                let ordering = natural_cmp(l, r);
                if ordering != Ordering::Equal {
                    return ordering;
                }
            }
        }
    }
}

/// Sort scanned entries into playlist order
pub fn sort_entries(entries: &mut [VideoEntry]) {
    entries.sort_by(|a, b| compare_paths(&a.path, &b.path));
}

fn compare_chunks(a: &str, b: &str) -> Ordering {
    let a_digits = a.as_bytes()[0].is_ascii_digit();
    let b_digits = b.as_bytes()[0].is_ascii_digit();

    match (a_digits, b_digits) {
        (true, true) => {
            let a_trim = a.trim_start_matches('0');
            let b_trim = b.trim_start_matches('0');
            a_trim
                .len()
                .cmp(&b_trim.len())
                .then_with(|| a_trim.cmp(b_trim))
        }
        (true, false) => Ordering::Less,
        (false, true) => Ordering::Greater,
        (false, false) => {
            let a_lower = a.to_lowercase();
            let b_lower = b.to_lowercase();
            a_lower.cmp(&b_lower)
        }
    }
}

/// Splits a string into alternating digit and non-digit runs
struct Chunks<'a> {
    rest: &'a str,
}

impl<'a> Chunks<'a> {
    fn new(s: &'a str) -> Self {
        Self { rest: s }
    }
}

impl<'a> Iterator for Chunks<'a> {
    type Item = &'a str;

    fn next(&mut self) -> Option<&'a str> {
        let first = self.rest.chars().next()?;
        let digits = first.is_ascii_digit();
        let end = self
            .rest
            .char_indices()
            .find(|(_, c)| c.is_ascii_digit() != digits)
            .map(|(idx, _)| idx)
            .unwrap_or(self.rest.len());

        let (chunk, rest) = self.rest.split_at(end);
        self.rest = rest;
        Some(chunk)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_numbers_compare_by_value() {
        let mut names = vec!["Lesson 10.mp4", "Lesson 2.mp4", "lesson 1.mp4", "Lesson 02b.mp4"];
        names.sort_by(|a, b| natural_cmp(a, b));
        assert_eq!(names, vec!["lesson 1.mp4", "Lesson 2.mp4", "Lesson 02b.mp4", "Lesson 10.mp4"]);
    }

    #[test]
    fn test_directory_position_before_file_name() {
        let mut paths = vec![
            "Section 10/01 - a.mp4",
            "Section 2/02 - b.mp4",
            "intro.mp4",
            "Section 2/01 - c.mp4",
        ];
        paths.sort_by(|a, b| compare_paths(a, b));
        assert_eq!(
            paths,
            vec![
                "intro.mp4",
                "Section 2/01 - c.mp4",
                "Section 2/02 - b.mp4",
                "Section 10/01 - a.mp4",
            ]
        );
    }
}
