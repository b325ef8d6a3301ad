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


//! Player state machine
//!
//! ```text
//! Idle -> Loading -> Ready -> Playing <-> Paused -> Ended
//!                      |        |          |
//!                      +--------+----------+--> Error (from Loading/Ready/Playing/Paused)
//! ```
//!
//! The surface decodes after the session enters `Ready`, so a decode failure
//! reported there is a failed load and also leads to `Error`.
//!
//! `Loading` and `Idle` are reachable from every state: a new video can be
//! loaded at any time and teardown always succeeds.

use crate::error::{CourseCacheError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PlayerState {
    Idle,
    Loading,
    Ready,
    Playing,
    Paused,
    Ended,
    Error,
}

impl PlayerState {
    pub fn as_str(&self) -> &'static str {
        match self {
            PlayerState::Idle => "idle",
            PlayerState::Loading => "loading",
            PlayerState::Ready => "ready",
            PlayerState::Playing => "playing",
            PlayerState::Paused => "paused",
            PlayerState::Ended => "ended",
            PlayerState::Error => "error",
        }
    }

    pub fn can_transition_to(&self, next: PlayerState) -> bool {
        use PlayerState::*;

        match (self, next) {
            (_, Idle) | (_, Loading) => true,
            (Loading, Ready) => true,
            (Ready, Playing) | (Paused, Playing) | (Ended, Playing) => true,
            (Playing, Paused) => true,
            (Playing, Ended) | (Paused, Ended) => true,
            (Loading, Error) | (Ready, Error) | (Playing, Error) | (Paused, Error) => true,
            _ => false,
        }
    }

    /// Validate a transition, returning the new state
    pub fn transition(self, next: PlayerState) -> Result<PlayerState> {
        if self.can_transition_to(next) {
            Ok(next)
        } else {
            Err(CourseCacheError::InvalidTransition {
                from: self.to_string(),
                to: next.to_string(),
            })
        }
    }

    /// Whether a media resource is expected to be held in this state
    pub fn holds_media(&self) -> bool {
        matches!(
            self,
            PlayerState::Ready | PlayerState::Playing | PlayerState::Paused | PlayerState::Ended
        )
    }
}

impl fmt::Display for PlayerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use PlayerState::*;

    #[test]
    fn test_happy_path() {
        let mut state = Idle;
        for next in [Loading, Ready, Playing, Paused, Playing, Ended, Loading] {
            state = state.transition(next).unwrap();
        }
        assert_eq!(state, Loading);
    }

    #[test]
    fn test_error_only_from_active_states() {
        assert!(Loading.can_transition_to(Error));
        assert!(Playing.can_transition_to(Error));
        assert!(Paused.can_transition_to(Error));
        assert!(Ready.can_transition_to(Error));
        assert!(!Idle.can_transition_to(Error));
        assert!(!Ended.can_transition_to(Error));
    }

    #[test]
    fn test_invalid_transition_is_typed() {
        let err = Idle.transition(Playing).unwrap_err();
        assert!(matches!(err, CourseCacheError::InvalidTransition { .. }));
        assert_eq!(err.to_string(), "Invalid player transition from idle to playing");
    }

    #[test]
    fn test_teardown_and_reload_from_anywhere() {
        for state in [Idle, Loading, Ready, Playing, Paused, Ended, Error] {
            assert!(state.can_transition_to(Idle));
            assert!(state.can_transition_to(Loading));
        }
    }
}
