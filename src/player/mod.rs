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


//! Video playback session

pub mod resources;
pub mod scheduler;
pub mod session;
pub mod state;
pub mod surface;

pub use resources::{MediaResource, ResourceLedger, SubtitleResource};
pub use scheduler::FlushScheduler;
pub use session::{PlayerEvent, PlayerSession};
pub use state::PlayerState;
pub use surface::PlaybackSurface;
