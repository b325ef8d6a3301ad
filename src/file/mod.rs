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


//! Directory capabilities and filesystem access
//!
//! This module owns everything that touches a learner-granted course folder:
//! the opaque handle abstraction, the native implementation, host capability
//! detection and the per-course I/O locks.

pub mod capabilities;
pub mod handle;
pub mod local;
pub mod locks;

#[cfg(test)]
pub(crate) mod testing;

// Re-export commonly used types
pub use capabilities::{CapabilityDetector, NativeDetector, PlatformSupport, StaticDetector};
pub use handle::{
    check_access, AccessMode, DirEntry, DirectoryHandle, EntryKind, HandleOpener, HandleRef,
    PermissionState, PermissionStatus,
};
pub use local::{LocalDirectory, LocalOpener};
pub use locks::CourseLocks;
