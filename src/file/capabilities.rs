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


//! Host capability detection
//!
//! Feature detection happens once, when the workspace is opened, and the
//! result is kept in a `PlatformSupport` value. Nothing else in the crate asks
//! the host what it can do.

use crate::error::{CourseCacheError, Result};
use serde::{Deserialize, Serialize};

/// What the host environment can do for the learning cache
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlatformSupport {
    /// A directory can be picked and read at all
    pub directory_access: bool,
    /// Granted directories may be written to (portable progress file)
    pub write_access: bool,
    /// Handles survive restarts, so the learner is not re-prompted every time
    pub persistent_handles: bool,
}

impl PlatformSupport {
    /// Query the host once and log the result
    pub fn detect(detector: &dyn CapabilityDetector) -> Self {
        let support = detector.detect();
        tracing::info!(
            directory_access = support.directory_access,
            write_access = support.write_access,
            persistent_handles = support.persistent_handles,
            "Detected platform support"
        );
        support
    }

    /// Fail with the user-visible "unsupported environment" state
    pub fn ensure_supported(&self) -> Result<()> {
        if self.directory_access {
            Ok(())
        } else {
            Err(CourseCacheError::UnsupportedEnvironment(
                "directory access is not available".to_string(),
            ))
        }
    }
}

/// Host-specific capability detection
pub trait CapabilityDetector: Send + Sync {
    fn detect(&self) -> PlatformSupport;
}

/// Detector for native hosts, where the filesystem is always reachable
#[derive(Debug, Default, Clone, Copy)]
pub struct NativeDetector;

impl CapabilityDetector for NativeDetector {
    fn detect(&self) -> PlatformSupport {
        PlatformSupport {
            directory_access: true,
            write_access: true,
            persistent_handles: true,
        }
    }
}

/// Detector returning a fixed answer, for embedding hosts that detect elsewhere
#[derive(Debug, Clone, Copy)]
pub struct StaticDetector(pub PlatformSupport);

impl CapabilityDetector for StaticDetector {
    fn detect(&self) -> PlatformSupport {
        self.0
    }
}
