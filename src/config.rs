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


//! Cache configuration
//!
//! Every field has a default so a partial JSON file (or none at all) yields a
//! working configuration. Durations are stored in milliseconds to keep the
//! file format plain.

use crate::error::{CourseCacheError, Result};
use crate::storage::Database;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Name of the portable progress file written into course folders
pub const DEFAULT_PORTABLE_FILE_NAME: &str = ".course-progress.json";

/// Minimum spacing between two portable-file mirrors during playback
const DEFAULT_MIRROR_INTERVAL_MS: u64 = 60_000;

/// Minimum spacing between two portable-file writes, even for explicit flushes
const DEFAULT_MIN_FLUSH_SPACING_MS: u64 = 2_000;

/// Debounce for time updates while playing
const DEFAULT_PLAYBACK_DEBOUNCE_MS: u64 = 5_000;

/// Debounce after a pause
const DEFAULT_PAUSE_DEBOUNCE_MS: u64 = 300;

/// Default request timeout for the sync endpoint
const DEFAULT_SYNC_TIMEOUT_SECS: u64 = 15;

/// Top-level configuration for the learning cache
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Location of the local SQLite database
    pub database_path: PathBuf,

    /// File name of the portable progress file inside each course folder
    pub portable_file_name: String,

    /// Throttle interval for mirroring progress into the portable file
    pub mirror_interval_ms: u64,

    /// Minimum spacing between portable-file writes, applied to flushes too
    pub min_flush_spacing_ms: u64,

    /// Debounce for progress saves triggered by playback time updates
    pub playback_debounce_ms: u64,

    /// Debounce for progress flushes triggered by pausing
    pub pause_debounce_ms: u64,

    /// Remote progress sync
    pub sync: SyncConfig,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            database_path: Database::get_default_path(),
            portable_file_name: DEFAULT_PORTABLE_FILE_NAME.to_string(),
            mirror_interval_ms: DEFAULT_MIRROR_INTERVAL_MS,
            min_flush_spacing_ms: DEFAULT_MIN_FLUSH_SPACING_MS,
            playback_debounce_ms: DEFAULT_PLAYBACK_DEBOUNCE_MS,
            pause_debounce_ms: DEFAULT_PAUSE_DEBOUNCE_MS,
            sync: SyncConfig::default(),
        }
    }
}

/// Remote sync configuration
///
/// Sync is active only when both an endpoint and a device id are present.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Endpoint that accepts progress records
    pub endpoint: Option<String>,

    /// Identifier of this device; `None` disables sync entirely
    pub device_id: Option<String>,

    /// Per-request timeout in seconds
    pub request_timeout_secs: u64,

    /// User agent sent with sync requests
    pub user_agent: String,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            endpoint: None,
            device_id: None,
            request_timeout_secs: DEFAULT_SYNC_TIMEOUT_SECS,
            user_agent: format!("course-cache/{}", env!("CARGO_PKG_VERSION")),
        }
    }
}

impl SyncConfig {
    /// Whether remote sync should run at all
    pub fn is_enabled(&self) -> bool {
        self.endpoint.is_some() && self.device_id.as_deref().is_some_and(|d| !d.is_empty())
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

impl CacheConfig {
    /// Load configuration from a JSON file
    ///
    /// Missing fields fall back to their defaults; unknown fields are ignored.
    pub async fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let contents = tokio::fs::read_to_string(path).await.map_err(|e| {
            CourseCacheError::InvalidConfiguration(format!(
                "Failed to read config {}: {}",
                path.display(),
                e
            ))
        })?;

        let config: CacheConfig = serde_json::from_str(&contents).map_err(|e| {
            CourseCacheError::InvalidConfiguration(format!(
                "Failed to parse config {}: {}",
                path.display(),
                e
            ))
        })?;
        config.validate()?;

        Ok(config)
    }

    /// Validate values that serde cannot check on its own
    pub fn validate(&self) -> Result<()> {
        if self.portable_file_name.is_empty()
            || self.portable_file_name.contains('/')
            || self.portable_file_name.contains('\\')
        {
            return Err(CourseCacheError::InvalidConfiguration(format!(
                "portable_file_name must be a bare file name, got '{}'",
                self.portable_file_name
            )));
        }

        if let Some(endpoint) = &self.sync.endpoint {
            let parsed = url::Url::parse(endpoint).map_err(|e| {
                CourseCacheError::InvalidConfiguration(format!(
                    "Invalid sync endpoint '{}': {}",
                    endpoint, e
                ))
            })?;
            if !matches!(parsed.scheme(), "http" | "https") {
                return Err(CourseCacheError::InvalidConfiguration(format!(
                    "Sync endpoint must be http(s), got '{}'",
                    parsed.scheme()
                )));
            }
        }

        Ok(())
    }

    pub fn with_database_path<P: Into<PathBuf>>(mut self, path: P) -> Self {
        self.database_path = path.into();
        self
    }

    pub fn with_mirror_interval(mut self, interval: Duration) -> Self {
        self.mirror_interval_ms = interval.as_millis() as u64;
        self
    }

    pub fn with_min_flush_spacing(mut self, spacing: Duration) -> Self {
        self.min_flush_spacing_ms = spacing.as_millis() as u64;
        self
    }

    pub fn with_playback_debounce(mut self, debounce: Duration) -> Self {
        self.playback_debounce_ms = debounce.as_millis() as u64;
        self
    }

    pub fn with_pause_debounce(mut self, debounce: Duration) -> Self {
        self.pause_debounce_ms = debounce.as_millis() as u64;
        self
    }

    pub fn with_sync<S: Into<String>>(mut self, endpoint: S, device_id: S) -> Self {
        self.sync.endpoint = Some(endpoint.into());
        self.sync.device_id = Some(device_id.into());
        self
    }

    pub fn mirror_interval(&self) -> Duration {
        Duration::from_millis(self.mirror_interval_ms)
    }

    pub fn min_flush_spacing(&self) -> Duration {
        Duration::from_millis(self.min_flush_spacing_ms)
    }

    pub fn playback_debounce(&self) -> Duration {
        Duration::from_millis(self.playback_debounce_ms)
    }

    pub fn pause_debounce(&self) -> Duration {
        Duration::from_millis(self.pause_debounce_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_config_uses_defaults() {
        let config: CacheConfig =
            serde_json::from_str(r#"{ "pause_debounce_ms": 150, "future_option": true }"#).unwrap();

        assert_eq!(config.pause_debounce(), Duration::from_millis(150));
        assert_eq!(config.mirror_interval(), Duration::from_secs(60));
        assert_eq!(config.portable_file_name, DEFAULT_PORTABLE_FILE_NAME);
        assert!(!config.sync.is_enabled());
    }

    #[test]
    fn test_sync_requires_device_id() {
        let mut config = CacheConfig::default();
        config.sync.endpoint = Some("https://example.com/progress".to_string());
        assert!(!config.sync.is_enabled());

        config.sync.device_id = Some("device-1".to_string());
        assert!(config.sync.is_enabled());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_rejects_bad_endpoint_and_file_name() {
        let config = CacheConfig::default().with_sync("ftp://example.com", "device-1");
        assert!(config.validate().is_err());

        let mut config = CacheConfig::default();
        config.portable_file_name = "nested/progress.json".to_string();
        assert!(config.validate().is_err());
    }

    #[tokio::test]
    async fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        tokio::fs::write(&path, r#"{ "sync": { "endpoint": "https://sync.example.com/v1/progress", "device_id": "abc" } }"#)
            .await
            .unwrap();

        let config = CacheConfig::load(&path).await.unwrap();
        assert!(config.sync.is_enabled());
        assert_eq!(config.sync.request_timeout(), Duration::from_secs(15));
    }
}
