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


//! Remote sync transport
//!
//! The endpoint only has to identify the device and the lecture and accept
//! the progress fields. Any 2xx response is an acknowledgment.

use crate::config::SyncConfig;
use crate::error::{CourseCacheError, Result};
use crate::storage::models::ProgressRecord;
use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, CONTENT_TYPE, USER_AGENT};
use reqwest::Client;
use serde::Serialize;
use std::time::Duration;
use url::Url;

/// Delivers one progress record to the remote server
#[async_trait]
pub trait SyncTransport: Send + Sync {
    /// Returns `Ok(())` only once the server acknowledged the record
    async fn send(&self, device_id: &str, record: &ProgressRecord) -> Result<()>;
}

/// Wire body for a progress update
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ProgressPayload<'a> {
    device_id: &'a str,
    #[serde(flatten)]
    record: &'a ProgressRecord,
}

/// JSON-over-HTTP transport
#[derive(Debug, Clone)]
pub struct HttpSyncTransport {
    client: Client,
    endpoint: Url,
}

impl HttpSyncTransport {
    pub fn new(endpoint: &str, timeout: Duration, user_agent: &str) -> Result<Self> {
        let endpoint = Url::parse(endpoint).map_err(|e| {
            CourseCacheError::InvalidConfiguration(format!("Invalid sync endpoint '{}': {}", endpoint, e))
        })?;

        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT, HeaderValue::from_static("application/json"));
        headers.insert(
            USER_AGENT,
            HeaderValue::from_str(user_agent).map_err(|e| {
                CourseCacheError::InvalidConfiguration(format!("Invalid user agent: {}", e))
            })?,
        );

        let client = Client::builder()
            .timeout(timeout)
            .default_headers(headers)
            .pool_idle_timeout(Duration::from_secs(90))
            .build()?;

        Ok(Self { client, endpoint })
    }

    /// Build from configuration; `None` when sync is not configured
    pub fn from_config(config: &SyncConfig) -> Result<Option<Self>> {
        match &config.endpoint {
            Some(endpoint) => Ok(Some(Self::new(
                endpoint,
                config.request_timeout(),
                &config.user_agent,
            )?)),
            None => Ok(None),
        }
    }

    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }
}

#[async_trait]
impl SyncTransport for HttpSyncTransport {
    async fn send(&self, device_id: &str, record: &ProgressRecord) -> Result<()> {
        let payload = ProgressPayload { device_id, record };

        let response = self
            .client
            .post(self.endpoint.clone())
            .header(CONTENT_TYPE, "application/json")
            .json(&payload)
            .send()
            .await
            .map_err(|e| {
                CourseCacheError::sync_failed(format!("Request to sync endpoint failed: {}", e), None)
            })?;

        let status = response.status();
        if status.is_success() {
            tracing::debug!(
                course_id = %record.course_id,
                lecture_key = %record.lecture_key,
                status = status.as_u16(),
                "Sync endpoint acknowledged progress"
            );
            return Ok(());
        }

        let body = response.text().await.unwrap_or_default();
        Err(CourseCacheError::sync_failed(
            format!("Sync endpoint rejected progress: {}", body.trim()),
            Some(status.as_u16()),
        ))
    }
}
