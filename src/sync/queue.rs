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


//! Durable progress outbox
//!
//! Items live in the `SyncQueue` collection until the transport acknowledges
//! them, so a crash or reload never loses an update. Delivery is
//! at-least-once:
//!
//! - a pending item for the same lecture is overwritten in place (coalescing)
//! - an item already being sent is never touched; newer progress lands in a
//!   new row and is sent after it
//! - a failed send puts the item back and stops the drain, keeping order
//! - items left `in_flight` by a crash are reset to pending on startup

use crate::error::{CourseCacheError, Result};
use crate::storage::models::{ProgressRecord, SyncQueueItem};
use crate::storage::queries;
use crate::sync::transport::SyncTransport;
use serde::{Deserialize, Serialize};
use sqlx::{SqliteConnection, SqlitePool};
use std::fmt;
use std::sync::Arc;
use tokio::sync::Mutex;
use uuid::Uuid;

/// Identifier this installation reports to the sync endpoint
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DeviceId(String);

impl DeviceId {
    pub fn new<S: Into<String>>(id: S) -> Result<Self> {
        let id = id.into();
        if id.trim().is_empty() {
            return Err(CourseCacheError::invalid_input("Device id must not be empty"));
        }
        Ok(Self(id))
    }

    /// Fresh random identifier for a new installation
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Summary of one `drain` call
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DrainReport {
    /// Items acknowledged and removed
    pub sent: usize,
    /// Items still queued afterwards
    pub remaining: i64,
    /// Error that stopped the drain, if any
    pub last_error: Option<String>,
}

/// Outbox of progress records awaiting acknowledgment
pub struct SyncQueue {
    pool: SqlitePool,
    device_id: Option<DeviceId>,
    transport: Arc<dyn SyncTransport>,
    drain_lock: Mutex<()>,
}

impl fmt::Debug for SyncQueue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SyncQueue")
            .field("device_id", &self.device_id)
            .finish_non_exhaustive()
    }
}

impl SyncQueue {
    /// Open the queue, recovering items a previous run left in flight
    ///
    /// Without a device id every operation is a no-op.
    pub async fn new(
        pool: SqlitePool,
        device_id: Option<DeviceId>,
        transport: Arc<dyn SyncTransport>,
    ) -> Result<Self> {
        if device_id.is_some() {
            let recovered = queries::reset_in_flight_sync_items(&pool).await?;
            if recovered > 0 {
                tracing::info!(recovered, "Requeued sync items interrupted mid-send");
            }
        } else {
            tracing::debug!("No device id, remote sync disabled");
        }

        Ok(Self {
            pool,
            device_id,
            transport,
            drain_lock: Mutex::new(()),
        })
    }

    pub fn is_enabled(&self) -> bool {
        self.device_id.is_some()
    }

    pub fn device_id(&self) -> Option<&DeviceId> {
        self.device_id.as_ref()
    }

    /// Queue a record for delivery
    ///
    /// Returns the id of the queue item carrying it, or `None` when sync is
    /// disabled.
    pub async fn enqueue(&self, record: &ProgressRecord) -> Result<Option<i64>> {
        if self.device_id.is_none() {
            return Ok(None);
        }

        let mut tx = self.pool.begin().await?;
        let item_id = self.enqueue_in(&mut *tx, record).await?;
        tx.commit().await?;
        Ok(item_id)
    }

    /// Queue a record inside the caller's transaction
    ///
    /// The progress store uses this so a progress row never commits without
    /// its queue item.
    pub async fn enqueue_in(
        &self,
        conn: &mut SqliteConnection,
        record: &ProgressRecord,
    ) -> Result<Option<i64>> {
        let Some(device_id) = &self.device_id else {
            return Ok(None);
        };

        let (item_id, coalesced) =
            queries::enqueue_sync_item_in(conn, device_id.as_str(), record).await?;

        tracing::debug!(
            item_id,
            coalesced,
            course_id = %record.course_id,
            lecture_key = %record.lecture_key,
            "Queued progress for sync"
        );

        Ok(Some(item_id))
    }

    /// Send queued items in order until the queue is empty or a send fails
    pub async fn drain(&self) -> Result<DrainReport> {
        if self.device_id.is_none() {
            return Ok(DrainReport::default());
        }

        let _guard = self.drain_lock.lock().await;
        let mut report = DrainReport::default();

        while let Some(item) = queries::claim_next_sync_item(&self.pool).await? {
            match self.transport.send(&item.device_id, &item.progress).await {
                Ok(()) => {
                    queries::delete_sync_item(&self.pool, item.item_id).await?;
                    report.sent += 1;
                }
                Err(e) => {
                    tracing::warn!(
                        item_id = item.item_id,
                        attempts = item.attempts,
                        retryable = e.is_retryable(),
                        error = %e,
                        "Sync send failed, keeping item queued"
                    );
                    queries::release_sync_item(&self.pool, item.item_id, &e.to_string()).await?;
                    report.last_error = Some(e.to_string());
                    break;
                }
            }
        }

        report.remaining = queries::count_pending_sync_items(&self.pool).await?;

        if report.sent > 0 || report.last_error.is_some() {
            tracing::info!(sent = report.sent, remaining = report.remaining, "Sync drain finished");
        }

        Ok(report)
    }

    /// Items not yet acknowledged, including any being sent right now
    pub async fn pending_count(&self) -> Result<i64> {
        queries::count_pending_sync_items(&self.pool).await
    }

    /// Snapshot of the queue in delivery order
    pub async fn items(&self) -> Result<Vec<SyncQueueItem>> {
        queries::list_sync_items(&self.pool).await
    }
}
