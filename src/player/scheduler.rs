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


//! Debounced progress persistence
//!
//! One pending slot per session. Each scheduled record replaces the one
//! waiting in the slot and moves its deadline; a background worker saves
//! whatever is in the slot once the deadline passes. `flush_now` empties
//! the slot immediately for terminal events.
//!
//! Saves never overtake each other: the worker and `flush_now` both take the
//! slot while holding the persist lock, and a running save is never
//! cancelled.

use crate::error::Result;
use crate::progress::ProgressStore;
use crate::storage::models::ProgressRecord;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, Notify};
use tokio::task::JoinHandle;
use tokio::time::Instant;

#[derive(Debug)]
struct Pending {
    record: ProgressRecord,
    deadline: Instant,
    /// Also mirror to the portable file after saving
    flush: bool,
    generation: u64,
}

struct Shared {
    store: ProgressStore,
    slot: Mutex<Option<Pending>>,
    notify: Notify,
    persist_lock: Mutex<()>,
    generation: AtomicU64,
    last_persisted: Mutex<Option<ProgressRecord>>,
}

impl Shared {
    async fn fire_due(&self) {
        let _persist = self.persist_lock.lock().await;
        let due = {
            let mut slot = self.slot.lock().await;
            if slot.as_ref().is_some_and(|p| p.deadline <= Instant::now()) {
                slot.take()
            } else {
                None
            }
        };

        if let Some(pending) = due {
            let generation = pending.generation;
            if let Err(e) = self.persist(pending.record, pending.flush, generation).await {
                tracing::warn!(error = %e, "Debounced progress save failed");
            }
        }
    }

    async fn persist(&self, record: ProgressRecord, flush: bool, generation: u64) -> Result<ProgressRecord> {
        let saved = self.store.save(record).await?;

        if flush {
            if let Err(e) = self.store.flush(&saved.course_id).await {
                tracing::warn!(course_id = %saved.course_id, error = %e, "Progress flush failed");
            }
        }

        // Results for a video that is no longer active are not applied
        if generation == self.generation.load(Ordering::SeqCst) {
            *self.last_persisted.lock().await = Some(saved.clone());
        }

        Ok(saved)
    }
}

/// Single-slot debouncer in front of the progress store
pub struct FlushScheduler {
    shared: Arc<Shared>,
    worker: JoinHandle<()>,
}

impl FlushScheduler {
    pub fn new(store: ProgressStore) -> Self {
        let shared = Arc::new(Shared {
            store,
            slot: Mutex::new(None),
            notify: Notify::new(),
            persist_lock: Mutex::new(()),
            generation: AtomicU64::new(0),
            last_persisted: Mutex::new(None),
        });
        let worker = tokio::spawn(run(shared.clone()));

        Self { shared, worker }
    }

    /// Start a new generation, typically for a newly loaded video
    pub async fn advance(&self) -> u64 {
        let generation = self.shared.generation.fetch_add(1, Ordering::SeqCst) + 1;
        *self.shared.last_persisted.lock().await = None;
        generation
    }

    pub fn generation(&self) -> u64 {
        self.shared.generation.load(Ordering::SeqCst)
    }

    /// Put a record in the slot, replacing anything waiting there
    pub async fn schedule(&self, record: ProgressRecord, delay: Duration, flush: bool) {
        {
            let mut slot = self.shared.slot.lock().await;
            let flush = flush
                || slot
                    .as_ref()
                    .is_some_and(|p| p.flush && p.record.lecture_key == record.lecture_key);
            *slot = Some(Pending {
                record,
                deadline: Instant::now() + delay,
                flush,
                generation: self.generation(),
            });
        }
        self.shared.notify.notify_one();
    }

    /// Save and mirror immediately
    ///
    /// `record` supersedes whatever is pending; with `None` the pending
    /// record, if any, is saved. Returns the stored record.
    pub async fn flush_now(&self, record: Option<ProgressRecord>) -> Result<Option<ProgressRecord>> {
        let _persist = self.shared.persist_lock.lock().await;
        let pending = self.shared.slot.lock().await.take();

        let (record, generation) = match (record, pending) {
            (Some(record), _) => (record, self.generation()),
            (None, Some(pending)) => (pending.record, pending.generation),
            (None, None) => return Ok(None),
        };

        self.shared.persist(record, true, generation).await.map(Some)
    }

    pub async fn has_pending(&self) -> bool {
        self.shared.slot.lock().await.is_some()
    }

    /// Last record saved for the current generation
    pub async fn last_persisted(&self) -> Option<ProgressRecord> {
        self.shared.last_persisted.lock().await.clone()
    }
}

impl Drop for FlushScheduler {
    fn drop(&mut self) {
        self.worker.abort();
    }
}

async fn run(shared: Arc<Shared>) {
    loop {
        let deadline = shared.slot.lock().await.as_ref().map(|p| p.deadline);

        match deadline {
            None => shared.notify.notified().await,
            Some(deadline) => {
                tokio::select! {
                    _ = tokio::time::sleep_until(deadline) => shared.fire_due().await,
                    _ = shared.notify.notified() => {}
                }
            }
        }
    }
}
