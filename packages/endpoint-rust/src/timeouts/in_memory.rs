//! In-memory [`TimeoutPersister`] implementation.
//!
//! A `Vec` behind a reader/writer lock: `peek` and `get_next_chunk` share the
//! lock, `add`, `try_remove` and `remove_by_saga_id` take it exclusively.

use std::sync::Arc;

use async_trait::async_trait;
use busline_core::{Clock, DueTimeout, TimeoutData, TimeoutsChunk};
use chrono::{DateTime, TimeDelta, Utc};
use parking_lot::RwLock;
use tracing::trace;
use uuid::Uuid;

use super::persister::TimeoutPersister;

/// Poll interval suggested when no stored timeout is due in the future.
pub const DEFAULT_EMPTY_POLL_INTERVAL: TimeDelta = TimeDelta::minutes(1);

/// Reference timeout store holding everything in process memory.
pub struct InMemoryTimeoutPersister {
    storage: RwLock<Vec<TimeoutData>>,
    clock: Arc<dyn Clock>,
    empty_poll_interval: TimeDelta,
}

impl InMemoryTimeoutPersister {
    #[must_use]
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            storage: RwLock::new(Vec::new()),
            clock,
            empty_poll_interval: DEFAULT_EMPTY_POLL_INTERVAL,
        }
    }

    /// Overrides how far ahead the next poll is scheduled when nothing is pending.
    #[must_use]
    pub fn with_empty_poll_interval(mut self, interval: TimeDelta) -> Self {
        self.empty_poll_interval = interval;
        self
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.storage.read().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.storage.read().is_empty()
    }
}

#[async_trait]
impl TimeoutPersister for InMemoryTimeoutPersister {
    async fn add(&self, mut timeout: TimeoutData) -> anyhow::Result<String> {
        timeout.id = Uuid::new_v4().to_string();
        let id = timeout.id.clone();
        trace!(timeout_id = %id, due = %timeout.time, "timeout stored");
        self.storage.write().push(timeout);
        Ok(id)
    }

    async fn peek(&self, timeout_id: &str) -> anyhow::Result<Option<TimeoutData>> {
        Ok(self
            .storage
            .read()
            .iter()
            .find(|t| t.id == timeout_id)
            .cloned())
    }

    async fn try_remove(&self, timeout_id: &str) -> anyhow::Result<bool> {
        let mut storage = self.storage.write();
        match storage.iter().position(|t| t.id == timeout_id) {
            Some(index) => {
                storage.remove(index);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn remove_by_saga_id(&self, saga_id: Uuid) -> anyhow::Result<()> {
        self.storage
            .write()
            .retain(|t| t.saga_id != Some(saga_id));
        Ok(())
    }

    async fn get_next_chunk(&self, start_slice: DateTime<Utc>) -> anyhow::Result<TimeoutsChunk> {
        let now = self.clock.now();
        let mut next_time_to_query: Option<DateTime<Utc>> = None;
        let mut due_timeouts = Vec::new();

        {
            let storage = self.storage.read();
            for data in storage.iter() {
                if data.time > now && next_time_to_query.map_or(true, |next| data.time < next) {
                    next_time_to_query = Some(data.time);
                }
                if data.time > start_slice && data.time <= now {
                    due_timeouts.push(DueTimeout {
                        id: data.id.clone(),
                        due_time: data.time,
                    });
                }
            }
        }

        Ok(TimeoutsChunk {
            due_timeouts,
            next_time_to_query: next_time_to_query.unwrap_or(now + self.empty_poll_interval),
        })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
