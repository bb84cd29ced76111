//! Background dispatch of due timeouts.
//!
//! The poller repeatedly asks the store for the next chunk, dispatches every
//! due timeout to its destination, and sleeps until the store's recommended
//! poll instant. Registering a timeout that is due before the current window
//! wakes it early.

use std::sync::Arc;
use std::time::Duration;

use busline_core::{
    headers, Clock, DueTimeout, OutgoingMessage, TimeoutData, TransportOperation,
    TransportTransaction,
};
use chrono::{DateTime, TimeDelta, Utc};
use parking_lot::Mutex;
use tokio::sync::{watch, Notify};
use tokio::task::JoinHandle;
use tracing::{debug, warn};
use uuid::Uuid;

use super::persister::TimeoutPersister;
use crate::dispatch::Dispatcher;

/// How far back the very first poll looks for due timeouts.
const INITIAL_LOOKBACK: TimeDelta = TimeDelta::days(3650);

/// Wait before retrying after the store or the dispatcher failed.
const FAILURE_BACKOFF: Duration = Duration::from_secs(5);

// ---------------------------------------------------------------------------
// TimeoutPoller
// ---------------------------------------------------------------------------

/// Owns the polling window over a [`TimeoutPersister`] and dispatches what
/// falls due.
pub struct TimeoutPoller {
    persister: Arc<dyn TimeoutPersister>,
    dispatcher: Arc<dyn Dispatcher>,
    clock: Arc<dyn Clock>,
    window: Mutex<PollWindow>,
    wake: Notify,
}

/// Polling window state shared by the loop and registrations.
#[derive(Debug, Clone, Copy)]
struct PollWindow {
    /// Exclusive lower bound of the next chunk query.
    start: DateTime<Utc>,
    /// Earliest due time registered since the current round queried the store.
    registered_since_query: Option<DateTime<Utc>>,
}

impl TimeoutPoller {
    #[must_use]
    pub fn new(
        persister: Arc<dyn TimeoutPersister>,
        dispatcher: Arc<dyn Dispatcher>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let start_slice = clock.now() - INITIAL_LOOKBACK;
        Self {
            persister,
            dispatcher,
            clock,
            window: Mutex::new(PollWindow {
                start: start_slice,
                registered_since_query: None,
            }),
            wake: Notify::new(),
        }
    }

    #[must_use]
    pub fn persister(&self) -> &Arc<dyn TimeoutPersister> {
        &self.persister
    }

    /// Current exclusive lower bound of the polling window.
    #[must_use]
    pub fn start_slice(&self) -> DateTime<Utc> {
        self.window.lock().start
    }

    /// Stores `timeout` and makes sure the poller will see it.
    ///
    /// # Errors
    ///
    /// Propagates the store's failure to persist the record.
    pub async fn schedule(&self, timeout: TimeoutData) -> anyhow::Result<String> {
        let due = timeout.time;
        let id = self.persister.add(timeout).await?;
        self.new_timeout_registered(due);
        Ok(id)
    }

    /// Removes every timeout owned by `saga_id`.
    ///
    /// # Errors
    ///
    /// Propagates the store's failure.
    pub async fn clear_saga(&self, saga_id: Uuid) -> anyhow::Result<()> {
        self.persister.remove_by_saga_id(saga_id).await
    }

    /// Widens the window so a timeout due at `due` is not skipped, then wakes
    /// the polling loop.
    ///
    /// A round already in flight will not advance its window past `due`.
    pub fn new_timeout_registered(&self, due: DateTime<Utc>) {
        {
            let mut window = self.window.lock();
            if due <= window.start {
                window.start = due - TimeDelta::nanoseconds(1);
            }
            window.registered_since_query = Some(
                window
                    .registered_since_query
                    .map_or(due, |earliest| earliest.min(due)),
            );
        }
        self.wake.notify_one();
    }

    /// Runs one query/dispatch round and returns when to poll next.
    ///
    /// Each due timeout is loaded, dispatched on its own, and then removed.
    /// A timeout that disappeared between the query and the load (another
    /// poller or a saga completion removed it) is skipped.
    ///
    /// # Errors
    ///
    /// Fails on the first store or dispatch error; timeouts already
    /// dispatched in this round stay removed and the window is not advanced.
    pub async fn poll_once(&self) -> anyhow::Result<DateTime<Utc>> {
        let start_slice = {
            let mut window = self.window.lock();
            window.registered_since_query = None;
            window.start
        };
        let chunk = self.persister.get_next_chunk(start_slice).await?;

        let mut latest_due: Option<DateTime<Utc>> = None;
        for DueTimeout { id, due_time } in &chunk.due_timeouts {
            if let Some(data) = self.persister.peek(id).await? {
                self.dispatch_timeout(data).await?;
                if !self.persister.try_remove(id).await? {
                    debug!(timeout_id = %id, "timeout already removed after dispatch");
                }
            }
            latest_due = Some(latest_due.map_or(*due_time, |latest| latest.max(*due_time)));
        }

        {
            let mut window = self.window.lock();
            let advanced = latest_due.map_or(start_slice, |latest| latest.max(start_slice));
            // Timeouts registered during the round may not have been in the
            // chunk; the next query must still cover them.
            window.start = match window.registered_since_query {
                Some(earliest) => advanced.min(earliest - TimeDelta::nanoseconds(1)),
                None => advanced,
            };
        }

        debug!(
            dispatched = chunk.due_timeouts.len(),
            next_query = %chunk.next_time_to_query,
            "timeout poll complete"
        );
        Ok(chunk.next_time_to_query)
    }

    async fn dispatch_timeout(&self, data: TimeoutData) -> anyhow::Result<()> {
        let message_id = data
            .headers
            .get(headers::MESSAGE_ID)
            .cloned()
            .unwrap_or_else(|| data.id.clone());
        let message = OutgoingMessage::new(message_id, data.headers, data.state);
        let operation = TransportOperation::unicast(message, data.destination);
        self.dispatcher
            .dispatch(vec![operation], &TransportTransaction::default())
            .await
    }

    /// Spawns the polling loop. It exits once `shutdown` flips to `true` or
    /// its sender is dropped.
    pub fn start(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
        tokio::spawn(async move {
            debug!("timeout poller started");
            loop {
                if *shutdown.borrow() {
                    break;
                }

                let wait = match self.poll_once().await {
                    Ok(next) => (next - self.clock.now()).to_std().unwrap_or(Duration::ZERO),
                    Err(error) => {
                        warn!(error = %error, "timeout poll failed, backing off");
                        FAILURE_BACKOFF
                    }
                };

                tokio::select! {
                    () = tokio::time::sleep(wait) => {}
                    () = self.wake.notified() => {}
                    changed = shutdown.changed() => {
                        if changed.is_err() {
                            break;
                        }
                    }
                }
            }
            debug!("timeout poller stopped");
        })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
