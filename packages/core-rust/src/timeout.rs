//! Deferred-delivery records.

use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::headers::Headers;

/// A message deferred until `time`.
///
/// `id` is assigned by the timeout store on insertion; any value supplied by
/// the caller is overwritten.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeoutData {
    pub id: String,
    /// Saga that owns this timeout, if any.
    pub saga_id: Option<Uuid>,
    /// Absolute instant at which the timeout becomes due.
    pub time: DateTime<Utc>,
    /// Transport address the message is dispatched to once due.
    pub destination: String,
    /// Opaque message body.
    pub state: Bytes,
    pub headers: Headers,
    /// Address of the endpoint that registered the timeout.
    pub owning_timeout_manager: String,
}

impl TimeoutData {
    #[must_use]
    pub fn new(destination: impl Into<String>, time: DateTime<Utc>, state: Bytes) -> Self {
        Self {
            id: String::new(),
            saga_id: None,
            time,
            destination: destination.into(),
            state,
            headers: Headers::new(),
            owning_timeout_manager: String::new(),
        }
    }

    #[must_use]
    pub fn with_saga(mut self, saga_id: Uuid) -> Self {
        self.saga_id = Some(saga_id);
        self
    }

    #[must_use]
    pub fn with_headers(mut self, headers: Headers) -> Self {
        self.headers = headers;
        self
    }

    #[must_use]
    pub fn with_owner(mut self, owner: impl Into<String>) -> Self {
        self.owning_timeout_manager = owner.into();
        self
    }
}

/// Identity and due time of one timeout returned by a chunk query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DueTimeout {
    pub id: String,
    pub due_time: DateTime<Utc>,
}

/// Result of one poll of the timeout store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TimeoutsChunk {
    /// Timeouts due in the polled window.
    pub due_timeouts: Vec<DueTimeout>,
    /// When the poller should query again.
    pub next_time_to_query: DateTime<Utc>,
}
