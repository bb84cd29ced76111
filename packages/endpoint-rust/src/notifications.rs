//! Typed fan-out of pipeline events to subscribers.

use std::sync::Arc;

use async_trait::async_trait;
use busline_core::IncomingMessage;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;

/// Raised once per successful pipeline run.
#[derive(Debug, Clone)]
pub struct ReceivePipelineCompleted {
    pub message: Arc<IncomingMessage>,
    pub started_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
}

/// Receives events of type `E`.
#[async_trait]
pub trait NotificationSubscriber<E: Send + Sync>: Send + Sync {
    async fn handle(&self, event: &E) -> anyhow::Result<()>;
}

/// Subscriber list for one event type.
///
/// Subscribers run sequentially in subscription order; the first failure
/// stops the fan-out and is returned to the raiser.
pub struct Notifications<E: Send + Sync> {
    subscribers: RwLock<Vec<Arc<dyn NotificationSubscriber<E>>>>,
}

impl<E: Send + Sync> Notifications<E> {
    #[must_use]
    pub fn new() -> Self {
        Self {
            subscribers: RwLock::new(Vec::new()),
        }
    }

    pub fn subscribe(&self, subscriber: Arc<dyn NotificationSubscriber<E>>) {
        self.subscribers.write().push(subscriber);
    }

    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.subscribers.read().len()
    }

    /// Delivers `event` to every subscriber.
    ///
    /// # Errors
    ///
    /// Returns the first subscriber failure.
    pub async fn raise(&self, event: &E) -> anyhow::Result<()> {
        let subscribers = self.subscribers.read().clone();
        for subscriber in subscribers {
            subscriber.handle(event).await?;
        }
        Ok(())
    }
}

impl<E: Send + Sync> Default for Notifications<E> {
    fn default() -> Self {
        Self::new()
    }
}
