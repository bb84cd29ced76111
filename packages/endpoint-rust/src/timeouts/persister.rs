use async_trait::async_trait;
use busline_core::{TimeoutData, TimeoutsChunk};
use chrono::{DateTime, Utc};
use uuid::Uuid;

/// Pluggable persistence backend for deferred messages.
///
/// Implementations: in-memory (reference, tests). Durable backends must offer
/// the same operations and the same due-window / poll-interval semantics.
#[async_trait]
pub trait TimeoutPersister: Send + Sync {
    /// Store `timeout` under a freshly generated id and return that id.
    /// Any caller-supplied id is overwritten.
    async fn add(&self, timeout: TimeoutData) -> anyhow::Result<String>;

    /// Load a single timeout by id, or `None` if it does not exist.
    async fn peek(&self, timeout_id: &str) -> anyhow::Result<Option<TimeoutData>>;

    /// Remove a single timeout by id. Returns whether one was removed.
    async fn try_remove(&self, timeout_id: &str) -> anyhow::Result<bool>;

    /// Remove every timeout owned by `saga_id`. No-op when none match.
    async fn remove_by_saga_id(&self, saga_id: Uuid) -> anyhow::Result<()>;

    /// Timeouts due in `(start_slice, now]` plus the instant to poll again.
    async fn get_next_chunk(&self, start_slice: DateTime<Utc>) -> anyhow::Result<TimeoutsChunk>;
}
