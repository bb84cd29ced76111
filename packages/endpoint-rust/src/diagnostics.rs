//! Runtime-subscribable diagnostic events.
//!
//! Emission sites check [`DiagnosticListener::is_enabled`] before building an
//! event, so an endpoint without observers pays one atomic load per check.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwap;
use tracing::warn;

/// Event suffix emitted after a handler completed successfully.
pub const PROCESSED: &str = "Processed";

/// One handler invocation, reported after it succeeded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiagnosticEvent {
    /// Fully qualified event name, `<listener>.<suffix>`.
    pub name: String,
    pub handler: String,
    pub message_id: String,
    pub message_kind: String,
    pub duration: Duration,
}

/// Consumer of diagnostic events.
pub trait DiagnosticObserver: Send + Sync {
    /// Whether this observer wants `event_name`. Defaults to everything.
    fn is_enabled(&self, event_name: &str) -> bool {
        let _ = event_name;
        true
    }

    /// # Errors
    ///
    /// Failures are logged by the listener and never reach the emitter.
    fn on_event(&self, event: &DiagnosticEvent) -> anyhow::Result<()>;
}

/// Named event source with a copy-on-write observer list.
pub struct DiagnosticListener {
    name: String,
    observers: ArcSwap<Vec<Arc<dyn DiagnosticObserver>>>,
}

impl fmt::Debug for DiagnosticListener {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DiagnosticListener")
            .field("name", &self.name)
            .field("observers", &self.observers.load().len())
            .finish()
    }
}

impl DiagnosticListener {
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            observers: ArcSwap::from_pointee(Vec::new()),
        }
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// `<listener>.<suffix>`.
    #[must_use]
    pub fn event_name(&self, suffix: &str) -> String {
        format!("{}.{suffix}", self.name)
    }

    /// Adds an observer; takes effect for the next emission.
    pub fn subscribe(&self, observer: Arc<dyn DiagnosticObserver>) {
        self.observers.rcu(|current| {
            let mut next = Vec::clone(current);
            next.push(Arc::clone(&observer));
            next
        });
    }

    /// True when at least one observer wants `event_name`.
    #[must_use]
    pub fn is_enabled(&self, event_name: &str) -> bool {
        self.observers
            .load()
            .iter()
            .any(|observer| observer.is_enabled(event_name))
    }

    /// Hands `event` to every interested observer, swallowing their failures.
    pub fn write(&self, event: &DiagnosticEvent) {
        for observer in self.observers.load().iter() {
            if !observer.is_enabled(&event.name) {
                continue;
            }
            if let Err(error) = observer.on_event(event) {
                warn!(
                    listener = %self.name,
                    event = %event.name,
                    error = %error,
                    "diagnostic observer failed"
                );
            }
        }
    }
}
