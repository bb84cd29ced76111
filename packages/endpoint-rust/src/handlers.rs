//! Message handlers and the kind -> handlers registry.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;

use crate::pipeline::InvokeHandlerContext;

/// Application code processing one message kind.
#[async_trait]
pub trait MessageHandler: Send + Sync + 'static {
    /// Name used in logs, diagnostics and error annotations.
    fn name(&self) -> &str;

    /// # Errors
    ///
    /// Any failure aborts the remaining handlers and fails the message.
    async fn handle(&self, ctx: &mut InvokeHandlerContext) -> anyhow::Result<()>;
}

/// Immutable registry built at configuration time.
#[derive(Default, Clone)]
pub struct HandlerRegistry {
    by_kind: HashMap<String, Vec<Arc<dyn MessageHandler>>>,
}

impl fmt::Debug for HandlerRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut kinds: Vec<_> = self.by_kind.keys().collect();
        kinds.sort();
        f.debug_struct("HandlerRegistry").field("kinds", &kinds).finish()
    }
}

impl HandlerRegistry {
    #[must_use]
    pub fn builder() -> HandlerRegistryBuilder {
        HandlerRegistryBuilder::default()
    }

    /// Handlers for `kinds`, in kind order then registration order, each
    /// paired with the kind it was resolved for.
    ///
    /// A handler registered for several of the kinds is returned once, for
    /// the first kind that matches.
    #[must_use]
    pub fn handlers_for(&self, kinds: &[&str]) -> Vec<(String, Arc<dyn MessageHandler>)> {
        let mut resolved: Vec<(String, Arc<dyn MessageHandler>)> = Vec::new();
        for kind in kinds {
            let Some(handlers) = self.by_kind.get(*kind) else {
                continue;
            };
            for handler in handlers {
                if !resolved.iter().any(|(_, seen)| Arc::ptr_eq(seen, handler)) {
                    resolved.push(((*kind).to_string(), Arc::clone(handler)));
                }
            }
        }
        resolved
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.by_kind.is_empty()
    }
}

#[derive(Default)]
pub struct HandlerRegistryBuilder {
    by_kind: HashMap<String, Vec<Arc<dyn MessageHandler>>>,
}

impl HandlerRegistryBuilder {
    /// Appends `handler` to the handlers of `kind`.
    #[must_use]
    pub fn register(mut self, kind: impl Into<String>, handler: Arc<dyn MessageHandler>) -> Self {
        self.by_kind.entry(kind.into()).or_default().push(handler);
        self
    }

    #[must_use]
    pub fn build(self) -> HandlerRegistry {
        HandlerRegistry {
            by_kind: self.by_kind,
        }
    }
}
