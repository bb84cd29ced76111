use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;

use crate::diagnostics::{DiagnosticEvent, DiagnosticListener, PROCESSED};
use crate::pipeline::{Behavior, BehaviorContext, InvokeHandlerContext, Next, PipelineError};

/// Emits `<listener>.Processed` after a handler succeeded, when anyone listens.
///
/// The handler's result is returned exactly as produced; failures are never
/// reported as events.
pub struct InvokedHandlerDiagnostics {
    listener: Arc<DiagnosticListener>,
    event_name: String,
}

impl InvokedHandlerDiagnostics {
    #[must_use]
    pub fn new(listener: Arc<DiagnosticListener>) -> Self {
        let event_name = listener.event_name(PROCESSED);
        Self {
            listener,
            event_name,
        }
    }
}

#[async_trait]
impl Behavior<InvokeHandlerContext> for InvokedHandlerDiagnostics {
    async fn invoke(
        &self,
        ctx: InvokeHandlerContext,
        next: Next<InvokeHandlerContext>,
    ) -> Result<(), PipelineError> {
        let handler = ctx.handler().name().to_string();
        let message_id = ctx.message_id().to_string();
        let message_kind = ctx.message_kind().to_string();
        let started = Instant::now();

        next.run(ctx).await?;

        if self.listener.is_enabled(&self.event_name) {
            self.listener.write(&DiagnosticEvent {
                name: self.event_name.clone(),
                handler,
                message_id,
                message_kind,
                duration: started.elapsed(),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use parking_lot::Mutex;
    use tower::util::BoxCloneSyncService;
    use tower::{service_fn, Layer, ServiceExt};

    use super::*;
    use crate::diagnostics::DiagnosticObserver;
    use crate::testing::handler_context;
    use crate::pipeline::{BehaviorLayer, Pipeline};

    #[derive(Default)]
    struct Recording {
        events: Mutex<Vec<DiagnosticEvent>>,
    }

    impl DiagnosticObserver for Recording {
        fn on_event(&self, event: &DiagnosticEvent) -> anyhow::Result<()> {
            self.events.lock().push(event.clone());
            Ok(())
        }
    }

    struct Broken;

    impl DiagnosticObserver for Broken {
        fn on_event(&self, _event: &DiagnosticEvent) -> anyhow::Result<()> {
            anyhow::bail!("observer crashed")
        }
    }

    fn pipeline(listener: Arc<DiagnosticListener>, fail: bool) -> Pipeline<InvokeHandlerContext> {
        let terminal = service_fn(move |_ctx: InvokeHandlerContext| async move {
            if fail {
                Err(PipelineError::Handler {
                    handler: "PlaceOrderHandler".to_string(),
                    source: anyhow::anyhow!("boom"),
                })
            } else {
                Ok(())
            }
        });
        let behavior: Arc<dyn Behavior<InvokeHandlerContext>> =
            Arc::new(InvokedHandlerDiagnostics::new(listener));
        BoxCloneSyncService::new(BehaviorLayer::new(behavior).layer(terminal))
    }

    #[tokio::test]
    async fn success_emits_processed_event() {
        let listener = Arc::new(DiagnosticListener::new("busline.handlers"));
        let recording = Arc::new(Recording::default());
        listener.subscribe(recording.clone());

        pipeline(listener, false)
            .oneshot(handler_context("PlaceOrder", "PlaceOrderHandler"))
            .await
            .unwrap();

        let events = recording.events.lock();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].name, "busline.handlers.Processed");
        assert_eq!(events[0].handler, "PlaceOrderHandler");
        assert_eq!(events[0].message_kind, "PlaceOrder");
    }

    #[tokio::test]
    async fn failure_is_returned_unchanged_without_event() {
        let listener = Arc::new(DiagnosticListener::new("busline.handlers"));
        let recording = Arc::new(Recording::default());
        listener.subscribe(recording.clone());

        let err = pipeline(listener, true)
            .oneshot(handler_context("PlaceOrder", "PlaceOrderHandler"))
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::Handler { ref handler, .. } if handler == "PlaceOrderHandler"));
        assert!(recording.events.lock().is_empty());
    }

    #[tokio::test]
    async fn broken_observer_does_not_fail_the_handler() {
        let listener = Arc::new(DiagnosticListener::new("busline.handlers"));
        listener.subscribe(Arc::new(Broken));

        pipeline(listener, false)
            .oneshot(handler_context("PlaceOrder", "PlaceOrderHandler"))
            .await
            .unwrap();
    }
}
