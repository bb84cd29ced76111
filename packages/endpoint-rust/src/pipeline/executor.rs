//! Top-level entry point: one received message in, one chain run out.

use std::sync::Arc;

use async_trait::async_trait;
use busline_core::{Clock, IncomingMessage, MessageContext};
use tokio_util::sync::CancellationToken;
use tower::ServiceExt;
use tracing::{debug, warn, Instrument};

use super::builder::PipelineCache;
use super::context::{BehaviorContext, RootContext, TransportReceiveContext};
use super::error::{InvokeError, PipelineError};
use super::span::MessageSpan;
use super::Pipeline;
use crate::lifecycle::EndpointLifecycle;
use crate::notifications::{Notifications, ReceivePipelineCompleted};
use crate::operations::MessageOperations;
use crate::pending::PendingTransportOperations;
use crate::scope::ServiceRegistry;

/// Runs received messages through the endpoint's pipeline.
///
/// Implementations perform exactly one chain run per call and never retry;
/// retrying is up to the receive loop.
#[async_trait]
pub trait PipelineExecutor: Send + Sync {
    /// # Errors
    ///
    /// [`InvokeError::Canceled`] when `cancellation` stopped the chain,
    /// [`InvokeError::Failed`] for any other chain failure, and
    /// [`InvokeError::Notification`] when a completion subscriber failed.
    async fn invoke(
        &self,
        message: MessageContext,
        cancellation: CancellationToken,
    ) -> Result<(), InvokeError>;
}

/// The endpoint's executor: scope, span, context chain, completion event.
pub struct MainPipelineExecutor {
    services: Arc<ServiceRegistry>,
    operations: Arc<MessageOperations>,
    pipelines: Arc<PipelineCache>,
    receive_pipeline: Pipeline<TransportReceiveContext>,
    completed: Arc<Notifications<ReceivePipelineCompleted>>,
    clock: Arc<dyn Clock>,
    lifecycle: Arc<EndpointLifecycle>,
}

impl MainPipelineExecutor {
    /// # Errors
    ///
    /// [`PipelineError::MissingPipeline`] when `pipelines` holds no
    /// transport-receive chain.
    pub fn new(
        services: Arc<ServiceRegistry>,
        operations: Arc<MessageOperations>,
        pipelines: Arc<PipelineCache>,
        completed: Arc<Notifications<ReceivePipelineCompleted>>,
        clock: Arc<dyn Clock>,
        lifecycle: Arc<EndpointLifecycle>,
    ) -> Result<Self, PipelineError> {
        let receive_pipeline = pipelines.get::<TransportReceiveContext>().ok_or(
            PipelineError::MissingPipeline {
                stage: TransportReceiveContext::STAGE,
            },
        )?;
        Ok(Self {
            services,
            operations,
            pipelines,
            receive_pipeline,
            completed,
            clock,
            lifecycle,
        })
    }
}

#[async_trait]
impl PipelineExecutor for MainPipelineExecutor {
    async fn invoke(
        &self,
        message: MessageContext,
        cancellation: CancellationToken,
    ) -> Result<(), InvokeError> {
        let _in_flight = self.lifecycle.in_flight_guard();
        let started_at = self.clock.now();

        let MessageContext {
            native_message_id,
            headers,
            body,
            transport_transaction,
            extensions,
        } = message;
        let span = Arc::new(MessageSpan::start(&headers));
        let scope = Arc::new(self.services.create_scope());
        let message = Arc::new(IncomingMessage::new(native_message_id, headers, body));
        span.tag_message(&message, self.operations.local_address());

        let root = RootContext::new(
            scope,
            Arc::clone(&self.operations),
            Arc::clone(&self.pipelines),
            cancellation.clone(),
            Arc::clone(&span),
        );
        root.extensions().merge(&extensions);
        let ctx = TransportReceiveContext::new(
            root,
            Arc::clone(&message),
            transport_transaction,
            Arc::new(PendingTransportOperations::new()),
        );

        let result = self
            .receive_pipeline
            .clone()
            .oneshot(ctx)
            .instrument(span.span().clone())
            .await;
        if let Err(error) = result {
            span.record_error(&error);
            let error = InvokeError::from_pipeline(error, &message, &cancellation);
            match &error {
                InvokeError::Canceled { message_id } => {
                    debug!(%message_id, "message processing canceled");
                }
                _ => warn!(
                    message_id = message.message_id(),
                    error = %error,
                    "message processing failed"
                ),
            }
            return Err(error);
        }

        let event = ReceivePipelineCompleted {
            message: Arc::clone(&message),
            started_at,
            completed_at: self.clock.now(),
        };
        if let Err(source) = self
            .completed
            .raise(&event)
            .instrument(span.span().clone())
            .await
        {
            span.record_error(&source);
            return Err(InvokeError::Notification(source));
        }
        span.record_ok();
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use busline_core::{headers, AddressTag, Headers, ManualClock, SystemClock, TraceParent};
    use bytes::Bytes;
    use chrono::{DateTime, TimeZone, Utc};
    use parking_lot::Mutex;

    use super::*;
    use crate::handlers::{HandlerRegistry, MessageHandler};
    use crate::notifications::NotificationSubscriber;
    use crate::operations::SendOptions;
    use crate::pipeline::{InvokeHandlerContext, PipelineSettings};
    use crate::routing::{EndpointInstances, UnicastRoutes};
    use crate::testing::RecordingDispatcher;
    use crate::timeouts::{InMemoryTimeoutPersister, TimeoutPoller};

    const PARENT: &str = "00-0af7651916cd43dd8448eb211c80319c-b7ad6b7169203331-01";

    #[derive(Clone, Copy)]
    enum Step {
        Ship,
        Publish,
        Fail,
        CancelThenFail,
        ReadTenant,
        ResolveCounter,
    }

    struct Scripted {
        steps: Vec<Step>,
        seen: Arc<Mutex<Vec<String>>>,
    }

    /// Scoped service, one instance per message.
    struct Counter(u64);

    #[async_trait]
    impl MessageHandler for Scripted {
        fn name(&self) -> &str {
            "Scripted"
        }

        async fn handle(&self, ctx: &mut InvokeHandlerContext) -> anyhow::Result<()> {
            for step in &self.steps {
                match step {
                    Step::Ship => {
                        ctx.send("ShipOrder", "{}", SendOptions::new()).await?;
                    }
                    Step::Publish => ctx.publish("OrderPlaced", "{}"),
                    Step::Fail => anyhow::bail!("inventory unavailable"),
                    Step::CancelThenFail => {
                        ctx.cancellation().cancel();
                        anyhow::bail!("gave up");
                    }
                    Step::ReadTenant => {
                        let tenant = ctx.extensions().get::<String>("tenant");
                        self.seen
                            .lock()
                            .push(tenant.map_or_else(String::new, |t| t.as_ref().clone()));
                    }
                    Step::ResolveCounter => {
                        let counter = ctx.service::<Counter>().map_or(0, |c| c.0);
                        self.seen.lock().push(counter.to_string());
                    }
                }
            }
            Ok(())
        }
    }

    #[derive(Default)]
    struct Completions {
        events: Mutex<Vec<ReceivePipelineCompleted>>,
        fail: bool,
    }

    #[async_trait]
    impl NotificationSubscriber<ReceivePipelineCompleted> for Completions {
        async fn handle(&self, event: &ReceivePipelineCompleted) -> anyhow::Result<()> {
            self.events.lock().push(event.clone());
            if self.fail {
                anyhow::bail!("audit log offline");
            }
            Ok(())
        }
    }

    struct Fixture {
        executor: MainPipelineExecutor,
        dispatcher: Arc<RecordingDispatcher>,
        completions: Arc<Completions>,
        lifecycle: Arc<EndpointLifecycle>,
        seen: Arc<Mutex<Vec<String>>>,
    }

    fn fixture_with(steps: &[Step], clock: Arc<dyn Clock>, failing_subscriber: bool) -> Fixture {
        let dispatcher = RecordingDispatcher::new();
        let store = Arc::new(InMemoryTimeoutPersister::new(clock.clone()));
        let poller = Arc::new(TimeoutPoller::new(store, dispatcher.clone(), clock.clone()));
        let operations = Arc::new(MessageOperations::new(
            "Sales",
            "Sales",
            UnicastRoutes::new(HashMap::from([(
                "ShipOrder".to_string(),
                "Shipping".to_string(),
            )])),
            Arc::new(EndpointInstances::new()),
            poller,
            clock.clone(),
        ));

        let seen: Arc<Mutex<Vec<String>>> = Arc::default();
        let handlers = HandlerRegistry::builder()
            .register(
                "PlaceOrder",
                Arc::new(Scripted {
                    steps: steps.to_vec(),
                    seen: Arc::clone(&seen),
                }),
            )
            .build();
        let pipelines = Arc::new(PipelineCache::build(&PipelineSettings::new(
            dispatcher.clone(),
            Arc::new(handlers),
        )));

        let services = Arc::new(ServiceRegistry::new());
        services.register_scoped(|scope: &crate::scope::ServiceScope| Counter(scope.id()));

        let completions = Arc::new(Completions {
            fail: failing_subscriber,
            ..Completions::default()
        });
        let completed = Arc::new(Notifications::<ReceivePipelineCompleted>::new());
        completed.subscribe(completions.clone());

        let lifecycle = Arc::new(EndpointLifecycle::new());
        let executor = MainPipelineExecutor::new(
            services,
            operations,
            pipelines,
            completed,
            clock,
            Arc::clone(&lifecycle),
        )
        .unwrap();
        Fixture {
            executor,
            dispatcher,
            completions,
            lifecycle,
            seen,
        }
    }

    fn fixture(steps: &[Step]) -> Fixture {
        fixture_with(steps, Arc::new(SystemClock), false)
    }

    fn place_order(extra: &[(&str, &str)]) -> MessageContext {
        let mut headers = Headers::from([
            (headers::MESSAGE_ID.to_string(), "order-1".to_string()),
            (
                headers::ENCLOSED_MESSAGE_TYPES.to_string(),
                "PlaceOrder".to_string(),
            ),
        ]);
        for (name, value) in extra {
            headers.insert((*name).to_string(), (*value).to_string());
        }
        MessageContext::new("native-1", headers, Bytes::from_static(b"{\"id\":1}"))
    }

    #[tokio::test]
    async fn success_dispatches_one_batch_and_notifies() {
        let f = fixture(&[Step::Ship, Step::Publish]);

        f.executor
            .invoke(place_order(&[]), CancellationToken::new())
            .await
            .unwrap();

        let batches = f.dispatcher.batches();
        assert_eq!(batches.len(), 1);
        let mut tags: Vec<_> = batches[0].iter().map(|op| op.address_tag.clone()).collect();
        tags.sort_by_key(|tag| format!("{tag:?}"));
        assert_eq!(
            tags,
            vec![
                AddressTag::Multicast {
                    message_kind: "OrderPlaced".to_string()
                },
                AddressTag::Unicast {
                    destination: "Shipping".to_string()
                },
            ]
        );

        let events = f.completions.events.lock();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].message.message_id(), "order-1");
        assert!(events[0].started_at <= events[0].completed_at);
        assert_eq!(f.lifecycle.in_flight_count(), 0);
    }

    #[tokio::test]
    async fn completion_timestamps_come_from_the_clock() {
        let start: DateTime<Utc> = Utc.with_ymd_and_hms(2024, 6, 1, 8, 0, 0).unwrap();
        let clock = Arc::new(ManualClock::new(start));
        let f = fixture_with(&[Step::Publish], clock, false);

        f.executor
            .invoke(place_order(&[]), CancellationToken::new())
            .await
            .unwrap();

        let events = f.completions.events.lock();
        assert_eq!(events[0].started_at, start);
        assert_eq!(events[0].completed_at, start);
    }

    #[tokio::test]
    async fn handler_failure_surfaces_annotated_and_unchanged() {
        let f = fixture(&[Step::Publish, Step::Fail]);

        let err = f
            .executor
            .invoke(place_order(&[]), CancellationToken::new())
            .await
            .unwrap_err();

        let processing = err.processing().unwrap();
        assert_eq!(processing.message_id, "order-1");
        assert_eq!(processing.native_message_id.as_deref(), Some("native-1"));
        assert!(!processing.pipeline_canceled);
        match err.pipeline_error().unwrap() {
            PipelineError::Handler { handler, source } => {
                assert_eq!(handler, "Scripted");
                assert_eq!(source.to_string(), "inventory unavailable");
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert!(f.dispatcher.batches().is_empty());
        assert!(f.completions.events.lock().is_empty());
    }

    #[tokio::test]
    async fn native_id_is_omitted_when_it_matches() {
        let f = fixture(&[Step::Fail]);
        let message = MessageContext::new(
            "order-1",
            Headers::from([(
                headers::ENCLOSED_MESSAGE_TYPES.to_string(),
                "PlaceOrder".to_string(),
            )]),
            Bytes::new(),
        );

        let err = f
            .executor
            .invoke(message, CancellationToken::new())
            .await
            .unwrap_err();
        assert_eq!(err.processing().unwrap().native_message_id, None);
    }

    #[tokio::test]
    async fn requested_cancellation_is_reported_as_canceled() {
        let f = fixture(&[Step::Publish]);
        let token = CancellationToken::new();
        token.cancel();

        let err = f.executor.invoke(place_order(&[]), token).await.unwrap_err();

        assert!(matches!(err, InvokeError::Canceled { ref message_id } if message_id == "order-1"));
        assert!(f.dispatcher.batches().is_empty());
        assert!(f.completions.events.lock().is_empty());
    }

    #[tokio::test]
    async fn failure_after_cancel_request_is_annotated() {
        let f = fixture(&[Step::CancelThenFail]);

        let err = f
            .executor
            .invoke(place_order(&[]), CancellationToken::new())
            .await
            .unwrap_err();

        let processing = err.processing().unwrap();
        assert!(processing.pipeline_canceled);
        assert!(matches!(processing.source, PipelineError::Handler { .. }));
    }

    #[tokio::test]
    async fn unknown_kind_fails_with_no_handlers() {
        let f = fixture(&[]);
        let message = MessageContext::new(
            "native-9",
            Headers::from([(
                headers::ENCLOSED_MESSAGE_TYPES.to_string(),
                "RefundOrder".to_string(),
            )]),
            Bytes::new(),
        );

        let err = f
            .executor
            .invoke(message, CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(
            err.pipeline_error(),
            Some(PipelineError::NoHandlers { kinds }) if kinds == &["RefundOrder"]
        ));
    }

    #[tokio::test]
    async fn subscriber_failure_is_a_notification_error() {
        let f = fixture_with(&[Step::Publish], Arc::new(SystemClock), true);

        let err = f
            .executor
            .invoke(place_order(&[]), CancellationToken::new())
            .await
            .unwrap_err();

        assert!(matches!(err, InvokeError::Notification(_)));
        // The chain itself completed, so its batch went out.
        assert_eq!(f.dispatcher.batches().len(), 1);
    }

    #[tokio::test]
    async fn outgoing_messages_continue_the_incoming_trace() {
        let f = fixture(&[Step::Publish]);

        f.executor
            .invoke(
                place_order(&[
                    (headers::TRACEPARENT, PARENT),
                    (headers::TRACESTATE, "vendor=1"),
                ]),
                CancellationToken::new(),
            )
            .await
            .unwrap();

        let operations = f.dispatcher.operations();
        let out = &operations[0].message.headers;
        let trace = TraceParent::parse(&out[headers::TRACEPARENT]).unwrap();
        assert_eq!(trace.trace_id(), "0af7651916cd43dd8448eb211c80319c");
        assert_ne!(trace.span_id(), "b7ad6b7169203331");
        assert_eq!(out[headers::TRACESTATE], "vendor=1");
        assert_eq!(out[headers::RELATED_TO], "order-1");
    }

    #[tokio::test]
    async fn caller_extensions_reach_handlers() {
        let f = fixture(&[Step::ReadTenant]);
        let message = place_order(&[]);
        message.extensions.set("tenant", "acme".to_string());

        f.executor
            .invoke(message, CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(*f.seen.lock(), vec!["acme"]);
    }

    #[tokio::test]
    async fn each_message_gets_its_own_scope() {
        let f = fixture(&[Step::ResolveCounter]);

        for _ in 0..2 {
            f.executor
                .invoke(place_order(&[]), CancellationToken::new())
                .await
                .unwrap();
        }

        let seen = f.seen.lock();
        assert_eq!(seen.len(), 2);
        assert_ne!(seen[0], seen[1]);
    }

    #[tokio::test]
    async fn messages_run_concurrently() {
        let f = Arc::new(fixture(&[Step::Publish]));

        let tasks: Vec<_> = (0..16)
            .map(|_| {
                let f = Arc::clone(&f);
                tokio::spawn(async move {
                    f.executor
                        .invoke(place_order(&[]), CancellationToken::new())
                        .await
                })
            })
            .collect();
        for task in tasks {
            task.await.unwrap().unwrap();
        }

        assert_eq!(f.dispatcher.batches().len(), 16);
        assert_eq!(f.completions.events.lock().len(), 16);
        assert_eq!(f.lifecycle.in_flight_count(), 0);
    }

    #[test]
    fn missing_receive_chain_is_rejected() {
        let clock: Arc<dyn Clock> = Arc::new(SystemClock);
        let dispatcher = RecordingDispatcher::new();
        let store = Arc::new(InMemoryTimeoutPersister::new(clock.clone()));
        let poller = Arc::new(TimeoutPoller::new(store, dispatcher, clock.clone()));
        let operations = Arc::new(MessageOperations::new(
            "Sales",
            "Sales",
            UnicastRoutes::new(HashMap::new()),
            Arc::new(EndpointInstances::new()),
            poller,
            clock.clone(),
        ));

        let result = MainPipelineExecutor::new(
            Arc::new(ServiceRegistry::new()),
            operations,
            Arc::new(PipelineCache::new()),
            Arc::new(Notifications::new()),
            clock,
            Arc::new(EndpointLifecycle::new()),
        );
        assert!(matches!(
            result,
            Err(PipelineError::MissingPipeline {
                stage: "transport_receive"
            })
        ));
    }
}
