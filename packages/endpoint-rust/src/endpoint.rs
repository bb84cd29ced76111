//! Endpoint assembly: wires configuration, handlers, behaviors and the
//! shared components into a running [`Endpoint`].

use std::sync::Arc;

use busline_core::{Clock, SystemClock};
use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::config::{ConfigError, EndpointConfig};
use crate::diagnostics::{DiagnosticListener, DiagnosticObserver};
use crate::dispatch::Dispatcher;
use crate::handlers::{HandlerRegistry, HandlerRegistryBuilder, MessageHandler};
use crate::lifecycle::EndpointLifecycle;
use crate::notifications::{NotificationSubscriber, Notifications, ReceivePipelineCompleted};
use crate::operations::MessageOperations;
use crate::pipeline::builder::DEFAULT_LISTENER;
use crate::pipeline::{
    Behavior, InvokeHandlerContext, MainPipelineExecutor, PipelineCache, PipelineError,
    PipelineSettings, TransportReceiveContext,
};
use crate::routing::{EndpointInstances, UnicastRoutes};
use crate::scope::ServiceRegistry;
use crate::timeouts::{InMemoryTimeoutPersister, TimeoutPersister, TimeoutPoller};

/// Errors from [`EndpointBuilder::start`].
#[derive(Debug, thiserror::Error)]
pub enum EndpointError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("no dispatcher configured")]
    MissingDispatcher,
    #[error(transparent)]
    Pipeline(#[from] PipelineError),
}

// ---------------------------------------------------------------------------
// EndpointBuilder
// ---------------------------------------------------------------------------

/// Collects everything an endpoint needs before it starts.
pub struct EndpointBuilder {
    config: EndpointConfig,
    handlers: HandlerRegistryBuilder,
    dispatcher: Option<Arc<dyn Dispatcher>>,
    persister: Option<Arc<dyn TimeoutPersister>>,
    clock: Arc<dyn Clock>,
    services: Arc<ServiceRegistry>,
    instances: Arc<EndpointInstances>,
    receive_behaviors: Vec<Arc<dyn Behavior<TransportReceiveContext>>>,
    handler_behaviors: Vec<Arc<dyn Behavior<InvokeHandlerContext>>>,
    diagnostics: Arc<DiagnosticListener>,
    completed: Arc<Notifications<ReceivePipelineCompleted>>,
}

impl EndpointBuilder {
    #[must_use]
    pub fn new(config: EndpointConfig) -> Self {
        Self {
            config,
            handlers: HandlerRegistry::builder(),
            dispatcher: None,
            persister: None,
            clock: Arc::new(SystemClock),
            services: Arc::new(ServiceRegistry::new()),
            instances: Arc::new(EndpointInstances::new()),
            receive_behaviors: Vec::new(),
            handler_behaviors: Vec::new(),
            diagnostics: Arc::new(DiagnosticListener::new(DEFAULT_LISTENER)),
            completed: Arc::new(Notifications::new()),
        }
    }

    /// Registers `handler` for messages enclosing `kind`.
    #[must_use]
    pub fn handler(mut self, kind: impl Into<String>, handler: Arc<dyn MessageHandler>) -> Self {
        self.handlers = self.handlers.register(kind, handler);
        self
    }

    #[must_use]
    pub fn dispatcher(mut self, dispatcher: Arc<dyn Dispatcher>) -> Self {
        self.dispatcher = Some(dispatcher);
        self
    }

    /// Replaces the in-memory timeout store.
    #[must_use]
    pub fn timeout_persister(mut self, persister: Arc<dyn TimeoutPersister>) -> Self {
        self.persister = Some(persister);
        self
    }

    #[must_use]
    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Adds a receive behavior inside the built-in ones, after those added before.
    #[must_use]
    pub fn receive_behavior(mut self, behavior: Arc<dyn Behavior<TransportReceiveContext>>) -> Self {
        self.receive_behaviors.push(behavior);
        self
    }

    /// Adds a handler behavior inside the built-in ones, after those added before.
    #[must_use]
    pub fn handler_behavior(mut self, behavior: Arc<dyn Behavior<InvokeHandlerContext>>) -> Self {
        self.handler_behaviors.push(behavior);
        self
    }

    #[must_use]
    pub fn diagnostic_observer(self, observer: Arc<dyn DiagnosticObserver>) -> Self {
        self.diagnostics.subscribe(observer);
        self
    }

    #[must_use]
    pub fn on_pipeline_completed(
        self,
        subscriber: Arc<dyn NotificationSubscriber<ReceivePipelineCompleted>>,
    ) -> Self {
        self.completed.subscribe(subscriber);
        self
    }

    /// Registry for singletons and scoped services handlers can resolve.
    #[must_use]
    pub fn services(&self) -> &Arc<ServiceRegistry> {
        &self.services
    }

    /// Routing table; sources may register instances before or after start.
    #[must_use]
    pub fn instances(&self) -> &Arc<EndpointInstances> {
        &self.instances
    }

    /// Composes the pipelines, starts the timeout poller and marks the
    /// endpoint ready.
    ///
    /// # Errors
    ///
    /// Invalid configuration or a missing dispatcher.
    pub async fn start(self) -> Result<Endpoint, EndpointError> {
        self.config.validate()?;
        let dispatcher = self.dispatcher.ok_or(EndpointError::MissingDispatcher)?;
        let config = self.config;
        let clock = self.clock;

        let persister = self.persister.unwrap_or_else(|| {
            Arc::new(
                InMemoryTimeoutPersister::new(Arc::clone(&clock))
                    .with_empty_poll_interval(config.timeout_empty_poll_interval()),
            )
        });
        let poller = Arc::new(TimeoutPoller::new(
            persister,
            Arc::clone(&dispatcher),
            Arc::clone(&clock),
        ));
        let operations = Arc::new(MessageOperations::new(
            config.endpoint_name.clone(),
            config.local_address(),
            UnicastRoutes::new(config.routes.clone()),
            Arc::clone(&self.instances),
            Arc::clone(&poller),
            Arc::clone(&clock),
        ));

        let settings = PipelineSettings {
            processing_timeout: config.message_processing_timeout(),
            dispatcher,
            handlers: Arc::new(self.handlers.build()),
            diagnostics: Arc::clone(&self.diagnostics),
            receive_behaviors: self.receive_behaviors,
            handler_behaviors: self.handler_behaviors,
        };
        let pipelines = Arc::new(PipelineCache::build(&settings));

        let lifecycle = Arc::new(EndpointLifecycle::new());
        let executor = Arc::new(MainPipelineExecutor::new(
            self.services,
            Arc::clone(&operations),
            pipelines,
            self.completed,
            clock,
            Arc::clone(&lifecycle),
        )?);

        let poller_task = Arc::clone(&poller).start(lifecycle.stop_receiver());
        lifecycle.set_ready();
        info!(
            endpoint = %config.endpoint_name,
            address = %operations.local_address(),
            "endpoint started"
        );

        Ok(Endpoint {
            config,
            executor,
            operations,
            instances: self.instances,
            poller,
            diagnostics: self.diagnostics,
            lifecycle,
            poller_task: Mutex::new(Some(poller_task)),
        })
    }
}

// ---------------------------------------------------------------------------
// Endpoint
// ---------------------------------------------------------------------------

/// A started endpoint. Hand [`executor`](Self::executor) to the receive loop.
pub struct Endpoint {
    config: EndpointConfig,
    executor: Arc<MainPipelineExecutor>,
    operations: Arc<MessageOperations>,
    instances: Arc<EndpointInstances>,
    poller: Arc<TimeoutPoller>,
    diagnostics: Arc<DiagnosticListener>,
    lifecycle: Arc<EndpointLifecycle>,
    poller_task: Mutex<Option<JoinHandle<()>>>,
}

impl Endpoint {
    #[must_use]
    pub fn config(&self) -> &EndpointConfig {
        &self.config
    }

    #[must_use]
    pub fn executor(&self) -> &Arc<MainPipelineExecutor> {
        &self.executor
    }

    #[must_use]
    pub fn operations(&self) -> &Arc<MessageOperations> {
        &self.operations
    }

    #[must_use]
    pub fn instances(&self) -> &Arc<EndpointInstances> {
        &self.instances
    }

    #[must_use]
    pub fn timeouts(&self) -> &Arc<dyn TimeoutPersister> {
        self.poller.persister()
    }

    #[must_use]
    pub fn poller(&self) -> &Arc<TimeoutPoller> {
        &self.poller
    }

    #[must_use]
    pub fn diagnostics(&self) -> &Arc<DiagnosticListener> {
        &self.diagnostics
    }

    #[must_use]
    pub fn lifecycle(&self) -> &Arc<EndpointLifecycle> {
        &self.lifecycle
    }

    /// Stops the timeout poller and waits for in-flight messages, up to the
    /// configured drain timeout. Returns whether everything drained.
    pub async fn stop(&self) -> bool {
        self.lifecycle.request_stop();

        let poller_task = self.poller_task.lock().take();
        if let Some(task) = poller_task {
            if let Err(error) = task.await {
                warn!(error = %error, "timeout poller ended abnormally");
            }
        }

        let drained = self.lifecycle.wait_for_drain(self.config.drain_timeout()).await;
        if drained {
            info!(endpoint = %self.config.endpoint_name, "endpoint stopped");
        } else {
            warn!(
                endpoint = %self.config.endpoint_name,
                in_flight = self.lifecycle.in_flight_count(),
                "drain timeout elapsed with messages in flight"
            );
        }
        drained
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
