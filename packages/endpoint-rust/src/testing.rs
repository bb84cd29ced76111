//! Test doubles shared by the unit tests of several modules.

use std::collections::HashMap;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use async_trait::async_trait;
use busline_core::{
    headers, Clock, ContextBag, Headers, IncomingMessage, SystemClock, TransportOperation,
    TransportTransaction,
};
use bytes::Bytes;
use parking_lot::Mutex;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;

use crate::dispatch::Dispatcher;
use crate::handlers::MessageHandler;
use crate::operations::MessageOperations;
use crate::pending::PendingTransportOperations;
use crate::pipeline::{
    BehaviorContext, InvokeHandlerContext, MessageSpan, PipelineCache, RootContext,
    TransportReceiveContext,
};
use crate::routing::{EndpointInstances, UnicastRoutes};
use crate::scope::ServiceRegistry;
use crate::timeouts::{InMemoryTimeoutPersister, TimeoutPoller};

/// Dispatcher that records every batch it receives.
#[derive(Default)]
pub(crate) struct RecordingDispatcher {
    batches: Mutex<Vec<Vec<TransportOperation>>>,
    fail: bool,
    dispatched: Notify,
}

impl RecordingDispatcher {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// A dispatcher whose every call fails after recording the batch.
    pub(crate) fn failing() -> Arc<Self> {
        Arc::new(Self {
            fail: true,
            ..Self::default()
        })
    }

    pub(crate) fn batches(&self) -> Vec<Vec<TransportOperation>> {
        self.batches.lock().clone()
    }

    pub(crate) fn operations(&self) -> Vec<TransportOperation> {
        self.batches.lock().iter().flatten().cloned().collect()
    }

    /// Waits until at least `count` operations have been dispatched in total.
    pub(crate) async fn wait_for(&self, count: usize) {
        loop {
            let notified = self.dispatched.notified();
            if self.operations().len() >= count {
                return;
            }
            notified.await;
        }
    }
}

#[async_trait]
impl Dispatcher for RecordingDispatcher {
    async fn dispatch(
        &self,
        operations: Vec<TransportOperation>,
        _transaction: &TransportTransaction,
    ) -> anyhow::Result<()> {
        self.batches.lock().push(operations);
        self.dispatched.notify_waiters();
        if self.fail {
            anyhow::bail!("transport unavailable");
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Contexts
// ---------------------------------------------------------------------------

/// Minimal context for exercising generic behaviors.
pub(crate) struct TestContext {
    pub(crate) message_id: String,
    pub(crate) extensions: ContextBag,
    pub(crate) cancellation: CancellationToken,
}

impl TestContext {
    pub(crate) fn new(message_id: &str) -> Self {
        Self {
            message_id: message_id.to_string(),
            extensions: ContextBag::new(),
            cancellation: CancellationToken::new(),
        }
    }
}

impl BehaviorContext for TestContext {
    const STAGE: &'static str = "test";

    fn message_id(&self) -> &str {
        &self.message_id
    }

    fn extensions(&self) -> &ContextBag {
        &self.extensions
    }

    fn cancellation(&self) -> &CancellationToken {
        &self.cancellation
    }
}

/// Handler that does nothing, identified by name.
pub(crate) struct NoopHandler(pub(crate) &'static str);

#[async_trait]
impl MessageHandler for NoopHandler {
    fn name(&self) -> &str {
        self.0
    }

    async fn handle(&self, _ctx: &mut InvokeHandlerContext) -> anyhow::Result<()> {
        Ok(())
    }
}

/// A receive context for message `m-1` of kind `PlaceOrder`, wired to
/// in-memory collaborators.
pub(crate) fn receive_context() -> TransportReceiveContext {
    receive_context_with(Arc::new(PipelineCache::new()))
}

/// Like [`receive_context`] but resolving chains from `pipelines`.
pub(crate) fn receive_context_with(pipelines: Arc<PipelineCache>) -> TransportReceiveContext {
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let store = Arc::new(InMemoryTimeoutPersister::new(clock.clone()));
    let poller = Arc::new(TimeoutPoller::new(
        store,
        RecordingDispatcher::new(),
        clock.clone(),
    ));
    let operations = Arc::new(MessageOperations::new(
        "Sales",
        "Sales",
        UnicastRoutes::new(HashMap::new()),
        Arc::new(EndpointInstances::new()),
        poller,
        clock,
    ));

    let headers = Headers::from([
        (headers::MESSAGE_ID.to_string(), "m-1".to_string()),
        (
            headers::ENCLOSED_MESSAGE_TYPES.to_string(),
            "PlaceOrder".to_string(),
        ),
    ]);
    let span = Arc::new(MessageSpan::start(&headers));
    let registry = Arc::new(ServiceRegistry::new());
    let root = RootContext::new(
        Arc::new(registry.create_scope()),
        operations,
        pipelines,
        CancellationToken::new(),
        span,
    );
    TransportReceiveContext::new(
        root,
        Arc::new(IncomingMessage::new("native-1", headers, Bytes::new())),
        TransportTransaction::default(),
        Arc::new(PendingTransportOperations::new()),
    )
}

/// A handler context for `kind` on top of [`receive_context`].
pub(crate) fn handler_context(kind: &str, handler_name: &'static str) -> InvokeHandlerContext {
    InvokeHandlerContext::new(
        &receive_context(),
        kind.to_string(),
        Arc::new(NoopHandler(handler_name)),
        Arc::new(AtomicBool::new(false)),
    )
}
