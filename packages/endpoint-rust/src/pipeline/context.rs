//! The per-message context chain: root, transport-receive, invoke-handler.
//!
//! Each stage owns a child [`ContextBag`] of the stage above it, so values
//! set by an outer behavior are visible further in but not the other way
//! round. All stages share one cancellation token and one span.

use std::any::Any;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use busline_core::{ContextBag, Headers, IncomingMessage, TransportTransaction};
use bytes::Bytes;
use chrono::{DateTime, Utc};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use super::builder::PipelineCache;
use super::error::PipelineError;
use super::span::MessageSpan;
use crate::handlers::MessageHandler;
use crate::operations::{MessageOperations, MessageOrigin, SendOptions};
use crate::pending::PendingTransportOperations;
use crate::scope::ServiceScope;

/// What every behavior can rely on, whatever stage it is bound to.
pub trait BehaviorContext: Send + 'static {
    /// Stage name used in metrics and logs.
    const STAGE: &'static str;

    fn message_id(&self) -> &str;
    fn extensions(&self) -> &ContextBag;
    fn cancellation(&self) -> &CancellationToken;
}

// ---------------------------------------------------------------------------
// RootContext
// ---------------------------------------------------------------------------

/// Endpoint-wide capabilities bound to one message's scope.
#[derive(Clone)]
pub struct RootContext {
    scope: Arc<ServiceScope>,
    operations: Arc<MessageOperations>,
    pipelines: Arc<PipelineCache>,
    cancellation: CancellationToken,
    extensions: ContextBag,
    span: Arc<MessageSpan>,
}

impl RootContext {
    #[must_use]
    pub fn new(
        scope: Arc<ServiceScope>,
        operations: Arc<MessageOperations>,
        pipelines: Arc<PipelineCache>,
        cancellation: CancellationToken,
        span: Arc<MessageSpan>,
    ) -> Self {
        Self {
            scope,
            operations,
            pipelines,
            cancellation,
            extensions: ContextBag::new(),
            span,
        }
    }

    #[must_use]
    pub fn scope(&self) -> &Arc<ServiceScope> {
        &self.scope
    }

    #[must_use]
    pub fn operations(&self) -> &Arc<MessageOperations> {
        &self.operations
    }

    #[must_use]
    pub fn pipelines(&self) -> &Arc<PipelineCache> {
        &self.pipelines
    }

    #[must_use]
    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancellation
    }

    #[must_use]
    pub fn extensions(&self) -> &ContextBag {
        &self.extensions
    }

    #[must_use]
    pub fn span(&self) -> &Arc<MessageSpan> {
        &self.span
    }
}

// ---------------------------------------------------------------------------
// TransportReceiveContext
// ---------------------------------------------------------------------------

/// One received message on its way to the handlers.
pub struct TransportReceiveContext {
    root: RootContext,
    message: Arc<IncomingMessage>,
    transaction: TransportTransaction,
    pending: Arc<PendingTransportOperations>,
    extensions: ContextBag,
}

impl TransportReceiveContext {
    #[must_use]
    pub fn new(
        root: RootContext,
        message: Arc<IncomingMessage>,
        transaction: TransportTransaction,
        pending: Arc<PendingTransportOperations>,
    ) -> Self {
        let extensions = root.extensions().child();
        Self {
            root,
            message,
            transaction,
            pending,
            extensions,
        }
    }

    #[must_use]
    pub fn root(&self) -> &RootContext {
        &self.root
    }

    #[must_use]
    pub fn message(&self) -> &Arc<IncomingMessage> {
        &self.message
    }

    #[must_use]
    pub fn transaction(&self) -> &TransportTransaction {
        &self.transaction
    }

    /// Outbound operations produced so far for this message.
    #[must_use]
    pub fn pending(&self) -> &Arc<PendingTransportOperations> {
        &self.pending
    }

    #[must_use]
    pub fn service<T: Any + Send + Sync>(&self) -> Option<Arc<T>> {
        self.root.scope().get::<T>()
    }

    /// Where outgoing messages produced at this stage originate from.
    #[must_use]
    pub fn origin(&self) -> MessageOrigin<'_> {
        MessageOrigin {
            message: &self.message,
            span: self.root.span(),
            pending: &self.pending,
        }
    }
}

impl BehaviorContext for TransportReceiveContext {
    const STAGE: &'static str = "transport_receive";

    fn message_id(&self) -> &str {
        self.message.message_id()
    }

    fn extensions(&self) -> &ContextBag {
        &self.extensions
    }

    fn cancellation(&self) -> &CancellationToken {
        self.root.cancellation()
    }
}

// ---------------------------------------------------------------------------
// InvokeHandlerContext
// ---------------------------------------------------------------------------

/// One handler about to process (or processing) the current message.
///
/// This is what handlers see: message access, scoped services, and the
/// outgoing-message API.
pub struct InvokeHandlerContext {
    root: RootContext,
    message: Arc<IncomingMessage>,
    message_kind: String,
    handler: Arc<dyn MessageHandler>,
    pending: Arc<PendingTransportOperations>,
    extensions: ContextBag,
    /// Shared by every handler invocation of the same message.
    halted: Arc<AtomicBool>,
}

impl InvokeHandlerContext {
    pub(crate) fn new(
        parent: &TransportReceiveContext,
        message_kind: String,
        handler: Arc<dyn MessageHandler>,
        halted: Arc<AtomicBool>,
    ) -> Self {
        Self {
            root: parent.root.clone(),
            message: Arc::clone(&parent.message),
            message_kind,
            handler,
            pending: Arc::clone(&parent.pending),
            extensions: parent.extensions.child(),
            halted,
        }
    }

    #[must_use]
    pub fn message(&self) -> &IncomingMessage {
        &self.message
    }

    #[must_use]
    pub fn headers(&self) -> &Headers {
        self.message.headers()
    }

    #[must_use]
    pub fn body(&self) -> &Bytes {
        self.message.body()
    }

    /// The enclosed kind this handler was resolved for.
    #[must_use]
    pub fn message_kind(&self) -> &str {
        &self.message_kind
    }

    #[must_use]
    pub fn handler(&self) -> &Arc<dyn MessageHandler> {
        &self.handler
    }

    #[must_use]
    pub fn span(&self) -> &MessageSpan {
        self.root.span()
    }

    #[must_use]
    pub fn service<T: Any + Send + Sync>(&self) -> Option<Arc<T>> {
        self.root.scope().get::<T>()
    }

    fn origin(&self) -> MessageOrigin<'_> {
        MessageOrigin {
            message: &self.message,
            span: self.root.span(),
            pending: &self.pending,
        }
    }

    /// Sends `kind` point-to-point, routed by `options` or the route table.
    ///
    /// # Errors
    ///
    /// Routing failures, or a timeout store failure for deferred sends.
    pub async fn send(
        &self,
        kind: &str,
        body: impl Into<Bytes>,
        options: SendOptions,
    ) -> Result<(), PipelineError> {
        let body = body.into();
        self.root
            .operations()
            .send(&self.origin(), kind, body, options)
            .await
    }

    /// Publishes `kind` to its subscribers.
    pub fn publish(&self, kind: &str, body: impl Into<Bytes>) {
        self.root
            .operations()
            .publish(&self.origin(), kind, body.into());
    }

    /// Replies to the sender of the current message.
    ///
    /// # Errors
    ///
    /// [`PipelineError::NoReplyAddress`] when the message names no reply-to.
    pub fn reply(&self, kind: &str, body: impl Into<Bytes>) -> Result<(), PipelineError> {
        self.root
            .operations()
            .reply(&self.origin(), kind, body.into())
    }

    /// Schedules a saga timeout back to this endpoint at `at`.
    ///
    /// # Errors
    ///
    /// Propagates the timeout store failure.
    pub async fn request_timeout(
        &self,
        saga_id: Uuid,
        at: DateTime<Utc>,
        kind: &str,
        body: impl Into<Bytes>,
    ) -> Result<String, PipelineError> {
        let body = body.into();
        self.root
            .operations()
            .request_timeout(&self.origin(), saga_id, at, kind, body)
            .await
    }

    /// Drops every pending timeout of `saga_id`.
    ///
    /// # Errors
    ///
    /// Propagates the timeout store failure.
    pub async fn clear_timeouts(&self, saga_id: Uuid) -> Result<(), PipelineError> {
        self.root.operations().clear_timeouts(saga_id).await
    }

    /// Skips the handlers that would run after this one for the current message.
    pub fn do_not_continue_dispatching_current_message_to_handlers(&self) {
        self.halted.store(true, Ordering::Release);
    }

    #[must_use]
    pub fn handler_invocation_aborted(&self) -> bool {
        self.halted.load(Ordering::Acquire)
    }
}

impl BehaviorContext for InvokeHandlerContext {
    const STAGE: &'static str = "invoke_handler";

    fn message_id(&self) -> &str {
        self.message.message_id()
    }

    fn extensions(&self) -> &ContextBag {
        &self.extensions
    }

    fn cancellation(&self) -> &CancellationToken {
        self.root.cancellation()
    }
}
