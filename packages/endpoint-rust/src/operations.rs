//! Outgoing-message capability shared by every message of an endpoint.
//!
//! Handlers reach it through their context. Each operation builds an
//! [`OutgoingMessage`] with headers propagated from the message being
//! processed and either deposits a transport operation into that message's
//! accumulator or, for deferred sends, hands it to the timeout store.

use std::sync::Arc;

use busline_core::{
    headers, Clock, Headers, IncomingMessage, OutgoingMessage, TimeoutData, TransportOperation,
};
use bytes::Bytes;
use chrono::{DateTime, TimeDelta, Utc};
use tracing::debug;
use uuid::Uuid;

use crate::pending::PendingTransportOperations;
use crate::pipeline::{MessageSpan, PipelineError};
use crate::routing::{DistributionPolicy, EndpointInstances, UnicastRoutes};
use crate::timeouts::TimeoutPoller;

/// The message an outgoing message is produced for.
#[derive(Clone, Copy)]
pub struct MessageOrigin<'a> {
    pub message: &'a IncomingMessage,
    pub span: &'a MessageSpan,
    pub pending: &'a PendingTransportOperations,
}

/// Per-send overrides.
#[derive(Debug, Clone, Default)]
pub struct SendOptions {
    destination: Option<String>,
    deliver_at: Option<DateTime<Utc>>,
    delay: Option<TimeDelta>,
    headers: Headers,
}

impl SendOptions {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sends to this logical endpoint instead of the routed one.
    #[must_use]
    pub fn to(mut self, endpoint: impl Into<String>) -> Self {
        self.destination = Some(endpoint.into());
        self
    }

    #[must_use]
    pub fn deliver_at(mut self, at: DateTime<Utc>) -> Self {
        self.deliver_at = Some(at);
        self.delay = None;
        self
    }

    #[must_use]
    pub fn delay_by(mut self, delay: TimeDelta) -> Self {
        self.delay = Some(delay);
        self.deliver_at = None;
        self
    }

    #[must_use]
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    fn due_at(&self, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        self.deliver_at
            .or_else(|| self.delay.map(|delay| now + delay))
            .filter(|due| *due > now)
    }
}

/// Send, publish, reply and saga-timeout operations for one endpoint.
pub struct MessageOperations {
    endpoint_name: String,
    local_address: String,
    routes: UnicastRoutes,
    instances: Arc<EndpointInstances>,
    distribution: DistributionPolicy,
    timeouts: Arc<TimeoutPoller>,
    clock: Arc<dyn Clock>,
}

impl MessageOperations {
    #[must_use]
    pub fn new(
        endpoint_name: impl Into<String>,
        local_address: impl Into<String>,
        routes: UnicastRoutes,
        instances: Arc<EndpointInstances>,
        timeouts: Arc<TimeoutPoller>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            endpoint_name: endpoint_name.into(),
            local_address: local_address.into(),
            routes,
            instances,
            distribution: DistributionPolicy::new(),
            timeouts,
            clock,
        }
    }

    #[must_use]
    pub fn distribution(&self) -> &DistributionPolicy {
        &self.distribution
    }

    #[must_use]
    pub fn local_address(&self) -> &str {
        &self.local_address
    }

    /// Routes and sends `kind`.
    ///
    /// The logical destination is the explicit one in `options`, else the
    /// route table entry for `kind`. One of its instances is picked by the
    /// distribution policy. A send due in the future goes to the timeout
    /// store instead of the accumulator.
    ///
    /// # Errors
    ///
    /// [`PipelineError::Routing`] when no destination resolves,
    /// [`PipelineError::Timeouts`] when storing a deferred send fails.
    pub async fn send(
        &self,
        origin: &MessageOrigin<'_>,
        kind: &str,
        body: Bytes,
        options: SendOptions,
    ) -> Result<(), PipelineError> {
        let endpoint = match &options.destination {
            Some(endpoint) => endpoint.clone(),
            None => self.routes.route_for(kind)?.to_string(),
        };
        let instances = self.instances.find_instances(&endpoint)?;
        let address = self.distribution.select(&endpoint, &instances).transport_address();

        let now = self.clock.now();
        let due = options.due_at(now);
        let message = self.outgoing(origin, kind, body, options.headers);

        if let Some(due) = due {
            let timeout = TimeoutData::new(address, due, message.body)
                .with_headers(message.headers)
                .with_owner(self.local_address.clone());
            let timeout_id = self
                .timeouts
                .schedule(timeout)
                .await
                .map_err(PipelineError::Timeouts)?;
            debug!(kind, %due, timeout_id, "send deferred");
            return Ok(());
        }

        origin
            .pending
            .add(TransportOperation::unicast(message, address));
        Ok(())
    }

    /// Publishes `kind` to every subscriber.
    pub fn publish(&self, origin: &MessageOrigin<'_>, kind: &str, body: Bytes) {
        let message = self.outgoing(origin, kind, body, Headers::new());
        origin
            .pending
            .add(TransportOperation::multicast(message, kind));
    }

    /// Replies to the incoming message's reply-to address.
    ///
    /// # Errors
    ///
    /// [`PipelineError::NoReplyAddress`] when the header is missing or blank.
    pub fn reply(
        &self,
        origin: &MessageOrigin<'_>,
        kind: &str,
        body: Bytes,
    ) -> Result<(), PipelineError> {
        let address = origin
            .message
            .header(headers::REPLY_TO_ADDRESS)
            .filter(|address| !address.trim().is_empty())
            .ok_or_else(|| PipelineError::NoReplyAddress {
                message_id: origin.message.message_id().to_string(),
            })?
            .to_string();
        let message = self.outgoing(origin, kind, body, Headers::new());
        origin
            .pending
            .add(TransportOperation::unicast(message, address));
        Ok(())
    }

    /// Schedules a timeout owned by `saga_id`, delivered back to this
    /// endpoint at `at`. Returns the timeout id.
    ///
    /// # Errors
    ///
    /// [`PipelineError::Timeouts`] when the store fails.
    pub async fn request_timeout(
        &self,
        origin: &MessageOrigin<'_>,
        saga_id: Uuid,
        at: DateTime<Utc>,
        kind: &str,
        body: Bytes,
    ) -> Result<String, PipelineError> {
        let extra = Headers::from([
            (headers::SAGA_ID.to_string(), saga_id.to_string()),
            (headers::IS_SAGA_TIMEOUT.to_string(), "true".to_string()),
        ]);
        let message = self.outgoing(origin, kind, body, extra);
        let timeout = TimeoutData::new(self.local_address.clone(), at, message.body)
            .with_saga(saga_id)
            .with_headers(message.headers)
            .with_owner(self.local_address.clone());
        self.timeouts
            .schedule(timeout)
            .await
            .map_err(PipelineError::Timeouts)
    }

    /// Removes every pending timeout of `saga_id`.
    ///
    /// # Errors
    ///
    /// [`PipelineError::Timeouts`] when the store fails.
    pub async fn clear_timeouts(&self, saga_id: Uuid) -> Result<(), PipelineError> {
        self.timeouts
            .clear_saga(saga_id)
            .await
            .map_err(PipelineError::Timeouts)
    }

    fn outgoing(
        &self,
        origin: &MessageOrigin<'_>,
        kind: &str,
        body: Bytes,
        extra: Headers,
    ) -> OutgoingMessage {
        let incoming = origin.message;
        let message_id = Uuid::new_v4().to_string();
        let conversation_id = incoming
            .conversation_id()
            .map_or_else(|| Uuid::new_v4().to_string(), str::to_string);
        let correlation_id = incoming
            .header(headers::CORRELATION_ID)
            .unwrap_or_else(|| incoming.message_id())
            .to_string();

        let mut out = Headers::from([
            (headers::MESSAGE_ID.to_string(), message_id.clone()),
            (headers::ENCLOSED_MESSAGE_TYPES.to_string(), kind.to_string()),
            (headers::CONVERSATION_ID.to_string(), conversation_id),
            (headers::CORRELATION_ID.to_string(), correlation_id),
            (headers::RELATED_TO.to_string(), incoming.message_id().to_string()),
            (headers::REPLY_TO_ADDRESS.to_string(), self.local_address.clone()),
            (headers::ORIGINATING_ENDPOINT.to_string(), self.endpoint_name.clone()),
            (headers::TIME_SENT.to_string(), self.clock.now().to_rfc3339()),
            (
                headers::TRACEPARENT.to_string(),
                origin.span.trace_parent().to_header(),
            ),
        ]);
        if let Some(state) = origin.span.trace_state() {
            out.insert(headers::TRACESTATE.to_string(), state.to_string());
        }
        out.extend(extra);
        OutgoingMessage::new(message_id, out, body)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
