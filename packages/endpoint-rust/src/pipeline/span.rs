//! Per-message tracing span with explicit trace-context linkage.
//!
//! The span's identity ([`TraceParent`]) is derived from the incoming
//! `traceparent` header and carried through the context chain, so outgoing
//! messages can propagate it without consulting ambient span state.

use std::fmt::Display;

use busline_core::{headers, Headers, IncomingMessage, TraceParent};
use tracing::field::{display, Empty};
use tracing::{info_span, Span};

/// Span handle for one pipeline invocation.
#[derive(Debug)]
pub struct MessageSpan {
    span: Span,
    trace: TraceParent,
    parent: Option<TraceParent>,
    trace_state: Option<String>,
}

impl MessageSpan {
    /// Opens the span, continuing the trace in `headers` when it carries a
    /// valid `traceparent`, or starting a new root trace otherwise.
    #[must_use]
    pub fn start(headers: &Headers) -> Self {
        let parent = headers
            .get(headers::TRACEPARENT)
            .and_then(|value| TraceParent::parse(value));
        let trace = parent.as_ref().map_or_else(TraceParent::new_root, TraceParent::child);
        let trace_state = headers
            .get(headers::TRACESTATE)
            .filter(|value| !value.trim().is_empty())
            .cloned();

        let span = info_span!(
            "busline.incoming_message",
            otel.kind = "consumer",
            trace_id = %trace.trace_id(),
            span_id = %trace.span_id(),
            parent_span_id = Empty,
            trace_state = Empty,
            messaging.operation = "process",
            messaging.destination = Empty,
            messaging.message_id = Empty,
            messaging.message.body.size = Empty,
            messaging.message.conversation_id = Empty,
            otel.status_code = Empty,
            otel.status_description = Empty,
        );
        if let Some(parent) = &parent {
            span.record("parent_span_id", parent.span_id());
        }
        if let Some(state) = &trace_state {
            span.record("trace_state", state.as_str());
        }

        Self {
            span,
            trace,
            parent,
            trace_state,
        }
    }

    #[must_use]
    pub fn span(&self) -> &Span {
        &self.span
    }

    /// This span's trace context; outgoing messages carry it as their parent.
    #[must_use]
    pub fn trace_parent(&self) -> &TraceParent {
        &self.trace
    }

    /// Trace context the incoming message arrived with, if any.
    #[must_use]
    pub fn parent(&self) -> Option<&TraceParent> {
        self.parent.as_ref()
    }

    #[must_use]
    pub fn trace_state(&self) -> Option<&str> {
        self.trace_state.as_deref()
    }

    pub fn tag_message(&self, message: &IncomingMessage, destination: &str) {
        self.span.record("messaging.destination", destination);
        self.span.record("messaging.message_id", message.message_id());
        self.span
            .record("messaging.message.body.size", message.body().len() as u64);
        if let Some(conversation_id) = message.conversation_id() {
            self.span
                .record("messaging.message.conversation_id", conversation_id);
        }
    }

    pub fn record_error(&self, error: &dyn Display) {
        self.span.record("otel.status_code", "ERROR");
        self.span
            .record("otel.status_description", display(error));
    }

    pub fn record_ok(&self) {
        self.span.record("otel.status_code", "OK");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PARENT: &str = "00-0af7651916cd43dd8448eb211c80319c-b7ad6b7169203331-01";

    #[test]
    fn continues_incoming_trace() {
        let headers = Headers::from([
            (headers::TRACEPARENT.to_string(), PARENT.to_string()),
            (headers::TRACESTATE.to_string(), "vendor=1".to_string()),
        ]);
        let span = MessageSpan::start(&headers);
        assert_eq!(span.trace_parent().trace_id(), "0af7651916cd43dd8448eb211c80319c");
        assert_ne!(span.trace_parent().span_id(), "b7ad6b7169203331");
        assert_eq!(span.parent().map(TraceParent::span_id), Some("b7ad6b7169203331"));
        assert_eq!(span.trace_state(), Some("vendor=1"));
    }

    #[test]
    fn starts_new_root_without_valid_parent() {
        let headers = Headers::from([(headers::TRACEPARENT.to_string(), "junk".to_string())]);
        let span = MessageSpan::start(&headers);
        assert!(span.parent().is_none());
        assert_ne!(span.trace_parent().trace_id(), "0af7651916cd43dd8448eb211c80319c");
        assert!(span.trace_state().is_none());
    }
}
