//! Incoming and outgoing message values.

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::extensions::ContextBag;
use crate::headers::{self, Headers};
use crate::transport::TransportTransaction;

/// A message received from the transport.
///
/// Built once per pipeline invocation and never mutated afterwards.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IncomingMessage {
    message_id: String,
    native_message_id: String,
    headers: Headers,
    body: Bytes,
}

impl IncomingMessage {
    /// Builds a message from transport-native parts.
    ///
    /// The logical message id comes from the [`headers::MESSAGE_ID`] header when
    /// it is present and non-empty, otherwise it falls back to the native id.
    #[must_use]
    pub fn new(native_message_id: impl Into<String>, headers: Headers, body: Bytes) -> Self {
        let native_message_id = native_message_id.into();
        let message_id = headers
            .get(headers::MESSAGE_ID)
            .filter(|id| !id.trim().is_empty())
            .cloned()
            .unwrap_or_else(|| native_message_id.clone());
        Self {
            message_id,
            native_message_id,
            headers,
            body,
        }
    }

    #[must_use]
    pub fn message_id(&self) -> &str {
        &self.message_id
    }

    #[must_use]
    pub fn native_message_id(&self) -> &str {
        &self.native_message_id
    }

    #[must_use]
    pub fn headers(&self) -> &Headers {
        &self.headers
    }

    #[must_use]
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).map(String::as_str)
    }

    #[must_use]
    pub fn body(&self) -> &Bytes {
        &self.body
    }

    #[must_use]
    pub fn conversation_id(&self) -> Option<&str> {
        self.header(headers::CONVERSATION_ID)
    }

    /// Message kinds listed in [`headers::ENCLOSED_MESSAGE_TYPES`], in header order.
    ///
    /// Blank entries are dropped; a missing header yields an empty list.
    #[must_use]
    pub fn enclosed_message_kinds(&self) -> Vec<&str> {
        self.header(headers::ENCLOSED_MESSAGE_TYPES)
            .map(|value| {
                value
                    .split(headers::MESSAGE_KIND_SEPARATOR)
                    .map(str::trim)
                    .filter(|kind| !kind.is_empty())
                    .collect()
            })
            .unwrap_or_default()
    }
}

/// A message produced by a handler, waiting to be dispatched.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutgoingMessage {
    pub message_id: String,
    pub headers: Headers,
    pub body: Bytes,
}

impl OutgoingMessage {
    #[must_use]
    pub fn new(message_id: impl Into<String>, headers: Headers, body: Bytes) -> Self {
        Self {
            message_id: message_id.into(),
            headers,
            body,
        }
    }
}

/// Everything the receiver hands to the pipeline for one inbound message.
#[derive(Debug, Clone)]
pub struct MessageContext {
    pub native_message_id: String,
    pub headers: Headers,
    pub body: Bytes,
    pub transport_transaction: TransportTransaction,
    /// Receiver-supplied values merged into the root pipeline context.
    pub extensions: ContextBag,
}

impl MessageContext {
    #[must_use]
    pub fn new(native_message_id: impl Into<String>, headers: Headers, body: Bytes) -> Self {
        Self {
            native_message_id: native_message_id.into(),
            headers,
            body,
            transport_transaction: TransportTransaction::default(),
            extensions: ContextBag::new(),
        }
    }
}
