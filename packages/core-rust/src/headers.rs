//! Well-known message header names.
//!
//! Header maps are plain `HashMap<String, String>`; ordering carries no meaning.

use std::collections::HashMap;

/// Message headers. Ordering is irrelevant.
pub type Headers = HashMap<String, String>;

/// Logical message id assigned by the sender. May differ from the native transport id.
pub const MESSAGE_ID: &str = "Busline.MessageId";
/// Id shared by every message in one causal conversation.
pub const CONVERSATION_ID: &str = "Busline.ConversationId";
/// Id of the message that started the request/response exchange.
pub const CORRELATION_ID: &str = "Busline.CorrelationId";
/// Id of the incoming message that caused this message to be sent.
pub const RELATED_TO: &str = "Busline.RelatedTo";
/// Transport address replies should be sent to.
pub const REPLY_TO_ADDRESS: &str = "Busline.ReplyToAddress";
/// `;`-separated list of message kinds carried by the body, most specific first.
pub const ENCLOSED_MESSAGE_TYPES: &str = "Busline.EnclosedMessageTypes";
/// Logical name of the endpoint that sent the message.
pub const ORIGINATING_ENDPOINT: &str = "Busline.OriginatingEndpoint";
/// RFC 3339 instant at which the message was sent.
pub const TIME_SENT: &str = "Busline.TimeSent";
/// Owning saga of a timeout message.
pub const SAGA_ID: &str = "Busline.SagaId";
/// Set to `"true"` on messages produced by a saga timeout.
pub const IS_SAGA_TIMEOUT: &str = "Busline.IsSagaTimeoutMessage";
/// W3C trace context parent.
pub const TRACEPARENT: &str = "traceparent";
/// W3C trace context vendor state.
pub const TRACESTATE: &str = "tracestate";

/// Separator used inside [`ENCLOSED_MESSAGE_TYPES`].
pub const MESSAGE_KIND_SEPARATOR: char = ';';
