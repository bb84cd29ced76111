//! Transport-facing value types: transactions and outbound operations.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::extensions::ContextBag;
use crate::message::OutgoingMessage;

/// Opaque transaction state supplied by the transport for one receive.
///
/// The pipeline never inspects it; it is handed back to the dispatcher so the
/// transport can enlist outgoing operations in the receive transaction.
#[derive(Debug, Clone, Default)]
pub struct TransportTransaction {
    bag: ContextBag,
}

impl TransportTransaction {
    #[must_use]
    pub fn new(bag: ContextBag) -> Self {
        Self { bag }
    }

    #[must_use]
    pub fn bag(&self) -> &ContextBag {
        &self.bag
    }
}

/// Where an outbound operation is headed.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AddressTag {
    /// Point-to-point delivery to one transport address.
    Unicast { destination: String },
    /// Fan-out to every subscriber of a message kind.
    Multicast { message_kind: String },
}

/// How strictly an operation must be bound to the receive transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum DispatchConsistency {
    /// The transport may batch the operation with the receive transaction.
    #[default]
    Default,
    /// The operation must be dispatched on its own, outside any batch.
    Isolated,
}

/// Free-form transport hints (e.g. time-to-be-received) attached to one operation.
pub type DispatchProperties = HashMap<String, String>;

/// One unit of outbound work awaiting dispatch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransportOperation {
    pub message: OutgoingMessage,
    pub address_tag: AddressTag,
    pub properties: DispatchProperties,
    pub consistency: DispatchConsistency,
}

impl TransportOperation {
    /// Unicast operation with default properties.
    #[must_use]
    pub fn unicast(message: OutgoingMessage, destination: impl Into<String>) -> Self {
        Self {
            message,
            address_tag: AddressTag::Unicast {
                destination: destination.into(),
            },
            properties: DispatchProperties::new(),
            consistency: DispatchConsistency::Default,
        }
    }

    /// Multicast operation with default properties.
    #[must_use]
    pub fn multicast(message: OutgoingMessage, message_kind: impl Into<String>) -> Self {
        Self {
            message,
            address_tag: AddressTag::Multicast {
                message_kind: message_kind.into(),
            },
            properties: DispatchProperties::new(),
            consistency: DispatchConsistency::Default,
        }
    }

    #[must_use]
    pub fn with_consistency(mut self, consistency: DispatchConsistency) -> Self {
        self.consistency = consistency;
        self
    }

    #[must_use]
    pub fn with_property(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.properties.insert(key.into(), value.into());
        self
    }

    /// Destination address for unicast operations.
    #[must_use]
    pub fn destination(&self) -> Option<&str> {
        match &self.address_tag {
            AddressTag::Unicast { destination } => Some(destination),
            AddressTag::Multicast { .. } => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use bytes::Bytes;

    use super::*;
    use crate::headers::Headers;

    #[test]
    fn unicast_exposes_destination() {
        let op = TransportOperation::unicast(
            OutgoingMessage::new("m-1", Headers::new(), Bytes::new()),
            "Billing",
        )
        .with_property("TimeToBeReceived", "00:05:00");
        assert_eq!(op.destination(), Some("Billing"));
        assert_eq!(op.consistency, DispatchConsistency::Default);
        assert_eq!(op.properties.get("TimeToBeReceived").map(String::as_str), Some("00:05:00"));
    }

    #[test]
    fn multicast_has_no_destination() {
        let op = TransportOperation::multicast(
            OutgoingMessage::new("m-2", Headers::new(), Bytes::new()),
            "OrderPlaced",
        )
        .with_consistency(DispatchConsistency::Isolated);
        assert_eq!(op.destination(), None);
        assert_eq!(op.consistency, DispatchConsistency::Isolated);
    }
}
