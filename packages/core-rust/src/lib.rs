//! `busline` core: the plain data model shared by every pipeline component.
//!
//! Messages, headers, layered context bags, outbound transport operations,
//! endpoint instances, deferred-delivery records, trace-context values, and
//! the clock abstraction used for due-time computation.

pub mod clock;
pub mod endpoint;
pub mod extensions;
pub mod headers;
pub mod message;
pub mod timeout;
pub mod trace;
pub mod transport;

pub use clock::{Clock, ManualClock, SystemClock};
pub use endpoint::EndpointInstance;
pub use extensions::ContextBag;
pub use headers::Headers;
pub use message::{IncomingMessage, MessageContext, OutgoingMessage};
pub use timeout::{DueTimeout, TimeoutData, TimeoutsChunk};
pub use trace::TraceParent;
pub use transport::{
    AddressTag, DispatchConsistency, DispatchProperties, TransportOperation, TransportTransaction,
};
