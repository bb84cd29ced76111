//! `busline` endpoint: the message processing core.
//!
//! One received message runs through the transport-receive behavior chain,
//! fans out to its handlers through the invoke-handler chain, and leaves its
//! outbound work in a lock-free accumulator that is dispatched as one batch.
//! Handlers address messages through the endpoint instance router and defer
//! them through the timeout store, which a background poller drains.

pub mod config;
pub mod diagnostics;
pub mod dispatch;
pub mod endpoint;
pub mod handlers;
pub mod lifecycle;
pub mod notifications;
pub mod operations;
pub mod pending;
pub mod pipeline;
pub mod routing;
pub mod scope;
pub mod telemetry;
pub mod timeouts;

#[cfg(test)]
pub(crate) mod testing;

pub use config::{ConfigError, EndpointConfig};
pub use diagnostics::{DiagnosticEvent, DiagnosticListener, DiagnosticObserver};
pub use dispatch::Dispatcher;
pub use endpoint::{Endpoint, EndpointBuilder, EndpointError};
pub use handlers::{HandlerRegistry, MessageHandler};
pub use lifecycle::{EndpointLifecycle, HealthState};
pub use notifications::{NotificationSubscriber, Notifications, ReceivePipelineCompleted};
pub use operations::{MessageOperations, SendOptions};
pub use pending::{PendingOperationsError, PendingTransportOperations};
pub use pipeline::{
    Behavior, BehaviorContext, InvokeError, InvokeHandlerContext, MainPipelineExecutor,
    MessageProcessingError, Next, PipelineError, PipelineExecutor, TransportReceiveContext,
};
pub use routing::{EndpointInstances, RoutingError};
pub use scope::{ServiceRegistry, ServiceScope};
pub use timeouts::{InMemoryTimeoutPersister, TimeoutPersister, TimeoutPoller};
