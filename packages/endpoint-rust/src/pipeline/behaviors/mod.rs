//! Built-in behaviors composed around the two stage chains.

pub mod cancellation;
pub mod diagnostics;
pub mod dispatch;
pub mod metrics;
pub mod timeout;

pub use cancellation::{CancellationLayer, CancellationService};
pub use diagnostics::InvokedHandlerDiagnostics;
pub use dispatch::{BatchDispatchLayer, BatchDispatchService};
pub use metrics::{MetricsLayer, MetricsService};
pub use timeout::{TimeoutLayer, TimeoutService};
