//! Outbound routing: message kind -> logical endpoint -> physical instance.
//!
//! - [`routes`]: static unicast route table loaded from configuration
//! - [`instances`]: logical endpoint -> known instances, merged across sources
//! - [`distribution`]: picks one instance per outbound message

pub mod distribution;
pub mod instances;
pub mod routes;

pub use distribution::{DistributionPolicy, DistributionStrategy, RoundRobin};
pub use instances::EndpointInstances;
pub use routes::UnicastRoutes;

/// Errors raised while resolving where an outbound message goes.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RoutingError {
    #[error("endpoint name must not be empty")]
    EmptyEndpointName,
    #[error("routing source key must not be empty")]
    EmptySourceKey,
    #[error("no route configured for message kind `{kind}`")]
    NoRoute { kind: String },
}
