//! Instance selection for unicast messages.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use busline_core::EndpointInstance;
use dashmap::DashMap;

/// Chooses one instance out of the candidates for a logical endpoint.
pub trait DistributionStrategy: Send + Sync {
    /// `instances` is never empty.
    fn select(&self, instances: &[EndpointInstance]) -> EndpointInstance;
}

/// Cycles through the candidates in order.
#[derive(Debug, Default)]
pub struct RoundRobin {
    next: AtomicUsize,
}

impl DistributionStrategy for RoundRobin {
    fn select(&self, instances: &[EndpointInstance]) -> EndpointInstance {
        let index = self.next.fetch_add(1, Ordering::Relaxed) % instances.len();
        instances[index].clone()
    }
}

/// Per-endpoint strategy lookup. Endpoints without an explicit strategy get
/// their own [`RoundRobin`] on first use.
#[derive(Default)]
pub struct DistributionPolicy {
    strategies: DashMap<String, Arc<dyn DistributionStrategy>>,
}

impl DistributionPolicy {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Overrides the strategy used for `endpoint`.
    pub fn set_strategy(&self, endpoint: impl Into<String>, strategy: Arc<dyn DistributionStrategy>) {
        self.strategies.insert(endpoint.into(), strategy);
    }

    /// Picks the instance of `endpoint` the next message should go to.
    #[must_use]
    pub fn select(&self, endpoint: &str, instances: &[EndpointInstance]) -> EndpointInstance {
        if let [only] = instances {
            return only.clone();
        }
        let strategy = self
            .strategies
            .entry(endpoint.to_string())
            .or_insert_with(|| Arc::new(RoundRobin::default()))
            .clone();
        strategy.select(instances)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn instances(endpoint: &str, discriminators: &[&str]) -> Vec<EndpointInstance> {
        discriminators
            .iter()
            .map(|d| EndpointInstance::new(endpoint).with_discriminator(*d))
            .collect()
    }

    #[test]
    fn round_robin_cycles_through_instances() {
        let policy = DistributionPolicy::new();
        let candidates = instances("Sales", &["1", "2", "3"]);
        let picked: Vec<_> = (0..6)
            .map(|_| policy.select("Sales", &candidates).transport_address())
            .collect();
        assert_eq!(
            picked,
            vec!["Sales-1", "Sales-2", "Sales-3", "Sales-1", "Sales-2", "Sales-3"]
        );
    }

    #[test]
    fn endpoints_rotate_independently() {
        let policy = DistributionPolicy::new();
        let sales = instances("Sales", &["1", "2"]);
        let billing = instances("Billing", &["a", "b"]);
        assert_eq!(policy.select("Sales", &sales).transport_address(), "Sales-1");
        assert_eq!(policy.select("Billing", &billing).transport_address(), "Billing-a");
        assert_eq!(policy.select("Sales", &sales).transport_address(), "Sales-2");
    }

    #[test]
    fn custom_strategy_is_used() {
        struct AlwaysLast;
        impl DistributionStrategy for AlwaysLast {
            fn select(&self, instances: &[EndpointInstance]) -> EndpointInstance {
                instances[instances.len() - 1].clone()
            }
        }

        let policy = DistributionPolicy::new();
        policy.set_strategy("Sales", Arc::new(AlwaysLast));
        let candidates = instances("Sales", &["1", "2"]);
        assert_eq!(policy.select("Sales", &candidates).transport_address(), "Sales-2");
        assert_eq!(policy.select("Sales", &candidates).transport_address(), "Sales-2");
    }
}
