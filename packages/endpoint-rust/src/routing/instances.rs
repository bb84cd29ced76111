//! Logical endpoint -> physical instance resolution.
//!
//! Writers (discovery sources, static configuration) are few and infrequent;
//! readers run on every outbound routing decision. Writers serialize on one
//! `Mutex` and publish a fully rebuilt cache with a single `ArcSwap` store, so
//! readers never lock and never observe a partial rebuild.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::Arc;

use arc_swap::ArcSwap;
use busline_core::EndpointInstance;
use parking_lot::Mutex;
use tracing::debug;

use super::RoutingError;

type InstanceCache = HashMap<String, HashSet<EndpointInstance>>;

/// Registry of known instances per logical endpoint, merged across sources.
pub struct EndpointInstances {
    cache: ArcSwap<InstanceCache>,
    registrations: Mutex<HashMap<String, Vec<EndpointInstance>>>,
}

impl fmt::Debug for EndpointInstances {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EndpointInstances")
            .field("endpoints", &self.cache.load().len())
            .field("sources", &self.registrations.lock().len())
            .finish()
    }
}

impl EndpointInstances {
    #[must_use]
    pub fn new() -> Self {
        Self {
            cache: ArcSwap::from_pointee(InstanceCache::new()),
            registrations: Mutex::new(HashMap::new()),
        }
    }

    /// Returns every known instance of `endpoint`; never empty.
    ///
    /// When no source has registered instances for `endpoint`, a single
    /// default instance named after the endpoint is synthesized (not cached).
    ///
    /// # Errors
    ///
    /// Returns [`RoutingError::EmptyEndpointName`] for a blank name.
    pub fn find_instances(&self, endpoint: &str) -> Result<Vec<EndpointInstance>, RoutingError> {
        if endpoint.trim().is_empty() {
            return Err(RoutingError::EmptyEndpointName);
        }
        let cache = self.cache.load();
        Ok(match cache.get(endpoint) {
            Some(instances) if !instances.is_empty() => instances.iter().cloned().collect(),
            _ => vec![EndpointInstance::new(endpoint)],
        })
    }

    /// Replaces everything registered under `source_key` and republishes the
    /// merged, de-duplicated cache.
    ///
    /// An empty `instances` list withdraws the source's previous contributions.
    ///
    /// # Errors
    ///
    /// Returns [`RoutingError::EmptySourceKey`] for a blank key; nothing is
    /// modified in that case.
    pub fn add_or_replace_instances(
        &self,
        source_key: &str,
        instances: Vec<EndpointInstance>,
    ) -> Result<(), RoutingError> {
        if source_key.trim().is_empty() {
            return Err(RoutingError::EmptySourceKey);
        }

        let mut registrations = self.registrations.lock();
        registrations.insert(source_key.to_string(), instances);

        let mut rebuilt = InstanceCache::new();
        for instance in registrations.values().flatten() {
            rebuilt
                .entry(instance.endpoint().to_string())
                .or_default()
                .insert(instance.clone());
        }
        let endpoints = rebuilt.len();
        self.cache.store(Arc::new(rebuilt));
        drop(registrations);

        debug!(source_key, endpoints, "endpoint instance cache rebuilt");
        Ok(())
    }
}

impl Default for EndpointInstances {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
