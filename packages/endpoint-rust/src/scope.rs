//! Per-message service resolution.
//!
//! A [`ServiceRegistry`] is filled once at endpoint start with singletons and
//! scoped factories. The executor opens one [`ServiceScope`] per message;
//! scoped services are built lazily the first time they are asked for in that
//! scope and released together with it.

use std::any::{Any, TypeId};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use tracing::debug;

type Instance = Arc<dyn Any + Send + Sync>;
type Factory = Arc<dyn Fn(&ServiceScope) -> Instance + Send + Sync>;

// ---------------------------------------------------------------------------
// ServiceRegistry
// ---------------------------------------------------------------------------

/// Root registry of services available to handlers and behaviors.
///
/// Lookup is by concrete type (`TypeId`). A type registered as a singleton
/// shadows a scoped factory for the same type.
#[derive(Default)]
pub struct ServiceRegistry {
    singletons: DashMap<TypeId, Instance>,
    scoped: DashMap<TypeId, Factory>,
    next_scope_id: AtomicU64,
}

impl fmt::Debug for ServiceRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServiceRegistry")
            .field("singletons", &self.singletons.len())
            .field("scoped", &self.scoped.len())
            .finish_non_exhaustive()
    }
}

impl ServiceRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers one shared instance of `T` for every scope.
    pub fn register_singleton<T: Any + Send + Sync>(&self, service: T) {
        self.register_singleton_arc(Arc::new(service));
    }

    pub fn register_singleton_arc<T: Any + Send + Sync>(&self, service: Arc<T>) {
        self.singletons.insert(TypeId::of::<T>(), service);
    }

    /// Registers a factory producing one `T` per scope.
    ///
    /// The factory receives the scope being populated, so it may resolve
    /// other services from it.
    pub fn register_scoped<T, F>(&self, factory: F)
    where
        T: Any + Send + Sync,
        F: Fn(&ServiceScope) -> T + Send + Sync + 'static,
    {
        let erased: Factory =
            Arc::new(move |scope: &ServiceScope| Arc::new(factory(scope)) as Instance);
        self.scoped.insert(TypeId::of::<T>(), erased);
    }

    /// Opens a fresh resolution scope.
    #[must_use]
    pub fn create_scope(self: &Arc<Self>) -> ServiceScope {
        let id = self.next_scope_id.fetch_add(1, Ordering::Relaxed);
        ServiceScope {
            id,
            registry: Arc::clone(self),
            instances: DashMap::new(),
        }
    }
}

// ---------------------------------------------------------------------------
// ServiceScope
// ---------------------------------------------------------------------------

/// Resolution scope for one message.
pub struct ServiceScope {
    id: u64,
    registry: Arc<ServiceRegistry>,
    instances: DashMap<TypeId, Instance>,
}

impl fmt::Debug for ServiceScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServiceScope")
            .field("id", &self.id)
            .field("instances", &self.instances.len())
            .finish_non_exhaustive()
    }
}

impl ServiceScope {
    #[must_use]
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Resolves `T`: the singleton if one is registered, otherwise this
    /// scope's instance, built on first use.
    #[must_use]
    pub fn get<T: Any + Send + Sync>(&self) -> Option<Arc<T>> {
        let type_id = TypeId::of::<T>();
        if let Some(singleton) = self.registry.singletons.get(&type_id) {
            return singleton.value().clone().downcast::<T>().ok();
        }
        if let Some(existing) = self.instances.get(&type_id) {
            return existing.value().clone().downcast::<T>().ok();
        }

        // Build outside any map guard: the factory may resolve other services.
        let factory = self.registry.scoped.get(&type_id)?.value().clone();
        let built = factory(self);
        let instance = self.instances.entry(type_id).or_insert(built).value().clone();
        instance.downcast::<T>().ok()
    }

    /// Number of scoped instances built so far.
    #[must_use]
    pub fn resolved_count(&self) -> usize {
        self.instances.len()
    }
}

impl Drop for ServiceScope {
    fn drop(&mut self) {
        debug!(
            scope_id = self.id,
            instances = self.instances.len(),
            "service scope released"
        );
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;

    use super::*;

    struct Config {
        name: &'static str,
    }

    struct UnitOfWork {
        serial: usize,
        config_name: &'static str,
    }

    struct Tracker(Arc<AtomicUsize>);

    impl Drop for Tracker {
        fn drop(&mut self) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn registry() -> (Arc<ServiceRegistry>, Arc<AtomicUsize>) {
        let registry = Arc::new(ServiceRegistry::new());
        registry.register_singleton(Config { name: "sales" });
        let built = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&built);
        registry.register_scoped(move |scope| UnitOfWork {
            serial: counter.fetch_add(1, Ordering::SeqCst),
            config_name: scope.get::<Config>().map_or("", |c| c.name),
        });
        (registry, built)
    }

    #[test]
    fn singletons_are_shared_across_scopes() {
        let (registry, _) = registry();
        let a = registry.create_scope().get::<Config>().unwrap();
        let b = registry.create_scope().get::<Config>().unwrap();
        assert!(Arc::ptr_eq(&a, &b));
    }

    #[test]
    fn scoped_services_are_built_once_per_scope() {
        let (registry, built) = registry();
        let scope = registry.create_scope();
        let first = scope.get::<UnitOfWork>().unwrap();
        let again = scope.get::<UnitOfWork>().unwrap();
        assert!(Arc::ptr_eq(&first, &again));
        assert_eq!(first.config_name, "sales");

        let other = registry.create_scope().get::<UnitOfWork>().unwrap();
        assert_ne!(first.serial, other.serial);
        assert_eq!(built.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn unknown_service_resolves_to_none() {
        let (registry, _) = registry();
        assert!(registry.create_scope().get::<String>().is_none());
    }

    #[test]
    fn scoped_instances_are_released_with_the_scope() {
        let registry = Arc::new(ServiceRegistry::new());
        let dropped = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&dropped);
        registry.register_scoped(move |_| Tracker(Arc::clone(&counter)));

        let scope = registry.create_scope();
        let _ = scope.get::<Tracker>().unwrap();
        assert_eq!(scope.resolved_count(), 1);
        assert_eq!(dropped.load(Ordering::SeqCst), 0);

        drop(scope);
        assert_eq!(dropped.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn scope_ids_are_distinct() {
        let (registry, _) = registry();
        assert_ne!(registry.create_scope().id(), registry.create_scope().id());
    }
}
