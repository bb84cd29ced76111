//! Extensible key/value bag carried by every pipeline context.
//!
//! A [`ContextBag`] maps string keys to type-erased values. Child bags read
//! through to their parent chain and always write locally, so a behavior deep
//! in the chain can shadow a value without affecting outer contexts.

use std::any::{type_name, Any};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use parking_lot::RwLock;

type Entries = HashMap<String, Arc<dyn Any + Send + Sync>>;

/// Layered, type-erased value bag.
///
/// Cloning a bag yields a handle to the same storage; use [`ContextBag::child`]
/// to start a new layer.
#[derive(Clone, Default)]
pub struct ContextBag {
    entries: Arc<RwLock<Entries>>,
    parent: Option<Box<ContextBag>>,
}

impl fmt::Debug for ContextBag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut keys: Vec<String> = self.entries.read().keys().cloned().collect();
        keys.sort();
        f.debug_struct("ContextBag")
            .field("keys", &keys)
            .field("has_parent", &self.parent.is_some())
            .finish()
    }
}

impl ContextBag {
    /// Creates an empty root bag.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a new empty layer whose lookups fall back to `self`.
    #[must_use]
    pub fn child(&self) -> Self {
        Self {
            entries: Arc::default(),
            parent: Some(Box::new(self.clone())),
        }
    }

    /// Stores `value` under `key` in this layer, replacing any local value.
    pub fn set<T: Any + Send + Sync>(&self, key: impl Into<String>, value: T) {
        self.entries.write().insert(key.into(), Arc::new(value));
    }

    /// Stores `value` keyed by its type name.
    pub fn set_typed<T: Any + Send + Sync>(&self, value: T) {
        self.set(type_name::<T>(), value);
    }

    /// Looks up `key` in this layer, then in each parent.
    ///
    /// Returns `None` when the key is missing or holds a value of another type.
    #[must_use]
    pub fn get<T: Any + Send + Sync>(&self, key: &str) -> Option<Arc<T>> {
        let local = self.entries.read().get(key).cloned();
        match local {
            Some(value) => value.downcast::<T>().ok(),
            None => self.parent.as_ref().and_then(|parent| parent.get(key)),
        }
    }

    /// Looks up a value stored with [`ContextBag::set_typed`].
    #[must_use]
    pub fn get_typed<T: Any + Send + Sync>(&self) -> Option<Arc<T>> {
        self.get(type_name::<T>())
    }

    /// Returns whether `key` resolves in this layer or any parent.
    #[must_use]
    pub fn contains(&self, key: &str) -> bool {
        self.entries.read().contains_key(key)
            || self.parent.as_ref().is_some_and(|parent| parent.contains(key))
    }

    /// Removes `key` from this layer only. Parent values become visible again.
    pub fn remove(&self, key: &str) -> bool {
        self.entries.write().remove(key).is_some()
    }

    /// Copies every local entry of `other` into this layer, overwriting duplicates.
    ///
    /// Only `other`'s own layer is copied; its parents are not flattened in.
    pub fn merge(&self, other: &ContextBag) {
        if Arc::ptr_eq(&self.entries, &other.entries) {
            return;
        }
        let incoming: Vec<(String, Arc<dyn Any + Send + Sync>)> = other
            .entries
            .read()
            .iter()
            .map(|(key, value)| (key.clone(), Arc::clone(value)))
            .collect();
        self.entries.write().extend(incoming);
    }

    /// Number of entries stored in this layer.
    #[must_use]
    pub fn local_len(&self) -> usize {
        self.entries.read().len()
    }
}
