//! Deferred delivery: the timeout persistence contract, the in-memory
//! reference store, and the poller that dispatches due timeouts.

pub mod in_memory;
pub mod persister;
pub mod poller;

pub use in_memory::{InMemoryTimeoutPersister, DEFAULT_EMPTY_POLL_INTERVAL};
pub use persister::TimeoutPersister;
pub use poller::TimeoutPoller;
