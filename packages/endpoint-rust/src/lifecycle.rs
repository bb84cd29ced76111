//! Endpoint health state and in-flight message tracking.
//!
//! Health transitions are lock-free (`ArcSwap`); in-flight messages are
//! counted with RAII guards, and the last guard to drop wakes anyone waiting
//! for the endpoint to drain.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwap;
use tokio::sync::{watch, Notify};
use tracing::info;

/// Endpoint health, moving `Starting -> Ready -> Draining -> Stopped`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HealthState {
    Starting,
    Ready,
    /// Stop was requested; messages already being processed may finish.
    Draining,
    Stopped,
}

#[derive(Debug, Default)]
struct InFlight {
    count: AtomicU64,
    drained: Notify,
}

/// Coordinates endpoint start and stop.
#[derive(Debug)]
pub struct EndpointLifecycle {
    state: ArcSwap<HealthState>,
    in_flight: Arc<InFlight>,
    stop_signal: watch::Sender<bool>,
}

impl EndpointLifecycle {
    #[must_use]
    pub fn new() -> Self {
        let (stop_signal, _) = watch::channel(false);
        Self {
            state: ArcSwap::from_pointee(HealthState::Starting),
            in_flight: Arc::new(InFlight::default()),
            stop_signal,
        }
    }

    #[must_use]
    pub fn health_state(&self) -> HealthState {
        **self.state.load()
    }

    pub fn set_ready(&self) {
        self.state.store(Arc::new(HealthState::Ready));
    }

    /// Receiver flipped to `true` when stop is requested. Background tasks
    /// select on it.
    #[must_use]
    pub fn stop_receiver(&self) -> watch::Receiver<bool> {
        self.stop_signal.subscribe()
    }

    /// Moves to `Draining` and signals every stop receiver.
    pub fn request_stop(&self) {
        self.state.store(Arc::new(HealthState::Draining));
        // No receivers is fine.
        let _ = self.stop_signal.send(true);
        info!(in_flight = self.in_flight_count(), "endpoint stop requested");
    }

    /// Counts one message as in flight until the guard drops.
    #[must_use]
    pub fn in_flight_guard(&self) -> InFlightGuard {
        self.in_flight.count.fetch_add(1, Ordering::AcqRel);
        InFlightGuard {
            in_flight: Arc::clone(&self.in_flight),
        }
    }

    #[must_use]
    pub fn in_flight_count(&self) -> u64 {
        self.in_flight.count.load(Ordering::Acquire)
    }

    /// Waits until no message is in flight, at most `timeout`.
    ///
    /// On success the state becomes `Stopped` and `true` is returned; on
    /// timeout the state stays `Draining`.
    pub async fn wait_for_drain(&self, timeout: Duration) -> bool {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let drained = self.in_flight.drained.notified();
            if self.in_flight_count() == 0 {
                self.state.store(Arc::new(HealthState::Stopped));
                return true;
            }
            if tokio::time::timeout_at(deadline, drained).await.is_err() {
                return false;
            }
        }
    }
}

impl Default for EndpointLifecycle {
    fn default() -> Self {
        Self::new()
    }
}

/// Decrements the in-flight count on drop, also during unwinding.
#[derive(Debug)]
pub struct InFlightGuard {
    in_flight: Arc<InFlight>,
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        if self.in_flight.count.fetch_sub(1, Ordering::AcqRel) == 1 {
            self.in_flight.drained.notify_waiters();
        }
    }
}
