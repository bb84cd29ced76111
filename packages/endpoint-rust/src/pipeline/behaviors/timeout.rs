//! Per-message processing deadline.
//!
//! Fails with `PipelineError::Timeout` when the inner chain runs longer than
//! the configured duration. Without a duration the layer is a pass-through.

use std::task::{Context, Poll};
use std::time::Duration;

use tower::{Layer, Service};

use crate::pipeline::{BehaviorContext, PipelineError, PipelineFuture};

// ---------------------------------------------------------------------------
// TimeoutLayer
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default)]
pub struct TimeoutLayer {
    timeout: Option<Duration>,
}

impl TimeoutLayer {
    #[must_use]
    pub fn new(timeout: Option<Duration>) -> Self {
        Self { timeout }
    }
}

impl<S> Layer<S> for TimeoutLayer {
    type Service = TimeoutService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        TimeoutService {
            inner,
            timeout: self.timeout,
        }
    }
}

// ---------------------------------------------------------------------------
// TimeoutService
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct TimeoutService<S> {
    inner: S,
    timeout: Option<Duration>,
}

impl<S, C> Service<C> for TimeoutService<S>
where
    C: BehaviorContext,
    S: Service<C, Response = (), Error = PipelineError> + Send,
    S::Future: Send + 'static,
{
    type Response = ();
    type Error = PipelineError;
    type Future = PipelineFuture;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, ctx: C) -> Self::Future {
        let fut = self.inner.call(ctx);
        let Some(duration) = self.timeout else {
            return Box::pin(fut);
        };
        Box::pin(async move {
            match tokio::time::timeout(duration, fut).await {
                Ok(result) => result,
                Err(_elapsed) => Err(PipelineError::Timeout {
                    timeout_ms: u64::try_from(duration.as_millis()).unwrap_or(u64::MAX),
                }),
            }
        })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
