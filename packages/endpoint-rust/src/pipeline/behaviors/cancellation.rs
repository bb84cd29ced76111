//! Cancellation middleware.
//!
//! Fails with `PipelineError::Canceled` before running the inner chain when
//! the message's token is already cancelled, and stops waiting on the inner
//! chain as soon as it is cancelled mid-flight.

use std::task::{Context, Poll};

use tower::{Layer, Service};

use crate::pipeline::{BehaviorContext, PipelineError, PipelineFuture};

// ---------------------------------------------------------------------------
// CancellationLayer
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default)]
pub struct CancellationLayer;

impl<S> Layer<S> for CancellationLayer {
    type Service = CancellationService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        CancellationService { inner }
    }
}

// ---------------------------------------------------------------------------
// CancellationService
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct CancellationService<S> {
    inner: S,
}

impl<S, C> Service<C> for CancellationService<S>
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
        let token = ctx.cancellation().clone();
        if token.is_cancelled() {
            return Box::pin(async { Err(PipelineError::Canceled) });
        }
        let fut = self.inner.call(ctx);
        Box::pin(async move {
            tokio::select! {
                biased;
                () = token.cancelled() => Err(PipelineError::Canceled),
                result = fut => result,
            }
        })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
