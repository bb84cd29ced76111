//! Explicit `(context, continuation)` behaviors and their tower adapter.

use std::sync::Arc;
use std::task::{Context, Poll};

use async_trait::async_trait;
use tower::util::BoxCloneSyncService;
use tower::{Layer, Service, ServiceExt};

use super::error::PipelineError;
use super::{Pipeline, PipelineFuture};

/// A middleware unit bound to context type `C`.
///
/// Call `next.run(ctx)` to continue the chain; return without calling it to
/// short-circuit. Work after `next.run` sees the outcome of everything
/// further in.
#[async_trait]
pub trait Behavior<C: Send + 'static>: Send + Sync + 'static {
    async fn invoke(&self, ctx: C, next: Next<C>) -> Result<(), PipelineError>;
}

/// The rest of the chain. Consumed by [`run`](Self::run), so it runs at most once.
pub struct Next<C: Send + 'static> {
    inner: Pipeline<C>,
}

impl<C: Send + 'static> Next<C> {
    pub(crate) fn new(inner: Pipeline<C>) -> Self {
        Self { inner }
    }

    /// Runs the remaining behaviors and the terminal stage.
    ///
    /// # Errors
    ///
    /// Whatever the rest of the chain fails with, unchanged.
    pub async fn run(self, ctx: C) -> Result<(), PipelineError> {
        self.inner.oneshot(ctx).await
    }
}

// ---------------------------------------------------------------------------
// BehaviorLayer
// ---------------------------------------------------------------------------

/// Tower layer placing a [`Behavior`] in front of the inner service.
pub struct BehaviorLayer<C: Send + 'static> {
    behavior: Arc<dyn Behavior<C>>,
}

impl<C: Send + 'static> BehaviorLayer<C> {
    #[must_use]
    pub fn new(behavior: Arc<dyn Behavior<C>>) -> Self {
        Self { behavior }
    }
}

impl<C: Send + 'static> Clone for BehaviorLayer<C> {
    fn clone(&self) -> Self {
        Self {
            behavior: Arc::clone(&self.behavior),
        }
    }
}

impl<C, S> Layer<S> for BehaviorLayer<C>
where
    C: Send + 'static,
    S: Service<C, Response = (), Error = PipelineError> + Clone + Send + Sync + 'static,
    S::Future: Send + 'static,
{
    type Service = BehaviorService<C>;

    fn layer(&self, inner: S) -> Self::Service {
        BehaviorService {
            behavior: Arc::clone(&self.behavior),
            next: BoxCloneSyncService::new(inner),
        }
    }
}

// ---------------------------------------------------------------------------
// BehaviorService
// ---------------------------------------------------------------------------

pub struct BehaviorService<C: Send + 'static> {
    behavior: Arc<dyn Behavior<C>>,
    next: Pipeline<C>,
}

impl<C: Send + 'static> Clone for BehaviorService<C> {
    fn clone(&self) -> Self {
        Self {
            behavior: Arc::clone(&self.behavior),
            next: self.next.clone(),
        }
    }
}

impl<C: Send + 'static> Service<C> for BehaviorService<C> {
    type Response = ();
    type Error = PipelineError;
    type Future = PipelineFuture;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        // The continuation is readied when the behavior runs it.
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, ctx: C) -> Self::Future {
        let behavior = Arc::clone(&self.behavior);
        let next = Next::new(self.next.clone());
        Box::pin(async move { behavior.invoke(ctx, next).await })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
