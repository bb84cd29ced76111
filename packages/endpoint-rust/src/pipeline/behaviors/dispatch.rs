//! Batch dispatch of accumulated transport operations.
//!
//! After the rest of the receive chain succeeded, the message's accumulator is
//! drained once and the whole batch goes to the [`Dispatcher`] together with
//! the receive transaction. A failed or cancelled chain dispatches nothing.

use std::sync::Arc;
use std::task::{Context, Poll};

use tower::{Layer, Service};
use tracing::debug;

use crate::dispatch::Dispatcher;
use crate::pipeline::{PipelineError, PipelineFuture, TransportReceiveContext};

// ---------------------------------------------------------------------------
// BatchDispatchLayer
// ---------------------------------------------------------------------------

#[derive(Clone)]
pub struct BatchDispatchLayer {
    dispatcher: Arc<dyn Dispatcher>,
}

impl BatchDispatchLayer {
    #[must_use]
    pub fn new(dispatcher: Arc<dyn Dispatcher>) -> Self {
        Self { dispatcher }
    }
}

impl<S> Layer<S> for BatchDispatchLayer {
    type Service = BatchDispatchService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        BatchDispatchService {
            inner,
            dispatcher: Arc::clone(&self.dispatcher),
        }
    }
}

// ---------------------------------------------------------------------------
// BatchDispatchService
// ---------------------------------------------------------------------------

#[derive(Clone)]
pub struct BatchDispatchService<S> {
    inner: S,
    dispatcher: Arc<dyn Dispatcher>,
}

impl<S> Service<TransportReceiveContext> for BatchDispatchService<S>
where
    S: Service<TransportReceiveContext, Response = (), Error = PipelineError> + Send,
    S::Future: Send + 'static,
{
    type Response = ();
    type Error = PipelineError;
    type Future = PipelineFuture;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, ctx: TransportReceiveContext) -> Self::Future {
        let pending = Arc::clone(ctx.pending());
        let transaction = ctx.transaction().clone();
        let dispatcher = Arc::clone(&self.dispatcher);
        let fut = self.inner.call(ctx);

        Box::pin(async move {
            fut.await?;
            if !pending.has_operations() {
                return Ok(());
            }
            let operations = pending.drain();
            let count = operations.len();
            debug!(count, "dispatching pending transport operations");
            dispatcher
                .dispatch(operations, &transaction)
                .await
                .map_err(|source| PipelineError::Dispatch { count, source })
        })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
