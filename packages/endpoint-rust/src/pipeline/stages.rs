//! Terminal services of the two chains.
//!
//! [`LoadHandlersConnector`] ends the transport-receive chain and fans the
//! message out to the invoke-handler chain once per resolved handler.
//! [`InvokeHandlerTerminator`] ends the invoke-handler chain by calling the
//! handler itself.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};

use tower::{Service, ServiceExt};
use tracing::debug;

use super::builder::PipelineCache;
use super::context::{BehaviorContext, InvokeHandlerContext, TransportReceiveContext};
use super::error::PipelineError;
use super::PipelineFuture;
use crate::handlers::HandlerRegistry;

// ---------------------------------------------------------------------------
// LoadHandlersConnector
// ---------------------------------------------------------------------------

/// Resolves the handlers for the message's enclosed kinds and runs the
/// invoke-handler chain for each, in registry order.
#[derive(Debug, Clone)]
pub struct LoadHandlersConnector {
    handlers: Arc<HandlerRegistry>,
}

impl LoadHandlersConnector {
    #[must_use]
    pub fn new(handlers: Arc<HandlerRegistry>) -> Self {
        Self { handlers }
    }
}

impl Service<TransportReceiveContext> for LoadHandlersConnector {
    type Response = ();
    type Error = PipelineError;
    type Future = PipelineFuture;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, ctx: TransportReceiveContext) -> Self::Future {
        let handlers = Arc::clone(&self.handlers);
        Box::pin(async move {
            let resolved = handlers.handlers_for(&ctx.message().enclosed_message_kinds());
            if resolved.is_empty() {
                return Err(PipelineError::NoHandlers {
                    kinds: ctx
                        .message()
                        .enclosed_message_kinds()
                        .into_iter()
                        .map(str::to_string)
                        .collect(),
                });
            }

            let pipeline = handler_pipeline(ctx.root().pipelines())?;
            let halted = Arc::new(AtomicBool::new(false));
            for (kind, handler) in resolved {
                let handler_ctx =
                    InvokeHandlerContext::new(&ctx, kind, handler, Arc::clone(&halted));
                pipeline.clone().oneshot(handler_ctx).await?;
                if halted.load(Ordering::Acquire) {
                    debug!(
                        message_id = ctx.message_id(),
                        "remaining handlers skipped on request"
                    );
                    break;
                }
            }
            Ok(())
        })
    }
}

fn handler_pipeline(
    pipelines: &PipelineCache,
) -> Result<super::Pipeline<InvokeHandlerContext>, PipelineError> {
    pipelines
        .get::<InvokeHandlerContext>()
        .ok_or(PipelineError::MissingPipeline {
            stage: InvokeHandlerContext::STAGE,
        })
}

// ---------------------------------------------------------------------------
// InvokeHandlerTerminator
// ---------------------------------------------------------------------------

/// Calls the handler bound to the context.
#[derive(Debug, Clone, Copy, Default)]
pub struct InvokeHandlerTerminator;

impl Service<InvokeHandlerContext> for InvokeHandlerTerminator {
    type Response = ();
    type Error = PipelineError;
    type Future = PipelineFuture;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, mut ctx: InvokeHandlerContext) -> Self::Future {
        Box::pin(async move {
            let handler = Arc::clone(ctx.handler());
            handler.handle(&mut ctx).await.map_err(|source| {
                // Handlers that bubble a pipeline cancellation keep it distinct.
                match source.downcast::<PipelineError>() {
                    Ok(PipelineError::Canceled) => PipelineError::Canceled,
                    Ok(other) => PipelineError::Handler {
                        handler: handler.name().to_string(),
                        source: other.into(),
                    },
                    Err(source) => PipelineError::Handler {
                        handler: handler.name().to_string(),
                        source,
                    },
                }
            })
        })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
