//! Stage metrics middleware.
//!
//! Records how long each stage took and how it ended, both as `metrics`
//! histograms/counters labelled by stage and as fields on a `tracing` span.

use std::task::{Context, Poll};
use std::time::Instant;

use tower::{Layer, Service};
use tracing::{debug_span, Instrument};

use crate::pipeline::{BehaviorContext, PipelineError, PipelineFuture};

pub const STAGE_DURATION_SECONDS: &str = "busline_pipeline_stage_duration_seconds";
pub const STAGE_TOTAL: &str = "busline_pipeline_stage_total";

fn outcome(result: &Result<(), PipelineError>) -> &'static str {
    match result {
        Ok(()) => "ok",
        Err(PipelineError::Canceled) => "canceled",
        Err(PipelineError::Timeout { .. }) => "timeout",
        Err(_) => "error",
    }
}

// ---------------------------------------------------------------------------
// MetricsLayer
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default)]
pub struct MetricsLayer;

impl<S> Layer<S> for MetricsLayer {
    type Service = MetricsService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        MetricsService { inner }
    }
}

// ---------------------------------------------------------------------------
// MetricsService
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct MetricsService<S> {
    inner: S,
}

impl<S, C> Service<C> for MetricsService<S>
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
        let stage = C::STAGE;
        let span = debug_span!(
            "stage",
            stage,
            message_id = %ctx.message_id(),
            duration_ms = tracing::field::Empty,
            outcome = tracing::field::Empty,
        );
        let fut = self.inner.call(ctx);

        Box::pin(
            async move {
                let start = Instant::now();
                let result = fut.await;
                let elapsed = start.elapsed();
                let outcome = outcome(&result);

                metrics::histogram!(STAGE_DURATION_SECONDS, "stage" => stage)
                    .record(elapsed.as_secs_f64());
                metrics::counter!(STAGE_TOTAL, "stage" => stage, "outcome" => outcome)
                    .increment(1);

                let duration_ms = u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX);
                let span = tracing::Span::current();
                span.record("duration_ms", duration_ms);
                span.record("outcome", outcome);
                tracing::debug!(stage, duration_ms, outcome, "stage complete");

                result
            }
            .instrument(span),
        )
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
