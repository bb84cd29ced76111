//! Pipeline composition: wraps each stage's terminal service with the
//! built-in layers and any custom behaviors, once, at endpoint start.

use std::any::{Any, TypeId};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tower::util::BoxCloneSyncService;
use tower::{Layer, ServiceBuilder};

use super::behavior::{Behavior, BehaviorLayer};
use super::behaviors::{
    BatchDispatchLayer, CancellationLayer, InvokedHandlerDiagnostics, MetricsLayer, TimeoutLayer,
};
use super::context::{InvokeHandlerContext, TransportReceiveContext};
use super::stages::{InvokeHandlerTerminator, LoadHandlersConnector};
use super::Pipeline;
use crate::diagnostics::DiagnosticListener;
use crate::dispatch::Dispatcher;
use crate::handlers::HandlerRegistry;

// ---------------------------------------------------------------------------
// PipelineCache
// ---------------------------------------------------------------------------

/// Composed chains keyed by the context type they run over.
#[derive(Default)]
pub struct PipelineCache {
    chains: DashMap<TypeId, Box<dyn Any + Send + Sync>>,
}

impl fmt::Debug for PipelineCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PipelineCache")
            .field("chains", &self.chains.len())
            .finish()
    }
}

impl PipelineCache {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds both stage chains from `settings`.
    #[must_use]
    pub fn build(settings: &PipelineSettings) -> Self {
        let cache = Self::new();
        cache.insert(build_receive_pipeline(settings));
        cache.insert(build_handler_pipeline(settings));
        cache
    }

    /// Stores the chain for `C`, replacing any previous one.
    pub fn insert<C: Send + 'static>(&self, pipeline: Pipeline<C>) {
        self.chains.insert(TypeId::of::<C>(), Box::new(pipeline));
    }

    /// A clone of the chain for `C`, ready for one `oneshot`.
    #[must_use]
    pub fn get<C: Send + 'static>(&self) -> Option<Pipeline<C>> {
        self.chains
            .get(&TypeId::of::<C>())
            .and_then(|entry| entry.downcast_ref::<Pipeline<C>>().cloned())
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.chains.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.chains.is_empty()
    }
}

// ---------------------------------------------------------------------------
// PipelineSettings
// ---------------------------------------------------------------------------

/// Inputs for composing the stage chains.
#[derive(Clone)]
pub struct PipelineSettings {
    pub processing_timeout: Option<Duration>,
    pub dispatcher: Arc<dyn Dispatcher>,
    pub handlers: Arc<HandlerRegistry>,
    pub diagnostics: Arc<DiagnosticListener>,
    /// Custom receive behaviors, outermost first.
    pub receive_behaviors: Vec<Arc<dyn Behavior<TransportReceiveContext>>>,
    /// Custom handler behaviors, outermost first.
    pub handler_behaviors: Vec<Arc<dyn Behavior<InvokeHandlerContext>>>,
}

impl PipelineSettings {
    #[must_use]
    pub fn new(dispatcher: Arc<dyn Dispatcher>, handlers: Arc<HandlerRegistry>) -> Self {
        Self {
            processing_timeout: None,
            dispatcher,
            handlers,
            diagnostics: Arc::new(DiagnosticListener::new(DEFAULT_LISTENER)),
            receive_behaviors: Vec::new(),
            handler_behaviors: Vec::new(),
        }
    }
}

/// Name of the handler diagnostics listener when none is supplied.
pub const DEFAULT_LISTENER: &str = "busline.handlers";

/// Wraps `terminal` so that `behaviors[0]` runs first.
fn wrap<C: Send + 'static>(behaviors: &[Arc<dyn Behavior<C>>], terminal: Pipeline<C>) -> Pipeline<C> {
    behaviors.iter().rev().fold(terminal, |inner, behavior| {
        BoxCloneSyncService::new(BehaviorLayer::new(Arc::clone(behavior)).layer(inner))
    })
}

/// Build the transport-receive chain.
///
/// Layer order (outermost to innermost):
/// 1. `MetricsLayer` -- stage timing and outcome, including cancellations
/// 2. `BatchDispatchLayer` -- drain and dispatch after everything inside succeeded
/// 3. `CancellationLayer` -- stop before or during the chain once cancelled
/// 4. `TimeoutLayer` -- optional per-message processing deadline
/// 5. custom receive behaviors
///
/// Dispatch sits outside the cancellation and deadline race: once the
/// accumulator is drained, the batch is always handed to the dispatcher in
/// full.
/// 6. `LoadHandlersConnector` -- fan out to the invoke-handler chain
#[must_use]
pub fn build_receive_pipeline(settings: &PipelineSettings) -> Pipeline<TransportReceiveContext> {
    let connector = BoxCloneSyncService::new(LoadHandlersConnector::new(Arc::clone(
        &settings.handlers,
    )));
    let inner = wrap(&settings.receive_behaviors, connector);
    BoxCloneSyncService::new(
        ServiceBuilder::new()
            .layer(MetricsLayer)
            .layer(BatchDispatchLayer::new(Arc::clone(&settings.dispatcher)))
            .layer(CancellationLayer)
            .layer(TimeoutLayer::new(settings.processing_timeout))
            .service(inner),
    )
}

/// Build the invoke-handler chain.
///
/// Layer order (outermost to innermost):
/// 1. `MetricsLayer`
/// 2. `CancellationLayer`
/// 3. `InvokedHandlerDiagnostics`
/// 4. custom handler behaviors
/// 5. `InvokeHandlerTerminator`
#[must_use]
pub fn build_handler_pipeline(settings: &PipelineSettings) -> Pipeline<InvokeHandlerContext> {
    let mut behaviors: Vec<Arc<dyn Behavior<InvokeHandlerContext>>> =
        vec![Arc::new(InvokedHandlerDiagnostics::new(Arc::clone(
            &settings.diagnostics,
        )))];
    behaviors.extend(settings.handler_behaviors.iter().cloned());
    let inner = wrap(&behaviors, BoxCloneSyncService::new(InvokeHandlerTerminator));
    BoxCloneSyncService::new(
        ServiceBuilder::new()
            .layer(MetricsLayer)
            .layer(CancellationLayer)
            .service(inner),
    )
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
