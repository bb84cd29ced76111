//! Message processing pipeline.
//!
//! A received message flows through two behavior chains: the
//! transport-receive chain runs once per message and ends in the connector
//! that resolves handlers; the invoke-handler chain runs once per resolved
//! handler. Both are tower services over an owned context, composed once at
//! endpoint start and cloned per message.

pub mod behavior;
pub mod behaviors;
pub mod builder;
pub mod context;
pub mod error;
pub mod executor;
pub mod span;
pub mod stages;

use std::future::Future;
use std::pin::Pin;

use tower::util::BoxCloneSyncService;

pub use behavior::{Behavior, BehaviorLayer, Next};
pub use builder::{build_handler_pipeline, build_receive_pipeline, PipelineCache, PipelineSettings};
pub use context::{BehaviorContext, InvokeHandlerContext, RootContext, TransportReceiveContext};
pub use error::{InvokeError, MessageProcessingError, PipelineError};
pub use executor::{MainPipelineExecutor, PipelineExecutor};
pub use span::MessageSpan;

/// Boxed future returned by every pipeline service.
pub type PipelineFuture = Pin<Box<dyn Future<Output = Result<(), PipelineError>> + Send>>;

/// A composed, type-erased chain for context type `C`.
pub type Pipeline<C> = BoxCloneSyncService<C, (), PipelineError>;
