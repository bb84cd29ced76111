use busline_core::IncomingMessage;
use tokio_util::sync::CancellationToken;

use crate::routing::RoutingError;

/// Failure raised inside a behavior chain.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("message processing was canceled")]
    Canceled,
    #[error("message processing exceeded {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },
    #[error("no handlers registered for message kinds {kinds:?}")]
    NoHandlers { kinds: Vec<String> },
    #[error("handler `{handler}` failed")]
    Handler {
        handler: String,
        #[source]
        source: anyhow::Error,
    },
    #[error("dispatch of {count} transport operations failed")]
    Dispatch {
        count: usize,
        #[source]
        source: anyhow::Error,
    },
    #[error("message {message_id} carries no reply-to address")]
    NoReplyAddress { message_id: String },
    #[error("no pipeline is registered for the {stage} stage")]
    MissingPipeline { stage: &'static str },
    #[error(transparent)]
    Routing(#[from] RoutingError),
    #[error("timeout store operation failed")]
    Timeouts(#[source] anyhow::Error),
}

impl PipelineError {
    #[must_use]
    pub fn is_canceled(&self) -> bool {
        matches!(self, Self::Canceled)
    }
}

/// A non-cancellation pipeline failure annotated with where it happened.
#[derive(Debug, thiserror::Error)]
#[error("failed to process message {message_id}")]
pub struct MessageProcessingError {
    pub message_id: String,
    /// Transport-native id, present only when it differs from `message_id`.
    pub native_message_id: Option<String>,
    /// Whether cancellation had been requested when the failure surfaced.
    pub pipeline_canceled: bool,
    #[source]
    pub source: PipelineError,
}

/// Outcome of a failed `invoke`.
#[derive(Debug, thiserror::Error)]
pub enum InvokeError {
    /// Cancellation was requested and the chain stopped because of it.
    #[error("processing of message {message_id} was canceled")]
    Canceled { message_id: String },
    #[error(transparent)]
    Failed(#[from] Box<MessageProcessingError>),
    /// The chain succeeded but a completion subscriber failed.
    #[error("receive pipeline completed notification failed")]
    Notification(#[source] anyhow::Error),
}

impl InvokeError {
    /// Classifies a chain failure for `message`.
    ///
    /// Only a cancellation caused by `cancellation` itself stays unannotated;
    /// everything else is wrapped with the message identifiers.
    #[must_use]
    pub fn from_pipeline(
        error: PipelineError,
        message: &IncomingMessage,
        cancellation: &CancellationToken,
    ) -> Self {
        let pipeline_canceled = cancellation.is_cancelled();
        if pipeline_canceled && error.is_canceled() {
            return Self::Canceled {
                message_id: message.message_id().to_string(),
            };
        }
        let native_message_id = (message.native_message_id() != message.message_id())
            .then(|| message.native_message_id().to_string());
        Self::Failed(Box::new(MessageProcessingError {
            message_id: message.message_id().to_string(),
            native_message_id,
            pipeline_canceled,
            source: error,
        }))
    }

    /// The chain failure behind this error, unchanged.
    #[must_use]
    pub fn pipeline_error(&self) -> Option<&PipelineError> {
        match self {
            Self::Failed(failed) => Some(&failed.source),
            Self::Canceled { .. } | Self::Notification(_) => None,
        }
    }

    /// Annotation attached to a processing failure.
    #[must_use]
    pub fn processing(&self) -> Option<&MessageProcessingError> {
        match self {
            Self::Failed(failed) => Some(failed),
            Self::Canceled { .. } | Self::Notification(_) => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use busline_core::{headers, Headers};
    use bytes::Bytes;

    use super::*;

    fn message(native: &str, logical: Option<&str>) -> IncomingMessage {
        let mut h = Headers::new();
        if let Some(id) = logical {
            h.insert(headers::MESSAGE_ID.to_string(), id.to_string());
        }
        IncomingMessage::new(native, h, Bytes::new())
    }

    #[test]
    fn requested_cancellation_is_not_annotated() {
        let token = CancellationToken::new();
        token.cancel();
        let err = InvokeError::from_pipeline(PipelineError::Canceled, &message("n", None), &token);
        assert!(matches!(err, InvokeError::Canceled { ref message_id } if message_id == "n"));
    }

    #[test]
    fn cancellation_without_request_is_a_failure() {
        let token = CancellationToken::new();
        let err = InvokeError::from_pipeline(PipelineError::Canceled, &message("n", None), &token);
        let processing = err.processing().unwrap();
        assert!(!processing.pipeline_canceled);
        assert!(processing.source.is_canceled());
    }

    #[test]
    fn failure_after_cancel_request_records_it() {
        let token = CancellationToken::new();
        token.cancel();
        let err = InvokeError::from_pipeline(
            PipelineError::Timeout { timeout_ms: 5 },
            &message("n", None),
            &token,
        );
        assert!(err.processing().unwrap().pipeline_canceled);
    }

    #[test]
    fn native_id_is_kept_only_when_different() {
        let token = CancellationToken::new();
        let same = InvokeError::from_pipeline(
            PipelineError::NoHandlers { kinds: vec![] },
            &message("n", None),
            &token,
        );
        assert_eq!(same.processing().unwrap().native_message_id, None);

        let different = InvokeError::from_pipeline(
            PipelineError::NoHandlers { kinds: vec![] },
            &message("native-7", Some("logical-7")),
            &token,
        );
        let processing = different.processing().unwrap();
        assert_eq!(processing.message_id, "logical-7");
        assert_eq!(processing.native_message_id.as_deref(), Some("native-7"));
        assert_eq!(different.to_string(), "failed to process message logical-7");
    }
}
