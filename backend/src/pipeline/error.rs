use strum_macros::Display;

use crate::inference::gemini::InferenceError;
use crate::retry::Retryable;
use crate::storage::s3_service::StorageError;

use super::orchestrator::Stage;

/// How a failure propagates through a pipeline run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
pub enum FailureKind {
    /// Missing crop or image. Rejected before any work starts.
    InvalidInput,
    /// Timeouts, unavailability, throttling. Retried up to the stage ceiling.
    Transient,
    /// Auth, permission or malformed-request failures. Never retried.
    Permanent,
    /// The AI safety filter refused the request.
    ContentBlocked,
    Cancelled,
}

#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("A crop must be selected before identification")]
    MissingCrop,
    #[error("An image must be provided before identification")]
    MissingImage,
    #[error("Image upload failed: {0}")]
    Upload(#[source] StorageError),
    #[error("Identification failed: {0}")]
    Inference(#[source] InferenceError),
    #[error("Identification cancelled while {0}")]
    Cancelled(Stage),
}

impl PipelineError {
    pub fn kind(&self) -> FailureKind {
        match self {
            PipelineError::MissingCrop | PipelineError::MissingImage => FailureKind::InvalidInput,
            PipelineError::Upload(e) if e.is_retryable() => FailureKind::Transient,
            PipelineError::Upload(_) => FailureKind::Permanent,
            PipelineError::Inference(InferenceError::Blocked(_)) => FailureKind::ContentBlocked,
            PipelineError::Inference(e) if e.is_retryable() => FailureKind::Transient,
            PipelineError::Inference(_) => FailureKind::Permanent,
            PipelineError::Cancelled(_) => FailureKind::Cancelled,
        }
    }

    /// Message shown to the farmer on the fallback result.
    pub fn user_message(&self) -> String {
        match self {
            PipelineError::MissingCrop => "Please select a crop first.".to_string(),
            PipelineError::MissingImage => "Please take or choose a photo first.".to_string(),
            PipelineError::Upload(_) => {
                "We couldn't upload your photo. Check your connection and try again.".to_string()
            }
            PipelineError::Inference(InferenceError::Blocked(_)) => {
                "This photo couldn't be analyzed because it was flagged by the content safety \
                 filter. Please photograph only the affected plant."
                    .to_string()
            }
            PipelineError::Inference(InferenceError::RateLimited) => {
                "Too many identification requests right now. Please wait a minute and try again."
                    .to_string()
            }
            PipelineError::Inference(_) => {
                "We couldn't identify the problem. Please try again with a clearer photo."
                    .to_string()
            }
            PipelineError::Cancelled(_) => "Identification was cancelled.".to_string(),
        }
    }
}
