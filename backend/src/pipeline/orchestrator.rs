use std::future::Future;
use std::sync::Arc;

use chrono::Utc;
use shared::{
    Action, ActionCategory, FALLBACK_PROBLEM_TYPE, IdentificationRequest, IdentificationResult,
    ImageSource,
};
use strum_macros::Display;
use uuid::Uuid;

use crate::config::PipelineConfig;
use crate::inference::gemini::{InferenceError, TextGenerator};
use crate::inference::prompt::build_identification_prompt;
use crate::parser::response_parser::{self, ResultContext};
use crate::rate_limit::RateLimiter;
use crate::results::result_service::ResultService;
use crate::storage::compress::{self, CompressedImage, CompressionSettings};
use crate::storage::s3_service::{ImageStore, StorageError, generate_image_key};

use super::cancel::CancelSignal;
use super::error::PipelineError;

pub const FALLBACK_PROBLEM_NAME: &str = "Identification Failed";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
#[strum(serialize_all = "lowercase")]
pub enum Stage {
    Idle,
    Uploading,
    Invoking,
    Parsing,
    Persisting,
    Done,
    Error,
}

/// Stage bookkeeping for one pipeline run.
struct Run {
    id: Uuid,
    stage: Stage,
}

impl Run {
    fn new() -> Self {
        Self {
            id: Uuid::new_v4(),
            stage: Stage::Idle,
        }
    }

    fn advance(&mut self, next: Stage) {
        log::info!("Identification {}: {} -> {}", self.id, self.stage, next);
        self.stage = next;
    }
}

/// Drives a photo through upload, AI identification, parsing and
/// persistence.
#[derive(Clone)]
pub struct Identifier {
    image_store: Arc<dyn ImageStore>,
    generator: Arc<dyn TextGenerator>,
    results: ResultService,
    rate_limiter: Arc<RateLimiter>,
    config: PipelineConfig,
}

impl Identifier {
    pub fn new(
        image_store: Arc<dyn ImageStore>,
        generator: Arc<dyn TextGenerator>,
        results: ResultService,
        rate_limiter: Arc<RateLimiter>,
        config: PipelineConfig,
    ) -> Self {
        Self {
            image_store,
            generator,
            results,
            rate_limiter,
            config,
        }
    }

    pub fn results(&self) -> &ResultService {
        &self.results
    }

    pub async fn identify(
        &self,
        request: IdentificationRequest,
        user_id: &str,
    ) -> Result<IdentificationResult, PipelineError> {
        self.identify_with_cancel(request, user_id, &CancelSignal::never())
            .await
    }

    /// Returns a diagnosis or the fallback result. `Err` only for missing
    /// input or cancellation.
    pub async fn identify_with_cancel(
        &self,
        request: IdentificationRequest,
        user_id: &str,
        cancel: &CancelSignal,
    ) -> Result<IdentificationResult, PipelineError> {
        if request.crop_id.trim().is_empty() || request.crop_name.trim().is_empty() {
            return Err(PipelineError::MissingCrop);
        }
        let image = match request.image {
            Some(ref image) if !image.is_empty() => image.clone(),
            _ => return Err(PipelineError::MissingImage),
        };

        let mut run = Run::new();
        let mut cancel = cancel.clone();
        match self.run(&mut run, &request, image, user_id, &mut cancel).await {
            Ok(result) => Ok(result),
            Err(err @ PipelineError::Cancelled(_)) => {
                log::warn!("Identification {} cancelled while {}", run.id, run.stage);
                Err(err)
            }
            Err(err) => {
                log::error!(
                    "Identification {} failed while {} ({}): {}",
                    run.id,
                    run.stage,
                    err.kind(),
                    err
                );
                run.advance(Stage::Error);
                Ok(fallback_result(
                    &request.crop_id,
                    &request.crop_name,
                    user_id,
                    &err.user_message(),
                ))
            }
        }
    }

    async fn run(
        &self,
        run: &mut Run,
        request: &IdentificationRequest,
        image: ImageSource,
        user_id: &str,
        cancel: &mut CancelSignal,
    ) -> Result<IdentificationResult, PipelineError> {
        run.advance(Stage::Uploading);
        let compressed = cancellable(
            Stage::Uploading,
            cancel,
            compress_blocking(image, self.config.compression_settings()),
        )
        .await?
        .map_err(PipelineError::Upload)?;

        let key = generate_image_key(user_id, &request.crop_id, Utc::now());
        let image_url = cancellable(Stage::Uploading, cancel, self.upload(&compressed, &key))
            .await?
            .map_err(PipelineError::Upload)?;
        drop(compressed);

        run.advance(Stage::Invoking);
        let prompt = build_identification_prompt(&request.crop_name);
        let raw_text = cancellable(Stage::Invoking, cancel, self.invoke(&prompt))
            .await?
            .map_err(PipelineError::Inference)?;

        run.advance(Stage::Parsing);
        let result = response_parser::parse(
            &raw_text,
            ResultContext {
                crop_id: &request.crop_id,
                crop_name: &request.crop_name,
                image_url: &image_url,
                user_id,
            },
        );

        run.advance(Stage::Persisting);
        cancellable(Stage::Persisting, cancel, self.persist(&result)).await?;

        run.advance(Stage::Done);
        Ok(result)
    }

    async fn upload(&self, image: &CompressedImage, key: &str) -> Result<String, StorageError> {
        let store = &self.image_store;
        let path = image.path();
        self.config
            .upload_policy()
            .execute("Image upload", |_| async move { store.upload(path, key).await })
            .await
    }

    async fn invoke(&self, prompt: &str) -> Result<String, InferenceError> {
        let generator = &self.generator;
        let limiter = &self.rate_limiter;
        self.config
            .ai_policy()
            .execute("AI identification", |_| async move {
                if !limiter.try_acquire() {
                    return Err(InferenceError::RateLimited);
                }
                generator.generate(prompt, true).await
            })
            .await
    }

    async fn persist(&self, result: &IdentificationResult) {
        if let Err(e) = self.results.save_result(result).await {
            log::error!("Failed to persist result {}: {}", result.id, e);
        }
    }
}

async fn cancellable<T>(
    stage: Stage,
    cancel: &mut CancelSignal,
    work: impl Future<Output = T>,
) -> Result<T, PipelineError> {
    if cancel.is_cancelled() {
        return Err(PipelineError::Cancelled(stage));
    }
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(PipelineError::Cancelled(stage)),
        output = work => Ok(output),
    }
}

async fn compress_blocking(
    image: ImageSource,
    settings: CompressionSettings,
) -> Result<CompressedImage, StorageError> {
    tokio::task::spawn_blocking(move || compress::compress(&image, settings))
        .await
        .map_err(|e| StorageError::Io(std::io::Error::other(e)))?
}

/// The standardized "could not identify" result.
pub fn fallback_result(
    crop_id: &str,
    crop_name: &str,
    user_id: &str,
    reason: &str,
) -> IdentificationResult {
    IdentificationResult {
        id: Uuid::new_v4().to_string(),
        crop_id: crop_id.to_string(),
        crop_name: crop_name.to_string(),
        image_url: String::new(),
        problem_name: FALLBACK_PROBLEM_NAME.to_string(),
        description: format!("We couldn't identify the problem with your {}.", crop_name),
        severity: 1,
        confidence: 0.0,
        actions: vec![
            Action::new(
                "Retry",
                "Retake the photo in good light, close to the affected area.",
                1,
                ActionCategory::Monitoring,
            ),
            Action::new(
                "Inspect",
                "Inspect the plant manually for spots, pests or wilting.",
                2,
                ActionCategory::Monitoring,
            ),
        ],
        scientific_name: None,
        problem_type: Some(FALLBACK_PROBLEM_TYPE.to_string()),
        timestamp: Utc::now(),
        user_id: user_id.to_string(),
        error_reason: Some(reason.to_string()),
        feedback: None,
    }
}
