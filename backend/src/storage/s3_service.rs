use std::path::Path;

use async_trait::async_trait;
use aws_sdk_s3::Client;
use aws_sdk_s3::config::http::HttpResponse;
use aws_sdk_s3::error::{DisplayErrorContext, SdkError};
use aws_sdk_s3::primitives::ByteStream;
use chrono::{DateTime, Utc};

use crate::retry::{AttemptTimedOut, Retryable};

const MAX_UPLOAD_SIZE: u64 = 50 * 1024 * 1024;

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("S3 error: {0}")]
    S3(String),
    #[error("Storage temporarily unavailable: {0}")]
    Unavailable(String),
    #[error("Storage quota exceeded: {0}")]
    QuotaExceeded(String),
    #[error("Permission denied: {0}")]
    PermissionDenied(String),
    #[error("Invalid image: {0}")]
    InvalidImage(String),
    #[error("File too large")]
    FileTooLarge,
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    TimedOut(#[from] AttemptTimedOut),
}

impl Retryable for StorageError {
    fn is_retryable(&self) -> bool {
        matches!(self, StorageError::Unavailable(_) | StorageError::TimedOut(_))
    }
}

/// Durable object storage for diagnosis photos.
#[async_trait]
pub trait ImageStore: Send + Sync {
    /// Uploads `local_file` under `destination` and returns its URL.
    async fn upload(&self, local_file: &Path, destination: &str) -> Result<String, StorageError>;
}

/// `users/{userId}/crops/{cropId}/images/{timestamp}.jpg`
pub fn generate_image_key(user_id: &str, crop_id: &str, taken_at: DateTime<Utc>) -> String {
    format!(
        "users/{}/crops/{}/images/{}.jpg",
        user_id,
        crop_id,
        taken_at.timestamp_millis()
    )
}

pub fn validate_image_size(byte_len: u64) -> Result<(), StorageError> {
    if byte_len > MAX_UPLOAD_SIZE {
        return Err(StorageError::FileTooLarge);
    }
    Ok(())
}

#[derive(Clone)]
pub struct S3Service {
    client: Client,
    bucket_name: String,
}

impl S3Service {
    pub fn new(client: Client, bucket_name: String) -> Self {
        Self {
            client,
            bucket_name,
        }
    }

    pub fn object_url(&self, key: &str) -> String {
        format!("s3://{}/{}", self.bucket_name, key)
    }
}

#[async_trait]
impl ImageStore for S3Service {
    async fn upload(&self, local_file: &Path, destination: &str) -> Result<String, StorageError> {
        let size = tokio::fs::metadata(local_file).await?.len();
        validate_image_size(size)?;

        let body = ByteStream::from_path(local_file)
            .await
            .map_err(|e| StorageError::Io(std::io::Error::other(e)))?;

        self.client
            .put_object()
            .bucket(&self.bucket_name)
            .key(destination)
            .body(body)
            .content_type("image/jpeg")
            .send()
            .await
            .map_err(classify_sdk_error)?;

        log::info!("Uploaded {} bytes to {}", size, destination);
        Ok(self.object_url(destination))
    }
}

fn classify_sdk_error<E>(err: SdkError<E, HttpResponse>) -> StorageError
where
    E: std::error::Error + Send + Sync + 'static,
{
    let message = DisplayErrorContext(&err).to_string();
    match &err {
        SdkError::TimeoutError(_) | SdkError::DispatchFailure(_) | SdkError::ResponseError(_) => {
            StorageError::Unavailable(message)
        }
        SdkError::ServiceError(context) => match context.raw().status().as_u16() {
            401 | 403 => StorageError::PermissionDenied(message),
            507 => StorageError::QuotaExceeded(message),
            408 | 429 | 500..=599 => StorageError::Unavailable(message),
            _ => StorageError::S3(message),
        },
        _ => StorageError::S3(message),
    }
}
