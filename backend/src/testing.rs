//! In-memory fakes for the remote adapters.

use std::collections::HashMap;
use std::io::Cursor;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU32, Ordering};

use async_trait::async_trait;
use chrono::Utc;
use image::{DynamicImage, ImageFormat, Rgb, RgbImage};
use shared::{Action, ActionCategory, IdentificationResult};
use tokio::sync::Notify;

use crate::db::dynamodb_repository::{Document, DocumentStore, RepositoryError};
use crate::inference::gemini::{InferenceError, TextGenerator};
use crate::storage::s3_service::{ImageStore, StorageError};

/// Sharp, mid-grey checkerboard encoded as PNG.
pub fn sample_png(width: u32, height: u32) -> Vec<u8> {
    let image = RgbImage::from_fn(width, height, |x, y| {
        if (x / 8 + y / 8) % 2 == 0 {
            Rgb([60, 140, 60])
        } else {
            Rgb([190, 200, 170])
        }
    });
    let mut bytes = Vec::new();
    DynamicImage::ImageRgb8(image)
        .write_to(&mut Cursor::new(&mut bytes), ImageFormat::Png)
        .unwrap();
    bytes
}

pub fn sample_result() -> IdentificationResult {
    IdentificationResult {
        id: "result-1".to_string(),
        crop_id: "crop-7".to_string(),
        crop_name: "Tomato".to_string(),
        image_url: "s3://bucket/users/user-1/crops/crop-7/images/1.jpg".to_string(),
        problem_name: "Early Blight".to_string(),
        description: "Dark concentric spots on lower leaves".to_string(),
        severity: 2,
        confidence: 80.0,
        actions: vec![Action::new(
            "Remove affected leaves",
            "Remove affected leaves",
            1,
            ActionCategory::Pruning,
        )],
        scientific_name: Some("Alternaria solani".to_string()),
        problem_type: Some("fungal".to_string()),
        timestamp: Utc::now(),
        user_id: "user-1".to_string(),
        error_reason: None,
        feedback: None,
    }
}

#[derive(Debug, Clone)]
pub struct RecordedUpload {
    pub path: PathBuf,
    pub destination: String,
    pub file_existed: bool,
}

#[derive(Default)]
pub struct FakeImageStore {
    uploads: Mutex<Vec<RecordedUpload>>,
    failures_remaining: AtomicU32,
    failure: Option<fn() -> StorageError>,
    hang: bool,
    started: Arc<Notify>,
}

impl FakeImageStore {
    pub fn failing(mut self, times: u32, failure: fn() -> StorageError) -> Self {
        self.failures_remaining = AtomicU32::new(times);
        self.failure = Some(failure);
        self
    }

    /// Uploads never complete.
    pub fn hanging(mut self) -> Self {
        self.hang = true;
        self
    }

    /// Notified each time an upload begins.
    pub fn upload_started(&self) -> Arc<Notify> {
        self.started.clone()
    }

    pub fn uploads(&self) -> Vec<RecordedUpload> {
        self.uploads.lock().unwrap().clone()
    }
}

#[async_trait]
impl ImageStore for FakeImageStore {
    async fn upload(&self, local_file: &Path, destination: &str) -> Result<String, StorageError> {
        self.uploads.lock().unwrap().push(RecordedUpload {
            path: local_file.to_path_buf(),
            destination: destination.to_string(),
            file_existed: local_file.exists(),
        });
        self.started.notify_one();

        if self.hang {
            std::future::pending::<()>().await;
        }
        if let Some(failure) = self.failure {
            let remaining = self.failures_remaining.load(Ordering::SeqCst);
            if remaining > 0 {
                self.failures_remaining.store(remaining - 1, Ordering::SeqCst);
                return Err(failure());
            }
        }
        Ok(format!("memory://{}", destination))
    }
}

type Script = Box<dyn Fn(u32) -> Result<String, InferenceError> + Send + Sync>;

/// Answers each call with the script's response for that 0-based call index.
pub struct ScriptedGenerator {
    script: Script,
    prompts: Mutex<Vec<String>>,
    consents: Mutex<Vec<bool>>,
}

impl ScriptedGenerator {
    pub fn new(
        script: impl Fn(u32) -> Result<String, InferenceError> + Send + Sync + 'static,
    ) -> Self {
        Self {
            script: Box::new(script),
            prompts: Mutex::new(Vec::new()),
            consents: Mutex::new(Vec::new()),
        }
    }

    pub fn calls(&self) -> usize {
        self.prompts.lock().unwrap().len()
    }

    pub fn prompts(&self) -> Vec<String> {
        self.prompts.lock().unwrap().clone()
    }

    pub fn consents(&self) -> Vec<bool> {
        self.consents.lock().unwrap().clone()
    }
}

#[async_trait]
impl TextGenerator for ScriptedGenerator {
    async fn generate(&self, prompt: &str, consent: bool) -> Result<String, InferenceError> {
        let call = {
            let mut prompts = self.prompts.lock().unwrap();
            prompts.push(prompt.to_string());
            prompts.len() as u32 - 1
        };
        self.consents.lock().unwrap().push(consent);
        (self.script)(call)
    }
}

/// Document store backed by a map. `fail_next(n)` makes the next `n`
/// operations of any kind fail with a retryable error; `fail_next_updates(n)`
/// only affects updates.
#[derive(Default)]
pub struct MemoryDocumentStore {
    documents: Mutex<HashMap<String, Document>>,
    failures_remaining: AtomicU32,
    update_failures_remaining: AtomicU32,
    get_calls: AtomicU32,
    set_calls: AtomicU32,
    update_calls: AtomicU32,
}

impl MemoryDocumentStore {
    pub fn fail_next(&self, count: u32) {
        self.failures_remaining.store(count, Ordering::SeqCst);
    }

    pub fn fail_next_updates(&self, count: u32) {
        self.update_failures_remaining.store(count, Ordering::SeqCst);
    }

    pub fn contains(&self, id: &str) -> bool {
        self.documents.lock().unwrap().contains_key(id)
    }

    pub fn get_calls(&self) -> u32 {
        self.get_calls.load(Ordering::SeqCst)
    }

    pub fn set_calls(&self) -> u32 {
        self.set_calls.load(Ordering::SeqCst)
    }

    pub fn update_calls(&self) -> u32 {
        self.update_calls.load(Ordering::SeqCst)
    }

    fn injected_failure(&self) -> Result<(), RepositoryError> {
        Self::take_failure(&self.failures_remaining)
    }

    fn take_failure(counter: &AtomicU32) -> Result<(), RepositoryError> {
        let remaining = counter.load(Ordering::SeqCst);
        if remaining > 0 {
            counter.store(remaining - 1, Ordering::SeqCst);
            return Err(RepositoryError::Unavailable("injected failure".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl DocumentStore for MemoryDocumentStore {
    async fn get(&self, id: &str) -> Result<Option<Document>, RepositoryError> {
        self.get_calls.fetch_add(1, Ordering::SeqCst);
        self.injected_failure()?;
        Ok(self.documents.lock().unwrap().get(id).cloned())
    }

    async fn set(&self, id: &str, document: Document) -> Result<(), RepositoryError> {
        self.set_calls.fetch_add(1, Ordering::SeqCst);
        self.injected_failure()?;
        self.documents
            .lock()
            .unwrap()
            .insert(id.to_string(), document);
        Ok(())
    }

    async fn update(&self, id: &str, fields: Document) -> Result<(), RepositoryError> {
        self.update_calls.fetch_add(1, Ordering::SeqCst);
        Self::take_failure(&self.update_failures_remaining)?;
        self.injected_failure()?;
        let mut documents = self.documents.lock().unwrap();
        let document = documents.get_mut(id).ok_or(RepositoryError::NotFound)?;
        document.extend(fields);
        Ok(())
    }
}
