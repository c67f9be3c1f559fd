use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde_json::{Map, Value};
use shared::{Feedback, IdentificationResult};

use crate::db::dynamodb_repository::{Document, DocumentStore, RepositoryError};
use crate::retry::RetryPolicy;

const SAVE_TIMEOUT: Duration = Duration::from_secs(15);

#[derive(Debug, thiserror::Error)]
pub enum ResultServiceError {
    #[error("Repository error: {0}")]
    Repository(#[from] RepositoryError),
    #[error("Rating must be between 1 and 5, got {0}")]
    InvalidRating(u8),
    #[error("Result id is required")]
    MissingResultId,
    #[error("Result {0} not found")]
    NotFound(String),
}

/// Persistence, cached lookup and feedback for identification results.
#[derive(Clone)]
pub struct ResultService {
    store: Arc<dyn DocumentStore>,
    lookup_policy: RetryPolicy,
    feedback_policy: RetryPolicy,
}

pub fn result_to_document(result: &IdentificationResult) -> Result<Document, RepositoryError> {
    match serde_json::to_value(result)? {
        Value::Object(document) => Ok(document),
        other => Err(RepositoryError::InvalidData(format!(
            "result serialized to non-object: {}",
            other
        ))),
    }
}

pub fn result_from_document(
    id: &str,
    mut document: Document,
) -> Result<IdentificationResult, RepositoryError> {
    document
        .entry("id".to_string())
        .or_insert_with(|| Value::String(id.to_string()));
    Ok(serde_json::from_value(Value::Object(document))?)
}

impl ResultService {
    pub fn new(
        store: Arc<dyn DocumentStore>,
        lookup_policy: RetryPolicy,
        feedback_policy: RetryPolicy,
    ) -> Self {
        Self {
            store,
            lookup_policy,
            feedback_policy,
        }
    }

    /// Single best-effort write; callers decide whether a failure matters.
    pub async fn save_result(&self, result: &IdentificationResult) -> Result<(), RepositoryError> {
        let document = result_to_document(result)?;
        match tokio::time::timeout(SAVE_TIMEOUT, self.store.set(&result.id, document)).await {
            Ok(outcome) => outcome,
            Err(_) => Err(RepositoryError::from(crate::retry::AttemptTimedOut(SAVE_TIMEOUT))),
        }
    }

    pub async fn get_result(
        &self,
        id: &str,
    ) -> Result<Option<IdentificationResult>, RepositoryError> {
        let store = &self.store;
        let document = self
            .lookup_policy
            .execute("Result lookup", |_| async move { store.get(id).await })
            .await?;

        document
            .map(|document| result_from_document(id, document))
            .transpose()
    }

    /// Attaches `user_id`'s feedback to one of their stored results. Results
    /// that are missing or owned by someone else are `NotFound`. Store
    /// failures are retried and then dropped: feedback never surfaces an
    /// error to the user once its input is valid.
    pub async fn submit_feedback(
        &self,
        result_id: &str,
        user_id: &str,
        rating: u8,
        comment: &str,
        is_accurate: bool,
    ) -> Result<(), ResultServiceError> {
        if result_id.trim().is_empty() {
            return Err(ResultServiceError::MissingResultId);
        }
        if !(1..=5).contains(&rating) {
            return Err(ResultServiceError::InvalidRating(rating));
        }

        match self.get_result(result_id).await {
            Ok(Some(result)) if result.user_id == user_id => {}
            Ok(Some(_)) => {
                log::warn!("User {} sent feedback for result {} they do not own", user_id, result_id);
                return Err(ResultServiceError::NotFound(result_id.to_string()));
            }
            Ok(None) => return Err(ResultServiceError::NotFound(result_id.to_string())),
            Err(e) => {
                log::error!("Abandoning feedback for result {}: lookup failed: {}", result_id, e);
                return Ok(());
            }
        }

        let feedback = Feedback {
            rating,
            comment: comment.trim().to_string(),
            is_accurate,
            submitted_at: Utc::now(),
        };
        let mut fields = Map::new();
        fields.insert(
            "feedback".to_string(),
            serde_json::to_value(&feedback).map_err(RepositoryError::from)?,
        );

        let store = &self.store;
        let fields = &fields;
        let outcome = self
            .feedback_policy
            .execute("Feedback submission", |_| async move {
                store.update(result_id, fields.clone()).await
            })
            .await;

        match outcome {
            Ok(()) => log::info!("Feedback recorded for result {}", result_id),
            Err(e) => log::error!("Abandoning feedback for result {}: {}", result_id, e),
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{MemoryDocumentStore, sample_result};
    use std::time::Duration;

    fn service(store: Arc<MemoryDocumentStore>) -> ResultService {
        let policy = RetryPolicy::exponential(3, Duration::from_secs(1), Duration::from_secs(8));
        ResultService::new(store, policy, policy)
    }

    #[tokio::test(start_paused = true)]
    async fn saved_result_can_be_read_back() {
        let store = Arc::new(MemoryDocumentStore::default());
        let service = service(store.clone());
        let result = sample_result();

        service.save_result(&result).await.unwrap();
        let loaded = service.get_result(&result.id).await.unwrap().unwrap();
        assert_eq!(loaded, result);
    }

    #[tokio::test(start_paused = true)]
    async fn lookup_retries_transient_failures() {
        let store = Arc::new(MemoryDocumentStore::default());
        let result = sample_result();
        let service = service(store.clone());
        service.save_result(&result).await.unwrap();

        store.fail_next(2);
        let loaded = service.get_result(&result.id).await.unwrap();
        assert!(loaded.is_some());
        assert_eq!(store.get_calls(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn missing_result_is_none() {
        let service = service(Arc::new(MemoryDocumentStore::default()));
        assert!(service.get_result("nope").await.unwrap().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn feedback_is_attached_to_result() {
        let store = Arc::new(MemoryDocumentStore::default());
        let service = service(store.clone());
        let result = sample_result();
        service.save_result(&result).await.unwrap();

        service
            .submit_feedback(&result.id, &result.user_id, 4, "  spot on  ", true)
            .await
            .unwrap();

        let loaded = service.get_result(&result.id).await.unwrap().unwrap();
        let feedback = loaded.feedback.unwrap();
        assert_eq!(feedback.rating, 4);
        assert_eq!(feedback.comment, "spot on");
        assert!(feedback.is_accurate);
        assert_eq!(loaded.problem_name, result.problem_name);
    }

    #[tokio::test(start_paused = true)]
    async fn feedback_is_abandoned_silently_after_three_attempts() {
        let store = Arc::new(MemoryDocumentStore::default());
        let service = service(store.clone());
        let result = sample_result();
        service.save_result(&result).await.unwrap();

        store.fail_next_updates(10);
        service
            .submit_feedback(&result.id, &result.user_id, 2, "", false)
            .await
            .unwrap();
        assert_eq!(store.update_calls(), 3);
    }

    #[tokio::test]
    async fn invalid_rating_is_rejected() {
        let service = service(Arc::new(MemoryDocumentStore::default()));
        for rating in [0, 6] {
            let err = service
                .submit_feedback("id", "user-1", rating, "", true)
                .await
                .unwrap_err();
            assert!(matches!(err, ResultServiceError::InvalidRating(r) if r == rating));
        }
        assert!(matches!(
            service.submit_feedback(" ", "user-1", 3, "", true).await,
            Err(ResultServiceError::MissingResultId)
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn feedback_on_someone_elses_result_is_rejected() {
        let store = Arc::new(MemoryDocumentStore::default());
        let service = service(store.clone());
        let result = sample_result();
        service.save_result(&result).await.unwrap();

        let err = service
            .submit_feedback(&result.id, "intruder", 1, "wrong", false)
            .await
            .unwrap_err();
        assert!(matches!(err, ResultServiceError::NotFound(ref id) if id == &result.id));
        assert_eq!(store.update_calls(), 0);
        let loaded = service.get_result(&result.id).await.unwrap().unwrap();
        assert!(loaded.feedback.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn feedback_on_missing_result_is_not_found() {
        let store = Arc::new(MemoryDocumentStore::default());
        let service = service(store.clone());
        assert!(matches!(
            service.submit_feedback("ghost", "user-1", 3, "", true).await,
            Err(ResultServiceError::NotFound(_))
        ));
        assert_eq!(store.update_calls(), 0);
    }
}
