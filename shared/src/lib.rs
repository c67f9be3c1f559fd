use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum_macros::{Display, EnumString};
use uuid::Uuid;

/// `problem_type` carried by the standardized "could not identify" result.
pub const FALLBACK_PROBLEM_TYPE: &str = "error";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageQualityResult {
    pub is_acceptable: bool,
    pub is_resolution_ok: bool,
    pub is_focused: bool,
    pub is_bright_enough: bool,
    pub focus_score: f32,
    pub brightness: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

impl ImageQualityResult {
    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            is_acceptable: false,
            is_resolution_ok: false,
            is_focused: false,
            is_bright_enough: false,
            focus_score: 0.0,
            brightness: 0.0,
            error_message: Some(message.into()),
        }
    }
}

/// Where the photo to diagnose comes from.
#[derive(Debug, Clone, PartialEq)]
pub enum ImageSource {
    Bytes(Vec<u8>),
    /// Local file path. An empty path is the "no image selected" sentinel.
    Reference(String),
}

impl ImageSource {
    pub fn is_empty(&self) -> bool {
        match self {
            ImageSource::Bytes(bytes) => bytes.is_empty(),
            ImageSource::Reference(path) => path.trim().is_empty(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct IdentificationRequest {
    pub crop_id: String,
    pub crop_name: String,
    pub image: Option<ImageSource>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum ActionCategory {
    PestControl,
    Pruning,
    Monitoring,
    /// Irrigation, fertilization and other crop-care steps.
    General,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, Display, EnumString)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum ActionStatus {
    #[default]
    Pending,
    InProgress,
    Completed,
    Skipped,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Action {
    pub id: String,
    pub title: String,
    pub description: String,
    pub priority: u32,
    pub category: ActionCategory,
    pub status: ActionStatus,
}

impl Action {
    pub fn new(
        title: impl Into<String>,
        description: impl Into<String>,
        priority: u32,
        category: ActionCategory,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            title: title.into(),
            description: description.into(),
            priority: priority.max(1),
            category,
            status: ActionStatus::Pending,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Feedback {
    pub rating: u8,
    pub comment: String,
    pub is_accurate: bool,
    pub submitted_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IdentificationResult {
    pub id: String,
    pub crop_id: String,
    pub crop_name: String,
    pub image_url: String,
    pub problem_name: String,
    pub description: String,
    pub severity: u8,
    pub confidence: f32,
    pub actions: Vec<Action>,
    pub scientific_name: Option<String>,
    pub problem_type: Option<String>,
    pub timestamp: DateTime<Utc>,
    pub user_id: String,
    /// User-facing reason, only set on fallback results.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_reason: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub feedback: Option<Feedback>,
}

impl IdentificationResult {
    pub fn is_fallback(&self) -> bool {
        self.problem_type.as_deref() == Some(FALLBACK_PROBLEM_TYPE)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeedbackRequest {
    pub rating: u8,
    #[serde(default)]
    pub comment: String,
    pub is_accurate: bool,
}
