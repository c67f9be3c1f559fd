use std::env;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::inference::gemini::{DEFAULT_BASE_URL, DEFAULT_MODEL};
use crate::rate_limit::DEFAULT_MAX_REQUESTS_PER_MINUTE;
use crate::retry::RetryPolicy;
use crate::storage::compress::{CompressionSettings, DEFAULT_JPEG_QUALITY, DEFAULT_MAX_DIMENSION};

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing environment variable {0}")]
    Missing(&'static str),
    #[error("Invalid value for {name}: {reason}")]
    Invalid { name: &'static str, reason: String },
    #[error("Failed to read pipeline config: {0}")]
    Io(#[from] std::io::Error),
    #[error("Failed to parse pipeline config: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AiConfig {
    pub max_attempts: u32,
    pub initial_delay_ms: u64,
    pub max_delay_ms: u64,
    pub timeout_secs: u64,
    pub max_requests_per_minute: u32,
}

impl Default for AiConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay_ms: 1000,
            max_delay_ms: 10_000,
            timeout_secs: 60,
            max_requests_per_minute: DEFAULT_MAX_REQUESTS_PER_MINUTE,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct UploadConfig {
    pub max_attempts: u32,
    pub delay_step_ms: u64,
    pub timeout_secs: u64,
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            delay_step_ms: 1000,
            timeout_secs: 30,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LookupConfig {
    pub max_attempts: u32,
    pub initial_delay_ms: u64,
    pub max_delay_ms: u64,
    pub timeout_secs: u64,
}

impl Default for LookupConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay_ms: 1000,
            max_delay_ms: 8000,
            timeout_secs: 15,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CompressionConfig {
    pub max_dimension: u32,
    pub jpeg_quality: u8,
}

impl Default for CompressionConfig {
    fn default() -> Self {
        Self {
            max_dimension: DEFAULT_MAX_DIMENSION,
            jpeg_quality: DEFAULT_JPEG_QUALITY,
        }
    }
}

/// Retry, rate-limit and compression tuning for the identification pipeline.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub ai: AiConfig,
    pub upload: UploadConfig,
    pub lookup: LookupConfig,
    pub compression: CompressionConfig,
}

impl PipelineConfig {
    pub fn from_yaml_str(raw: &str) -> Result<Self, ConfigError> {
        let config: PipelineConfig = serde_yaml::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Loads YAML from `path`, or the built-in defaults when no path is given.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        match path {
            Some(path) => {
                log::info!("Loading pipeline config from {}", path.display());
                Self::from_yaml_str(&std::fs::read_to_string(path)?)
            }
            None => Ok(Self::default()),
        }
    }

    fn validate(&self) -> Result<(), ConfigError> {
        let attempts = [
            ("ai.max_attempts", self.ai.max_attempts),
            ("upload.max_attempts", self.upload.max_attempts),
            ("lookup.max_attempts", self.lookup.max_attempts),
        ];
        for (name, value) in attempts {
            if value == 0 {
                return Err(ConfigError::Invalid {
                    name,
                    reason: "must be at least 1".to_string(),
                });
            }
        }
        if self.ai.max_requests_per_minute == 0 {
            return Err(ConfigError::Invalid {
                name: "ai.max_requests_per_minute",
                reason: "must be at least 1".to_string(),
            });
        }
        if !(1..=100).contains(&self.compression.jpeg_quality) {
            return Err(ConfigError::Invalid {
                name: "compression.jpeg_quality",
                reason: format!("{} is outside 1..=100", self.compression.jpeg_quality),
            });
        }
        Ok(())
    }

    pub fn ai_policy(&self) -> RetryPolicy {
        RetryPolicy::exponential(
            self.ai.max_attempts,
            Duration::from_millis(self.ai.initial_delay_ms),
            Duration::from_millis(self.ai.max_delay_ms),
        )
        .with_attempt_timeout(Duration::from_secs(self.ai.timeout_secs))
    }

    pub fn upload_policy(&self) -> RetryPolicy {
        RetryPolicy::linear(
            self.upload.max_attempts,
            Duration::from_millis(self.upload.delay_step_ms),
        )
        .with_attempt_timeout(Duration::from_secs(self.upload.timeout_secs))
    }

    pub fn lookup_policy(&self) -> RetryPolicy {
        RetryPolicy::exponential(
            self.lookup.max_attempts,
            Duration::from_millis(self.lookup.initial_delay_ms),
            Duration::from_millis(self.lookup.max_delay_ms),
        )
        .with_attempt_timeout(Duration::from_secs(self.lookup.timeout_secs))
    }

    pub fn compression_settings(&self) -> CompressionSettings {
        CompressionSettings {
            max_dimension: self.compression.max_dimension,
            jpeg_quality: self.compression.jpeg_quality,
        }
    }
}

/// Process settings read from the environment (after `.env`).
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub s3_bucket: String,
    pub results_table: String,
    pub gemini_api_key: String,
    pub gemini_model: String,
    pub gemini_base_url: String,
    pub jwt_secret: String,
    pub port: u16,
    pub pipeline: PipelineConfig,
}

fn required(name: &'static str) -> Result<String, ConfigError> {
    env::var(name)
        .ok()
        .filter(|value| !value.trim().is_empty())
        .ok_or(ConfigError::Missing(name))
}

impl ServerConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        let port = match env::var("PORT") {
            Ok(raw) => raw.parse().map_err(|_| ConfigError::Invalid {
                name: "PORT",
                reason: format!("'{}' is not a port number", raw),
            })?,
            Err(_) => 8081,
        };
        let pipeline_path = env::var("CROPDOC_PIPELINE_CONFIG").ok();

        Ok(Self {
            s3_bucket: required("S3_BUCKET_NAME")?,
            results_table: required("DYNAMODB_RESULTS_TABLE")?,
            gemini_api_key: required("GEMINI_API_KEY")?,
            gemini_model: env::var("GEMINI_MODEL").unwrap_or_else(|_| DEFAULT_MODEL.to_string()),
            gemini_base_url: env::var("GEMINI_BASE_URL")
                .unwrap_or_else(|_| DEFAULT_BASE_URL.to_string()),
            jwt_secret: required("JWT_SECRET")?,
            port,
            pipeline: PipelineConfig::load(pipeline_path.as_deref().map(Path::new))?,
        })
    }
}
