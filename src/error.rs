//! Pipeline error taxonomy
//!
//! Only two request-level failures reach callers in normal operation:
//! [`PipelineError::ModelNotLoaded`] and [`PipelineError::NoRelevantCredentialsFound`].
//! Invalid generator output never appears here; the pipeline recovers it with the
//! template fallback. A generator that errors outright surfaces as
//! [`PipelineError::GenerationFailed`] and is not retried.

use std::path::PathBuf;

use dcql_agentic::{FallbackError, LifecycleError};
use dcql_retrieval::{EmbeddingError, StoreError};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("Model not loaded: {0}")]
    ModelNotLoaded(#[from] LifecycleError),

    #[error("No relevant credentials found")]
    NoRelevantCredentialsFound,

    #[error("Generation failed: {0}")]
    GenerationFailed(String),

    #[error("Failed to prepare credential pool: {0}")]
    Preparation(#[from] EmbeddingError),

    #[error("Failed to load credentials: {0}")]
    Store(#[from] StoreError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Failed to serialize: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl From<FallbackError> for PipelineError {
    fn from(e: FallbackError) -> Self {
        match e {
            FallbackError::NoCredentials => PipelineError::NoRelevantCredentialsFound,
        }
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config: {0}")]
    Parse(#[from] serde_yaml::Error),

    #[error("Invalid config value for {field}: {reason}")]
    Invalid { field: &'static str, reason: String },
}

pub type Result<T> = std::result::Result<T, PipelineError>;
