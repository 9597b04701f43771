//! Generation Provider Trait
//!
//! Unified interface for text generators (local runtimes, OpenAI-compatible servers).

use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::Mutex;

/// Default generation budget; a DCQL query for a handful of claims fits comfortably
pub const DEFAULT_MAX_TOKENS: usize = 512;

/// Receives the text generated so far. Runs on the generator's task and must not block.
pub type ProgressCallback = Arc<dyn Fn(&str) + Send + Sync>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GenerationRequest {
    pub prompt: String,
    pub max_tokens: usize,
}

impl GenerationRequest {
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            max_tokens: DEFAULT_MAX_TOKENS,
        }
    }

    pub fn with_max_tokens(mut self, max_tokens: usize) -> Self {
        self.max_tokens = max_tokens;
        self
    }
}

/// The generator itself failed (as opposed to producing unusable text)
#[derive(Debug, Error)]
pub enum GenerationError {
    #[error("Generation request failed: {0}")]
    Request(String),

    #[error("Generator API error {status}: {body}")]
    Api { status: u16, body: String },

    #[error("Generator returned no text")]
    EmptyResponse,
}

impl From<reqwest::Error> for GenerationError {
    fn from(e: reqwest::Error) -> Self {
        GenerationError::Request(e.to_string())
    }
}

#[async_trait]
pub trait GenerationProvider: Send + Sync {
    /// Generate raw text for the prompt; partial text goes to `on_progress` when given
    async fn generate(
        &self,
        request: &GenerationRequest,
        on_progress: Option<ProgressCallback>,
    ) -> Result<String, GenerationError>;

    /// Get the model name for logging
    fn model_name(&self) -> &str;

    /// Get the provider name for logging
    fn provider_name(&self) -> &str;
}

/// Serializes access to a generator: at most one generation in flight.
///
/// Local runtimes keep mutable decode state per model, so concurrent calls would corrupt
/// each other; callers queue on the mutex instead.
pub struct ExclusiveGenerator {
    provider: Mutex<Arc<dyn GenerationProvider>>,
    model_name: String,
    provider_name: String,
}

impl ExclusiveGenerator {
    pub fn new(provider: Arc<dyn GenerationProvider>) -> Self {
        Self {
            model_name: provider.model_name().to_string(),
            provider_name: provider.provider_name().to_string(),
            provider: Mutex::new(provider),
        }
    }

    pub async fn generate(
        &self,
        request: &GenerationRequest,
        on_progress: Option<ProgressCallback>,
    ) -> Result<String, GenerationError> {
        let provider = self.provider.lock().await;
        provider.generate(request, on_progress).await
    }

    pub fn model_name(&self) -> &str {
        &self.model_name
    }

    pub fn provider_name(&self) -> &str {
        &self.provider_name
    }
}
