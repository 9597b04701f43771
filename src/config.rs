//! Pipeline configuration
//!
//! Loaded from YAML. Every section has defaults, so an empty document (or a missing
//! file through [`PipelineConfig::from_env`]) gives the standard pipeline.
//!
//! ```yaml
//! credentials:
//!   pool_path: data/vc_pool.json
//! retrieval:
//!   top_k: 3
//!   weights: { semantic: 0.5, tfidf: 0.3, lexical: 0.15, type_match: 0.05 }
//!   gating: { window: 20, min_score: 0.2, min_margin: 0.07, min_results: 3 }
//!   cutoff: { window: 10, ratio: 0.8, max_results: 5 }
//! embedding:
//!   cache_path: data/embeddings.json
//! generation:
//!   max_tokens: 512
//!   ready_timeout_secs: 240
//!   prompt_style: fine_tuned
//!   endpoint:
//!     base_url: http://localhost:8080/v1
//!     model: gemma-2-2b-it-dcql
//!     api_key_env: OPENAI_API_KEY
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use dcql_agentic::llm_client::DEFAULT_MAX_TOKENS;
use dcql_agentic::openai_client::DEFAULT_BASE_URL;
use dcql_agentic::PromptStyle;
use dcql_retrieval::RetrieverConfig;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::ConfigError;

/// Environment variable naming the config file
pub const CONFIG_ENV_VAR: &str = "VC_DCQL_CONFIG";

/// Default configuration path
pub const DEFAULT_CONFIG_PATH: &str = "config/vc_dcql.yaml";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub credentials: CredentialsConfig,
    pub retrieval: RetrieverConfig,
    pub embedding: EmbeddingConfig,
    pub generation: GenerationConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CredentialsConfig {
    /// JSON array of Verifiable Credentials
    pub pool_path: PathBuf,
}

impl Default for CredentialsConfig {
    fn default() -> Self {
        Self {
            pool_path: PathBuf::from("data/vc_pool.json"),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EmbeddingConfig {
    /// Persisted pool embedding cache; no persistence when absent
    pub cache_path: Option<PathBuf>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GenerationConfig {
    pub max_tokens: usize,
    pub ready_timeout_secs: u64,
    pub ready_poll_interval_ms: u64,
    pub prompt_style: PromptStyle,
    /// OpenAI-compatible server; template-only pipeline when absent
    pub endpoint: Option<EndpointConfig>,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            max_tokens: DEFAULT_MAX_TOKENS,
            ready_timeout_secs: 240,
            ready_poll_interval_ms: 10,
            prompt_style: PromptStyle::default(),
            endpoint: None,
        }
    }
}

impl GenerationConfig {
    pub fn ready_timeout(&self) -> Duration {
        Duration::from_secs(self.ready_timeout_secs)
    }

    pub fn ready_poll_interval(&self) -> Duration {
        Duration::from_millis(self.ready_poll_interval_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EndpointConfig {
    pub base_url: String,
    pub model: String,
    /// Name of the environment variable holding the API key (not the key itself)
    pub api_key_env: Option<String>,
    pub request_timeout_secs: u64,
}

impl Default for EndpointConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            model: "gemma-2-2b-it-dcql".to_string(),
            api_key_env: None,
            request_timeout_secs: 120,
        }
    }
}

impl EndpointConfig {
    /// Resolve the API key from the configured environment variable
    pub fn api_key(&self) -> Option<String> {
        self.api_key_env
            .as_deref()
            .and_then(|var| std::env::var(var).ok())
            .filter(|key| !key.is_empty())
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

impl PipelineConfig {
    /// Load configuration from a YAML file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_yaml(&content)
    }

    /// Load configuration from a YAML string
    pub fn from_yaml(content: &str) -> Result<Self, ConfigError> {
        // An empty document deserializes as null, not as an empty mapping
        if content.trim().is_empty() {
            return Ok(Self::default());
        }
        let config: PipelineConfig = serde_yaml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Load from `$VC_DCQL_CONFIG` (default `config/vc_dcql.yaml`); defaults if the file
    /// does not exist
    pub fn from_env() -> Result<Self, ConfigError> {
        let path =
            std::env::var(CONFIG_ENV_VAR).unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string());
        if !Path::new(&path).exists() {
            info!(path = %path, "No config file, using defaults");
            return Ok(Self::default());
        }
        info!(path = %path, "Loading configuration");
        Self::from_file(&path)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let retrieval = &self.retrieval;
        if retrieval.top_k == 0 {
            return Err(invalid("retrieval.top_k", "must be at least 1"));
        }

        let weights = &retrieval.weights;
        let all_weights = [
            weights.semantic,
            weights.tfidf,
            weights.lexical,
            weights.type_match,
        ];
        if all_weights.iter().any(|w| !w.is_finite() || *w < 0.0) {
            return Err(invalid(
                "retrieval.weights",
                "weights must be finite and non-negative",
            ));
        }
        if weights.total() <= 0.0 {
            return Err(invalid("retrieval.weights", "at least one weight must be positive"));
        }

        let ratio = retrieval.cutoff.ratio;
        if !(ratio > 0.0 && ratio <= 1.0) {
            return Err(invalid(
                "retrieval.cutoff.ratio",
                &format!("{} is outside (0, 1]", ratio),
            ));
        }
        if retrieval.cutoff.window == 0 || retrieval.cutoff.max_results == 0 {
            return Err(invalid(
                "retrieval.cutoff",
                "window and max_results must be at least 1",
            ));
        }
        if retrieval.gating.window == 0 {
            return Err(invalid("retrieval.gating.window", "must be at least 1"));
        }

        if self.generation.max_tokens == 0 {
            return Err(invalid("generation.max_tokens", "must be at least 1"));
        }
        if self.generation.ready_poll_interval_ms == 0 {
            return Err(invalid(
                "generation.ready_poll_interval_ms",
                "must be at least 1",
            ));
        }
        Ok(())
    }
}

fn invalid(field: &'static str, reason: &str) -> ConfigError {
    ConfigError::Invalid {
        field,
        reason: reason.to_string(),
    }
}
