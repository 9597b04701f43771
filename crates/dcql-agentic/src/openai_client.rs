//! OpenAI-compatible Client
//!
//! Generation provider for any server exposing `/chat/completions` in the OpenAI shape
//! (llama.cpp server, vLLM, Ollama, OpenAI itself), plus a model loader that treats
//! "model ready" as "the server answers `/models`".

use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use serde::Deserialize;
use tracing::{debug, info};

use crate::lifecycle::ModelLoader;
use crate::llm_client::{
    GenerationError, GenerationProvider, GenerationRequest, ProgressCallback,
};

/// Default server base URL (a local llama.cpp server)
pub const DEFAULT_BASE_URL: &str = "http://localhost:8080/v1";

/// Default model name
const DEFAULT_MODEL: &str = "gemma-2-2b-it-dcql";

/// Low temperature: DCQL output should be as close to deterministic as the server allows
const TEMPERATURE: f64 = 0.1;

const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(120);

/// Client for an OpenAI-style chat completions endpoint
#[derive(Clone)]
pub struct OpenAiCompatibleClient {
    api_key: Option<String>,
    client: reqwest::Client,
    base_url: String,
    model: String,
}

impl OpenAiCompatibleClient {
    pub fn new(base_url: &str, model: &str, api_key: Option<String>) -> Result<Self> {
        Self::with_timeout(base_url, model, api_key, DEFAULT_REQUEST_TIMEOUT)
    }

    pub fn with_timeout(
        base_url: &str,
        model: &str,
        api_key: Option<String>,
        timeout: Duration,
    ) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context("Failed to build HTTP client")?;
        Ok(Self {
            api_key,
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            model: model.to_string(),
        })
    }

    /// Create from `OPENAI_BASE_URL`, `OPENAI_MODEL` and `OPENAI_API_KEY` (all optional)
    pub fn from_env() -> Result<Self> {
        let base_url =
            std::env::var("OPENAI_BASE_URL").unwrap_or_else(|_| DEFAULT_BASE_URL.to_string());
        let model = std::env::var("OPENAI_MODEL").unwrap_or_else(|_| DEFAULT_MODEL.to_string());
        let api_key = std::env::var("OPENAI_API_KEY").ok();
        Self::new(&base_url, &model, api_key)
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn authorized(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.api_key {
            Some(key) => request.header("Authorization", format!("Bearer {}", key)),
            None => request,
        }
    }

    /// Check the server is reachable and serving models
    pub async fn probe(&self) -> Result<()> {
        let response = self
            .authorized(self.client.get(format!("{}/models", self.base_url)))
            .send()
            .await
            .with_context(|| format!("Generation server {} unreachable", self.base_url))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(anyhow!("Model listing failed {}: {}", status, body));
        }
        Ok(())
    }

    async fn call_api(&self, request: &GenerationRequest) -> Result<String, GenerationError> {
        let body = serde_json::json!({
            "model": &self.model,
            "messages": [
                {"role": "user", "content": &request.prompt}
            ],
            "max_tokens": request.max_tokens,
            "temperature": TEMPERATURE
        });

        let response = self
            .authorized(
                self.client
                    .post(format!("{}/chat/completions", self.base_url))
                    .header("Content-Type", "application/json"),
            )
            .json(&body)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(GenerationError::Api { status, body });
        }

        #[derive(Deserialize)]
        struct Message {
            content: Option<String>,
        }
        #[derive(Deserialize)]
        struct Choice {
            message: Message,
        }
        #[derive(Deserialize)]
        struct ApiResponse {
            choices: Vec<Choice>,
        }

        let api_response: ApiResponse = response.json().await?;
        api_response
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .filter(|text| !text.is_empty())
            .ok_or(GenerationError::EmptyResponse)
    }
}

#[async_trait]
impl GenerationProvider for OpenAiCompatibleClient {
    async fn generate(
        &self,
        request: &GenerationRequest,
        on_progress: Option<ProgressCallback>,
    ) -> Result<String, GenerationError> {
        let text = self.call_api(request).await?;
        debug!(
            "Generator raw response: {}",
            text.chars().take(1000).collect::<String>()
        );
        // Non-streaming: the callback sees the complete text once
        if let Some(cb) = on_progress {
            cb(&text);
        }
        Ok(text)
    }

    fn model_name(&self) -> &str {
        &self.model
    }

    fn provider_name(&self) -> &str {
        "openai-compatible"
    }
}

/// Loader for a model hosted behind an OpenAI-compatible server.
///
/// There is nothing to download locally; loading succeeds once the server lists models.
pub struct RemoteModelLoader {
    client: OpenAiCompatibleClient,
}

impl RemoteModelLoader {
    pub fn new(client: OpenAiCompatibleClient) -> Self {
        Self { client }
    }
}

#[async_trait]
impl ModelLoader for RemoteModelLoader {
    async fn is_cached(&self) -> bool {
        true
    }

    async fn download(&self) -> Result<()> {
        Ok(())
    }

    async fn load(&self) -> Result<Arc<dyn GenerationProvider>> {
        self.client.probe().await?;
        info!(
            "Generation server ready: {} ({})",
            self.client.base_url(),
            self.client.model_name()
        );
        Ok(Arc::new(self.client.clone()))
    }

    fn describe(&self) -> String {
        format!("{} @ {}", self.client.model_name(), self.client.base_url())
    }
}
