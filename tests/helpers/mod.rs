//! Shared test doubles for the pipeline integration tests
//!
//! - `ScriptedGenerator` returns canned text (or an error) and records prompts
//! - `InstantLoader` / `StuckLoader` drive the model lifecycle
//! - `KeywordEmbedder` produces tiny deterministic embeddings and counts calls

#![allow(dead_code)]

use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use vc_dcql::agentic::{
    GenerationError, GenerationProvider, GenerationRequest, ModelLifecycle, ModelLoader,
    ProgressCallback,
};
use vc_dcql::retrieval::{
    parse_pool, Embedding, EmbeddingError, EmbeddingProvider, StaticSource, VerifiableCredential,
};
use vc_dcql::{DcqlPipeline, PipelineConfig};

pub fn fixture_path(name: &str) -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join("tests")
        .join("fixtures")
        .join(name)
}

pub fn fixture_pool() -> Vec<VerifiableCredential> {
    let path = fixture_path("vc_pool.json");
    let json = std::fs::read_to_string(&path).unwrap();
    parse_pool(&json, &path.display().to_string()).unwrap()
}

/// One driver's license and one passport, nothing else
pub fn license_and_passport() -> Vec<VerifiableCredential> {
    fixture_pool()
        .into_iter()
        .filter(|vc| {
            matches!(
                vc.most_specific_type(),
                Some("DriverLicenseCredential") | Some("PassportCredential")
            )
        })
        .collect()
}

pub fn static_source(credentials: Vec<VerifiableCredential>) -> Arc<StaticSource> {
    Arc::new(StaticSource::new(credentials))
}

// ---------------------------------------------------------------------------
// Generation
// ---------------------------------------------------------------------------

pub enum Script {
    Reply(String),
    Fail(String),
}

pub struct ScriptedGenerator {
    script: Script,
    prompts: Mutex<Vec<String>>,
}

impl ScriptedGenerator {
    pub fn reply(text: &str) -> Arc<Self> {
        Arc::new(Self {
            script: Script::Reply(text.to_string()),
            prompts: Mutex::new(Vec::new()),
        })
    }

    pub fn failing(message: &str) -> Arc<Self> {
        Arc::new(Self {
            script: Script::Fail(message.to_string()),
            prompts: Mutex::new(Vec::new()),
        })
    }

    pub fn prompts(&self) -> Vec<String> {
        self.prompts.lock().unwrap().clone()
    }
}

#[async_trait]
impl GenerationProvider for ScriptedGenerator {
    async fn generate(
        &self,
        request: &GenerationRequest,
        on_progress: Option<ProgressCallback>,
    ) -> Result<String, GenerationError> {
        self.prompts.lock().unwrap().push(request.prompt.clone());
        match &self.script {
            Script::Reply(text) => {
                if let Some(cb) = on_progress {
                    // Two partial updates, like a streaming runtime
                    let half = text.chars().count() / 2;
                    cb(&text.chars().take(half).collect::<String>());
                    cb(text);
                }
                Ok(text.clone())
            }
            Script::Fail(message) => Err(GenerationError::Request(message.clone())),
        }
    }

    fn model_name(&self) -> &str {
        "scripted"
    }

    fn provider_name(&self) -> &str {
        "test"
    }
}

// ---------------------------------------------------------------------------
// Model loaders
// ---------------------------------------------------------------------------

/// Cached model that loads immediately
pub struct InstantLoader {
    provider: Arc<dyn GenerationProvider>,
    pub loads: AtomicUsize,
}

impl InstantLoader {
    pub fn new(provider: Arc<dyn GenerationProvider>) -> Arc<Self> {
        Arc::new(Self {
            provider,
            loads: AtomicUsize::new(0),
        })
    }
}

#[async_trait]
impl ModelLoader for InstantLoader {
    async fn is_cached(&self) -> bool {
        true
    }

    async fn download(&self) -> anyhow::Result<()> {
        Ok(())
    }

    async fn load(&self) -> anyhow::Result<Arc<dyn GenerationProvider>> {
        self.loads.fetch_add(1, Ordering::SeqCst);
        Ok(self.provider.clone())
    }

    fn describe(&self) -> String {
        "instant".to_string()
    }
}

/// Model whose load never finishes
pub struct StuckLoader;

#[async_trait]
impl ModelLoader for StuckLoader {
    async fn is_cached(&self) -> bool {
        true
    }

    async fn download(&self) -> anyhow::Result<()> {
        Ok(())
    }

    async fn load(&self) -> anyhow::Result<Arc<dyn GenerationProvider>> {
        std::future::pending().await
    }

    fn describe(&self) -> String {
        "stuck".to_string()
    }
}

// ---------------------------------------------------------------------------
// Embeddings
// ---------------------------------------------------------------------------

const KEYWORDS: [&str; 6] = [
    "driver", "passport", "degree", "employ", "vaccin", "insurance",
];

/// One dimension per keyword family plus a constant bias dimension
pub struct KeywordEmbedder {
    pub calls: AtomicUsize,
}

impl KeywordEmbedder {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            calls: AtomicUsize::new(0),
        })
    }
}

#[async_trait]
impl EmbeddingProvider for KeywordEmbedder {
    async fn embed(&self, text: &str) -> Result<Option<Embedding>, EmbeddingError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let lower = text.to_lowercase();
        let mut vector: Embedding = KEYWORDS
            .iter()
            .map(|k| if lower.contains(k) { 1.0 } else { 0.0 })
            .collect();
        vector.push(0.05);
        Ok(Some(vector))
    }

    fn model_name(&self) -> &str {
        "keywords"
    }
}

// ---------------------------------------------------------------------------
// Pipelines
// ---------------------------------------------------------------------------

pub fn config() -> PipelineConfig {
    let mut config = PipelineConfig::default();
    config.embedding.cache_path = None;
    config.generation.ready_poll_interval_ms = 1;
    config
}

pub fn lifecycle_with(provider: Arc<dyn GenerationProvider>) -> Arc<ModelLifecycle> {
    Arc::new(
        ModelLifecycle::new(InstantLoader::new(provider)).with_poll_interval(Duration::from_millis(1)),
    )
}

/// Pipeline over `credentials` whose model is already `ready`
pub async fn ready_pipeline(
    credentials: Vec<VerifiableCredential>,
    provider: Arc<dyn GenerationProvider>,
) -> DcqlPipeline {
    let pipeline = DcqlPipeline::new(static_source(credentials), lifecycle_with(provider), &config());
    pipeline.ensure_model_loaded().await.unwrap();
    pipeline
}
