//! Request orchestration: retrieve → prompt → generate → validate → (fallback)
//!
//! A [`DcqlPipeline`] is constructed once at start-up and shared by reference. Pool
//! preparation happens once (lazily or through [`DcqlPipeline::prepare`]); after that
//! retrieval is read-only and runs concurrently, while generation is serialized by the
//! model's [`ExclusiveGenerator`](dcql_agentic::ExclusiveGenerator).

use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use dcql_agentic::{
    template, validate, DcqlQuery, GenerationRequest, LifecycleError, ModelLifecycle,
    ModelState, OpenAiCompatibleClient, ProgressCallback, PromptStyle, RemoteModelLoader,
    ValidationError,
};
use dcql_retrieval::{
    CachedEmbedder, CredentialSource, CredentialStore, HybridRetriever, JsonFileSource,
    RetrievalResult, RetrieverConfig, ScoredCredential, VerifiableCredential,
};
use tokio::sync::OnceCell;
use tracing::{debug, info, instrument, warn};

use crate::config::{GenerationConfig, PipelineConfig};
use crate::error::{PipelineError, Result};

/// Which path produced the query
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GenerationSource {
    ModelGenerated,
    TemplateFallback,
}

impl fmt::Display for GenerationSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GenerationSource::ModelGenerated => write!(f, "model-generated"),
            GenerationSource::TemplateFallback => write!(f, "template-fallback"),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct GenerationTimings {
    pub retrieval: Duration,
    /// Zero when no generator ran
    pub generation: Duration,
    pub total: Duration,
}

/// A schema-valid DCQL query and how it was obtained
#[derive(Debug, Clone)]
pub struct GenerationOutcome {
    pub query: DcqlQuery,
    /// Compact JSON of `query`
    pub canonical_json: String,
    /// Generator text, `None` when no generator ran
    pub raw_text: Option<String>,
    pub source: GenerationSource,
    /// Why the generator output was rejected, for template fallbacks after a generation
    pub validation_error: Option<ValidationError>,
    /// Credentials shown to the generator, best first
    pub selected: Vec<ScoredCredential>,
    pub timings: GenerationTimings,
}

impl GenerationOutcome {
    pub fn is_fallback(&self) -> bool {
        self.source == GenerationSource::TemplateFallback
    }

    /// Indented JSON for display
    pub fn pretty_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(&self.query)?)
    }
}

pub struct DcqlPipeline {
    source: Arc<dyn CredentialSource>,
    embedder: Option<Arc<CachedEmbedder>>,
    cache_path: Option<PathBuf>,
    retrieval: RetrieverConfig,
    generation: GenerationConfig,
    /// `None` for template-only pipelines
    lifecycle: Option<Arc<ModelLifecycle>>,
    retriever: OnceCell<Arc<HybridRetriever>>,
}

impl DcqlPipeline {
    pub fn new(
        source: Arc<dyn CredentialSource>,
        lifecycle: Arc<ModelLifecycle>,
        config: &PipelineConfig,
    ) -> Self {
        Self {
            lifecycle: Some(lifecycle),
            ..Self::template_only(source, config)
        }
    }

    /// A pipeline without a generator; every query comes from the template fallback
    pub fn template_only(source: Arc<dyn CredentialSource>, config: &PipelineConfig) -> Self {
        Self {
            source,
            embedder: None,
            cache_path: config.embedding.cache_path.clone(),
            retrieval: config.retrieval.clone(),
            generation: config.generation.clone(),
            lifecycle: None,
            retriever: OnceCell::new(),
        }
    }

    /// Wire up the pool file and, if an endpoint is configured, an OpenAI-compatible
    /// generator. The model is not loaded yet; call [`load_model`](Self::load_model).
    pub fn from_config(config: &PipelineConfig) -> Result<Self> {
        config.validate()?;
        let source: Arc<dyn CredentialSource> =
            Arc::new(JsonFileSource::new(&config.credentials.pool_path));

        let Some(endpoint) = &config.generation.endpoint else {
            info!("No generation endpoint configured, template-only pipeline");
            return Ok(Self::template_only(source, config));
        };

        let client = OpenAiCompatibleClient::with_timeout(
            &endpoint.base_url,
            &endpoint.model,
            endpoint.api_key(),
            endpoint.request_timeout(),
        )
        .map_err(|e| PipelineError::GenerationFailed(format!("{:#}", e)))?;
        let lifecycle = ModelLifecycle::new(Arc::new(RemoteModelLoader::new(client)))
            .with_poll_interval(config.generation.ready_poll_interval());

        Ok(Self::new(source, Arc::new(lifecycle), config))
    }

    /// Enable the semantic signal
    pub fn with_embedder(mut self, embedder: Arc<CachedEmbedder>) -> Self {
        self.embedder = Some(embedder);
        self
    }

    pub fn with_prompt_style(mut self, style: PromptStyle) -> Self {
        self.generation.prompt_style = style;
        self
    }

    pub fn is_prepared(&self) -> bool {
        self.retriever.initialized()
    }

    /// Load the pool and build the indices. Safe to call repeatedly and concurrently;
    /// only the first call does any work.
    pub async fn prepare(&self) -> Result<()> {
        if self.is_prepared() {
            info!("Credential pool already prepared");
            return Ok(());
        }
        self.prepared().await.map(|_| ())
    }

    async fn prepared(&self) -> Result<&Arc<HybridRetriever>> {
        self.retriever
            .get_or_try_init(|| async {
                let started = Instant::now();
                let store = CredentialStore::load(self.source.as_ref()).await?;
                let retriever = HybridRetriever::prepare(
                    Arc::new(store),
                    self.embedder.clone(),
                    self.cache_path.as_deref(),
                    self.retrieval.clone(),
                )
                .await?;
                info!(
                    "Pool prepared in {}ms ({} credentials, semantic signal: {})",
                    started.elapsed().as_millis(),
                    retriever.store().len(),
                    retriever.has_embeddings()
                );
                Ok::<_, PipelineError>(Arc::new(retriever))
            })
            .await
    }

    /// Rank the pool for `query`, preparing it first if needed
    pub async fn retrieve(&self, query: &str, top_k: usize) -> Result<RetrievalResult> {
        let retriever = self.prepared().await?;
        Ok(retriever.retrieve(query, top_k).await)
    }

    /// Turn `query` into a schema-valid DCQL query.
    ///
    /// Fails with `ModelNotLoaded` unless the model is ready (template-only pipelines skip
    /// that check), with `NoRelevantCredentialsFound` on an empty retrieval, and with
    /// `GenerationFailed` if the generator itself errors. Unusable generator output is
    /// replaced by the template fallback.
    #[instrument(skip(self, on_progress))]
    pub async fn generate(
        &self,
        query: &str,
        on_progress: Option<ProgressCallback>,
    ) -> Result<GenerationOutcome> {
        let started = Instant::now();

        let generator = match &self.lifecycle {
            Some(lifecycle) => Some(lifecycle.generator()?),
            None => None,
        };

        let retrieval_started = Instant::now();
        let retrieval = self.retrieve(query, self.retrieval.top_k).await?;
        let retrieval_time = retrieval_started.elapsed();
        if retrieval.is_empty() {
            warn!("No credentials retrieved");
            return Err(PipelineError::NoRelevantCredentialsFound);
        }
        debug!(
            mode = %retrieval.mode,
            selected = ?retrieval.ids(),
            "Retrieved {} credentials",
            retrieval.len()
        );

        let selected: Vec<&VerifiableCredential> =
            retrieval.entries.iter().map(|e| e.credential.as_ref()).collect();

        let Some(generator) = generator else {
            let query_obj = template::generate(selected.iter().copied(), query)?;
            return self.finish(
                query_obj,
                None,
                GenerationSource::TemplateFallback,
                None,
                retrieval,
                GenerationTimings {
                    retrieval: retrieval_time,
                    generation: Duration::ZERO,
                    total: started.elapsed(),
                },
            );
        };

        let formatted = dcql_agentic::format_credentials(selected.iter().copied())?;
        let prompt = self.generation.prompt_style.render(&formatted, query);
        let request = GenerationRequest::new(prompt).with_max_tokens(self.generation.max_tokens);

        let generation_started = Instant::now();
        let raw = generator
            .generate(&request, on_progress)
            .await
            .map_err(|e| PipelineError::GenerationFailed(e.to_string()))?;
        let generation_time = generation_started.elapsed();
        debug!(
            model = generator.model_name(),
            "Generated {} chars in {}ms",
            raw.len(),
            generation_time.as_millis()
        );

        let (query_obj, source, validation_error) = match validate(&raw) {
            Ok(parsed) => (parsed, GenerationSource::ModelGenerated, None),
            Err(e) => {
                warn!(
                    reason = %e,
                    kind = e.kind(),
                    raw = %e.raw_text(),
                    "Generator output rejected, using template fallback"
                );
                let fallback = template::generate(selected.iter().copied(), query)?;
                (fallback, GenerationSource::TemplateFallback, Some(e))
            }
        };

        self.finish(
            query_obj,
            Some(raw),
            source,
            validation_error,
            retrieval,
            GenerationTimings {
                retrieval: retrieval_time,
                generation: generation_time,
                total: started.elapsed(),
            },
        )
    }

    fn finish(
        &self,
        query: DcqlQuery,
        raw_text: Option<String>,
        source: GenerationSource,
        validation_error: Option<ValidationError>,
        retrieval: RetrievalResult,
        timings: GenerationTimings,
    ) -> Result<GenerationOutcome> {
        let canonical_json = query.to_canonical_json()?;
        info!(
            source = %source,
            retrieval_ms = timings.retrieval.as_millis() as u64,
            generation_ms = timings.generation.as_millis() as u64,
            total_ms = timings.total.as_millis() as u64,
            "DCQL ready"
        );
        Ok(GenerationOutcome {
            query,
            canonical_json,
            raw_text,
            source,
            validation_error,
            selected: retrieval.entries,
            timings,
        })
    }

    /// Look up a pool credential by id, e.g. the one the holder picked for signing
    pub async fn credential(&self, id: &str) -> Result<Option<Arc<VerifiableCredential>>> {
        let retriever = self.prepared().await?;
        Ok(retriever.store().get(id).cloned())
    }

    /// `VC <n>: ...` lines for a retrieval result, as shown to the generator
    pub fn format_credentials(&self, result: &RetrievalResult) -> Result<String> {
        Ok(dcql_agentic::format_credentials(
            result.entries.iter().map(|e| e.credential.as_ref()),
        )?)
    }

    // ------------------------------------------------------------------------
    // Model lifecycle
    // ------------------------------------------------------------------------

    pub fn lifecycle(&self) -> Option<&Arc<ModelLifecycle>> {
        self.lifecycle.as_ref()
    }

    /// `None` for template-only pipelines
    pub fn model_state(&self) -> Option<ModelState> {
        self.lifecycle.as_ref().map(|l| l.state())
    }

    /// Start loading the model; `false` if a load is already in flight or there is no model
    pub fn load_model(&self) -> bool {
        self.lifecycle.as_ref().is_some_and(|l| l.load_model())
    }

    pub fn reset_model(&self) {
        if let Some(lifecycle) = &self.lifecycle {
            lifecycle.reset_model();
        }
    }

    /// Load if needed and wait up to the configured timeout for the model
    pub async fn ensure_model_loaded(&self) -> Result<()> {
        match &self.lifecycle {
            Some(lifecycle) => Ok(lifecycle
                .ensure_loaded(self.generation.ready_timeout())
                .await?),
            None => Err(PipelineError::ModelNotLoaded(LifecycleError::NotReady(
                ModelState::Failed("no generation model configured".to_string()),
            ))),
        }
    }
}
