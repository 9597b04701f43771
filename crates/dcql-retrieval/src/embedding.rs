//! Embedding provider seam, the text-keyed embedding cache and the per-pool index

use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::Path;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use async_trait::async_trait;
use thiserror::Error;
use tracing::{debug, info};

use crate::vector::cosine_similarity;

pub type Embedding = Vec<f32>;

#[derive(Debug, Error)]
pub enum EmbeddingError {
    #[error("Embedding provider failed: {0}")]
    Provider(String),

    #[error("Embedding dimension mismatch for {context}: expected {expected}, got {found}")]
    DimensionMismatch {
        expected: usize,
        found: usize,
        context: String,
    },

    #[error("Embedding batch returned {received} vectors for {sent} texts")]
    BatchSize { sent: usize, received: usize },

    #[error("Embedding cache I/O error: {0}")]
    CacheIo(#[from] std::io::Error),

    #[error("Embedding cache format error: {0}")]
    CacheFormat(#[from] serde_json::Error),
}

/// Maps text to a fixed-dimension vector.
///
/// `Ok(None)` means "no semantic signal for this text" (e.g. the model rejected it); the
/// retriever then scores that text on lexical signals only.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    async fn embed(&self, text: &str) -> Result<Option<Embedding>, EmbeddingError>;

    /// Providers with a real batch path should override this
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Option<Embedding>>, EmbeddingError> {
        let mut out = Vec::with_capacity(texts.len());
        for text in texts {
            out.push(self.embed(text).await?);
        }
        Ok(out)
    }

    fn model_name(&self) -> &str {
        "unknown"
    }
}

/// Embedding provider with a text-keyed cache that can be persisted as JSON.
///
/// Pool texts go through the cache; one-off query texts are embedded with
/// `use_cache = false` so the persisted cache only ever holds pool content.
pub struct CachedEmbedder {
    provider: Arc<dyn EmbeddingProvider>,
    cache: RwLock<HashMap<String, Embedding>>,
}

impl CachedEmbedder {
    pub fn new(provider: Arc<dyn EmbeddingProvider>) -> Self {
        Self {
            provider,
            cache: RwLock::new(HashMap::new()),
        }
    }

    pub fn provider(&self) -> &Arc<dyn EmbeddingProvider> {
        &self.provider
    }

    fn read_cache(&self) -> RwLockReadGuard<'_, HashMap<String, Embedding>> {
        self.cache.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write_cache(&self) -> RwLockWriteGuard<'_, HashMap<String, Embedding>> {
        self.cache.write().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn cache_len(&self) -> usize {
        self.read_cache().len()
    }

    pub fn is_cached(&self, text: &str) -> bool {
        self.read_cache().contains_key(text)
    }

    pub async fn embed(
        &self,
        text: &str,
        use_cache: bool,
    ) -> Result<Option<Embedding>, EmbeddingError> {
        if use_cache {
            if let Some(hit) = self.read_cache().get(text) {
                return Ok(Some(hit.clone()));
            }
        }

        let embedding = self.provider.embed(text).await?.filter(|e| !e.is_empty());
        if use_cache {
            if let Some(e) = &embedding {
                self.write_cache().insert(text.to_string(), e.clone());
            }
        }
        Ok(embedding)
    }

    /// Embed many texts, sending only cache misses to the provider
    pub async fn embed_batch(
        &self,
        texts: &[String],
        use_cache: bool,
    ) -> Result<Vec<Option<Embedding>>, EmbeddingError> {
        let mut results: Vec<Option<Embedding>> = vec![None; texts.len()];
        let mut misses: Vec<usize> = Vec::new();

        {
            let cache = self.read_cache();
            for (i, text) in texts.iter().enumerate() {
                match cache.get(text).filter(|_| use_cache) {
                    Some(hit) => results[i] = Some(hit.clone()),
                    None => misses.push(i),
                }
            }
        }

        if misses.is_empty() {
            return Ok(results);
        }

        let pending: Vec<String> = misses.iter().map(|&i| texts[i].clone()).collect();
        let embedded = self.provider.embed_batch(&pending).await?;
        if embedded.len() != pending.len() {
            return Err(EmbeddingError::BatchSize {
                sent: pending.len(),
                received: embedded.len(),
            });
        }

        let mut cache = self.write_cache();
        for (idx, embedding) in misses.into_iter().zip(embedded) {
            let embedding = embedding.filter(|e| !e.is_empty());
            if use_cache {
                if let Some(e) = &embedding {
                    cache.insert(texts[idx].clone(), e.clone());
                }
            }
            results[idx] = embedding;
        }

        Ok(results)
    }

    /// Merge entries from a JSON cache file; entries already in memory win.
    /// A missing file is not an error.
    pub fn load_cache(&self, path: &Path) -> Result<usize, EmbeddingError> {
        if !path.exists() {
            debug!("No embedding cache at {}", path.display());
            return Ok(0);
        }
        let content = std::fs::read_to_string(path)?;
        let stored: HashMap<String, Embedding> = serde_json::from_str(&content)?;

        let mut cache = self.write_cache();
        let mut added = 0;
        for (text, embedding) in stored {
            if !cache.contains_key(&text) {
                cache.insert(text, embedding);
                added += 1;
            }
        }
        info!("Loaded {} cached embeddings from {}", added, path.display());
        Ok(added)
    }

    /// Write the cache as a JSON object keyed by text
    pub fn save_cache(&self, path: &Path) -> Result<(), EmbeddingError> {
        let snapshot: BTreeMap<String, Embedding> = self
            .read_cache()
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, serde_json::to_string(&snapshot)?)?;
        debug!("Saved {} embeddings to {}", snapshot.len(), path.display());
        Ok(())
    }

    /// Drop cached texts not in `keep`; returns how many were removed
    pub fn retain_cache(&self, keep: &HashSet<&str>) -> usize {
        let mut cache = self.write_cache();
        let before = cache.len();
        cache.retain(|text, _| keep.contains(text.as_str()));
        before - cache.len()
    }

    pub fn clear_cache(&self) {
        self.write_cache().clear();
    }
}

/// Pool embeddings addressed by store position
#[derive(Debug, Clone, Default)]
pub struct EmbeddingIndex {
    vectors: Vec<Option<Embedding>>,
    dimension: Option<usize>,
}

impl EmbeddingIndex {
    /// An index with no semantic signal for any of `len` documents
    pub fn unavailable(len: usize) -> Self {
        Self {
            vectors: vec![None; len],
            dimension: None,
        }
    }

    /// Embed every text through the cache. All vectors must share one dimension.
    pub async fn build(embedder: &CachedEmbedder, texts: &[String]) -> Result<Self, EmbeddingError> {
        let vectors = embedder.embed_batch(texts, true).await?;
        Self::from_vectors(vectors)
    }

    pub fn from_vectors(vectors: Vec<Option<Embedding>>) -> Result<Self, EmbeddingError> {
        let mut dimension = None;
        for (i, v) in vectors.iter().enumerate() {
            let Some(v) = v else { continue };
            match dimension {
                None => dimension = Some(v.len()),
                Some(expected) if expected != v.len() => {
                    return Err(EmbeddingError::DimensionMismatch {
                        expected,
                        found: v.len(),
                        context: format!("pool document #{}", i),
                    })
                }
                Some(_) => {}
            }
        }
        Ok(Self { vectors, dimension })
    }

    pub fn len(&self) -> usize {
        self.vectors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vectors.is_empty()
    }

    pub fn dimension(&self) -> Option<usize> {
        self.dimension
    }

    pub fn embedded_count(&self) -> usize {
        self.vectors.iter().filter(|v| v.is_some()).count()
    }

    pub fn get(&self, doc: usize) -> Option<&[f32]> {
        self.vectors.get(doc).and_then(|v| v.as_deref())
    }

    /// Cosine similarity clamped to [0, 1]; 0 when the document has no vector
    pub fn similarity(&self, query: &[f32], doc: usize) -> f64 {
        match self.get(doc) {
            Some(v) => cosine_similarity(query, v).clamp(0.0, 1.0),
            None => 0.0,
        }
    }
}
