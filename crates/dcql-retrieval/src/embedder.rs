//! Local sentence embeddings with Candle and all-MiniLM-L6-v2
//!
//! MiniLM is a symmetric similarity model: queries and credential texts are embedded the
//! same way, with attention-masked mean pooling over the last hidden state, then L2
//! normalized. Model files are fetched from the HuggingFace hub on first use and cached
//! in ~/.cache/huggingface.

use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use candle_core::{DType, Device, Tensor};
use candle_nn::VarBuilder;
use candle_transformers::models::bert::{BertModel, Config, DTYPE};
use hf_hub::{api::sync::Api, Repo, RepoType};
use tokenizers::Tokenizer;
use tracing::{debug, info};

use crate::embedding::{Embedding, EmbeddingError, EmbeddingProvider};
use crate::vector::normalize;

/// Model repository on HuggingFace Hub
pub const MODEL_REPO: &str = "sentence-transformers/all-MiniLM-L6-v2";

pub const EMBEDDING_DIM: usize = 384;

struct MiniLm {
    model: BertModel,
    tokenizer: Tokenizer,
    device: Device,
}

/// Sentence embedder backed by a BERT-family model running on the CPU
#[derive(Clone)]
pub struct CandleEmbedder {
    inner: Arc<MiniLm>,
    model_name: String,
}

impl CandleEmbedder {
    pub fn new() -> Result<Self> {
        Self::with_model(MODEL_REPO)
    }

    pub fn with_model(model_name: &str) -> Result<Self> {
        info!("Loading embedding model: {}", model_name);

        let device = Device::Cpu;

        let api = Api::new().context("Failed to create HuggingFace API client")?;
        let repo = api.repo(Repo::new(model_name.to_string(), RepoType::Model));

        let config_path = repo
            .get("config.json")
            .context("Failed to download config.json")?;
        let tokenizer_path = repo
            .get("tokenizer.json")
            .context("Failed to download tokenizer.json")?;
        let weights_path = repo
            .get("model.safetensors")
            .context("Failed to download model.safetensors")?;

        let config: Config = serde_json::from_str(
            &std::fs::read_to_string(&config_path).context("Failed to read config.json")?,
        )
        .context("Failed to parse config.json")?;
        debug!("Model config: hidden_size={}", config.hidden_size);

        let tokenizer = Tokenizer::from_file(&tokenizer_path)
            .map_err(|e| anyhow::anyhow!("Failed to load tokenizer: {}", e))?;

        let vb = unsafe {
            VarBuilder::from_mmaped_safetensors(&[weights_path], DTYPE, &device)
                .context("Failed to load model weights")?
        };
        let model = BertModel::load(vb, &config).context("Failed to build BERT model")?;

        info!("Embedding model loaded ({})", model_name);

        Ok(Self {
            inner: Arc::new(MiniLm {
                model,
                tokenizer,
                device,
            }),
            model_name: model_name.to_string(),
        })
    }

    pub fn embedding_dim(&self) -> usize {
        EMBEDDING_DIM
    }

    /// Blocking batch embedding; prefer the async [`EmbeddingProvider`] impl
    pub fn embed_blocking(&self, texts: &[String]) -> Result<Vec<Embedding>> {
        self.inner.forward_batch(texts)
    }
}

impl MiniLm {
    fn forward_batch(&self, texts: &[String]) -> Result<Vec<Embedding>> {
        if texts.is_empty() {
            return Ok(vec![]);
        }

        let encodings = self
            .tokenizer
            .encode_batch(texts.to_vec(), true)
            .map_err(|e| anyhow::anyhow!("Tokenization failed: {}", e))?;

        let max_len = encodings
            .iter()
            .map(|e| e.get_ids().len())
            .max()
            .unwrap_or(0);

        let mut all_input_ids = Vec::with_capacity(texts.len() * max_len);
        let mut all_attention_mask = Vec::with_capacity(texts.len() * max_len);
        let mut all_token_type_ids = Vec::with_capacity(texts.len() * max_len);

        for encoding in &encodings {
            let mut ids = encoding.get_ids().to_vec();
            let mut attention = encoding.get_attention_mask().to_vec();
            let mut type_ids = encoding.get_type_ids().to_vec();

            ids.resize(max_len, 0);
            attention.resize(max_len, 0);
            type_ids.resize(max_len, 0);

            all_input_ids.extend(ids);
            all_attention_mask.extend(attention);
            all_token_type_ids.extend(type_ids);
        }

        let batch_size = texts.len();
        let input_ids = Tensor::from_vec(all_input_ids, (batch_size, max_len), &self.device)?;
        let attention_mask =
            Tensor::from_vec(all_attention_mask, (batch_size, max_len), &self.device)?;
        let token_type_ids =
            Tensor::from_vec(all_token_type_ids, (batch_size, max_len), &self.device)?;

        // (batch, seq, hidden)
        let output = self
            .model
            .forward(&input_ids, &token_type_ids, Some(&attention_mask))?;

        // Mean over real tokens only
        let mask = attention_mask.to_dtype(DType::F32)?.unsqueeze(2)?;
        let summed = output.broadcast_mul(&mask)?.sum(1)?;
        let counts = mask.sum(1)?.clamp(1e-9, f64::MAX)?;
        let pooled = summed.broadcast_div(&counts)?;

        Ok(pooled
            .to_vec2::<f32>()?
            .into_iter()
            .map(normalize)
            .collect())
    }
}

#[async_trait]
impl EmbeddingProvider for CandleEmbedder {
    async fn embed(&self, text: &str) -> Result<Option<Embedding>, EmbeddingError> {
        let mut batch = self.embed_batch(&[text.to_string()]).await?;
        Ok(batch.pop().flatten())
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Option<Embedding>>, EmbeddingError> {
        let inner = self.inner.clone();
        let texts = texts.to_vec();
        let vectors = tokio::task::spawn_blocking(move || inner.forward_batch(&texts))
            .await
            .map_err(|e| EmbeddingError::Provider(format!("embedding task panicked: {}", e)))?
            .map_err(|e| EmbeddingError::Provider(format!("{:#}", e)))?;
        Ok(vectors.into_iter().map(Some).collect())
    }

    fn model_name(&self) -> &str {
        &self.model_name
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vector::{cosine_similarity, l2_norm};

    #[tokio::test]
    #[ignore] // Requires model download
    async fn test_embed_single() {
        let embedder = CandleEmbedder::new().expect("Failed to load embedder");
        let embedding = embedder
            .embed("What is my passport number?")
            .await
            .unwrap()
            .unwrap();

        assert_eq!(embedding.len(), EMBEDDING_DIM);
        assert!((l2_norm(&embedding) - 1.0).abs() < 0.01);
    }

    #[tokio::test]
    #[ignore] // Requires model download
    async fn test_embed_batch() {
        let embedder = CandleEmbedder::new().expect("Failed to load embedder");
        let texts = vec![
            "driver license".to_string(),
            "passport number".to_string(),
            "university degree".to_string(),
        ];
        let embeddings = embedder.embed_batch(&texts).await.unwrap();
        assert_eq!(embeddings.len(), 3);
        assert!(embeddings.iter().all(|e| e.as_ref().map(Vec::len) == Some(EMBEDDING_DIM)));
    }

    #[test]
    #[ignore] // Requires model download
    fn test_similarity_ordering() {
        let embedder = CandleEmbedder::new().expect("Failed to load embedder");
        let vectors = embedder
            .embed_blocking(&[
                "show my driving licence".to_string(),
                "DriverLicenseCredential licenseNumber vehicleClass".to_string(),
                "UniversityDegreeCredential degreeName major".to_string(),
            ])
            .unwrap();

        let good = cosine_similarity(&vectors[0], &vectors[1]);
        let bad = cosine_similarity(&vectors[0], &vectors[2]);
        assert!(good > bad, "Expected good ({}) > bad ({})", good, bad);
    }
}
