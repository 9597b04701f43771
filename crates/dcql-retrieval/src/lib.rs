//! Verifiable Credential retrieval
//!
//! Ranks a local pool of Verifiable Credentials against a natural-language request so
//! only the few relevant credentials are shown to the DCQL generator.
//!
//! # Architecture
//!
//! ```text
//! Natural-language query
//!       │
//!       ▼
//! ┌─────────────────────────────────────────┐
//! │  Query signals                          │
//! │  tokens (uni/bigrams) + embedding       │
//! │  (embedding is never cached)            │
//! └─────────────────────────────────────────┘
//!       │
//!       ▼
//! ┌─────────────────────────────────────────┐
//! │  Hybrid score per pool credential       │
//! │  0.50 semantic + 0.30 tf-idf            │
//! │  + 0.15 lexical + 0.05 type match       │
//! └─────────────────────────────────────────┘
//!       │
//!       ├─── no signal ──────────► first top_k in pool order
//!       │
//!       ├─── dominant type ──────► that type only
//!       │
//!       ▼
//! ┌─────────────────────────────────────────┐
//! │  Proportional cutoff (≥ 80% of best)    │
//! └─────────────────────────────────────────┘
//! ```
//!
//! Pool embeddings go through [`CachedEmbedder`], which can persist them as JSON so a
//! restart only embeds credentials added since the last run.

pub mod embedding;
pub mod lexical;
pub mod retriever;
pub mod store;
pub mod tokenize;
pub mod types;
pub mod vector;

#[cfg(feature = "candle")]
pub mod embedder;

pub use embedding::{CachedEmbedder, Embedding, EmbeddingError, EmbeddingIndex, EmbeddingProvider};
pub use lexical::LexicalIndex;
pub use retriever::{CutoffConfig, GatingConfig, HybridRetriever, RetrieverConfig, ScoreWeights};
pub use store::{
    parse_pool, CredentialSource, CredentialStore, JsonFileSource, StaticSource, StoreError,
};
pub use types::*;

#[cfg(feature = "candle")]
pub use embedder::CandleEmbedder;
