//! Pre-compute pool embeddings into the on-disk embedding cache
//!
//! Preparing a retriever embeds every credential that is not cached yet. On a large pool
//! that is the slowest part of start-up, so this binary does it ahead of time:
//!
//!   credential pool (JSON array)
//!       ↓
//!   warm_embedding_cache (this binary, Candle MiniLM)
//!       ↓
//!   embedding cache (JSON, keyed by searchable text)
//!
//! Run with:
//!   cargo run -p dcql-retrieval --features candle --bin warm_embedding_cache -- \
//!       --pool data/vc_pool.json --cache data/embeddings.json

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use anyhow::{Context, Result};
use clap::Parser;
use dcql_retrieval::{
    CachedEmbedder, CandleEmbedder, CredentialStore, HybridRetriever, JsonFileSource,
    RetrieverConfig,
};
use tracing::info;

#[derive(Debug, Parser)]
#[command(name = "warm_embedding_cache", about = "Pre-compute credential embeddings")]
struct Args {
    /// Credential pool (JSON array of Verifiable Credentials)
    #[arg(long)]
    pool: PathBuf,

    /// Embedding cache file to refresh
    #[arg(long)]
    cache: PathBuf,

    /// HuggingFace model repository
    #[arg(long, default_value = dcql_retrieval::embedder::MODEL_REPO)]
    model: String,

    /// Re-embed everything instead of reusing cached vectors
    #[arg(long)]
    force: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt().with_env_filter("info").init();

    let args = Args::parse();
    let started = Instant::now();

    let store = CredentialStore::load(&JsonFileSource::new(&args.pool))
        .await
        .with_context(|| format!("Failed to load pool {}", args.pool.display()))?;

    let model = args.model.clone();
    let provider = tokio::task::spawn_blocking(move || CandleEmbedder::with_model(&model))
        .await
        .context("Model loading task failed")??;
    let embedder = Arc::new(CachedEmbedder::new(Arc::new(provider)));

    // Prepare loads, prunes and rewrites the cache; forced runs start from nothing.
    let cache_path = (!args.force).then_some(args.cache.as_path());
    let retriever = HybridRetriever::prepare(
        Arc::new(store),
        Some(embedder.clone()),
        cache_path,
        RetrieverConfig::default(),
    )
    .await
    .context("Failed to embed credential pool")?;

    if args.force {
        embedder
            .save_cache(&args.cache)
            .with_context(|| format!("Failed to write {}", args.cache.display()))?;
    }

    info!(
        "Cached {} embeddings for {} credentials in {:.1}s -> {}",
        embedder.cache_len(),
        retriever.store().len(),
        started.elapsed().as_secs_f64(),
        args.cache.display()
    );

    Ok(())
}
