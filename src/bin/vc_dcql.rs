//! Command-line driver for the DCQL pipeline
//!
//! Run with:
//!   cargo run --bin vc_dcql -- "Show my driver's license"
//!   VC_DCQL_CONFIG=config/vc_dcql.yaml cargo run --bin vc_dcql -- --retrieve-only "passport"

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use vc_dcql::{DcqlPipeline, PipelineConfig};

#[derive(Debug, Parser)]
#[command(name = "vc_dcql", about = "Generate a DCQL query from natural language")]
struct Args {
    /// Natural-language request
    query: String,

    /// Config file (defaults to $VC_DCQL_CONFIG or config/vc_dcql.yaml)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Override the credential pool path
    #[arg(long)]
    pool: Option<PathBuf>,

    /// Only print the ranked credentials
    #[arg(long)]
    retrieve_only: bool,

    /// Embed with the local Candle model
    #[cfg(feature = "candle")]
    #[arg(long)]
    semantic: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "vc_dcql=info,dcql_retrieval=info,dcql_agentic=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => PipelineConfig::from_file(path)
            .with_context(|| format!("Failed to load config {}", path.display()))?,
        None => PipelineConfig::from_env()?,
    };
    if let Some(pool) = args.pool.clone() {
        config.credentials.pool_path = pool;
    }

    #[allow(unused_mut)]
    let mut pipeline = DcqlPipeline::from_config(&config)?;

    #[cfg(feature = "candle")]
    if args.semantic {
        let provider = tokio::task::spawn_blocking(vc_dcql::retrieval::CandleEmbedder::new)
            .await
            .context("Model loading task failed")??;
        pipeline = pipeline.with_embedder(Arc::new(vc_dcql::retrieval::CachedEmbedder::new(
            Arc::new(provider),
        )));
    }

    pipeline.prepare().await?;

    if args.retrieve_only {
        let result = pipeline.retrieve(&args.query, config.retrieval.top_k).await?;
        println!("selection: {}", result.mode);
        for entry in &result.entries {
            println!(
                "{:.4}  {}  {}",
                entry.score,
                entry.credential.primary_type(),
                entry.credential.id
            );
        }
        return Ok(());
    }

    if pipeline.lifecycle().is_some() {
        pipeline
            .ensure_model_loaded()
            .await
            .context("Generation model did not become ready")?;
    }

    let progress: vc_dcql::agentic::ProgressCallback = Arc::new(|text: &str| {
        tracing::debug!(chars = text.len(), "Generation progress");
    });
    let outcome = pipeline.generate(&args.query, Some(progress)).await?;

    eprintln!(
        "[{}] retrieval {}ms, generation {}ms, total {}ms",
        outcome.source,
        outcome.timings.retrieval.as_millis(),
        outcome.timings.generation.as_millis(),
        outcome.timings.total.as_millis()
    );
    println!("{}", outcome.pretty_json()?);

    Ok(())
}
