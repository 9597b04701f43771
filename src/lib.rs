//! Natural language to DCQL
//!
//! Turns a request like "show my driver's license but hide the ID number" into a DCQL
//! query against the credentials a wallet holds.
//!
//! ## Architecture
//!
//! ```text
//! query ─► HybridRetriever ─► PromptStyle ─► GenerationProvider ─► validate ─► DcqlQuery
//!            (dcql-retrieval)     (dcql-agentic)                      │
//!                                                                     └─ rejected ─► template
//! ```
//!
//! [`ModelLifecycle`](dcql_agentic::ModelLifecycle) gates generation: a request made while
//! the model is not `ready` fails with [`PipelineError::ModelNotLoaded`].
//!
//! ## Quick start
//!
//! ```ignore
//! let config = PipelineConfig::from_env()?;
//! let pipeline = DcqlPipeline::from_config(&config)?;
//! pipeline.prepare().await?;
//! pipeline.ensure_model_loaded().await?;
//! let outcome = pipeline.generate("What is my passport number?", None).await?;
//! println!("{}", outcome.canonical_json);
//! ```

pub mod config;
pub mod error;
pub mod pipeline;

pub use config::PipelineConfig;
pub use error::{ConfigError, PipelineError};
pub use pipeline::{DcqlPipeline, GenerationOutcome, GenerationSource, GenerationTimings};

// Re-export the building blocks so applications need a single dependency
pub use dcql_agentic as agentic;
pub use dcql_retrieval as retrieval;
