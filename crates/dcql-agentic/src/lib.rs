//! Constrained DCQL generation
//!
//! Turns a natural-language request plus a handful of retrieved credentials into a
//! structurally valid DCQL query. It has no ranking logic; retrieval stays in
//! `dcql-retrieval`.
//!
//! ## Architecture
//!
//! ```text
//! Credentials + request → Prompt → Generator → Validator ──ok──► DcqlQuery
//!                                                  │
//!                                                  └─reject──► Template fallback
//! ```
//!
//! ## Generators
//!
//! Any [`GenerationProvider`] can serve a [`ModelLifecycle`] through a [`ModelLoader`].
//! [`OpenAiCompatibleClient`] covers llama.cpp server, vLLM, Ollama and OpenAI:
//! - `OPENAI_BASE_URL` (default `http://localhost:8080/v1`)
//! - `OPENAI_MODEL`
//! - `OPENAI_API_KEY` (optional)

// Generator abstraction
pub mod lifecycle;
pub mod llm_client;
pub mod openai_client;

// Query construction
pub mod dcql;
pub mod prompt;
pub mod template;
pub mod validator;

// Downstream contract
pub mod presentation;

// Re-exports for convenience
pub use dcql::{ClaimFilter, ClaimQuery, CredentialMeta, CredentialQuery, DcqlQuery};
pub use lifecycle::{LifecycleError, ModelLifecycle, ModelLoader, ModelState};
pub use llm_client::{
    ExclusiveGenerator, GenerationError, GenerationProvider, GenerationRequest, ProgressCallback,
};
pub use openai_client::{OpenAiCompatibleClient, RemoteModelLoader};
pub use presentation::{PresentationRequest, PresentationSigner, SignerError};
pub use prompt::{build_prompt, format_credentials, PromptStyle};
pub use template::FallbackError;
pub use validator::{validate, ValidationError};
