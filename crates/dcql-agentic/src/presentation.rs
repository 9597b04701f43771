//! Presentation signing contract
//!
//! The signer sits downstream of the pipeline: it receives the final DCQL query and the
//! credential the holder chose, and returns a signed verifiable presentation. Signers
//! built on the native signing library report failure in-band as a string starting with
//! `ERROR: `; [`parse_signer_output`] lifts that into [`SignerError::Rejected`].

use async_trait::async_trait;
use dcql_retrieval::VerifiableCredential;
use thiserror::Error;

use crate::dcql::DcqlQuery;

/// Challenge used when the verifier did not supply one
pub const DEFAULT_CHALLENGE: &str = "mobile-app-challenge";

/// Prefix the signing library puts on in-band errors
pub const SIGNER_ERROR_PREFIX: &str = "ERROR: ";

#[derive(Debug, Error)]
pub enum SignerError {
    #[error("Signer rejected the presentation: {0}")]
    Rejected(String),

    #[error("Signer unavailable: {0}")]
    Unavailable(String),

    #[error("Failed to encode presentation input: {0}")]
    Encoding(#[from] serde_json::Error),
}

#[async_trait]
pub trait PresentationSigner: Send + Sync {
    /// Sign a presentation of `signed_credential` answering `dcql_query`
    async fn create_presentation(
        &self,
        dcql_query: &str,
        signed_credential: &str,
        challenge: &str,
    ) -> Result<String, SignerError>;
}

/// Map the signer's string convention onto a `Result`
pub fn parse_signer_output(output: String) -> Result<String, SignerError> {
    match output.strip_prefix(SIGNER_ERROR_PREFIX) {
        Some(reason) => Err(SignerError::Rejected(reason.trim().to_string())),
        None => Ok(output),
    }
}

/// Serialized signer inputs
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PresentationRequest {
    pub dcql_query: String,
    pub signed_credential: String,
    pub challenge: String,
}

impl PresentationRequest {
    pub fn from_parts(
        query: &DcqlQuery,
        credential: &VerifiableCredential,
        challenge: Option<&str>,
    ) -> Result<Self, SignerError> {
        Ok(Self {
            dcql_query: query.to_canonical_json()?,
            signed_credential: credential.to_signed_json()?,
            challenge: challenge.unwrap_or(DEFAULT_CHALLENGE).to_string(),
        })
    }

    pub async fn sign(&self, signer: &dyn PresentationSigner) -> Result<String, SignerError> {
        signer
            .create_presentation(&self.dcql_query, &self.signed_credential, &self.challenge)
            .await
    }
}
