//! DCQL Validator
//!
//! Turns raw generator text into a typed [`DcqlQuery`], or explains why it cannot.
//!
//! Extraction is lenient (code fences and chatter around the JSON object are tolerated);
//! structure is strict and checked fail-fast in a fixed order:
//!
//! 1. `credentials` is a non-empty list
//! 2. each credential has a non-empty `id`, then a non-empty `format`
//! 3. each credential has a non-empty `claims` list
//! 4. each claim has a non-empty `path` of non-empty strings
//!
//! Paths are not checked against the credentials they select, and `meta.type_values` is
//! not checked against the retrieved types.

use serde_json::{Map, Value};
use thiserror::Error;

use crate::dcql::{ClaimFilter, ClaimQuery, CredentialMeta, CredentialQuery, DcqlQuery};

/// Why generator output was rejected. Every variant keeps the raw text.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("Generator output does not contain a JSON object")]
    InvalidJson { raw: String },

    #[error("DCQL query has no credentials")]
    MissingCredentials { raw: String },

    #[error("Credential {index} has a missing or empty '{field}'")]
    InvalidCredentialField {
        index: usize,
        field: &'static str,
        raw: String,
    },

    #[error("Credential {index} has no claims")]
    InvalidClaims { index: usize, raw: String },

    #[error("Claim {claim_index} of credential {credential_index} has an invalid path")]
    InvalidClaimPath {
        credential_index: usize,
        claim_index: usize,
        raw: String,
    },
}

impl ValidationError {
    /// The generator text that failed validation
    pub fn raw_text(&self) -> &str {
        match self {
            ValidationError::InvalidJson { raw }
            | ValidationError::MissingCredentials { raw }
            | ValidationError::InvalidCredentialField { raw, .. }
            | ValidationError::InvalidClaims { raw, .. }
            | ValidationError::InvalidClaimPath { raw, .. } => raw,
        }
    }

    /// Stable short name for logs and metrics labels
    pub fn kind(&self) -> &'static str {
        match self {
            ValidationError::InvalidJson { .. } => "invalid_json",
            ValidationError::MissingCredentials { .. } => "missing_credentials",
            ValidationError::InvalidCredentialField { .. } => "invalid_credential_field",
            ValidationError::InvalidClaims { .. } => "invalid_claims",
            ValidationError::InvalidClaimPath { .. } => "invalid_claim_path",
        }
    }
}

/// Validate generator output and decode it into a [`DcqlQuery`]
pub fn validate(candidate: &str) -> Result<DcqlQuery, ValidationError> {
    let raw = || candidate.to_string();

    let root = extract_json_object(candidate).ok_or_else(|| ValidationError::InvalidJson { raw: raw() })?;

    let entries = match root.get("credentials") {
        Some(Value::Array(entries)) if !entries.is_empty() => entries,
        _ => return Err(ValidationError::MissingCredentials { raw: raw() }),
    };

    let mut credentials = Vec::with_capacity(entries.len());
    for (index, entry) in entries.iter().enumerate() {
        let id = non_empty_string(entry.get("id")).ok_or_else(|| {
            ValidationError::InvalidCredentialField {
                index,
                field: "id",
                raw: raw(),
            }
        })?;
        let format = non_empty_string(entry.get("format")).ok_or_else(|| {
            ValidationError::InvalidCredentialField {
                index,
                field: "format",
                raw: raw(),
            }
        })?;

        let claim_values = match entry.get("claims") {
            Some(Value::Array(claims)) if !claims.is_empty() => claims,
            _ => return Err(ValidationError::InvalidClaims { index, raw: raw() }),
        };

        let mut claims = Vec::with_capacity(claim_values.len());
        for (claim_index, claim) in claim_values.iter().enumerate() {
            let path = claim_path(claim).ok_or_else(|| ValidationError::InvalidClaimPath {
                credential_index: index,
                claim_index,
                raw: raw(),
            })?;
            let filter = claim
                .get("filter")
                .and_then(|f| serde_json::from_value::<ClaimFilter>(f.clone()).ok());
            claims.push(ClaimQuery { path, filter });
        }

        let meta = entry
            .get("meta")
            .and_then(|m| serde_json::from_value::<CredentialMeta>(m.clone()).ok());

        credentials.push(CredentialQuery {
            id,
            format,
            meta,
            claims,
        });
    }

    Ok(DcqlQuery { credentials })
}

/// Parse `text` as a JSON object, retrying on the outermost `{...}` with fences removed
pub fn extract_json_object(text: &str) -> Option<Map<String, Value>> {
    if let Ok(Value::Object(map)) = serde_json::from_str::<Value>(text) {
        return Some(map);
    }

    let cleaned = strip_code_fences(text);
    let start = cleaned.find('{')?;
    let end = cleaned.rfind('}')?;
    if end < start {
        return None;
    }
    match serde_json::from_str::<Value>(&cleaned[start..=end]) {
        Ok(Value::Object(map)) => Some(map),
        _ => None,
    }
}

/// Remove ``` fence markers, including a `json` language tag in any case
fn strip_code_fences(text: &str) -> String {
    const FENCE: &str = "```";
    let mut out = String::with_capacity(text.len());
    let mut rest = text;
    while let Some(pos) = rest.find(FENCE) {
        out.push_str(&rest[..pos]);
        rest = &rest[pos + FENCE.len()..];
        if rest
            .get(..4)
            .is_some_and(|tag| tag.eq_ignore_ascii_case("json"))
        {
            rest = &rest[4..];
        }
    }
    out.push_str(rest);
    out
}

fn non_empty_string(value: Option<&Value>) -> Option<String> {
    value
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

/// Path segments must name something; whitespace alone does not
fn path_segment(value: &Value) -> Option<String> {
    value
        .as_str()
        .filter(|s| !s.trim().is_empty())
        .map(str::to_string)
}

fn claim_path(claim: &Value) -> Option<Vec<String>> {
    let segments = claim.get("path")?.as_array()?;
    if segments.is_empty() {
        return None;
    }
    segments
        .iter()
        .map(path_segment)
        .collect()
}
