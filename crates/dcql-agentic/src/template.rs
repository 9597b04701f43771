//! Rule-based DCQL synthesis
//!
//! Used whenever the generator is unavailable or its output fails validation. The result
//! always passes [`validate`](crate::validator::validate), so a request never dead-ends on
//! generation problems.

use dcql_retrieval::{VerifiableCredential, UNKNOWN_CREDENTIAL_TYPE};
use thiserror::Error;
use tracing::debug;

use crate::dcql::{
    ClaimQuery, CredentialMeta, CredentialQuery, DcqlQuery, CREDENTIAL_SUBJECT, LDP_VC_FORMAT,
};

/// Claim keys selected whenever present
const ALWAYS_SELECTED: [&str; 2] = ["fullName", "name"];

/// Claims taken in document order when no rule selects anything
const DEFAULT_CLAIM_COUNT: usize = 3;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FallbackError {
    #[error("No credentials to build a fallback query from")]
    NoCredentials,
}

/// Build a single-credential DCQL query for the first of `credentials`.
///
/// Claim selection, per key of the credential subject:
/// - the lower-cased key occurs in the lower-cased query, or
/// - the key is `fullName` or `name`, or
/// - the query mentions "expir" and the key mentions "expir" or "valid".
///
/// If nothing is selected the first three keys are used; a subject without keys
/// selects the whole `credentialSubject`.
pub fn generate<'a, I>(credentials: I, query: &str) -> Result<DcqlQuery, FallbackError>
where
    I: IntoIterator<Item = &'a VerifiableCredential>,
{
    let vc = credentials
        .into_iter()
        .next()
        .ok_or(FallbackError::NoCredentials)?;

    let query_lower = query.to_lowercase();
    let wants_expiry = query_lower.contains("expir");

    let usable_keys: Vec<&str> = vc.claim_keys().filter(|k| !k.trim().is_empty()).collect();

    let mut selected: Vec<&str> = usable_keys
        .iter()
        .copied()
        .filter(|key| {
            let key_lower = key.to_lowercase();
            query_lower.contains(&key_lower)
                || ALWAYS_SELECTED.contains(key)
                || (wants_expiry && (key_lower.contains("expir") || key_lower.contains("valid")))
        })
        .collect();

    if selected.is_empty() {
        selected = usable_keys.into_iter().take(DEFAULT_CLAIM_COUNT).collect();
    }

    let claims = if selected.is_empty() {
        vec![ClaimQuery {
            path: vec![CREDENTIAL_SUBJECT.to_string()],
            filter: None,
        }]
    } else {
        selected.into_iter().map(ClaimQuery::subject_field).collect()
    };

    debug!(
        credential = %vc.id,
        claims = claims.len(),
        "Built template DCQL"
    );

    Ok(DcqlQuery {
        credentials: vec![CredentialQuery {
            id: query_id(vc),
            format: LDP_VC_FORMAT.to_string(),
            meta: Some(CredentialMeta {
                type_values: vec![vc.types.clone()],
            }),
            claims,
        }],
    })
}

/// `DriverLicenseCredential` -> `driverlicense_credential`
pub fn query_id(vc: &VerifiableCredential) -> String {
    let label = vc.most_specific_type().unwrap_or(UNKNOWN_CREDENTIAL_TYPE);
    let stem = label
        .to_lowercase()
        .replace("credential", "")
        .replace("certificate", "");
    format!("{}_credential", stem)
}
