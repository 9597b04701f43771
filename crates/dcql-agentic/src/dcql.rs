//! DCQL (Digital Credentials Query Language) schema
//!
//! Only the subset the generator emits is modelled: a list of credential queries, each
//! selecting claim paths from one credential type.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Root `path` segment for claims inside a W3C credential
pub const CREDENTIAL_SUBJECT: &str = "credentialSubject";

/// Format identifier for JSON-LD Data Integrity credentials
pub const LDP_VC_FORMAT: &str = "ldp_vc";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DcqlQuery {
    pub credentials: Vec<CredentialQuery>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CredentialQuery {
    /// Caller-chosen correlation key
    pub id: String,
    pub format: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub meta: Option<CredentialMeta>,
    pub claims: Vec<ClaimQuery>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CredentialMeta {
    /// Alternatives of full type-label lists; a credential matches any one of them
    #[serde(default)]
    pub type_values: Vec<Vec<String>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClaimQuery {
    pub path: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filter: Option<ClaimFilter>,
}

/// Value constraint on a claim, e.g. `{"type": "value", "value": "Utopia"}`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClaimFilter {
    #[serde(rename = "type")]
    pub kind: String,
    pub value: Value,
}

impl ClaimQuery {
    /// `["credentialSubject", key]`
    pub fn subject_field(key: &str) -> Self {
        Self {
            path: vec![CREDENTIAL_SUBJECT.to_string(), key.to_string()],
            filter: None,
        }
    }
}

impl DcqlQuery {
    /// Compact JSON; stable field order makes it usable as a cache or comparison key
    pub fn to_canonical_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    pub fn credential_ids(&self) -> impl Iterator<Item = &str> {
        self.credentials.iter().map(|c| c.id.as_str())
    }

    pub fn claim_count(&self) -> usize {
        self.credentials.iter().map(|c| c.claims.len()).sum()
    }
}
