//! Credential data model shared by the store, the indices and the retriever

use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Generic marker that leads the type list of every W3C credential
pub const GENERIC_CREDENTIAL_TYPE: &str = "VerifiableCredential";

/// Label used when a credential carries no type information at all
pub const UNKNOWN_CREDENTIAL_TYPE: &str = "UnknownCredential";

/// A Verifiable Credential as held in the local pool.
///
/// The typed fields are a read-only view for ranking and prompting. The document itself is
/// kept exactly as loaded so the signed form handed to a presentation signer still verifies.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "Value", into = "Value")]
pub struct VerifiableCredential {
    pub id: String,
    pub context: Option<Vec<Value>>,
    /// Ordered type labels, generic marker first, most specific last
    pub types: Vec<String>,
    pub issuer: Issuer,
    pub credential_subject: Map<String, Value>,
    /// `validFrom`, or `issuanceDate` for data model 1.1 credentials, as issued
    pub valid_from: Option<String>,
    /// `validUntil`, or `expirationDate`, as issued
    pub valid_until: Option<String>,
    document: Value,
}

/// Members of the document the pipeline interprets
#[derive(Deserialize)]
struct CredentialFields {
    id: String,
    #[serde(rename = "@context", default)]
    context: Option<Vec<Value>>,
    #[serde(rename = "type")]
    types: Vec<String>,
    issuer: Issuer,
    #[serde(rename = "credentialSubject", default)]
    credential_subject: Map<String, Value>,
    #[serde(rename = "validFrom", default)]
    valid_from: Option<String>,
    #[serde(rename = "issuanceDate", default)]
    issuance_date: Option<String>,
    #[serde(rename = "validUntil", default)]
    valid_until: Option<String>,
    #[serde(rename = "expirationDate", default)]
    expiration_date: Option<String>,
}

impl TryFrom<Value> for VerifiableCredential {
    type Error = serde_json::Error;

    fn try_from(document: Value) -> Result<Self, Self::Error> {
        let fields = CredentialFields::deserialize(&document)?;
        Ok(Self {
            id: fields.id,
            context: fields.context,
            types: fields.types,
            issuer: fields.issuer,
            credential_subject: fields.credential_subject,
            valid_from: fields.valid_from.or(fields.issuance_date),
            valid_until: fields.valid_until.or(fields.expiration_date),
            document,
        })
    }
}

impl From<VerifiableCredential> for Value {
    fn from(vc: VerifiableCredential) -> Self {
        vc.document
    }
}

/// Credential issuer. Accepts both `"did:example:123"` and `{"id": .., "name": ..}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "IssuerRepr")]
pub struct Issuer {
    pub id: String,
    pub name: String,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum IssuerRepr {
    Id(String),
    Object {
        id: String,
        #[serde(default)]
        name: String,
    },
}

impl From<IssuerRepr> for Issuer {
    fn from(repr: IssuerRepr) -> Self {
        match repr {
            IssuerRepr::Id(id) => Issuer {
                id,
                name: String::new(),
            },
            IssuerRepr::Object { id, name } => Issuer { id, name },
        }
    }
}

impl Issuer {
    /// Name for display and search; the id stands in when no name was issued
    pub fn display_name(&self) -> &str {
        if self.name.is_empty() {
            &self.id
        } else {
            &self.name
        }
    }
}

/// The subset of a credential rendered into generation prompts.
///
/// Matches the layout the generation model was fine-tuned on.
#[derive(Serialize)]
struct PromptView<'a> {
    id: &'a str,
    #[serde(rename = "@context", skip_serializing_if = "Option::is_none")]
    context: Option<&'a Vec<Value>>,
    #[serde(rename = "type")]
    types: &'a [String],
    issuer: &'a Issuer,
    #[serde(rename = "credentialSubject")]
    credential_subject: &'a Map<String, Value>,
}

impl VerifiableCredential {
    /// First non-generic type label, or the first label if all are generic
    pub fn primary_type(&self) -> &str {
        self.types
            .iter()
            .find(|t| t.as_str() != GENERIC_CREDENTIAL_TYPE)
            .or_else(|| self.types.first())
            .map(String::as_str)
            .unwrap_or(UNKNOWN_CREDENTIAL_TYPE)
    }

    /// Last type label; by convention the most specific one
    pub fn most_specific_type(&self) -> Option<&str> {
        self.types.last().map(String::as_str)
    }

    /// Claim names in document order
    pub fn claim_keys(&self) -> impl Iterator<Item = &str> {
        self.credential_subject.keys().map(String::as_str)
    }

    /// Whether `instant` falls inside the validity window.
    ///
    /// Open or unparseable ends are unbounded. A date-only `validUntil` covers the whole day.
    pub fn is_valid_at(&self, instant: DateTime<Utc>) -> bool {
        let started = self
            .valid_from
            .as_deref()
            .and_then(|from| parse_instant(from, false))
            .map_or(true, |from| from <= instant);
        let not_expired = self
            .valid_until
            .as_deref()
            .and_then(|until| parse_instant(until, true))
            .map_or(true, |until| instant <= until);
        started && not_expired
    }

    /// Single-line JSON used inside prompts (`VC <n>: {...}`)
    pub fn to_compact_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(&PromptView {
            id: &self.id,
            context: self.context.as_ref(),
            types: &self.types,
            issuer: &self.issuer,
            credential_subject: &self.credential_subject,
        })
    }

    /// The signed document exactly as loaded, proof included
    pub fn to_signed_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(&self.document)
    }

    /// The loaded document
    pub fn document(&self) -> &Value {
        &self.document
    }

    /// Flat text used for lexical indexing and pool embeddings:
    /// type labels, issuer name, then `key value` for every claim.
    pub fn searchable_text(&self) -> String {
        let mut text = self.types.join(" ");
        text.push(' ');
        text.push_str(self.issuer.display_name());

        for (key, value) in &self.credential_subject {
            text.push(' ');
            text.push_str(key);
            let flattened = flatten_value(value);
            if !flattened.is_empty() {
                text.push(' ');
                text.push_str(&flattened);
            }
        }

        text
    }
}

/// RFC 3339, a zone-less timestamp (taken as UTC), or a plain `YYYY-MM-DD` date
fn parse_instant(text: &str, end_of_day: bool) -> Option<DateTime<Utc>> {
    let text = text.trim();
    if let Ok(instant) = DateTime::parse_from_rfc3339(text) {
        return Some(instant.with_timezone(&Utc));
    }
    if let Ok(naive) = NaiveDateTime::parse_from_str(text, "%Y-%m-%dT%H:%M:%S%.f") {
        return Some(naive.and_utc());
    }
    let date = NaiveDate::parse_from_str(text, "%Y-%m-%d").ok()?;
    let naive = if end_of_day {
        date.and_hms_milli_opt(23, 59, 59, 999)?
    } else {
        date.and_hms_opt(0, 0, 0)?
    };
    Some(naive.and_utc())
}

/// Render a claim value as plain words
fn flatten_value(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => n.to_string(),
        Value::String(s) => s.clone(),
        Value::Array(items) => items
            .iter()
            .map(flatten_value)
            .filter(|s| !s.is_empty())
            .collect::<Vec<_>>()
            .join(" "),
        Value::Object(map) => map
            .iter()
            .map(|(k, v)| format!("{}: {}", k, flatten_value(v)))
            .collect::<Vec<_>>()
            .join(" "),
    }
}

/// Per-signal breakdown of a hybrid score
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct SignalScores {
    pub semantic: f64,
    pub tfidf: f64,
    pub lexical: f64,
    pub type_match: f64,
}

/// A credential paired with its relevance score in [0, 1]
#[derive(Debug, Clone)]
pub struct ScoredCredential {
    pub credential: Arc<VerifiableCredential>,
    pub score: f64,
    pub signals: SignalScores,
}

/// How the final candidate list was cut from the ranked pool
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SelectionMode {
    /// No signal at all; store order
    Degenerate,
    /// Confident single-type query; restricted to this type label
    TypeGated(String),
    /// Proportional cutoff relative to the best score
    Cutoff,
}

impl fmt::Display for SelectionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SelectionMode::Degenerate => write!(f, "degenerate"),
            SelectionMode::TypeGated(label) => write!(f, "type-gated({})", label),
            SelectionMode::Cutoff => write!(f, "cutoff"),
        }
    }
}

/// Ranked credentials for one query, best first
#[derive(Debug, Clone)]
pub struct RetrievalResult {
    pub entries: Vec<ScoredCredential>,
    pub mode: SelectionMode,
}

impl RetrievalResult {
    pub fn empty() -> Self {
        Self {
            entries: Vec::new(),
            mode: SelectionMode::Degenerate,
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn credentials(&self) -> Vec<Arc<VerifiableCredential>> {
        self.entries.iter().map(|e| e.credential.clone()).collect()
    }

    pub fn ids(&self) -> Vec<&str> {
        self.entries
            .iter()
            .map(|e| e.credential.id.as_str())
            .collect()
    }

    pub fn scores(&self) -> Vec<f64> {
        self.entries.iter().map(|e| e.score).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn license() -> VerifiableCredential {
        serde_json::from_value(json!({
            "id": "https://example.org/credentials/dl-1",
            "@context": ["https://www.w3.org/2018/credentials/v1"],
            "type": ["VerifiableCredential", "DriverLicenseCredential"],
            "issuer": {"id": "did:example:dmv", "name": "Department of Motor Vehicles"},
            "credentialSubject": {
                "fullName": "Alice Example",
                "licenseNumber": "D1234567",
                "licenseClass": ["B", "C"],
                "expirationDate": "2030-01-01"
            },
            "validUntil": "2030-01-01T00:00:00Z",
            "proof": {"type": "Ed25519Signature2020", "proofValue": "z58..."}
        }))
        .unwrap()
    }

    #[test]
    fn test_primary_and_specific_type() {
        let vc = license();
        assert_eq!(vc.primary_type(), "DriverLicenseCredential");
        assert_eq!(vc.most_specific_type(), Some("DriverLicenseCredential"));
    }

    #[test]
    fn test_primary_type_all_generic() {
        let mut vc = license();
        vc.types = vec![GENERIC_CREDENTIAL_TYPE.to_string()];
        assert_eq!(vc.primary_type(), GENERIC_CREDENTIAL_TYPE);
        vc.types.clear();
        assert_eq!(vc.primary_type(), UNKNOWN_CREDENTIAL_TYPE);
    }

    #[test]
    fn test_issuer_string_form() {
        let issuer: Issuer = serde_json::from_value(json!("did:example:gov")).unwrap();
        assert_eq!(issuer.id, "did:example:gov");
        assert_eq!(issuer.display_name(), "did:example:gov");
    }

    #[test]
    fn test_claim_keys_keep_document_order() {
        let vc = license();
        let keys: Vec<&str> = vc.claim_keys().collect();
        assert_eq!(
            keys,
            vec!["fullName", "licenseNumber", "licenseClass", "expirationDate"]
        );
    }

    #[test]
    fn test_compact_json_omits_proof() {
        let compact = license().to_compact_json().unwrap();
        assert!(!compact.contains('\n'));
        assert!(!compact.contains("proof"));
        assert!(compact.starts_with(r#"{"id":"https://example.org/credentials/dl-1","@context""#));
    }

    #[test]
    fn test_signed_json_keeps_proof() {
        let signed = license().to_signed_json().unwrap();
        assert!(signed.contains("Ed25519Signature2020"));
    }

    #[test]
    fn test_signed_json_is_the_loaded_document() {
        let original = concat!(
            r#"{"id":"urn:uuid:pp-1","type":["VerifiableCredential","PassportCredential"],"#,
            r#""issuer":"did:example:gov","issuanceDate":"2019-06-15T00:00:00.000Z","#,
            r#""expirationDate":"2029-06-15T12:30:00.250+02:00","#,
            r#""credentialSubject":{"passportNumber":"P1","score":1.5},"#,
            r#""proof":{"type":"Ed25519Signature2020","proofValue":"z3FX"}}"#
        );
        let vc: VerifiableCredential = serde_json::from_str(original).unwrap();

        assert_eq!(vc.issuer.id, "did:example:gov");
        assert_eq!(vc.valid_from.as_deref(), Some("2019-06-15T00:00:00.000Z"));
        assert_eq!(vc.to_signed_json().unwrap(), original);
        assert_eq!(serde_json::to_string(&vc).unwrap(), original);
    }

    #[test]
    fn test_date_only_validity_parses() {
        let vc: VerifiableCredential = serde_json::from_value(json!({
            "id": "urn:uuid:ins-1",
            "type": ["VerifiableCredential", "HealthInsuranceCredential"],
            "issuer": "did:example:insurer",
            "validFrom": "2020-01-01",
            "validUntil": "2030-01-01",
            "credentialSubject": {"policyNumber": "HI-1"}
        }))
        .unwrap();

        assert!(vc.is_valid_at("2030-01-01T18:00:00Z".parse().unwrap()));
        assert!(!vc.is_valid_at("2030-01-02T00:00:00Z".parse().unwrap()));
        assert!(!vc.is_valid_at("2019-12-31T23:59:59Z".parse().unwrap()));
    }

    #[test]
    fn test_both_validity_spellings_prefer_valid_from() {
        let vc: VerifiableCredential = serde_json::from_value(json!({
            "id": "urn:uuid:dl-2",
            "type": ["VerifiableCredential", "DriverLicenseCredential"],
            "issuer": "did:example:dmv",
            "validFrom": "2021-03-01T00:00:00Z",
            "issuanceDate": "2021-02-01T00:00:00Z",
            "validUntil": "not a date",
            "credentialSubject": {}
        }))
        .unwrap();

        assert_eq!(vc.valid_from.as_deref(), Some("2021-03-01T00:00:00Z"));
        assert!(!vc.is_valid_at("2021-02-15T00:00:00Z".parse().unwrap()));
        assert!(vc.is_valid_at("2099-01-01T00:00:00Z".parse().unwrap()));
    }

    #[test]
    fn test_searchable_text_flattens_claims() {
        let text = license().searchable_text();
        assert!(text.starts_with("VerifiableCredential DriverLicenseCredential"));
        assert!(text.contains("Department of Motor Vehicles"));
        assert!(text.contains("licenseNumber D1234567"));
        assert!(text.contains("licenseClass B C"));
    }

    #[test]
    fn test_validity_window() {
        let vc = license();
        let before = "2029-06-01T00:00:00Z".parse().unwrap();
        let after = "2031-06-01T00:00:00Z".parse().unwrap();
        assert!(vc.is_valid_at(before));
        assert!(!vc.is_valid_at(after));
    }
}
