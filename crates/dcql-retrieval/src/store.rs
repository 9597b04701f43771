//! Credential pool: the in-memory store and the sources it is loaded from

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;
use tracing::{info, warn};

use crate::types::VerifiableCredential;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Failed to read credential pool {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to decode credential pool {origin}: {source}")]
    Decode {
        origin: String,
        #[source]
        source: serde_json::Error,
    },
}

/// Where a credential pool comes from.
///
/// The wallet itself (storage, import, deletion) lives outside this crate; a source only
/// has to hand over the credentials currently held.
#[async_trait]
pub trait CredentialSource: Send + Sync {
    async fn load(&self) -> Result<Vec<VerifiableCredential>, StoreError>;

    /// Human-readable origin for logs
    fn describe(&self) -> String;
}

/// A JSON array of credentials on disk
#[derive(Debug, Clone)]
pub struct JsonFileSource {
    path: PathBuf,
}

impl JsonFileSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl CredentialSource for JsonFileSource {
    async fn load(&self) -> Result<Vec<VerifiableCredential>, StoreError> {
        let content = tokio::fs::read_to_string(&self.path)
            .await
            .map_err(|source| StoreError::Io {
                path: self.path.clone(),
                source,
            })?;
        parse_pool(&content, &self.describe())
    }

    fn describe(&self) -> String {
        self.path.display().to_string()
    }
}

/// Credentials already in memory (tests, embedding hosts)
#[derive(Debug, Clone, Default)]
pub struct StaticSource {
    credentials: Vec<VerifiableCredential>,
}

impl StaticSource {
    pub fn new(credentials: Vec<VerifiableCredential>) -> Self {
        Self { credentials }
    }
}

#[async_trait]
impl CredentialSource for StaticSource {
    async fn load(&self) -> Result<Vec<VerifiableCredential>, StoreError> {
        Ok(self.credentials.clone())
    }

    fn describe(&self) -> String {
        format!("static pool ({} credentials)", self.credentials.len())
    }
}

/// Decode a JSON array of credentials
pub fn parse_pool(json: &str, origin: &str) -> Result<Vec<VerifiableCredential>, StoreError> {
    serde_json::from_str(json).map_err(|source| StoreError::Decode {
        origin: origin.to_string(),
        source,
    })
}

/// Ordered, read-only credential pool.
///
/// Order is the order the source returned; it is the tie-break order for ranking and the
/// fallback order when no signal distinguishes candidates.
#[derive(Debug, Clone, Default)]
pub struct CredentialStore {
    credentials: Vec<Arc<VerifiableCredential>>,
    by_id: HashMap<String, usize>,
}

impl CredentialStore {
    pub fn new(credentials: Vec<VerifiableCredential>) -> Self {
        let mut by_id = HashMap::with_capacity(credentials.len());
        for (idx, vc) in credentials.iter().enumerate() {
            if by_id.contains_key(&vc.id) {
                warn!(id = %vc.id, "Duplicate credential id in pool, lookups resolve to the first");
                continue;
            }
            by_id.insert(vc.id.clone(), idx);
        }

        Self {
            credentials: credentials.into_iter().map(Arc::new).collect(),
            by_id,
        }
    }

    pub async fn load(source: &dyn CredentialSource) -> Result<Self, StoreError> {
        let credentials = source.load().await?;
        info!(
            "Loaded {} credentials from {}",
            credentials.len(),
            source.describe()
        );
        Ok(Self::new(credentials))
    }

    pub fn len(&self) -> usize {
        self.credentials.len()
    }

    pub fn is_empty(&self) -> bool {
        self.credentials.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<VerifiableCredential>> {
        self.credentials.iter()
    }

    pub fn at(&self, index: usize) -> Option<&Arc<VerifiableCredential>> {
        self.credentials.get(index)
    }

    pub fn get(&self, id: &str) -> Option<&Arc<VerifiableCredential>> {
        self.by_id.get(id).and_then(|&idx| self.credentials.get(idx))
    }

    /// Last path segment of an `https://` credential id; other ids are returned whole
    pub fn short_id(id: &str) -> &str {
        if !id.starts_with("https://") {
            return id;
        }
        id.rsplit('/').next().unwrap_or(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const POOL: &str = r#"[
        {"id": "urn:uuid:aaaa-1", "type": ["VerifiableCredential", "PassportCredential"],
         "issuer": "did:example:gov", "credentialSubject": {"passportNumber": "P1"}},
        {"id": "urn:uuid:bbbb-2", "type": ["VerifiableCredential", "DriverLicenseCredential"],
         "issuer": {"id": "did:example:dmv", "name": "DMV"}, "credentialSubject": {"licenseNumber": "D1"}}
    ]"#;

    #[tokio::test]
    async fn test_json_file_source() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(POOL.as_bytes()).unwrap();

        let store = CredentialStore::load(&JsonFileSource::new(file.path()))
            .await
            .unwrap();
        assert_eq!(store.len(), 2);
        assert_eq!(store.at(0).unwrap().id, "urn:uuid:aaaa-1");
        assert_eq!(store.get("urn:uuid:bbbb-2").unwrap().issuer.name, "DMV");
    }

    #[tokio::test]
    async fn test_missing_file_is_io_error() {
        let source = JsonFileSource::new("/nonexistent/pool.json");
        let err = CredentialStore::load(&source).await.unwrap_err();
        assert!(matches!(err, StoreError::Io { .. }));
    }

    #[test]
    fn test_malformed_pool_is_decode_error() {
        let err = parse_pool("{not json", "inline").unwrap_err();
        assert!(matches!(err, StoreError::Decode { .. }));
    }

    #[test]
    fn test_pool_accepts_date_only_and_mixed_validity_fields() {
        let pool = r#"[
            {"id": "urn:uuid:cccc-3", "type": ["VerifiableCredential", "HealthInsuranceCredential"],
             "issuer": "did:example:insurer", "validUntil": "2030-01-01",
             "credentialSubject": {"policyNumber": "HI-1"}},
            {"id": "urn:uuid:dddd-4", "type": ["VerifiableCredential", "PassportCredential"],
             "issuer": "did:example:gov", "validFrom": "2019-06-15T00:00:00Z",
             "issuanceDate": "2019-06-15", "credentialSubject": {"passportNumber": "P2"}}
        ]"#;
        let credentials = parse_pool(pool, "inline").unwrap();
        assert_eq!(credentials.len(), 2);
        assert_eq!(credentials[0].valid_until.as_deref(), Some("2030-01-01"));
    }

    #[tokio::test]
    async fn test_static_source_keeps_order() {
        let credentials = parse_pool(POOL, "inline").unwrap();
        let store = CredentialStore::load(&StaticSource::new(credentials))
            .await
            .unwrap();
        let ids: Vec<&str> = store.iter().map(|vc| vc.id.as_str()).collect();
        assert_eq!(ids, vec!["urn:uuid:aaaa-1", "urn:uuid:bbbb-2"]);
    }

    #[test]
    fn test_duplicate_ids_resolve_to_first() {
        let mut credentials = parse_pool(POOL, "inline").unwrap();
        let mut dup = credentials[1].clone();
        dup.id = "urn:uuid:aaaa-1".to_string();
        credentials.push(dup);

        let store = CredentialStore::new(credentials);
        assert_eq!(store.len(), 3);
        assert_eq!(
            store.get("urn:uuid:aaaa-1").unwrap().primary_type(),
            "PassportCredential"
        );
    }

    #[test]
    fn test_short_id() {
        assert_eq!(
            CredentialStore::short_id("https://example.org/credentials/dl-1"),
            "dl-1"
        );
        assert_eq!(CredentialStore::short_id("urn:uuid:1234"), "urn:uuid:1234");
    }
}
