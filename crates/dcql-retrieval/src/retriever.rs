//! Hybrid credential retriever
//!
//! Each pool credential is scored against the query on four signals:
//!
//! - **semantic**: cosine of query and pool embeddings (clamped to [0, 1])
//! - **tfidf**: cosine of TF-IDF vectors over the pool vocabulary
//! - **lexical**: Jaccard of query tokens and the credential's searchable-text tokens
//! - **type match**: Jaccard of query tokens and the credential's type-label tokens
//!
//! The weighted sum ranks the pool. The ranked list is then cut in one of three ways:
//!
//! 1. nothing scored above zero: the first `top_k` credentials in store order
//! 2. the query clearly names one credential type: only credentials of that type
//! 3. otherwise: candidates within a fixed ratio of the best score

use std::cmp::Ordering;
use std::collections::HashSet;
use std::path::Path;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, instrument, warn};

use crate::embedding::{CachedEmbedder, EmbeddingError, EmbeddingIndex};
use crate::lexical::LexicalIndex;
use crate::store::CredentialStore;
use crate::tokenize::{jaccard, term_frequency, token_set, tokenize};
use crate::types::{
    RetrievalResult, ScoredCredential, SelectionMode, SignalScores, VerifiableCredential,
};

// ---------------------------------------------------------------------------
// Scoring Constants
// ---------------------------------------------------------------------------

/// Weight of embedding similarity.
pub const SEMANTIC_WEIGHT: f64 = 0.50;

/// Weight of TF-IDF cosine.
pub const TFIDF_WEIGHT: f64 = 0.30;

/// Weight of token Jaccard against the searchable text.
pub const LEXICAL_WEIGHT: f64 = 0.15;

/// Weight of token Jaccard against the type labels.
pub const TYPE_MATCH_WEIGHT: f64 = 0.05;

/// Ranked candidates considered when detecting a dominant type.
pub const TYPE_GATE_WINDOW: usize = 20;

/// Aggregate type score the winning label must reach.
pub const TYPE_GATE_MIN_SCORE: f64 = 0.20;

/// Lead the winning label must hold over the runner-up.
pub const TYPE_GATE_MIN_MARGIN: f64 = 0.07;

/// Gated results are drawn up to `max(top_k, this)` before the final `top_k` cap.
pub const TYPE_GATE_MIN_RESULTS: usize = 3;

/// Ranked candidates considered by the proportional cutoff.
pub const CUTOFF_WINDOW: usize = 10;

/// Candidates must score at least this fraction of the best.
pub const CUTOFF_RATIO: f64 = 0.8;

/// Upper bound on proportional-cutoff results before the final `top_k` cap.
pub const CUTOFF_MAX_RESULTS: usize = 5;

/// Default number of credentials handed to generation.
pub const DEFAULT_TOP_K: usize = 3;

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScoreWeights {
    pub semantic: f64,
    pub tfidf: f64,
    pub lexical: f64,
    pub type_match: f64,
}

impl Default for ScoreWeights {
    fn default() -> Self {
        Self {
            semantic: SEMANTIC_WEIGHT,
            tfidf: TFIDF_WEIGHT,
            lexical: LEXICAL_WEIGHT,
            type_match: TYPE_MATCH_WEIGHT,
        }
    }
}

impl ScoreWeights {
    pub fn total(&self) -> f64 {
        self.semantic + self.tfidf + self.lexical + self.type_match
    }

    /// Weighted sum of the signals. Weights summing past 1 are scaled down so the
    /// score stays in [0, 1].
    pub fn combine(&self, signals: &SignalScores) -> f64 {
        let sum = self.semantic * signals.semantic
            + self.tfidf * signals.tfidf
            + self.lexical * signals.lexical
            + self.type_match * signals.type_match;
        let total = self.total();
        if total > 1.0 {
            sum / total
        } else {
            sum
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GatingConfig {
    pub window: usize,
    pub min_score: f64,
    pub min_margin: f64,
    pub min_results: usize,
}

impl Default for GatingConfig {
    fn default() -> Self {
        Self {
            window: TYPE_GATE_WINDOW,
            min_score: TYPE_GATE_MIN_SCORE,
            min_margin: TYPE_GATE_MIN_MARGIN,
            min_results: TYPE_GATE_MIN_RESULTS,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CutoffConfig {
    pub window: usize,
    pub ratio: f64,
    pub max_results: usize,
}

impl Default for CutoffConfig {
    fn default() -> Self {
        Self {
            window: CUTOFF_WINDOW,
            ratio: CUTOFF_RATIO,
            max_results: CUTOFF_MAX_RESULTS,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrieverConfig {
    pub top_k: usize,
    pub weights: ScoreWeights,
    pub gating: GatingConfig,
    pub cutoff: CutoffConfig,
}

impl Default for RetrieverConfig {
    fn default() -> Self {
        Self {
            top_k: DEFAULT_TOP_K,
            weights: ScoreWeights::default(),
            gating: GatingConfig::default(),
            cutoff: CutoffConfig::default(),
        }
    }
}

// ---------------------------------------------------------------------------
// Retriever
// ---------------------------------------------------------------------------

/// Ranks a prepared credential pool against natural-language queries.
///
/// Built once per pool by [`prepare`](Self::prepare); retrieval is read-only and can run
/// concurrently.
pub struct HybridRetriever {
    store: Arc<CredentialStore>,
    lexical: LexicalIndex,
    embeddings: EmbeddingIndex,
    /// Tokens of each credential's joined type labels
    type_tokens: Vec<HashSet<String>>,
    embedder: Option<Arc<CachedEmbedder>>,
    config: RetrieverConfig,
}

impl HybridRetriever {
    /// Index the pool: lexical statistics always, embeddings when an embedder is given.
    ///
    /// With a `cache_path`, previously persisted embeddings are loaded first, entries for
    /// texts no longer in the pool are pruned, and the refreshed cache is written back.
    /// Cache I/O problems are logged and never fail preparation.
    #[instrument(skip_all, fields(pool = store.len()))]
    pub async fn prepare(
        store: Arc<CredentialStore>,
        embedder: Option<Arc<CachedEmbedder>>,
        cache_path: Option<&Path>,
        config: RetrieverConfig,
    ) -> Result<Self, EmbeddingError> {
        let texts: Vec<String> = store.iter().map(|vc| vc.searchable_text()).collect();
        let lexical = LexicalIndex::build(texts.iter().map(String::as_str));
        let type_tokens = store
            .iter()
            .map(|vc| token_set(&vc.types.join(" ")))
            .collect();

        let embeddings = match &embedder {
            Some(embedder) => {
                if let Some(path) = cache_path {
                    if let Err(e) = embedder.load_cache(path) {
                        warn!("Ignoring unreadable embedding cache {}: {}", path.display(), e);
                    }
                    let keep: HashSet<&str> = texts.iter().map(String::as_str).collect();
                    let pruned = embedder.retain_cache(&keep);
                    if pruned > 0 {
                        debug!("Pruned {} stale cache entries", pruned);
                    }
                }

                let index = EmbeddingIndex::build(embedder, &texts).await?;

                if let Some(path) = cache_path {
                    if let Err(e) = embedder.save_cache(path) {
                        warn!("Failed to persist embedding cache {}: {}", path.display(), e);
                    }
                }
                index
            }
            None => EmbeddingIndex::unavailable(texts.len()),
        };

        info!(
            credentials = store.len(),
            vocabulary = lexical.vocabulary_size(),
            embedded = embeddings.embedded_count(),
            "Retriever prepared"
        );

        Ok(Self {
            store,
            lexical,
            embeddings,
            type_tokens,
            embedder,
            config,
        })
    }

    pub fn store(&self) -> &Arc<CredentialStore> {
        &self.store
    }

    pub fn config(&self) -> &RetrieverConfig {
        &self.config
    }

    pub fn has_embeddings(&self) -> bool {
        self.embeddings.dimension().is_some()
    }

    /// Embed the query (uncached) and rank the pool.
    ///
    /// A failing query embedding degrades to lexical-only scoring.
    #[instrument(skip(self), fields(pool = self.store.len()))]
    pub async fn retrieve(&self, query: &str, top_k: usize) -> RetrievalResult {
        let query_embedding = match &self.embedder {
            Some(embedder) if self.has_embeddings() => match embedder.embed(query, false).await {
                Ok(embedding) => embedding,
                Err(e) => {
                    warn!("Query embedding failed, scoring lexically: {}", e);
                    None
                }
            },
            _ => None,
        };
        self.rank(query, query_embedding.as_deref(), top_k)
    }

    /// Rank with an already computed query embedding
    pub fn rank(&self, query: &str, query_embedding: Option<&[f32]>, top_k: usize) -> RetrievalResult {
        if top_k == 0 || self.store.is_empty() {
            return RetrievalResult::empty();
        }

        let query_embedding = query_embedding.filter(|q| match self.embeddings.dimension() {
            Some(expected) if expected != q.len() => {
                error!(
                    expected,
                    found = q.len(),
                    "Query embedding dimension does not match the pool, ignoring it"
                );
                false
            }
            _ => true,
        });

        let query_tokens = tokenize(query);
        let query_tf = term_frequency(&query_tokens);
        let query_set: HashSet<String> = query_tokens.into_iter().collect();

        let mut ranked: Vec<ScoredCredential> = self
            .store
            .iter()
            .enumerate()
            .map(|(i, vc)| {
                let signals = SignalScores {
                    semantic: query_embedding.map_or(0.0, |q| self.embeddings.similarity(q, i)),
                    tfidf: self.lexical.tfidf_cosine_tf(&query_tf, i),
                    lexical: self
                        .lexical
                        .token_set(i)
                        .map_or(0.0, |doc| jaccard(&query_set, doc)),
                    type_match: self
                        .type_tokens
                        .get(i)
                        .map_or(0.0, |types| jaccard(&query_set, types)),
                };
                ScoredCredential {
                    credential: vc.clone(),
                    score: self.config.weights.combine(&signals),
                    signals,
                }
            })
            .collect();

        let best = ranked
            .iter()
            .map(|c| c.score)
            .fold(f64::NEG_INFINITY, f64::max);
        if best <= 0.0 || best.is_nan() {
            debug!("No signal for query, returning store order");
            ranked.truncate(top_k);
            return RetrievalResult {
                entries: ranked,
                mode: SelectionMode::Degenerate,
            };
        }

        // Stable: equal scores keep store order
        ranked.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(Ordering::Equal));

        if let Some((label, mut gated)) = self.gate_by_type(&query_set, &ranked, top_k) {
            gated.truncate(top_k);
            debug!(label = %label, results = gated.len(), "Type gate applied");
            return RetrievalResult {
                entries: gated,
                mode: SelectionMode::TypeGated(label),
            };
        }

        let cutoff = &self.config.cutoff;
        let threshold = best * cutoff.ratio;
        let mut entries: Vec<ScoredCredential> = ranked
            .iter()
            .take(cutoff.window)
            .filter(|c| c.score >= threshold)
            .cloned()
            .collect();
        if entries.is_empty() {
            entries = ranked;
        }
        entries.truncate(cutoff.max_results.min(top_k));

        RetrievalResult {
            entries,
            mode: SelectionMode::Cutoff,
        }
    }

    /// Sum type-label match over the top of the ranking; if one label clearly leads,
    /// restrict the ranking to credentials of that type.
    fn gate_by_type(
        &self,
        query_set: &HashSet<String>,
        ranked: &[ScoredCredential],
        top_k: usize,
    ) -> Option<(String, Vec<ScoredCredential>)> {
        let gating = &self.config.gating;

        let mut type_scores: Vec<(String, f64)> = Vec::new();
        for candidate in ranked.iter().take(gating.window) {
            let label = type_key(&candidate.credential);
            if label.is_empty() {
                continue;
            }
            let score = jaccard(query_set, &token_set(&label));
            match type_scores.iter_mut().find(|(l, _)| *l == label) {
                Some((_, total)) => *total += score,
                None => type_scores.push((label, score)),
            }
        }
        type_scores.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(Ordering::Equal));

        let (best_label, best_score) = type_scores.first()?;
        let runner_up = type_scores.get(1).map_or(0.0, |(_, s)| *s);
        if *best_score < gating.min_score || best_score - runner_up < gating.min_margin {
            return None;
        }

        let wanted = best_label.to_lowercase();
        let gated: Vec<ScoredCredential> = ranked
            .iter()
            .filter(|c| matches_type(&c.credential, best_label, &wanted))
            .take(top_k.max(gating.min_results))
            .cloned()
            .collect();

        if gated.is_empty() {
            None
        } else {
            Some((best_label.clone(), gated))
        }
    }
}

/// Most specific label, or all labels joined when there is none
fn type_key(vc: &VerifiableCredential) -> String {
    vc.most_specific_type()
        .map(str::to_string)
        .unwrap_or_else(|| vc.types.join(":"))
}

fn matches_type(vc: &VerifiableCredential, label: &str, label_lower: &str) -> bool {
    vc.most_specific_type()
        .is_some_and(|t| t.eq_ignore_ascii_case(label))
        || vc.types.join(":").to_lowercase().contains(label_lower)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedding::{Embedding, EmbeddingProvider};
    use crate::store::parse_pool;
    use async_trait::async_trait;

    const POOL: &str = r#"[
        {"id": "dl-1", "type": ["VerifiableCredential", "DriverLicenseCredential"],
         "issuer": {"id": "did:example:dmv", "name": "Motor Vehicles Agency"},
         "credentialSubject": {"fullName": "Alice Example", "licenseNumber": "D1234567", "vehicleClass": "B"}},
        {"id": "pp-1", "type": ["VerifiableCredential", "PassportCredential"],
         "issuer": {"id": "did:example:gov", "name": "Passport Office"},
         "credentialSubject": {"fullName": "Alice Example", "passportNumber": "P7654321", "nationality": "Utopia"}},
        {"id": "deg-1", "type": ["VerifiableCredential", "UniversityDegreeCredential"],
         "issuer": {"id": "did:example:uni", "name": "Example University"},
         "credentialSubject": {"fullName": "Alice Example", "degreeName": "Bachelor of Science", "major": "Physics"}},
        {"id": "emp-1", "type": ["VerifiableCredential", "EmploymentCredential"],
         "issuer": {"id": "did:example:acme", "name": "Acme Corp"},
         "credentialSubject": {"fullName": "Alice Example", "jobTitle": "Engineer", "employer": "Acme"}}
    ]"#;

    fn store() -> Arc<CredentialStore> {
        Arc::new(CredentialStore::new(parse_pool(POOL, "test").unwrap()))
    }

    async fn lexical_retriever() -> HybridRetriever {
        HybridRetriever::prepare(store(), None, None, RetrieverConfig::default())
            .await
            .unwrap()
    }

    fn ids(result: &RetrievalResult) -> Vec<&str> {
        result
            .entries
            .iter()
            .map(|e| e.credential.id.as_str())
            .collect()
    }

    #[test]
    fn test_default_weights_sum_to_one() {
        assert!((ScoreWeights::default().total() - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_oversized_weights_are_scaled() {
        let weights = ScoreWeights {
            semantic: 1.0,
            tfidf: 1.0,
            lexical: 1.0,
            type_match: 1.0,
        };
        let full = SignalScores {
            semantic: 1.0,
            tfidf: 1.0,
            lexical: 1.0,
            type_match: 1.0,
        };
        assert!((weights.combine(&full) - 1.0).abs() < 1e-12);
    }

    #[tokio::test]
    async fn test_non_unit_weights_keep_scores_bounded() {
        let config = RetrieverConfig {
            weights: ScoreWeights {
                semantic: 1.0,
                tfidf: 1.0,
                lexical: 1.0,
                type_match: 1.0,
            },
            ..RetrieverConfig::default()
        };
        let retriever = HybridRetriever::prepare(store(), None, None, config)
            .await
            .unwrap();
        for query in [
            "Alice Example full name",
            "DriverLicenseCredential Motor Vehicles Agency fullName Alice Example licenseNumber D1234567",
            "passport number nationality",
        ] {
            let result = retriever.retrieve(query, 5).await;
            assert!(!result.is_empty());
            assert!(
                result.scores().iter().all(|s| (0.0..=1.0).contains(s)),
                "{}: {:?}",
                query,
                result.scores()
            );
        }
    }

    #[tokio::test]
    async fn test_type_gate_selects_license() {
        let retriever = lexical_retriever().await;
        let result = retriever.retrieve("Show my driver's license", 3).await;
        assert_eq!(ids(&result), vec!["dl-1"]);
        assert_eq!(
            result.mode,
            SelectionMode::TypeGated("DriverLicenseCredential".to_string())
        );
    }

    #[tokio::test]
    async fn test_passport_ranks_first() {
        let retriever = lexical_retriever().await;
        let result = retriever.retrieve("What is my passport number?", 3).await;
        assert_eq!(ids(&result)[0], "pp-1");
    }

    #[tokio::test]
    async fn test_no_signal_returns_store_order() {
        let retriever = lexical_retriever().await;
        let result = retriever.retrieve("zzz qqq", 2).await;
        assert_eq!(ids(&result), vec!["dl-1", "pp-1"]);
        assert_eq!(result.mode, SelectionMode::Degenerate);
        assert!(result.scores().iter().all(|s| *s == 0.0));
    }

    #[tokio::test]
    async fn test_scores_descending_and_bounded() {
        let retriever = lexical_retriever().await;
        let result = retriever.retrieve("Alice Example full name", 3).await;
        assert!(!result.is_empty());
        assert!(result.len() <= 3);
        let scores = result.scores();
        assert!(scores.windows(2).all(|w| w[0] >= w[1]));
        assert!(scores.iter().all(|s| (0.0..=1.0).contains(s)));
    }

    #[tokio::test]
    async fn test_top_k_zero_and_empty_pool() {
        let retriever = lexical_retriever().await;
        assert!(retriever.retrieve("passport", 0).await.is_empty());

        let empty = HybridRetriever::prepare(
            Arc::new(CredentialStore::default()),
            None,
            None,
            RetrieverConfig::default(),
        )
        .await
        .unwrap();
        assert!(empty.retrieve("passport", 3).await.is_empty());
    }

    #[tokio::test]
    async fn test_top_k_caps_results() {
        let retriever = lexical_retriever().await;
        let result = retriever.retrieve("Alice Example", 1).await;
        assert_eq!(result.len(), 1);
    }

    /// One-hot by keyword so semantic similarity is predictable
    struct KeywordProvider;

    #[async_trait]
    impl EmbeddingProvider for KeywordProvider {
        async fn embed(&self, text: &str) -> Result<Option<Embedding>, EmbeddingError> {
            let lower = text.to_lowercase();
            Ok(Some(vec![
                lower.contains("physics") as u8 as f32,
                lower.contains("engineer") as u8 as f32,
                0.1,
            ]))
        }
    }

    #[tokio::test]
    async fn test_semantic_signal_contributes() {
        let embedder = Arc::new(CachedEmbedder::new(Arc::new(KeywordProvider)));
        let retriever = HybridRetriever::prepare(
            store(),
            Some(embedder.clone()),
            None,
            RetrieverConfig::default(),
        )
        .await
        .unwrap();
        assert!(retriever.has_embeddings());
        // Pool texts cached, the query is not
        assert_eq!(embedder.cache_len(), 4);

        let result = retriever.retrieve("physics", 3).await;
        assert_eq!(ids(&result)[0], "deg-1");
        assert!(result.entries[0].signals.semantic > 0.9);
        assert_eq!(embedder.cache_len(), 4);
    }

    #[tokio::test]
    async fn test_prepare_prunes_and_persists_cache() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("embeddings.json");

        let stale = CachedEmbedder::new(Arc::new(KeywordProvider));
        stale.embed("credential that was deleted", true).await.unwrap();
        stale.save_cache(&path).unwrap();

        let embedder = Arc::new(CachedEmbedder::new(Arc::new(KeywordProvider)));
        HybridRetriever::prepare(
            store(),
            Some(embedder.clone()),
            Some(&path),
            RetrieverConfig::default(),
        )
        .await
        .unwrap();
        assert!(!embedder.is_cached("credential that was deleted"));
        assert_eq!(embedder.cache_len(), 4);

        let reloaded = CachedEmbedder::new(Arc::new(KeywordProvider));
        assert_eq!(reloaded.load_cache(&path).unwrap(), 4);
    }

    #[tokio::test]
    async fn test_mismatched_query_dimension_is_ignored() {
        let embedder = Arc::new(CachedEmbedder::new(Arc::new(KeywordProvider)));
        let retriever =
            HybridRetriever::prepare(store(), Some(embedder), None, RetrieverConfig::default())
                .await
                .unwrap();
        let result = retriever.rank("passport number", Some(&[1.0, 0.0]), 3);
        assert_eq!(ids(&result)[0], "pp-1");
        assert!(result.entries.iter().all(|e| e.signals.semantic == 0.0));
    }
}
