//! Lexical index: TF-IDF vectors and token sets per pool document
//!
//! IDF is smoothed, `ln((N + 1) / (df + 1)) + 1`, so every indexed term keeps a positive
//! weight even when it appears in every document. Terms never seen in the pool weigh 1.

use std::collections::{HashMap, HashSet};

use crate::tokenize::{term_frequency, tokenize};

#[derive(Debug, Clone, Default)]
pub struct LexicalIndex {
    /// Raw term counts per document
    term_counts: Vec<HashMap<String, f64>>,
    /// Distinct tokens per document (for Jaccard)
    token_sets: Vec<HashSet<String>>,
    /// L2 norm of each document's TF-IDF vector
    doc_norms: Vec<f64>,
    idf: HashMap<String, f64>,
}

impl LexicalIndex {
    /// Index documents in order; document `i` is addressed by `i` afterwards
    pub fn build<'a, I>(texts: I) -> Self
    where
        I: IntoIterator<Item = &'a str>,
    {
        let mut term_counts = Vec::new();
        let mut token_sets = Vec::new();
        let mut document_frequency: HashMap<String, usize> = HashMap::new();

        for text in texts {
            let tokens = tokenize(text);
            let mut counts: HashMap<String, f64> = HashMap::new();
            for token in &tokens {
                *counts.entry(token.clone()).or_insert(0.0) += 1.0;
            }
            for term in counts.keys() {
                *document_frequency.entry(term.clone()).or_insert(0) += 1;
            }
            token_sets.push(tokens.into_iter().collect());
            term_counts.push(counts);
        }

        let n = term_counts.len() as f64;
        let idf: HashMap<String, f64> = document_frequency
            .into_iter()
            .map(|(term, df)| (term, ((n + 1.0) / (df as f64 + 1.0)).ln() + 1.0))
            .collect();

        let doc_norms = term_counts
            .iter()
            .map(|counts| {
                counts
                    .iter()
                    .map(|(term, tf)| {
                        let w = tf * idf.get(term).copied().unwrap_or(1.0);
                        w * w
                    })
                    .sum::<f64>()
                    .sqrt()
            })
            .collect();

        Self {
            term_counts,
            token_sets,
            doc_norms,
            idf,
        }
    }

    pub fn len(&self) -> usize {
        self.term_counts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.term_counts.is_empty()
    }

    pub fn vocabulary_size(&self) -> usize {
        self.idf.len()
    }

    /// Smoothed IDF; 1.0 for terms outside the pool vocabulary
    pub fn idf(&self, term: &str) -> f64 {
        self.idf.get(term).copied().unwrap_or(1.0)
    }

    pub fn token_set(&self, doc: usize) -> Option<&HashSet<String>> {
        self.token_sets.get(doc)
    }

    /// Cosine between the query's TF-IDF vector and document `doc`'s
    pub fn tfidf_cosine(&self, query: &str, doc: usize) -> f64 {
        self.tfidf_cosine_tf(&term_frequency(&tokenize(query)), doc)
    }

    /// As [`tfidf_cosine`](Self::tfidf_cosine) with a precomputed query TF map
    pub fn tfidf_cosine_tf(&self, query_tf: &HashMap<String, f64>, doc: usize) -> f64 {
        let (Some(counts), Some(&doc_norm)) = (self.term_counts.get(doc), self.doc_norms.get(doc))
        else {
            return 0.0;
        };
        if query_tf.is_empty() || doc_norm == 0.0 {
            return 0.0;
        }

        let mut dot = 0.0;
        let mut query_norm = 0.0;
        for (term, tf) in query_tf {
            let idf = self.idf(term);
            let q = tf * idf;
            query_norm += q * q;
            if let Some(count) = counts.get(term) {
                dot += q * count * idf;
            }
        }

        if query_norm == 0.0 {
            return 0.0;
        }
        (dot / (query_norm.sqrt() * doc_norm)).clamp(0.0, 1.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn index() -> LexicalIndex {
        LexicalIndex::build([
            "DriverLicenseCredential licenseNumber D123 fullName Alice",
            "PassportCredential passportNumber P987 fullName Alice nationality Utopia",
            "UniversityDegreeCredential degree Bachelor of Science fullName Alice",
        ])
    }

    #[test]
    fn test_idf_rarer_terms_weigh_more() {
        let index = index();
        assert!(index.idf("passport") > index.idf("alice"));
        // alice appears everywhere: ln(4/4) + 1
        assert!((index.idf("alice") - 1.0).abs() < 1e-9);
        assert_eq!(index.idf("nonexistent"), 1.0);
    }

    #[test]
    fn test_tfidf_prefers_matching_document() {
        let index = index();
        let passport = index.tfidf_cosine("what is my passport number", 1);
        let license = index.tfidf_cosine("what is my passport number", 0);
        assert!(passport > license);
        assert!(passport > 0.0 && passport <= 1.0);
    }

    #[test]
    fn test_tfidf_no_overlap_is_zero() {
        let index = index();
        assert_eq!(index.tfidf_cosine("zebra giraffe", 0), 0.0);
        assert_eq!(index.tfidf_cosine("", 0), 0.0);
    }

    #[test]
    fn test_out_of_range_document() {
        let index = index();
        assert_eq!(index.tfidf_cosine("passport", 42), 0.0);
        assert!(index.token_set(42).is_none());
    }

    #[test]
    fn test_empty_index() {
        let index = LexicalIndex::build(std::iter::empty());
        assert!(index.is_empty());
        assert_eq!(index.vocabulary_size(), 0);
    }
}
