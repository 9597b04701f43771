//! Query and document tokenization
//!
//! Lower-cases, splits on non-alphanumeric characters and at camelCase boundaries
//! (`DriverLicenseCredential` -> `driver license credential`), then emits:
//! - unigrams longer than 2 characters
//! - bigrams of adjacent words longer than 3 characters (including the space)
//!
//! Bigrams are formed over every adjacent word pair, so short words such as "my"
//! still contribute context ("my passport") even though they are dropped as unigrams.

use std::collections::{HashMap, HashSet};

/// Unigrams of this many characters or fewer are dropped
const MIN_UNIGRAM_EXCLUSIVE: usize = 2;

/// Bigrams of this many characters or fewer are dropped
const MIN_BIGRAM_EXCLUSIVE: usize = 3;

/// Tokenize text into unigrams followed by bigrams, preserving duplicates
pub fn tokenize(text: &str) -> Vec<String> {
    let words = split_words(text);
    let mut tokens: Vec<String> = words
        .iter()
        .filter(|w| w.chars().count() > MIN_UNIGRAM_EXCLUSIVE)
        .cloned()
        .collect();

    for pair in words.windows(2) {
        let bigram = format!("{} {}", pair[0], pair[1]);
        if bigram.chars().count() > MIN_BIGRAM_EXCLUSIVE {
            tokens.push(bigram);
        }
    }

    tokens
}

/// Distinct tokens of `text`
pub fn token_set(text: &str) -> HashSet<String> {
    tokenize(text).into_iter().collect()
}

/// Relative term frequency: occurrences divided by total token count
pub fn term_frequency(tokens: &[String]) -> HashMap<String, f64> {
    let mut counts: HashMap<String, f64> = HashMap::new();
    for token in tokens {
        *counts.entry(token.clone()).or_insert(0.0) += 1.0;
    }
    let total = tokens.len() as f64;
    if total > 0.0 {
        for value in counts.values_mut() {
            *value /= total;
        }
    }
    counts
}

/// |A ∩ B| / |A ∪ B|, zero when both sets are empty
pub fn jaccard(a: &HashSet<String>, b: &HashSet<String>) -> f64 {
    if a.is_empty() && b.is_empty() {
        return 0.0;
    }
    let intersection = a.intersection(b).count();
    let union = a.len() + b.len() - intersection;
    if union == 0 {
        0.0
    } else {
        intersection as f64 / union as f64
    }
}

/// Split into lower-case alphanumeric words, breaking camelCase runs
fn split_words(text: &str) -> Vec<String> {
    let mut words = Vec::new();
    let mut current = String::new();
    let mut prev: Option<char> = None;

    for c in text.chars() {
        if !c.is_alphanumeric() {
            flush(&mut current, &mut words);
            prev = None;
            continue;
        }
        if let Some(p) = prev {
            if p.is_lowercase() && c.is_uppercase() {
                flush(&mut current, &mut words);
            }
        }
        current.extend(c.to_lowercase());
        prev = Some(c);
    }
    flush(&mut current, &mut words);

    words
}

fn flush(current: &mut String, words: &mut Vec<String>) {
    if !current.is_empty() {
        words.push(std::mem::take(current));
    }
}
