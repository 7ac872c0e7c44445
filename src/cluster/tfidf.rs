//! TF-IDF keyword scoring for cluster labels.
//!
//! Document frequencies come from the whole vault, term frequencies from the
//! cluster being labeled, so a label favours words that are common inside the
//! cluster and rare outside it.

use std::collections::{BTreeMap, HashMap, HashSet};

pub struct TfIdf {
    /// Term -> number of corpus documents containing it.
    doc_frequencies: HashMap<String, usize>,
    doc_count: usize,
}

impl TfIdf {
    pub fn new(corpus: &[&str]) -> Self {
        let mut doc_frequencies: HashMap<String, usize> = HashMap::new();
        for doc in corpus {
            let unique: HashSet<String> = tokenize(doc).into_iter().collect();
            for term in unique {
                *doc_frequencies.entry(term).or_insert(0) += 1;
            }
        }
        Self {
            doc_frequencies,
            doc_count: corpus.len(),
        }
    }

    /// Smoothed IDF: `ln((N + 1) / (df + 1)) + 1`. Unseen terms get the maximum.
    pub fn idf(&self, term: &str) -> f32 {
        let df = *self.doc_frequencies.get(term).unwrap_or(&0) as f32;
        let n = self.doc_count as f32;
        ((n + 1.0) / (df + 1.0)).ln() + 1.0
    }

    /// Top `n` terms of `documents`, TF over the documents times corpus IDF.
    /// Sorted by score descending, ties alphabetically.
    pub fn top_terms(&self, documents: &[&str], n: usize) -> Vec<(String, f32)> {
        let mut counts: BTreeMap<String, usize> = BTreeMap::new();
        let mut total = 0usize;
        for doc in documents {
            for term in tokenize(doc) {
                *counts.entry(term).or_insert(0) += 1;
                total += 1;
            }
        }
        if total == 0 {
            return Vec::new();
        }

        let mut scores: Vec<(String, f32)> = counts
            .into_iter()
            .map(|(term, count)| {
                let score = count as f32 / total as f32 * self.idf(&term);
                (term, score)
            })
            .collect();
        scores.sort_by(|a, b| b.1.total_cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        scores.truncate(n);
        scores
    }

    pub fn doc_count(&self) -> usize {
        self.doc_count
    }
}

/// Lowercase words, minus stop words, single characters and bare numbers.
pub fn tokenize(text: &str) -> Vec<String> {
    text.to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|s| s.chars().count() > 1)
        .filter(|s| !is_stop_word(s))
        .filter(|s| !s.chars().all(|c| c.is_numeric()))
        .map(String::from)
        .collect()
}

pub fn is_stop_word(word: &str) -> bool {
    const STOP_WORDS: &[&str] = &[
        "a", "an", "and", "are", "as", "at", "be", "by", "for", "from", "has", "he", "in", "is",
        "it", "its", "of", "on", "or", "that", "the", "to", "was", "were", "will", "with", "this",
        "they", "but", "have", "had", "what", "when", "where", "who", "which", "why", "how", "all",
        "each", "every", "both", "few", "more", "most", "other", "some", "such", "no", "nor",
        "not", "only", "own", "same", "so", "than", "too", "very", "can", "just", "should", "now",
        "also", "been", "being", "do", "does", "did", "would", "could", "might", "must", "about",
        "after", "again", "any", "before", "between", "into", "through", "out", "over", "under",
        "up", "then", "here", "there", "if", "while", "because", "we", "you", "your", "our",
        "their", "him", "her", "them", "me", "my", "those", "these", "his", "she", "i",
    ];
    STOP_WORDS.contains(&word)
}
