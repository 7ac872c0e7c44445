//! Cluster labels.
//!
//! Two strategies sit behind [`ClusterLabeler`], selected by
//! `clustering.labeling`:
//! - [`FrequencyLabeler`]: TF-IDF keywords of the member notes
//! - [`SemanticLabeler`]: member n-grams ranked by closeness to the cluster
//!   centroid in embedding space
//!
//! Labeling never fails a clustering run: [`label_or_fallback`] turns any
//! error into `"Cluster <id>"`.

use std::collections::BTreeMap;

use anyhow::{bail, Result};

use super::tfidf::{tokenize, TfIdf};
use crate::config::ClusteringConfig;
use crate::embedding::temporal::semantic_part;
use crate::embedding::EmbeddingProvider;
use crate::error::ConfigError;
use crate::semantic::similarity::cosine_similarity;

/// Upper bound on n-gram candidates sent to the encoder per cluster.
const MAX_SEMANTIC_CANDIDATES: usize = 48;

/// Words joined into the human-readable label.
const LABEL_WORDS: usize = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LabelingKind {
    Frequency,
    Semantic,
}

impl LabelingKind {
    pub fn parse(name: &str) -> Result<Self, ConfigError> {
        match name {
            "frequency" => Ok(Self::Frequency),
            "semantic" => Ok(Self::Semantic),
            other => Err(ConfigError::UnknownName {
                kind: "labeling strategy",
                name: other.to_string(),
            }),
        }
    }

    pub fn create(&self, config: &ClusteringConfig) -> Box<dyn ClusterLabeler> {
        match self {
            Self::Frequency => Box::new(FrequencyLabeler::new(config.label_terms)),
            Self::Semantic => Box::new(SemanticLabeler::new(config.label_terms, config.label_diversity)),
        }
    }
}

/// Everything a labeler may look at for one cluster.
pub struct LabelInput<'r> {
    pub cluster_id: i32,
    /// Embedding text of each member note.
    pub texts: &'r [String],
    /// Mean of the members' snapshots.
    pub centroid: &'r [f32],
    /// Document frequencies over the whole vault.
    pub corpus: &'r TfIdf,
    pub encoder: &'r dyn EmbeddingProvider,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ClusterLabel {
    pub label: String,
    pub keywords: Vec<String>,
}

pub trait ClusterLabeler {
    fn label(&self, input: &LabelInput<'_>) -> Result<ClusterLabel>;
}

pub fn fallback_label(cluster_id: i32) -> String {
    format!("Cluster {cluster_id}")
}

/// Run `labeler`, degrading any failure to the placeholder label.
pub fn label_or_fallback(labeler: &dyn ClusterLabeler, input: &LabelInput<'_>) -> ClusterLabel {
    match labeler.label(input) {
        Ok(label) if !label.label.trim().is_empty() => label,
        Ok(_) => {
            tracing::warn!(cluster = input.cluster_id, "labeler produced an empty label");
            ClusterLabel {
                label: fallback_label(input.cluster_id),
                keywords: Vec::new(),
            }
        }
        Err(err) => {
            tracing::warn!(cluster = input.cluster_id, error = %err, "cluster labeling failed");
            ClusterLabel {
                label: fallback_label(input.cluster_id),
                keywords: Vec::new(),
            }
        }
    }
}

fn join_label(keywords: &[String]) -> String {
    keywords
        .iter()
        .take(LABEL_WORDS)
        .map(String::as_str)
        .collect::<Vec<_>>()
        .join(" / ")
}

/// Two terms are near-duplicates if they share a word or one word is a
/// prefix of the other ("network" / "networks").
fn overlaps(a: &str, b: &str) -> bool {
    a.split(' ').any(|wa| {
        b.split(' ').any(|wb| {
            wa == wb
                || (wa.len().min(wb.len()) >= 4 && (wa.starts_with(wb) || wb.starts_with(wa)))
        })
    })
}

/// TF-IDF keywords: frequent inside the cluster, rare across the vault.
pub struct FrequencyLabeler {
    terms: usize,
}

impl FrequencyLabeler {
    pub fn new(terms: usize) -> Self {
        Self { terms: terms.max(1) }
    }
}

impl ClusterLabeler for FrequencyLabeler {
    fn label(&self, input: &LabelInput<'_>) -> Result<ClusterLabel> {
        let docs: Vec<&str> = input.texts.iter().map(String::as_str).collect();
        let mut keywords: Vec<String> = Vec::with_capacity(self.terms);
        for (term, _) in input.corpus.top_terms(&docs, self.terms * 4) {
            if keywords.len() == self.terms {
                break;
            }
            if keywords.iter().any(|k| overlaps(k, &term)) {
                continue;
            }
            keywords.push(term);
        }

        if keywords.is_empty() {
            bail!("no keywords in {} member notes", input.texts.len());
        }
        Ok(ClusterLabel {
            label: join_label(&keywords),
            keywords,
        })
    }
}

/// Picks the member n-grams whose embeddings sit closest to the centroid.
pub struct SemanticLabeler {
    terms: usize,
    diversity: f32,
}

impl SemanticLabeler {
    pub fn new(terms: usize, diversity: f32) -> Self {
        Self {
            terms: terms.max(1),
            diversity,
        }
    }
}

/// 1- to 3-word phrases from each text, most frequent first, ties alphabetical.
fn candidate_phrases(texts: &[String], limit: usize) -> Vec<String> {
    let mut counts: BTreeMap<String, usize> = BTreeMap::new();
    for text in texts {
        let words = tokenize(text);
        for n in 1..=3 {
            for window in words.windows(n) {
                *counts.entry(window.join(" ")).or_insert(0) += 1;
            }
        }
    }
    let mut ranked: Vec<(String, usize)> = counts.into_iter().collect();
    ranked.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
    ranked.truncate(limit);
    ranked.into_iter().map(|(phrase, _)| phrase).collect()
}

impl ClusterLabeler for SemanticLabeler {
    fn label(&self, input: &LabelInput<'_>) -> Result<ClusterLabel> {
        let candidates = candidate_phrases(input.texts, MAX_SEMANTIC_CANDIDATES);
        if candidates.is_empty() {
            bail!("no candidate phrases in {} member notes", input.texts.len());
        }

        let refs: Vec<&str> = candidates.iter().map(String::as_str).collect();
        let vectors = input.encoder.embed_batch(&refs)?;
        if vectors.len() != candidates.len() {
            bail!(
                "encoder returned {} vectors for {} phrases",
                vectors.len(),
                candidates.len()
            );
        }

        let centre = semantic_part(input.centroid);
        let mut scored: Vec<(usize, f32)> = vectors
            .iter()
            .enumerate()
            .map(|(i, v)| (i, cosine_similarity(v, centre)))
            .collect();
        scored.sort_by(|a, b| {
            b.1.total_cmp(&a.1)
                .then_with(|| candidates[a.0].cmp(&candidates[b.0]))
        });

        let mut chosen: Vec<usize> = Vec::with_capacity(self.terms);
        for (i, _) in scored {
            if chosen.len() == self.terms {
                break;
            }
            let redundant = chosen.iter().any(|&j| {
                overlaps(&candidates[i], &candidates[j])
                    || cosine_similarity(&vectors[i], &vectors[j]) > self.diversity
            });
            if !redundant {
                chosen.push(i);
            }
        }

        let keywords: Vec<String> = chosen.into_iter().map(|i| candidates[i].clone()).collect();
        Ok(ClusterLabel {
            label: join_label(&keywords),
            keywords,
        })
    }
}
