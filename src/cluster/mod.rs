//! Session-cached clustering of note snapshots.
//!
//! [`ClusterAnalyser::get_clusters`] runs the [`Clusterer`] at most once per
//! `min_size` for the analyser's lifetime. Noise points are dropped, small
//! clusters are dropped, and every surviving cluster gets a centroid and a
//! label from the configured [`labeling::ClusterLabeler`].

pub mod labeling;
pub mod tfidf;

use std::cell::{Cell, RefCell};
use std::collections::{BTreeMap, HashMap};
use std::rc::Rc;

use anyhow::Result;
use hdbscan::{Hdbscan, HdbscanHyperParams};
use serde::Serialize;

use crate::config::ClusteringConfig;
use crate::embedding::EmbeddingProvider;
use crate::error::ConfigError;
use crate::semantic::similarity::{centroid, cosine_similarity, rank};
use crate::semantic::VectorBackend;
use crate::vault::NoteGraph;
use labeling::{label_or_fallback, ClusterLabeler, LabelInput, LabelingKind};
use tfidf::TfIdf;

/// Label a clusterer gives points that belong to no cluster.
pub const NOISE_LABEL: i32 = -1;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Cluster {
    pub id: i32,
    /// Member note paths, sorted.
    pub members: Vec<String>,
    pub centroid: Vec<f32>,
    pub label: String,
    pub keywords: Vec<String>,
}

pub type ClusterMap = BTreeMap<i32, Cluster>;

/// Assigns a label to each input vector; [`NOISE_LABEL`] for outliers.
pub trait Clusterer {
    fn fit(&self, vectors: &[Vec<f32>], min_cluster_size: usize) -> Result<Vec<i32>>;
}

/// Density clustering via the `hdbscan` crate.
#[derive(Debug, Clone, Default)]
pub struct HdbscanClusterer {
    /// Defaults to `min_cluster_size` when unset.
    pub min_samples: Option<usize>,
}

impl Clusterer for HdbscanClusterer {
    fn fit(&self, vectors: &[Vec<f32>], min_cluster_size: usize) -> Result<Vec<i32>> {
        let min_samples = self
            .min_samples
            .unwrap_or(min_cluster_size)
            .clamp(1, vectors.len().saturating_sub(1).max(1));
        let params = HdbscanHyperParams::builder()
            .min_cluster_size(min_cluster_size)
            .min_samples(min_samples)
            .build();
        Hdbscan::new(vectors, params)
            .cluster()
            .map_err(|e| anyhow::anyhow!("hdbscan failed: {e:?}"))
    }
}

pub struct ClusterAnalyser<'a> {
    backend: Rc<dyn VectorBackend>,
    graph: &'a dyn NoteGraph,
    encoder: &'a dyn EmbeddingProvider,
    clusterer: Box<dyn Clusterer>,
    labeler: Box<dyn ClusterLabeler>,
    cache: RefCell<HashMap<usize, Rc<ClusterMap>>>,
    fit_calls: Cell<usize>,
}

impl<'a> ClusterAnalyser<'a> {
    pub fn new(
        backend: Rc<dyn VectorBackend>,
        graph: &'a dyn NoteGraph,
        encoder: &'a dyn EmbeddingProvider,
        clusterer: Box<dyn Clusterer>,
        labeler: Box<dyn ClusterLabeler>,
    ) -> Self {
        Self {
            backend,
            graph,
            encoder,
            clusterer,
            labeler,
            cache: RefCell::new(HashMap::new()),
            fit_calls: Cell::new(0),
        }
    }

    /// HDBSCAN plus the configured labeler.
    pub fn from_config(
        backend: Rc<dyn VectorBackend>,
        graph: &'a dyn NoteGraph,
        encoder: &'a dyn EmbeddingProvider,
        config: &ClusteringConfig,
    ) -> Result<Self, ConfigError> {
        let labeler = LabelingKind::parse(&config.labeling)?.create(config);
        let clusterer = HdbscanClusterer {
            min_samples: config.min_samples,
        };
        Ok(Self::new(backend, graph, encoder, Box::new(clusterer), labeler))
    }

    /// How many times the clusterer has actually run.
    pub fn fit_calls(&self) -> usize {
        self.fit_calls.get()
    }

    /// Clusters of at least `min_size` members, computed once per `min_size`.
    pub fn get_clusters(&self, min_size: usize) -> Rc<ClusterMap> {
        if let Some(hit) = self.cache.borrow().get(&min_size) {
            return Rc::clone(hit);
        }
        tracing::debug!(min_size, "cluster cache miss");
        let clusters = Rc::new(self.compute(min_size));
        self.cache.borrow_mut().insert(min_size, Rc::clone(&clusters));
        clusters
    }

    fn compute(&self, min_size: usize) -> ClusterMap {
        let (paths, vectors): (Vec<String>, Vec<Vec<f32>>) = self
            .backend
            .paths()
            .into_iter()
            .filter_map(|p| {
                let v = self.backend.vector(&p)?.to_vec();
                Some((p, v))
            })
            .unzip();

        if vectors.len() < min_size.max(2) {
            tracing::debug!(points = vectors.len(), min_size, "too few points to cluster");
            return ClusterMap::new();
        }

        self.fit_calls.set(self.fit_calls.get() + 1);
        let labels = match self.clusterer.fit(&vectors, min_size) {
            Ok(labels) if labels.len() == vectors.len() => labels,
            Ok(labels) => {
                tracing::warn!(
                    expected = vectors.len(),
                    got = labels.len(),
                    "clusterer returned the wrong number of labels"
                );
                return ClusterMap::new();
            }
            Err(err) => {
                tracing::warn!(error = %err, min_size, "clustering failed");
                return ClusterMap::new();
            }
        };

        let mut groups: BTreeMap<i32, Vec<usize>> = BTreeMap::new();
        for (i, label) in labels.into_iter().enumerate() {
            // NOISE_LABEL and any other negative label mean "no cluster".
            if label >= 0 {
                groups.entry(label).or_default().push(i);
            }
        }

        let corpus_texts: Vec<String> = self.graph.notes().iter().map(|n| n.embedding_text()).collect();
        let corpus_refs: Vec<&str> = corpus_texts.iter().map(String::as_str).collect();
        let corpus = TfIdf::new(&corpus_refs);

        let clusters: ClusterMap = groups
            .into_iter()
            .filter(|(_, members)| members.len() >= min_size)
            .map(|(id, members)| {
                let member_vectors: Vec<&[f32]> = members.iter().map(|&i| vectors[i].as_slice()).collect();
                let centre = centroid(&member_vectors);
                let member_paths: Vec<String> = members.iter().map(|&i| paths[i].clone()).collect();
                let texts: Vec<String> = member_paths
                    .iter()
                    .filter_map(|p| self.graph.resolve(p))
                    .map(|n| n.embedding_text())
                    .collect();
                let label = label_or_fallback(
                    self.labeler.as_ref(),
                    &LabelInput {
                        cluster_id: id,
                        texts: &texts,
                        centroid: &centre,
                        corpus: &corpus,
                        encoder: self.encoder,
                    },
                );
                (
                    id,
                    Cluster {
                        id,
                        members: member_paths,
                        centroid: centre,
                        label: label.label,
                        keywords: label.keywords,
                    },
                )
            })
            .collect();

        tracing::info!(min_size, clusters = clusters.len(), points = vectors.len(), "clustering complete");
        clusters
    }

    /// The `k` members of `cluster_id` closest to its centroid, ties by path.
    pub fn get_representatives(&self, cluster_id: i32, k: usize, clusters: &ClusterMap) -> Vec<String> {
        let Some(cluster) = clusters.get(&cluster_id) else {
            return Vec::new();
        };
        let mut scored: Vec<(String, f32)> = cluster
            .members
            .iter()
            .filter_map(|p| {
                let v = self.backend.vector(p)?;
                Some((p.clone(), cosine_similarity(v, &cluster.centroid)))
            })
            .collect();
        rank(&mut scored);
        scored.into_iter().take(k).map(|(p, _)| p).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::semantic::{InMemoryBackend, Snapshot};
    use crate::vault::{InMemoryVault, Note};
    use labeling::FrequencyLabeler;

    struct NullEncoder;

    impl EmbeddingProvider for NullEncoder {
        fn embed(&self, _text: &str) -> Result<Vec<f32>> {
            Ok(vec![0.0; 2])
        }
    }

    /// Splits points by the sign of their first coordinate.
    struct SignClusterer {
        calls: Rc<Cell<usize>>,
    }

    impl Clusterer for SignClusterer {
        fn fit(&self, vectors: &[Vec<f32>], _min: usize) -> Result<Vec<i32>> {
            self.calls.set(self.calls.get() + 1);
            Ok(vectors
                .iter()
                .map(|v| match v[0] {
                    x if x > 0.1 => 0,
                    x if x < -0.1 => 1,
                    _ => NOISE_LABEL,
                })
                .collect())
        }
    }

    struct FailingClusterer;

    impl Clusterer for FailingClusterer {
        fn fit(&self, _vectors: &[Vec<f32>], _min: usize) -> Result<Vec<i32>> {
            anyhow::bail!("boom")
        }
    }

    fn fixture() -> (Rc<dyn VectorBackend>, InMemoryVault) {
        let points = [
            ("p1.md", "rust ownership", [1.0, 0.1]),
            ("p2.md", "rust borrowing", [0.9, 0.2]),
            ("p3.md", "rust lifetimes", [0.95, -0.1]),
            ("n1.md", "bread sourdough", [-1.0, 0.1]),
            ("n2.md", "bread baking", [-0.9, 0.0]),
            ("x.md", "stray thought", [0.0, 1.0]),
        ];
        let mut backend = InMemoryBackend::new();
        backend
            .load_snapshots(
                points
                    .iter()
                    .map(|(p, _, v)| Snapshot {
                        session_id: 1,
                        path: p.to_string(),
                        vector: v.to_vec(),
                    })
                    .collect(),
            )
            .unwrap();
        let vault = InMemoryVault::new(points.iter().map(|(p, t, _)| Note::new(*p, *t, "")));
        let backend: Rc<dyn VectorBackend> = Rc::new(backend);
        (backend, vault)
    }

    #[test]
    fn clusters_are_cached_per_min_size() {
        let (backend, vault) = fixture();
        let calls = Rc::new(Cell::new(0));
        let analyser = ClusterAnalyser::new(
            backend,
            &vault,
            &NullEncoder,
            Box::new(SignClusterer { calls: Rc::clone(&calls) }),
            Box::new(FrequencyLabeler::new(2)),
        );

        let first = analyser.get_clusters(2);
        let again = analyser.get_clusters(2);
        assert!(Rc::ptr_eq(&first, &again));
        assert_eq!(analyser.fit_calls(), 1);
        assert_eq!(calls.get(), 1);

        analyser.get_clusters(3);
        assert_eq!(analyser.fit_calls(), 2);
    }

    #[test]
    fn noise_and_small_clusters_are_dropped() {
        let (backend, vault) = fixture();
        let analyser = ClusterAnalyser::new(
            backend,
            &vault,
            &NullEncoder,
            Box::new(SignClusterer { calls: Rc::new(Cell::new(0)) }),
            Box::new(FrequencyLabeler::new(2)),
        );

        let clusters = analyser.get_clusters(3);
        assert_eq!(clusters.len(), 1);
        let rust = &clusters[&0];
        assert_eq!(rust.members, vec!["p1.md", "p2.md", "p3.md"]);
        assert!(rust.keywords.iter().any(|k| k == "rust" || k == "ownership" || k == "borrowing" || k == "lifetimes"));

        let two = analyser.get_clusters(2);
        assert_eq!(two.len(), 2);
        assert!(two.values().all(|c| !c.members.contains(&"x.md".to_string())));
    }

    #[test]
    fn too_few_points_skips_clustering() {
        let (backend, vault) = fixture();
        let analyser = ClusterAnalyser::new(
            backend,
            &vault,
            &NullEncoder,
            Box::new(FailingClusterer),
            Box::new(FrequencyLabeler::new(2)),
        );
        assert!(analyser.get_clusters(50).is_empty());
        assert_eq!(analyser.fit_calls(), 0);
    }

    #[test]
    fn clusterer_failure_degrades_to_empty_and_is_cached() {
        let (backend, vault) = fixture();
        let analyser = ClusterAnalyser::new(
            backend,
            &vault,
            &NullEncoder,
            Box::new(FailingClusterer),
            Box::new(FrequencyLabeler::new(2)),
        );
        assert!(analyser.get_clusters(2).is_empty());
        assert!(analyser.get_clusters(2).is_empty());
        assert_eq!(analyser.fit_calls(), 1);
    }

    #[test]
    fn representatives_are_closest_to_centroid() {
        let (backend, vault) = fixture();
        let analyser = ClusterAnalyser::new(
            backend,
            &vault,
            &NullEncoder,
            Box::new(SignClusterer { calls: Rc::new(Cell::new(0)) }),
            Box::new(FrequencyLabeler::new(2)),
        );
        let clusters = analyser.get_clusters(2);
        let reps = analyser.get_representatives(0, 2, &clusters);
        assert_eq!(reps.len(), 2);
        assert!(clusters[&0].members.contains(&reps[0]));
        assert!(analyser.get_representatives(99, 2, &clusters).is_empty());
        assert!(analyser.get_representatives(0, 0, &clusters).is_empty());
    }
}
