//! Session-scoped cache over the note graph, the vector backend and the
//! cluster analyser.
//!
//! Analyzers call into one [`VaultContext`] per session. Every query is
//! memoized on its full argument tuple and handed back as an `Rc`, so asking
//! twice returns the same allocation. Nothing is ever evicted; dropping the
//! context drops its caches.

pub mod metadata;
pub mod registry;

use std::cell::RefCell;
use std::collections::HashMap;
use std::hash::Hash;
use std::rc::Rc;

use anyhow::Result;

use crate::cluster::{ClusterAnalyser, ClusterMap};
use crate::config::GeistConfig;
use crate::embedding::EmbeddingProvider;
use crate::error::ConfigError;
use crate::semantic::backend::{create_backend, BackendKind};
use crate::semantic::{EmbeddingStore, SimilarityBand, SimilarityBands, VectorBackend};
use crate::vault::{Note, NoteGraph, Session};
use metadata::{builtin_inferrers, Metadata, MetadataInferrer};
use registry::FunctionRegistry;

type Memo<K, V> = RefCell<HashMap<K, V>>;

/// Look `key` up in `memo`, computing and storing it on a miss.
fn memoize<K, V>(memo: &Memo<K, V>, key: K, compute: impl FnOnce() -> V) -> V
where
    K: Eq + Hash,
    V: Clone,
{
    if let Some(hit) = memo.borrow().get(&key) {
        return hit.clone();
    }
    // Compute before taking the write borrow: `compute` may recurse into
    // other memoized queries.
    let value = compute();
    memo.borrow_mut().insert(key, value.clone());
    value
}

/// Fallible variant of [`memoize`]; errors are returned and not cached.
fn try_memoize<K, V>(memo: &Memo<K, V>, key: K, compute: impl FnOnce() -> Result<V>) -> Result<V>
where
    K: Eq + Hash,
    V: Clone,
{
    if let Some(hit) = memo.borrow().get(&key) {
        return Ok(hit.clone());
    }
    let value = compute()?;
    memo.borrow_mut().insert(key, value.clone());
    Ok(value)
}

pub struct VaultContext<'a> {
    graph: &'a dyn NoteGraph,
    backend: Rc<dyn VectorBackend>,
    session: Session,
    bands: SimilarityBands,
    analyser: ClusterAnalyser<'a>,
    default_min_cluster_size: usize,
    inferrers: Vec<Box<dyn MetadataInferrer>>,
    registry: FunctionRegistry,
    rng: RefCell<fastrand::Rng>,

    backlinks: Memo<String, Rc<Vec<Note>>>,
    outgoing: Memo<String, Rc<Vec<Note>>>,
    graph_neighbours: Memo<String, Rc<Vec<Note>>>,
    metadata: Memo<String, Option<Rc<Metadata>>>,
    similarity: Memo<(String, String), Option<f32>>,
    neighbours: Memo<(String, usize), Rc<Vec<String>>>,
    scored_neighbours: Memo<(String, usize), Rc<Vec<(String, f32)>>>,
    batch_similarity: Memo<Vec<String>, Rc<Vec<Vec<f32>>>>,
}

impl<'a> VaultContext<'a> {
    /// Assemble a context around an already loaded backend.
    pub fn new(
        graph: &'a dyn NoteGraph,
        encoder: &'a dyn EmbeddingProvider,
        backend: Box<dyn VectorBackend>,
        session: Session,
        config: &GeistConfig,
    ) -> Result<Self, ConfigError> {
        let backend: Rc<dyn VectorBackend> = Rc::from(backend);
        let analyser = ClusterAnalyser::from_config(Rc::clone(&backend), graph, encoder, &config.clustering)?;
        Ok(Self::with_analyser(
            graph,
            backend,
            session,
            SimilarityBands::from_config(&config.similarity)?,
            analyser,
            config.clustering.min_cluster_size,
        ))
    }

    /// Build the configured backend from `store`'s current session, then the context.
    pub fn open(store: &EmbeddingStore<'a>, graph: &'a dyn NoteGraph, config: &GeistConfig) -> Result<Self> {
        let kind = BackendKind::parse(&config.vector.backend)?;
        let backend = create_backend(kind, store)?;
        Ok(Self::new(graph, store.encoder(), backend, store.session().clone(), config)?)
    }

    /// Full control over the clustering side; used by tests and custom setups.
    pub fn with_analyser(
        graph: &'a dyn NoteGraph,
        backend: Rc<dyn VectorBackend>,
        session: Session,
        bands: SimilarityBands,
        analyser: ClusterAnalyser<'a>,
        default_min_cluster_size: usize,
    ) -> Self {
        let rng = RefCell::new(session.rng());
        Self {
            graph,
            backend,
            session,
            bands,
            analyser,
            default_min_cluster_size,
            inferrers: builtin_inferrers(),
            registry: FunctionRegistry::with_defaults(),
            rng,
            backlinks: RefCell::default(),
            outgoing: RefCell::default(),
            graph_neighbours: RefCell::default(),
            metadata: RefCell::default(),
            similarity: RefCell::default(),
            neighbours: RefCell::default(),
            scored_neighbours: RefCell::default(),
            batch_similarity: RefCell::default(),
        }
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    pub fn graph(&self) -> &'a dyn NoteGraph {
        self.graph
    }

    pub fn backend(&self) -> &dyn VectorBackend {
        self.backend.as_ref()
    }

    pub fn analyser(&self) -> &ClusterAnalyser<'a> {
        &self.analyser
    }

    pub fn default_min_cluster_size(&self) -> usize {
        self.default_min_cluster_size
    }

    pub fn registry_mut(&mut self) -> &mut FunctionRegistry {
        &mut self.registry
    }

    /// Append an inferrer; its keys override built-ins with the same name.
    pub fn add_inferrer(&mut self, inferrer: Box<dyn MetadataInferrer>) {
        self.inferrers.push(inferrer);
    }

    // ── graph ─────────────────────────────────────────────────────────────

    pub fn backlinks(&self, path: &str) -> Rc<Vec<Note>> {
        memoize(&self.backlinks, path.to_string(), || Rc::new(self.graph.backlinks(path)))
    }

    pub fn outgoing_links(&self, path: &str) -> Rc<Vec<Note>> {
        memoize(&self.outgoing, path.to_string(), || Rc::new(self.graph.outgoing_links(path)))
    }

    /// Backlinks and outgoing links together, deduplicated, sorted by path.
    pub fn graph_neighbours(&self, path: &str) -> Rc<Vec<Note>> {
        memoize(&self.graph_neighbours, path.to_string(), || {
            let mut all: Vec<Note> = self
                .backlinks(path)
                .iter()
                .chain(self.outgoing_links(path).iter())
                .cloned()
                .collect();
            all.sort();
            all.dedup();
            Rc::new(all)
        })
    }

    /// Merged output of every inferrer; `None` for a path the vault lacks.
    pub fn metadata(&self, path: &str) -> Option<Rc<Metadata>> {
        memoize(&self.metadata, path.to_string(), || {
            let note = self.graph.resolve(path)?;
            let mut merged = Metadata::new();
            for inferrer in &self.inferrers {
                match inferrer.infer(&note, self) {
                    Ok(values) => merged.extend(values),
                    Err(err) => tracing::warn!(
                        inferrer = inferrer.name(),
                        note = %note.path,
                        error = %err,
                        "metadata inferrer failed"
                    ),
                }
            }
            Some(Rc::new(merged))
        })
    }

    // ── similarity ────────────────────────────────────────────────────────

    /// Cosine between two notes' snapshots; `None` if either has none.
    pub fn similarity(&self, a: &str, b: &str) -> Option<f32> {
        let key = if a <= b {
            (a.to_string(), b.to_string())
        } else {
            (b.to_string(), a.to_string())
        };
        memoize(&self.similarity, key, || self.backend.similarity(a, b))
    }

    pub fn band(&self, score: f32) -> SimilarityBand {
        self.bands.classify(score)
    }

    pub fn bands(&self) -> &SimilarityBands {
        &self.bands
    }

    /// The `k` nearest notes to `path`, excluding itself.
    pub fn neighbours(&self, path: &str, k: usize) -> Result<Rc<Vec<String>>> {
        try_memoize(&self.neighbours, (path.to_string(), k), || {
            let scored = self.neighbours_with_scores(path, k)?;
            Ok(Rc::new(scored.iter().map(|(p, _)| p.clone()).collect()))
        })
    }

    pub fn neighbours_with_scores(&self, path: &str, k: usize) -> Result<Rc<Vec<(String, f32)>>> {
        try_memoize(&self.scored_neighbours, (path.to_string(), k), || {
            let Some(query) = self.backend.vector(path) else {
                return Ok(Rc::new(Vec::new()));
            };
            let mut hits = self.backend.find_similar(query, k.saturating_add(1))?;
            hits.retain(|(p, _)| p != path);
            hits.truncate(k);
            Ok(Rc::new(hits))
        })
    }

    /// Pairwise similarity matrix over `paths`, in the given order.
    ///
    /// Missing snapshots give 0 off the diagonal; the diagonal is 1 for
    /// notes with a snapshot and 0 otherwise.
    pub fn batch_similarity(&self, paths: &[String]) -> Rc<Vec<Vec<f32>>> {
        memoize(&self.batch_similarity, paths.to_vec(), || {
            let n = paths.len();
            let mut matrix = vec![vec![0.0f32; n]; n];
            for i in 0..n {
                matrix[i][i] = if self.backend.vector(&paths[i]).is_some() { 1.0 } else { 0.0 };
                for j in (i + 1)..n {
                    let score = self.similarity(&paths[i], &paths[j]).unwrap_or(0.0);
                    matrix[i][j] = score;
                    matrix[j][i] = score;
                }
            }
            Rc::new(matrix)
        })
    }

    // ── sampling ──────────────────────────────────────────────────────────

    /// `k` items drawn without replacement from the session's seeded stream.
    pub fn sample<T: Clone>(&self, items: &[T], k: usize) -> Vec<T> {
        let n = items.len();
        let k = k.min(n);
        let mut indices: Vec<usize> = (0..n).collect();
        let mut rng = self.rng.borrow_mut();
        for i in 0..k {
            let j = rng.usize(i..n);
            indices.swap(i, j);
        }
        indices[..k].iter().map(|&i| items[i].clone()).collect()
    }

    pub fn random_notes(&self, k: usize) -> Vec<Note> {
        self.sample(&self.graph.notes(), k)
    }

    // ── clusters ──────────────────────────────────────────────────────────

    pub fn get_clusters(&self, min_size: usize) -> Rc<ClusterMap> {
        self.analyser.get_clusters(min_size)
    }

    pub fn get_cluster_representatives(&self, cluster_id: i32, k: usize, clusters: &ClusterMap) -> Vec<String> {
        self.analyser.get_representatives(cluster_id, k, clusters)
    }

    // ── functions ─────────────────────────────────────────────────────────

    pub fn call(&self, name: &str, args: &[String]) -> Result<Vec<String>> {
        self.registry.call(self, name, args)
    }
}
