//! Similarity search over one session's snapshots.
//!
//! Two interchangeable backends sit behind [`VectorBackend`]:
//! - [`InMemoryBackend`]: brute-force scan of a path → vector map
//! - [`SqliteVecBackend`]: a `vec0` index in a private in-memory sqlite
//!   database, built once per session
//!
//! Both score with [`cosine_similarity`], so their answers agree to float
//! precision; the index only decides which candidates get scored.

use std::collections::{BTreeMap, BTreeSet};

use anyhow::{Context, Result};
use rusqlite::{params, Connection};

use super::similarity::{cosine_similarity, is_zero, normalize, rank};
use super::store::EmbeddingStore;
use super::Snapshot;
use crate::error::ConfigError;

/// sqlite-vec refuses KNN queries asking for more rows than this.
const SQLITE_VEC_MAX_K: usize = 4096;

/// Extra candidates fetched from the index so f32 distance ties near the
/// cut-off are still rescored exactly.
const CANDIDATE_SLACK: usize = 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendKind {
    Memory,
    SqliteVec,
}

impl BackendKind {
    pub fn parse(name: &str) -> Result<Self, ConfigError> {
        match name {
            "memory" => Ok(Self::Memory),
            "sqlite-vec" => Ok(Self::SqliteVec),
            other => Err(ConfigError::UnknownName {
                kind: "vector backend",
                name: other.to_string(),
            }),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Memory => "memory",
            Self::SqliteVec => "sqlite-vec",
        }
    }

    pub fn create(&self) -> Result<Box<dyn VectorBackend>> {
        Ok(match self {
            Self::Memory => Box::new(InMemoryBackend::new()),
            Self::SqliteVec => Box::new(SqliteVecBackend::new()?),
        })
    }
}

/// Build and load the configured backend for the store's current session.
pub fn create_backend(kind: BackendKind, store: &EmbeddingStore<'_>) -> Result<Box<dyn VectorBackend>> {
    let mut backend = kind.create()?;
    backend.load(store)?;
    tracing::info!(
        backend = kind.as_str(),
        session_id = store.session().id,
        vectors = backend.len(),
        "vector backend loaded"
    );
    Ok(backend)
}

pub trait VectorBackend {
    /// Replace the backend's contents with `snapshots`.
    fn load_snapshots(&mut self, snapshots: Vec<Snapshot>) -> Result<()>;

    /// Top `k` paths by descending similarity to `query`, ties by path.
    fn find_similar(&self, query: &[f32], k: usize) -> Result<Vec<(String, f32)>>;

    fn vector(&self, path: &str) -> Option<&[f32]>;

    /// All loaded paths, sorted.
    fn paths(&self) -> Vec<String>;

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Load the current session's snapshots from `store`.
    fn load(&mut self, store: &EmbeddingStore<'_>) -> Result<()> {
        self.load_snapshots(store.session_snapshots()?)
    }

    /// Cosine between two loaded notes; `None` if either has no snapshot.
    fn similarity(&self, a: &str, b: &str) -> Option<f32> {
        let va = self.vector(a)?;
        if a == b {
            return Some(1.0);
        }
        Some(cosine_similarity(va, self.vector(b)?))
    }
}

/// Exhaustive scan; fine for vaults up to a few thousand notes.
#[derive(Debug, Default)]
pub struct InMemoryBackend {
    vectors: BTreeMap<String, Vec<f32>>,
}

impl InMemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }
}

impl VectorBackend for InMemoryBackend {
    fn load_snapshots(&mut self, snapshots: Vec<Snapshot>) -> Result<()> {
        self.vectors = snapshots.into_iter().map(|s| (s.path, s.vector)).collect();
        Ok(())
    }

    fn find_similar(&self, query: &[f32], k: usize) -> Result<Vec<(String, f32)>> {
        Ok(exhaustive_top_k(&self.vectors, query, k))
    }

    fn vector(&self, path: &str) -> Option<&[f32]> {
        self.vectors.get(path).map(Vec::as_slice)
    }

    fn paths(&self) -> Vec<String> {
        self.vectors.keys().cloned().collect()
    }

    fn len(&self) -> usize {
        self.vectors.len()
    }
}

fn exhaustive_top_k(vectors: &BTreeMap<String, Vec<f32>>, query: &[f32], k: usize) -> Vec<(String, f32)> {
    let mut scored: Vec<(String, f32)> = vectors
        .iter()
        .map(|(path, v)| (path.clone(), cosine_similarity(query, v)))
        .collect();
    rank(&mut scored);
    scored.truncate(k);
    scored
}

/// Exact KNN through a sqlite-vec `vec0` table.
///
/// Vectors are stored L2-normalized, so ascending L2 distance is descending
/// cosine. Zero vectors and vectors whose length differs from the first
/// loaded one cannot be indexed; they are kept aside and score 0.
pub struct SqliteVecBackend {
    conn: Connection,
    vectors: BTreeMap<String, Vec<f32>>,
    unindexed: BTreeSet<String>,
    dimensions: Option<usize>,
    max_knn: usize,
}

impl SqliteVecBackend {
    pub fn new() -> Result<Self> {
        crate::db::load_sqlite_vec();
        let conn = Connection::open_in_memory().context("failed to open vector index database")?;
        Ok(Self {
            conn,
            vectors: BTreeMap::new(),
            unindexed: BTreeSet::new(),
            dimensions: None,
            max_knn: SQLITE_VEC_MAX_K,
        })
    }

    /// Cap the rows asked of one KNN query; larger requests scan exhaustively.
    pub fn with_knn_limit(mut self, limit: usize) -> Self {
        self.max_knn = limit.min(SQLITE_VEC_MAX_K);
        self
    }

    fn indexed_len(&self) -> usize {
        self.vectors.len() - self.unindexed.len()
    }
}

impl VectorBackend for SqliteVecBackend {
    fn load_snapshots(&mut self, snapshots: Vec<Snapshot>) -> Result<()> {
        self.conn.execute_batch("DROP TABLE IF EXISTS snapshot_index")?;
        self.vectors.clear();
        self.unindexed.clear();
        self.dimensions = snapshots
            .iter()
            .find(|s| !is_zero(&s.vector))
            .map(|s| s.vector.len());

        let Some(dim) = self.dimensions else {
            self.unindexed = snapshots.iter().map(|s| s.path.clone()).collect();
            self.vectors = snapshots.into_iter().map(|s| (s.path, s.vector)).collect();
            return Ok(());
        };

        self.conn.execute_batch(&format!(
            "CREATE VIRTUAL TABLE snapshot_index USING vec0(
                path TEXT PRIMARY KEY,
                embedding FLOAT[{dim}]
            );"
        ))?;

        let tx = self.conn.transaction()?;
        {
            let mut insert =
                tx.prepare("INSERT INTO snapshot_index (path, embedding) VALUES (?1, ?2)")?;
            for snapshot in &snapshots {
                if snapshot.vector.len() != dim || is_zero(&snapshot.vector) {
                    self.unindexed.insert(snapshot.path.clone());
                    continue;
                }
                let mut unit = snapshot.vector.clone();
                normalize(&mut unit);
                insert.execute(params![snapshot.path, crate::db::vector_to_bytes(&unit)])?;
            }
        }
        tx.commit()?;
        tracing::debug!(dimensions = dim, indexed = snapshots.len() - self.unindexed.len(), "vector index built");

        if !self.unindexed.is_empty() {
            tracing::debug!(count = self.unindexed.len(), "snapshots kept out of the vector index");
        }
        self.vectors = snapshots.into_iter().map(|s| (s.path, s.vector)).collect();
        Ok(())
    }

    fn find_similar(&self, query: &[f32], k: usize) -> Result<Vec<(String, f32)>> {
        if k == 0 || self.vectors.is_empty() {
            return Ok(Vec::new());
        }

        let fetch = k.saturating_add(CANDIDATE_SLACK).min(self.indexed_len());
        let indexable = Some(query.len()) == self.dimensions && !is_zero(query);
        if !indexable || fetch > self.max_knn {
            // Nothing the index can rank, or more than one KNN query returns.
            return Ok(exhaustive_top_k(&self.vectors, query, k));
        }

        let mut unit = query.to_vec();
        normalize(&mut unit);
        let mut stmt = self.conn.prepare_cached(
            "SELECT path FROM snapshot_index WHERE embedding MATCH ?1 ORDER BY distance LIMIT ?2",
        )?;
        let candidates: Vec<String> = stmt
            .query_map(params![crate::db::vector_to_bytes(&unit), fetch as i64], |row| {
                row.get(0)
            })?
            .collect::<Result<Vec<_>, _>>()?;

        let mut scored: Vec<(String, f32)> = candidates
            .into_iter()
            .chain(self.unindexed.iter().cloned())
            .filter_map(|path| {
                let score = cosine_similarity(query, self.vectors.get(&path)?);
                Some((path, score))
            })
            .collect();
        rank(&mut scored);
        scored.truncate(k);
        Ok(scored)
    }

    fn vector(&self, path: &str) -> Option<&[f32]> {
        self.vectors.get(path).map(Vec::as_slice)
    }

    fn paths(&self) -> Vec<String> {
        self.vectors.keys().cloned().collect()
    }

    fn len(&self) -> usize {
        self.vectors.len()
    }
}
