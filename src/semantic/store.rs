//! Per-session embedding snapshots.
//!
//! [`EmbeddingStore::ensure_embeddings`] is the write path: it finds notes
//! without a snapshot for the current session, encodes them in batches and
//! appends the rows in one transaction. Rows are never updated; a later
//! session writes its own snapshot for the same note.

use std::collections::HashSet;

use anyhow::{Context, Result};
use chrono::NaiveDate;
use rusqlite::{params, Connection, OptionalExtension};
use serde::Serialize;

use super::similarity::cosine_similarity;
use super::Snapshot;
use crate::config::EmbeddingConfig;
use crate::db::{bytes_to_vector, vector_to_bytes, with_busy_retry};
use crate::embedding::temporal::{compose_snapshot, semantic_part, SnapshotWeights};
use crate::embedding::EmbeddingProvider;
use crate::vault::{Note, Session};

/// Outcome of [`EmbeddingStore::ensure_embeddings`].
#[derive(Debug, Default, Clone, PartialEq, Serialize)]
pub struct EnsureReport {
    /// Notes encoded and written in this call.
    pub encoded: usize,
    /// Notes that already had a snapshot for this session.
    pub reused: usize,
    /// Paths the encoder failed on; they have no snapshot this session.
    pub unavailable: Vec<String>,
}

pub struct EmbeddingStore<'a> {
    conn: &'a Connection,
    encoder: &'a dyn EmbeddingProvider,
    session: Session,
    weights: SnapshotWeights,
    batch_size: usize,
}

impl<'a> EmbeddingStore<'a> {
    pub fn new(
        conn: &'a Connection,
        encoder: &'a dyn EmbeddingProvider,
        session: Session,
        config: &EmbeddingConfig,
    ) -> Self {
        Self {
            conn,
            encoder,
            session,
            weights: SnapshotWeights::from(config),
            batch_size: config.batch_size.max(1),
        }
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    pub fn encoder(&self) -> &'a dyn EmbeddingProvider {
        self.encoder
    }

    pub fn connection(&self) -> &'a Connection {
        self.conn
    }

    /// Make sure every note has a snapshot for the current session.
    ///
    /// Notes that already have one are not re-encoded, so calling this twice
    /// with the same notes costs nothing the second time. Encoder failures
    /// are reported in [`EnsureReport::unavailable`], not raised.
    pub fn ensure_embeddings(&self, notes: &[Note]) -> Result<EnsureReport> {
        let existing = self.existing_paths()?;

        let mut seen = HashSet::new();
        let mut report = EnsureReport::default();
        let mut missing: Vec<&Note> = Vec::new();
        for note in notes {
            if !seen.insert(note.path.as_str()) {
                continue;
            }
            if existing.contains(&note.path) {
                report.reused += 1;
            } else {
                missing.push(note);
            }
        }

        if missing.is_empty() {
            tracing::debug!(reused = report.reused, "all snapshots present");
            return Ok(report);
        }

        let mut rows: Vec<(&str, Vec<f32>)> = Vec::with_capacity(missing.len());
        for batch in missing.chunks(self.batch_size) {
            let texts: Vec<String> = batch.iter().map(|n| n.embedding_text()).collect();
            let refs: Vec<&str> = texts.iter().map(String::as_str).collect();
            tracing::debug!(batch = batch.len(), "encoding notes");

            let vectors: Vec<Option<Vec<f32>>> = match self.encoder.embed_batch(&refs) {
                Ok(vectors) if vectors.len() == batch.len() => vectors.into_iter().map(Some).collect(),
                Ok(vectors) => {
                    tracing::warn!(
                        expected = batch.len(),
                        got = vectors.len(),
                        "encoder returned the wrong number of vectors; retrying one by one"
                    );
                    self.encode_each(&refs)
                }
                Err(err) => {
                    tracing::warn!(error = %err, batch = batch.len(), "batch encoding failed; retrying one by one");
                    self.encode_each(&refs)
                }
            };

            for (note, semantic) in batch.iter().zip(vectors) {
                match semantic {
                    Some(semantic) => {
                        let snapshot =
                            compose_snapshot(&semantic, note.created, self.session.date, self.weights);
                        rows.push((note.path.as_str(), snapshot));
                    }
                    None => report.unavailable.push(note.path.clone()),
                }
            }
        }

        report.encoded = self.write_snapshots(&rows)?;
        tracing::info!(
            session_id = self.session.id,
            encoded = report.encoded,
            reused = report.reused,
            unavailable = report.unavailable.len(),
            "snapshots ensured"
        );
        Ok(report)
    }

    /// Encode texts singly after a failed batch; `None` where the encoder still fails.
    fn encode_each(&self, texts: &[&str]) -> Vec<Option<Vec<f32>>> {
        texts
            .iter()
            .map(|text| match self.encoder.embed(text) {
                Ok(vector) => Some(vector),
                Err(err) => {
                    tracing::warn!(error = %err, "encoder failed on note text");
                    None
                }
            })
            .collect()
    }

    fn existing_paths(&self) -> Result<HashSet<String>> {
        let mut stmt = self
            .conn
            .prepare_cached("SELECT note_path FROM embeddings WHERE session_id = ?1")?;
        let paths = stmt
            .query_map(params![self.session.id], |row| row.get(0))?
            .collect::<Result<HashSet<String>, _>>()?;
        Ok(paths)
    }

    /// Append rows in one transaction. Returns how many were new.
    fn write_snapshots(&self, rows: &[(&str, Vec<f32>)]) -> Result<usize> {
        if rows.is_empty() {
            return Ok(0);
        }
        with_busy_retry(|| {
            let tx = self.conn.unchecked_transaction()?;
            let now = chrono::Utc::now().to_rfc3339();
            let mut written = 0;
            {
                let mut stmt = tx.prepare_cached(
                    "INSERT OR IGNORE INTO embeddings (session_id, note_path, vector, dimensions, created_at) \
                     VALUES (?1, ?2, ?3, ?4, ?5)",
                )?;
                for (path, vector) in rows {
                    written += stmt.execute(params![
                        self.session.id,
                        path,
                        vector_to_bytes(vector),
                        vector.len() as i64,
                        now,
                    ])?;
                }
            }
            tx.commit()?;
            Ok(written)
        })
        .context("failed to write embedding snapshots")
    }

    /// Snapshot of `path` in the current session.
    pub fn current(&self, path: &str) -> Result<Option<Snapshot>> {
        self.historical(path, self.session.id)
    }

    /// Snapshot of `path` in an arbitrary session.
    pub fn historical(&self, path: &str, session_id: i64) -> Result<Option<Snapshot>> {
        let bytes: Option<Vec<u8>> = self
            .conn
            .query_row(
                "SELECT vector FROM embeddings WHERE session_id = ?1 AND note_path = ?2",
                params![session_id, path],
                |row| row.get(0),
            )
            .optional()?;
        Ok(bytes.map(|b| Snapshot {
            session_id,
            path: path.to_string(),
            vector: bytes_to_vector(&b),
        }))
    }

    /// Every snapshot of the current session, sorted by path.
    pub fn session_snapshots(&self) -> Result<Vec<Snapshot>> {
        let mut stmt = self.conn.prepare_cached(
            "SELECT note_path, vector FROM embeddings WHERE session_id = ?1 ORDER BY note_path",
        )?;
        let session_id = self.session.id;
        let snapshots = stmt
            .query_map(params![session_id], |row| {
                let bytes: Vec<u8> = row.get(1)?;
                Ok(Snapshot {
                    session_id,
                    path: row.get(0)?,
                    vector: bytes_to_vector(&bytes),
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(snapshots)
    }

    /// All snapshots of `path` across sessions, oldest session first.
    pub fn trajectory(&self, path: &str) -> Result<Vec<(NaiveDate, Snapshot)>> {
        let mut stmt = self.conn.prepare_cached(
            "SELECT s.session_date, e.session_id, e.vector \
             FROM embeddings e JOIN sessions s ON s.id = e.session_id \
             WHERE e.note_path = ?1 ORDER BY s.session_date",
        )?;
        let rows = stmt
            .query_map(params![path], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, i64>(1)?,
                    row.get::<_, Vec<u8>>(2)?,
                ))
            })?
            .collect::<Result<Vec<_>, _>>()?;

        rows.into_iter()
            .map(|(date, session_id, bytes)| {
                let date = NaiveDate::parse_from_str(&date, "%Y-%m-%d")
                    .with_context(|| format!("bad session date {date:?}"))?;
                Ok((
                    date,
                    Snapshot {
                        session_id,
                        path: path.to_string(),
                        vector: bytes_to_vector(&bytes),
                    },
                ))
            })
            .collect()
    }

    /// How far a note's meaning moved between its first and latest snapshot,
    /// as `1 - cosine` over the semantic part. `None` with fewer than two.
    pub fn drift(&self, path: &str) -> Result<Option<f32>> {
        let trajectory = self.trajectory(path)?;
        let (Some((_, first)), Some((_, last))) = (trajectory.first(), trajectory.last()) else {
            return Ok(None);
        };
        if trajectory.len() < 2 {
            return Ok(None);
        }
        let similarity = cosine_similarity(semantic_part(&first.vector), semantic_part(&last.vector));
        Ok(Some(1.0 - similarity))
    }
}
