//! Persisted suggestion history.
//!
//! Rows are append-only. The one exception is the `embedding` column, a cache
//! filled the first time an entry's text is encoded.

use anyhow::{Context, Result};
use chrono::NaiveDate;
use rusqlite::{params, Connection};
use serde::Serialize;

use super::Suggestion;
use crate::db::{bytes_to_vector, vector_to_bytes, with_busy_retry};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HistoryEntry {
    pub stable_id: String,
    pub session_date: NaiveDate,
    pub analyzer_id: String,
    pub text: String,
    pub title: Option<String>,
    pub notes: Vec<String>,
    #[serde(skip)]
    pub embedding: Option<Vec<f32>>,
    pub created_at: String,
}

impl HistoryEntry {
    /// Whole days between this entry's session and `date` (negative if later).
    pub fn age_days(&self, date: NaiveDate) -> i64 {
        (date - self.session_date).num_days()
    }
}

/// Record an accepted suggestion. Returns the stored entry.
pub fn append(
    conn: &Connection,
    suggestion: &Suggestion,
    session_date: NaiveDate,
    embedding: Option<&[f32]>,
) -> Result<HistoryEntry> {
    let entry = HistoryEntry {
        stable_id: uuid::Uuid::now_v7().to_string(),
        session_date,
        analyzer_id: suggestion.analyzer_id.clone(),
        text: suggestion.text.clone(),
        title: suggestion.title.clone(),
        notes: suggestion.notes.clone(),
        embedding: embedding.map(<[f32]>::to_vec),
        created_at: chrono::Utc::now().to_rfc3339(),
    };
    let notes_json = serde_json::to_string(&entry.notes)?;
    let blob = entry.embedding.as_deref().map(vector_to_bytes);

    with_busy_retry(|| {
        conn.execute(
            "INSERT INTO suggestion_history \
             (stable_id, session_date, analyzer_id, text, title, notes, embedding, created_at) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                entry.stable_id,
                entry.session_date.to_string(),
                entry.analyzer_id,
                entry.text,
                entry.title,
                notes_json,
                blob,
                entry.created_at,
            ],
        )?;
        Ok(())
    })
    .context("failed to append suggestion history")?;

    tracing::debug!(stable_id = %entry.stable_id, analyzer = %entry.analyzer_id, "suggestion recorded");
    Ok(entry)
}

/// Entries from the `window_days` days up to and including `session_date`,
/// oldest first.
pub fn load_window(conn: &Connection, session_date: NaiveDate, window_days: i64) -> Result<Vec<HistoryEntry>> {
    let since = session_date - chrono::Duration::days(window_days.max(0));
    let mut stmt = conn.prepare_cached(
        "SELECT stable_id, session_date, analyzer_id, text, title, notes, embedding, created_at \
         FROM suggestion_history \
         WHERE session_date >= ?1 AND session_date <= ?2 \
         ORDER BY session_date, created_at",
    )?;
    let rows = stmt
        .query_map(params![since.to_string(), session_date.to_string()], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, String>(3)?,
                row.get::<_, Option<String>>(4)?,
                row.get::<_, String>(5)?,
                row.get::<_, Option<Vec<u8>>>(6)?,
                row.get::<_, String>(7)?,
            ))
        })?
        .collect::<Result<Vec<_>, _>>()?;

    rows.into_iter()
        .map(|(stable_id, date, analyzer_id, text, title, notes, embedding, created_at)| {
            Ok(HistoryEntry {
                session_date: NaiveDate::parse_from_str(&date, "%Y-%m-%d")
                    .with_context(|| format!("bad session date {date:?} in history row {stable_id}"))?,
                notes: serde_json::from_str(&notes)
                    .with_context(|| format!("bad notes JSON in history row {stable_id}"))?,
                embedding: embedding.map(|b| bytes_to_vector(&b)),
                stable_id,
                analyzer_id,
                text,
                title,
                created_at,
            })
        })
        .collect()
}

/// Fill the cached embedding of an entry that has none yet.
pub fn cache_embedding(conn: &Connection, stable_id: &str, embedding: &[f32]) -> Result<()> {
    let blob = vector_to_bytes(embedding);
    with_busy_retry(|| {
        conn.execute(
            "UPDATE suggestion_history SET embedding = ?1 WHERE stable_id = ?2 AND embedding IS NULL",
            params![blob, stable_id],
        )?;
        Ok(())
    })
}
