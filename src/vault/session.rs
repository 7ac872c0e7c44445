//! Analysis sessions.
//!
//! A session is one run over the vault, keyed by its calendar date. Opening a
//! session for a date that already has a row reuses that row, so re-running
//! on the same day sees the snapshots written earlier that day.

use anyhow::{Context, Result};
use chrono::{Datelike, NaiveDate};
use rusqlite::{params, Connection, OptionalExtension};
use serde::Serialize;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Session {
    pub id: i64,
    pub date: NaiveDate,
}

impl Session {
    /// Get or create the session row for `date`.
    pub fn open(conn: &Connection, date: NaiveDate) -> Result<Self> {
        let date_str = date.to_string();
        let id = crate::db::with_busy_retry(|| {
            conn.execute(
                "INSERT OR IGNORE INTO sessions (session_date, created_at) VALUES (?1, ?2)",
                params![date_str, chrono::Utc::now().to_rfc3339()],
            )?;
            let id: i64 = conn.query_row(
                "SELECT id FROM sessions WHERE session_date = ?1",
                params![date_str],
                |row| row.get(0),
            )?;
            Ok(id)
        })
        .with_context(|| format!("failed to open session for {date}"))?;

        tracing::info!(session_id = id, %date, "session opened");
        Ok(Self { id, date })
    }

    /// Look up an existing session without creating one.
    pub fn find(conn: &Connection, date: NaiveDate) -> Result<Option<Self>> {
        let id: Option<i64> = conn
            .query_row(
                "SELECT id FROM sessions WHERE session_date = ?1",
                params![date.to_string()],
                |row| row.get(0),
            )
            .optional()?;
        Ok(id.map(|id| Self { id, date }))
    }

    /// Deterministic RNG seed: the date as the integer `YYYYMMDD`.
    pub fn seed(&self) -> u64 {
        seed_for(self.date)
    }

    /// A fresh generator positioned at the start of this session's sequence.
    pub fn rng(&self) -> fastrand::Rng {
        fastrand::Rng::with_seed(self.seed())
    }
}

pub fn seed_for(date: NaiveDate) -> u64 {
    date.year() as u64 * 10_000 + date.month() as u64 * 100 + date.day() as u64
}

/// One row of [`list_sessions`].
#[derive(Debug, Serialize)]
pub struct SessionSummary {
    pub id: i64,
    pub date: String,
    pub snapshot_count: u64,
}

/// All sessions, newest first, with how many snapshots each holds.
pub fn list_sessions(conn: &Connection) -> Result<Vec<SessionSummary>> {
    let mut stmt = conn.prepare(
        "SELECT s.id, s.session_date, COUNT(e.note_path) \
         FROM sessions s LEFT JOIN embeddings e ON e.session_id = s.id \
         GROUP BY s.id ORDER BY s.session_date DESC",
    )?;
    let rows = stmt
        .query_map([], |row| {
            Ok(SessionSummary {
                id: row.get(0)?,
                date: row.get(1)?,
                snapshot_count: row.get::<_, i64>(2)? as u64,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn seed_is_yyyymmdd() {
        assert_eq!(seed_for(date(2026, 10, 18)), 20261018);
    }

    #[test]
    fn open_is_get_or_create() {
        let conn = crate::db::open_in_memory().unwrap();
        let first = Session::open(&conn, date(2026, 1, 2)).unwrap();
        let again = Session::open(&conn, date(2026, 1, 2)).unwrap();
        let other = Session::open(&conn, date(2026, 1, 3)).unwrap();
        assert_eq!(first, again);
        assert_ne!(first.id, other.id);
    }

    #[test]
    fn find_does_not_create() {
        let conn = crate::db::open_in_memory().unwrap();
        assert!(Session::find(&conn, date(2026, 1, 2)).unwrap().is_none());
        let opened = Session::open(&conn, date(2026, 1, 2)).unwrap();
        assert_eq!(Session::find(&conn, date(2026, 1, 2)).unwrap(), Some(opened));
    }

    #[test]
    fn same_date_same_sequence() {
        let a = Session { id: 1, date: date(2026, 5, 5) };
        let b = Session { id: 9, date: date(2026, 5, 5) };
        let mut ra = a.rng();
        let mut rb = b.rng();
        let xs: Vec<u64> = (0..5).map(|_| ra.u64(..)).collect();
        let ys: Vec<u64> = (0..5).map(|_| rb.u64(..)).collect();
        assert_eq!(xs, ys);
    }

    #[test]
    fn list_sessions_counts_snapshots() {
        let conn = crate::db::open_in_memory().unwrap();
        let s = Session::open(&conn, date(2026, 1, 2)).unwrap();
        Session::open(&conn, date(2026, 1, 3)).unwrap();
        conn.execute(
            "INSERT INTO embeddings (session_id, note_path, vector, dimensions, created_at) \
             VALUES (?1, 'a.md', x'0000803f', 1, 'now')",
            params![s.id],
        )
        .unwrap();
        let sessions = list_sessions(&conn).unwrap();
        assert_eq!(sessions.len(), 2);
        assert_eq!(sessions[0].date, "2026-01-03");
        assert_eq!(sessions[1].snapshot_count, 1);
    }
}
