//! SQL DDL for all persisted tables.
//!
//! Defines `sessions`, `embeddings` (append-only snapshots keyed by session and
//! note path), `suggestion_history` (append-only accepted output) and
//! `schema_meta`. The cached suggestion embedding column is added by
//! migration v2. All DDL uses `IF NOT EXISTS` for idempotent initialization.

use rusqlite::Connection;

const SCHEMA_SQL: &str = r#"
-- One row per analysis run; the date is the natural key.
CREATE TABLE IF NOT EXISTS sessions (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    session_date TEXT NOT NULL UNIQUE,
    created_at TEXT NOT NULL
);

-- Embedding snapshots. Never updated; a later session writes its own row.
CREATE TABLE IF NOT EXISTS embeddings (
    session_id INTEGER NOT NULL REFERENCES sessions(id) ON DELETE CASCADE,
    note_path TEXT NOT NULL,
    vector BLOB NOT NULL,
    dimensions INTEGER NOT NULL,
    created_at TEXT NOT NULL,
    PRIMARY KEY (session_id, note_path)
);

CREATE INDEX IF NOT EXISTS idx_embeddings_path ON embeddings(note_path);

-- Accepted suggestions, read back by the novelty filter.
CREATE TABLE IF NOT EXISTS suggestion_history (
    stable_id TEXT PRIMARY KEY,
    session_date TEXT NOT NULL,
    analyzer_id TEXT NOT NULL,
    text TEXT NOT NULL,
    title TEXT,
    notes TEXT NOT NULL DEFAULT '[]',
    created_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_history_date ON suggestion_history(session_date);
CREATE INDEX IF NOT EXISTS idx_history_analyzer ON suggestion_history(analyzer_id);

-- Schema metadata
CREATE TABLE IF NOT EXISTS schema_meta (
    key TEXT PRIMARY KEY,
    value TEXT NOT NULL
);
"#;

/// Initialize all schema tables. Idempotent (uses IF NOT EXISTS).
pub fn init_schema(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(SCHEMA_SQL)?;

    conn.execute(
        "INSERT OR IGNORE INTO schema_meta (key, value) VALUES ('schema_version', '1')",
        [],
    )?;

    Ok(())
}
