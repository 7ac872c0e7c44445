//! Session-scoped semantic cache and analysis layer for linked-note vaults.
//!
//! Geist sits between a vault of markdown notes and the analyzers that mine it
//! for suggestions. Each run opens a **session** keyed by its calendar date;
//! within a session every note gets one embedding snapshot, every expensive
//! query is computed once, and every suggestion an analyzer produces passes a
//! filter pipeline before it is accepted and written to history.
//!
//! # Architecture
//!
//! - **Storage**: SQLite holding sessions, per-session snapshots and suggestion
//!   history; [sqlite-vec](https://github.com/asg017/sqlite-vec) provides an
//!   optional KNN index over the current session
//! - **Embeddings**: local ONNX Runtime with all-MiniLM-L6-v2 (384 dimensions)
//!   plus a small temporal tail derived from note timestamps
//! - **Clustering**: HDBSCAN over the session's snapshots, labelled by TF-IDF
//!   terms or by embedding similarity of candidate phrases
//!
//! # Modules
//!
//! - [`config`]: configuration from TOML files and environment variables
//! - [`db`]: SQLite initialization, schema, migrations and health checks
//! - [`embedding`]: encoder trait, ONNX implementation and snapshot composition
//! - [`vault`]: notes, the note graph and sessions
//! - [`semantic`]: the embedding store, similarity bands and vector backends
//! - [`context`]: the per-session memoizing query layer analyzers call into
//! - [`cluster`]: density clustering and cluster labelling
//! - [`filter`]: the suggestion filter pipeline and its history

pub mod cluster;
pub mod config;
pub mod context;
pub mod db;
pub mod embedding;
pub mod error;
pub mod filter;
pub mod semantic;
pub mod vault;
