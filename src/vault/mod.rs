//! Notes, the note graph, and analysis sessions.
//!
//! Parsing markdown into [`Note`]s and persisting them belongs to the caller;
//! this module only defines the read-only shape the analysis layer consumes
//! ([`NoteGraph`]) and an in-memory graph that resolves already-parsed links.

pub mod session;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::{BTreeSet, HashMap};
use std::hash::{Hash, Hasher};

pub use session::Session;

/// A note in the vault. Identity is the path; every other field is payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Note {
    /// Vault-relative path, e.g. `"projects/geist.md"`.
    pub path: String,
    pub title: String,
    pub content: String,
    pub created: DateTime<Utc>,
    pub modified: DateTime<Utc>,
    /// Raw link targets as written in the note (`[[Target]]` → `"Target"`).
    pub links: Vec<String>,
    pub tags: Vec<String>,
}

impl Note {
    /// Minimal note with `created == modified == now`; mostly for tests and fixtures.
    pub fn new(path: impl Into<String>, title: impl Into<String>, content: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            path: path.into(),
            title: title.into(),
            content: content.into(),
            created: now,
            modified: now,
            links: Vec::new(),
            tags: Vec::new(),
        }
    }

    pub fn with_links<I, S>(mut self, links: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.links = links.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags = tags.into_iter().map(Into::into).collect();
        self
    }

    pub fn created_at(mut self, created: DateTime<Utc>) -> Self {
        self.created = created;
        if self.modified < created {
            self.modified = created;
        }
        self
    }

    /// Text handed to the encoder.
    pub fn embedding_text(&self) -> String {
        crate::embedding::note_text(&self.title, &self.content)
    }
}

impl PartialEq for Note {
    fn eq(&self, other: &Self) -> bool {
        self.path == other.path
    }
}

impl Eq for Note {}

impl Hash for Note {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.path.hash(state);
    }
}

impl PartialOrd for Note {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Note {
    fn cmp(&self, other: &Self) -> Ordering {
        self.path.cmp(&other.path)
    }
}

/// Read-only view of the vault's notes and link structure.
pub trait NoteGraph {
    /// All notes, sorted by path.
    fn notes(&self) -> Vec<Note>;

    /// Look up a note by path, title, or link-style name.
    fn resolve(&self, reference: &str) -> Option<Note>;

    /// Notes whose links resolve to `path`.
    fn backlinks(&self, path: &str) -> Vec<Note>;

    /// Notes that `path` links to (unresolvable links are skipped).
    fn outgoing_links(&self, path: &str) -> Vec<Note>;
}

/// A [`NoteGraph`] over an in-memory note set with links resolved up front.
#[derive(Debug, Default, Clone)]
pub struct InMemoryVault {
    notes: HashMap<String, Note>,
    /// Lowercased title / stem → path.
    names: HashMap<String, String>,
    outgoing: HashMap<String, BTreeSet<String>>,
    incoming: HashMap<String, BTreeSet<String>>,
}

impl InMemoryVault {
    /// Build the graph. A later note with the same path replaces an earlier one.
    pub fn new(notes: impl IntoIterator<Item = Note>) -> Self {
        let mut vault = Self::default();
        for note in notes {
            vault.names.insert(note.title.to_lowercase(), note.path.clone());
            vault.names.insert(path_stem(&note.path).to_lowercase(), note.path.clone());
            vault.notes.insert(note.path.clone(), note);
        }

        let edges: Vec<(String, String)> = vault
            .notes
            .values()
            .flat_map(|note| {
                note.links
                    .iter()
                    .filter_map(|target| vault.resolve_path(target))
                    .filter(|target| *target != note.path)
                    .map(|target| (note.path.clone(), target))
                    .collect::<Vec<_>>()
            })
            .collect();

        for (from, to) in edges {
            vault.outgoing.entry(from.clone()).or_default().insert(to.clone());
            vault.incoming.entry(to).or_default().insert(from);
        }

        tracing::debug!(notes = vault.notes.len(), "vault graph built");
        vault
    }

    pub fn len(&self) -> usize {
        self.notes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.notes.is_empty()
    }

    fn resolve_path(&self, reference: &str) -> Option<String> {
        let reference = reference.trim();
        // `[[Target|alias]]` and `[[Target#heading]]` both point at Target.
        let reference = reference
            .split(['|', '#'])
            .next()
            .unwrap_or(reference)
            .trim();
        if self.notes.contains_key(reference) {
            return Some(reference.to_string());
        }
        let with_ext = format!("{reference}.md");
        if self.notes.contains_key(&with_ext) {
            return Some(with_ext);
        }
        self.names.get(&reference.to_lowercase()).cloned()
    }

    fn collect(&self, paths: Option<&BTreeSet<String>>) -> Vec<Note> {
        paths
            .into_iter()
            .flatten()
            .filter_map(|p| self.notes.get(p).cloned())
            .collect()
    }
}

impl NoteGraph for InMemoryVault {
    fn notes(&self) -> Vec<Note> {
        let mut notes: Vec<Note> = self.notes.values().cloned().collect();
        notes.sort();
        notes
    }

    fn resolve(&self, reference: &str) -> Option<Note> {
        self.resolve_path(reference)
            .and_then(|p| self.notes.get(&p).cloned())
    }

    fn backlinks(&self, path: &str) -> Vec<Note> {
        self.collect(self.incoming.get(path))
    }

    fn outgoing_links(&self, path: &str) -> Vec<Note> {
        self.collect(self.outgoing.get(path))
    }
}

fn path_stem(path: &str) -> &str {
    let file = path.rsplit('/').next().unwrap_or(path);
    file.strip_suffix(".md").unwrap_or(file)
}
