//! Pluggable per-note metadata.
//!
//! Each [`MetadataInferrer`] contributes keys to a note's [`Metadata`]; the
//! context merges them in registration order, later keys overwriting earlier
//! ones. An inferrer that errors is logged and skipped.

use std::collections::BTreeMap;

use anyhow::Result;
use serde_json::{json, Value};

use super::VaultContext;
use crate::vault::Note;

pub type Metadata = BTreeMap<String, Value>;

pub trait MetadataInferrer {
    fn name(&self) -> &str;

    fn infer(&self, note: &Note, ctx: &VaultContext<'_>) -> Result<Metadata>;
}

/// An inferrer producing a single key from a plain function.
pub struct FnInferrer {
    name: &'static str,
    f: fn(&Note, &VaultContext<'_>) -> Result<Value>,
}

impl FnInferrer {
    pub const fn new(name: &'static str, f: fn(&Note, &VaultContext<'_>) -> Result<Value>) -> Self {
        Self { name, f }
    }
}

impl MetadataInferrer for FnInferrer {
    fn name(&self) -> &str {
        self.name
    }

    fn infer(&self, note: &Note, ctx: &VaultContext<'_>) -> Result<Metadata> {
        let value = (self.f)(note, ctx)?;
        Ok(Metadata::from([(self.name.to_string(), value)]))
    }
}

fn word_count(note: &Note, _ctx: &VaultContext<'_>) -> Result<Value> {
    Ok(json!(note.content.split_whitespace().count()))
}

fn link_count(note: &Note, _ctx: &VaultContext<'_>) -> Result<Value> {
    Ok(json!(note.links.len()))
}

fn backlink_count(note: &Note, ctx: &VaultContext<'_>) -> Result<Value> {
    Ok(json!(ctx.backlinks(&note.path).len()))
}

fn age_days(note: &Note, ctx: &VaultContext<'_>) -> Result<Value> {
    let days = (ctx.session().date - note.created.date_naive()).num_days();
    Ok(json!(days.max(0)))
}

fn tag_count(note: &Note, _ctx: &VaultContext<'_>) -> Result<Value> {
    Ok(json!(note.tags.len()))
}

/// `word_count`, `link_count`, `backlink_count`, `age_days`, `tag_count`.
pub fn builtin_inferrers() -> Vec<Box<dyn MetadataInferrer>> {
    vec![
        Box::new(FnInferrer::new("word_count", word_count)),
        Box::new(FnInferrer::new("link_count", link_count)),
        Box::new(FnInferrer::new("backlink_count", backlink_count)),
        Box::new(FnInferrer::new("age_days", age_days)),
        Box::new(FnInferrer::new("tag_count", tag_count)),
    ]
}
