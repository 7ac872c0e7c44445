//! Named functions analyzers can call through a context.
//!
//! Each session builds its own [`FunctionRegistry`]; nothing is global.
//! Functions take string arguments and return strings so a template or a
//! config file can refer to them by name.

use std::collections::BTreeMap;

use anyhow::{bail, Context, Result};

use super::VaultContext;

pub type RegistryFn = Box<dyn Fn(&VaultContext<'_>, &[String]) -> Result<Vec<String>>>;

#[derive(Default)]
pub struct FunctionRegistry {
    functions: BTreeMap<String, RegistryFn>,
}

impl FunctionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// `sample_notes`, `neighbours`, `backlinks` and `cluster_labels`.
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register("sample_notes", |ctx, args| {
            let k = parse_count(args, 0, "sample_notes", 1)?;
            Ok(ctx.random_notes(k).into_iter().map(|n| n.title).collect())
        });
        registry.register("neighbours", |ctx, args| {
            let note = resolve_arg(ctx, args, "neighbours")?;
            let k = parse_count(args, 1, "neighbours", 3)?;
            Ok(ctx
                .neighbours(&note.path, k)?
                .iter()
                .filter_map(|p| ctx.graph().resolve(p))
                .map(|n| n.title)
                .collect())
        });
        registry.register("backlinks", |ctx, args| {
            let note = resolve_arg(ctx, args, "backlinks")?;
            Ok(ctx.backlinks(&note.path).iter().map(|n| n.title.clone()).collect())
        });
        registry.register("cluster_labels", |ctx, args| {
            let min_size = parse_count(args, 0, "cluster_labels", ctx.default_min_cluster_size())?;
            Ok(ctx.get_clusters(min_size).values().map(|c| c.label.clone()).collect())
        });
        registry
    }

    /// Add or replace a function.
    pub fn register<F>(&mut self, name: impl Into<String>, f: F)
    where
        F: Fn(&VaultContext<'_>, &[String]) -> Result<Vec<String>> + 'static,
    {
        self.functions.insert(name.into(), Box::new(f));
    }

    pub fn contains(&self, name: &str) -> bool {
        self.functions.contains_key(name)
    }

    pub fn names(&self) -> Vec<&str> {
        self.functions.keys().map(String::as_str).collect()
    }

    pub fn call(&self, ctx: &VaultContext<'_>, name: &str, args: &[String]) -> Result<Vec<String>> {
        let Some(f) = self.functions.get(name) else {
            bail!("unknown function {name:?}; registered: {}", self.names().join(", "));
        };
        f(ctx, args).with_context(|| format!("function {name:?} failed"))
    }
}

fn parse_count(args: &[String], index: usize, function: &str, default: usize) -> Result<usize> {
    match args.get(index) {
        None => Ok(default),
        Some(raw) => raw
            .trim()
            .parse()
            .with_context(|| format!("{function}: argument {index} must be a count, got {raw:?}")),
    }
}

fn resolve_arg(ctx: &VaultContext<'_>, args: &[String], function: &str) -> Result<crate::vault::Note> {
    let Some(reference) = args.first() else {
        bail!("{function}: missing note argument");
    };
    ctx.graph()
        .resolve(reference)
        .with_context(|| format!("{function}: no note named {reference:?}"))
}
