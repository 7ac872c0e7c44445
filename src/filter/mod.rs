//! Suggestion filter pipeline.
//!
//! Analyzers hand candidate [`Suggestion`]s to a [`FilterPipeline`], which
//! runs the strategies named in `filter.strategies` in order. The first
//! strategy that drops a candidate decides its fate; survivors are appended
//! to `suggestion_history` straight away, so the next candidate in the same
//! batch is already compared against them.

pub mod history;

use std::cell::RefCell;
use std::collections::{HashMap, HashSet};
use std::rc::Rc;

use anyhow::Result;
use chrono::NaiveDate;
use rusqlite::Connection;
use serde::{Deserialize, Serialize};

use crate::config::FilterConfig;
use crate::embedding::EmbeddingProvider;
use crate::error::ConfigError;
use crate::semantic::similarity::cosine_similarity;
use crate::vault::NoteGraph;
use history::HistoryEntry;

/// A candidate piece of output from an analyzer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Suggestion {
    pub analyzer_id: String,
    pub text: String,
    /// Note paths or titles the text refers to.
    pub notes: Vec<String>,
    pub title: Option<String>,
}

impl Suggestion {
    pub fn new(analyzer_id: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            analyzer_id: analyzer_id.into(),
            text: text.into(),
            notes: Vec::new(),
            title: None,
        }
    }

    pub fn with_notes<I, S>(mut self, notes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.notes = notes.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    Keep,
    Drop(String),
}

/// What a strategy may consult while judging one candidate.
pub struct FilterContext<'c> {
    pub session_date: NaiveDate,
    pub graph: &'c dyn NoteGraph,
    pub encoder: &'c dyn EmbeddingProvider,
    /// Windowed history plus everything accepted so far this run.
    pub history: &'c [HistoryEntry],
    embeddings: RefCell<HashMap<String, Option<Rc<Vec<f32>>>>>,
}

impl<'c> FilterContext<'c> {
    pub fn new(
        session_date: NaiveDate,
        graph: &'c dyn NoteGraph,
        encoder: &'c dyn EmbeddingProvider,
        history: &'c [HistoryEntry],
    ) -> Self {
        Self {
            session_date,
            graph,
            encoder,
            history,
            embeddings: RefCell::new(HashMap::new()),
        }
    }

    /// Encode `text` once per context. `None` if the encoder failed.
    pub fn embedding(&self, text: &str) -> Option<Rc<Vec<f32>>> {
        if let Some(hit) = self.embeddings.borrow().get(text) {
            return hit.clone();
        }
        let result = match self.encoder.embed(text) {
            Ok(v) => Some(Rc::new(v)),
            Err(err) => {
                tracing::warn!(error = %err, "could not embed suggestion text");
                None
            }
        };
        self.embeddings
            .borrow_mut()
            .insert(text.to_string(), result.clone());
        result
    }

    /// History entries from this session's date.
    pub fn session_entries(&self) -> impl Iterator<Item = &HistoryEntry> + '_ {
        self.history
            .iter()
            .filter(move |e| e.session_date == self.session_date)
    }
}

pub trait SuggestionFilter {
    fn check(&self, candidate: &Suggestion, ctx: &FilterContext<'_>) -> Verdict;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StrategyKind {
    Boundary,
    Quality,
    Novelty,
    Diversity,
}

impl StrategyKind {
    pub fn parse(name: &str) -> Result<Self, ConfigError> {
        match name {
            "boundary" => Ok(Self::Boundary),
            "quality" => Ok(Self::Quality),
            "novelty" => Ok(Self::Novelty),
            "diversity" => Ok(Self::Diversity),
            other => Err(ConfigError::UnknownName {
                kind: "filter strategy",
                name: other.to_string(),
            }),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Boundary => "boundary",
            Self::Quality => "quality",
            Self::Novelty => "novelty",
            Self::Diversity => "diversity",
        }
    }

    fn build(&self, config: &FilterConfig) -> Box<dyn SuggestionFilter> {
        match self {
            Self::Boundary => Box::new(BoundaryFilter),
            Self::Quality => Box::new(QualityFilter {
                min_length: config.min_length,
                max_length: config.max_length,
                max_word_repetition: config.max_word_repetition,
            }),
            Self::Novelty => Box::new(NoveltyFilter {
                threshold: config.novelty_threshold,
                window_days: config.novelty_window_days,
            }),
            Self::Diversity => Box::new(DiversityFilter {
                max_per_analyzer: config.max_per_analyzer,
                max_per_cluster: config.max_per_cluster,
                cluster_similarity: config.cluster_similarity,
            }),
        }
    }
}

impl std::fmt::Display for StrategyKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Parse the strategy list, rejecting unknown and repeated names.
pub fn parse_strategies(names: &[String]) -> Result<Vec<StrategyKind>, ConfigError> {
    let mut seen = HashSet::new();
    names
        .iter()
        .map(|name| {
            let kind = StrategyKind::parse(name)?;
            if !seen.insert(kind) {
                return Err(ConfigError::DuplicateStrategy(name.clone()));
            }
            Ok(kind)
        })
        .collect()
}

/// Check every `[filter]` setting. Called by `GeistConfig::validate` and
/// [`FilterPipeline::new`].
pub fn validate_config(config: &FilterConfig) -> Result<(), ConfigError> {
    parse_strategies(&config.strategies)?;

    if config.min_length > config.max_length {
        return Err(ConfigError::Inconsistent(format!(
            "filter.min_length ({}) exceeds filter.max_length ({})",
            config.min_length, config.max_length
        )));
    }
    if !(config.max_word_repetition > 0.0 && config.max_word_repetition <= 1.0) {
        return Err(ConfigError::out_of_range(
            "filter.max_word_repetition",
            config.max_word_repetition,
            "(0, 1]",
        ));
    }
    for (name, value) in [
        ("filter.novelty_threshold", config.novelty_threshold),
        ("filter.cluster_similarity", config.cluster_similarity),
    ] {
        if !(-1.0..=1.0).contains(&value) {
            return Err(ConfigError::out_of_range(name, value as f64, "[-1, 1]"));
        }
    }
    if config.novelty_window_days < 0 {
        return Err(ConfigError::out_of_range(
            "filter.novelty_window_days",
            config.novelty_window_days as f64,
            ">= 0",
        ));
    }
    if config.max_per_analyzer == 0 {
        return Err(ConfigError::out_of_range("filter.max_per_analyzer", 0.0, ">= 1"));
    }
    if config.max_per_cluster == Some(0) {
        return Err(ConfigError::out_of_range("filter.max_per_cluster", 0.0, ">= 1"));
    }
    Ok(())
}

/// Drops candidates that refer to notes the vault does not have.
pub struct BoundaryFilter;

impl SuggestionFilter for BoundaryFilter {
    fn check(&self, candidate: &Suggestion, ctx: &FilterContext<'_>) -> Verdict {
        match candidate.notes.iter().find(|n| ctx.graph.resolve(n).is_none()) {
            Some(missing) => Verdict::Drop(format!("references unknown note {missing:?}")),
            None => Verdict::Keep,
        }
    }
}

/// Length bounds and a cap on any single word dominating the text.
pub struct QualityFilter {
    pub min_length: usize,
    pub max_length: usize,
    pub max_word_repetition: f64,
}

/// Repetition is only judged on texts at least this many words long.
const MIN_WORDS_FOR_REPETITION: usize = 6;

impl SuggestionFilter for QualityFilter {
    fn check(&self, candidate: &Suggestion, _ctx: &FilterContext<'_>) -> Verdict {
        let length = candidate.text.trim().chars().count();
        if length < self.min_length || length > self.max_length {
            return Verdict::Drop(format!(
                "length {length} outside [{}, {}]",
                self.min_length, self.max_length
            ));
        }

        let words: Vec<String> = candidate
            .text
            .split_whitespace()
            .map(|w| {
                w.trim_matches(|c: char| !c.is_alphanumeric())
                    .to_lowercase()
            })
            .filter(|w| !w.is_empty())
            .collect();
        if words.len() < MIN_WORDS_FOR_REPETITION {
            return Verdict::Keep;
        }

        let mut counts: HashMap<&str, usize> = HashMap::new();
        for word in words.iter().filter(|w| w.chars().count() >= 3) {
            *counts.entry(word.as_str()).or_insert(0) += 1;
        }
        let total = words.len() as f64;
        let worst = counts
            .into_iter()
            .max_by(|a, b| a.1.cmp(&b.1).then_with(|| b.0.cmp(a.0)));
        match worst {
            Some((word, count)) if count as f64 / total > self.max_word_repetition => {
                Verdict::Drop(format!("{word:?} is {count} of {} words", words.len()))
            }
            _ => Verdict::Keep,
        }
    }
}

/// Drops candidates too close to something suggested recently.
///
/// Only history entries with an embedding are compared. A suggestion
/// accepted while the encoder is down is stored without one, so later
/// candidates in the same run are not checked against it; the next
/// pipeline encodes it when loading history and compares from then on.
pub struct NoveltyFilter {
    pub threshold: f32,
    pub window_days: i64,
}

impl SuggestionFilter for NoveltyFilter {
    fn check(&self, candidate: &Suggestion, ctx: &FilterContext<'_>) -> Verdict {
        let Some(embedding) = ctx.embedding(&candidate.text) else {
            // Without an embedding there is nothing to compare; keep it.
            return Verdict::Keep;
        };
        for entry in ctx.history {
            let age = entry.age_days(ctx.session_date);
            if !(0..=self.window_days).contains(&age) {
                continue;
            }
            let Some(previous) = entry.embedding.as_deref() else {
                continue;
            };
            let score = cosine_similarity(&embedding, previous);
            if score > self.threshold {
                return Verdict::Drop(format!(
                    "similarity {score:.3} to suggestion {} from {}",
                    entry.stable_id, entry.session_date
                ));
            }
        }
        Verdict::Keep
    }
}

/// Caps how much of one session's output a single analyzer or topic may take.
pub struct DiversityFilter {
    pub max_per_analyzer: usize,
    pub max_per_cluster: Option<usize>,
    pub cluster_similarity: f32,
}

impl SuggestionFilter for DiversityFilter {
    fn check(&self, candidate: &Suggestion, ctx: &FilterContext<'_>) -> Verdict {
        let from_analyzer = ctx
            .session_entries()
            .filter(|e| e.analyzer_id == candidate.analyzer_id)
            .count();
        if from_analyzer >= self.max_per_analyzer {
            return Verdict::Drop(format!(
                "analyzer {} already has {from_analyzer} suggestions this session",
                candidate.analyzer_id
            ));
        }

        let Some(cap) = self.max_per_cluster else {
            return Verdict::Keep;
        };
        let Some(embedding) = ctx.embedding(&candidate.text) else {
            return Verdict::Keep;
        };
        let same_topic = ctx
            .session_entries()
            .filter_map(|e| e.embedding.as_deref())
            .filter(|v| cosine_similarity(&embedding, v) > self.cluster_similarity)
            .count();
        if same_topic >= cap {
            return Verdict::Drop(format!("{same_topic} similar suggestions already accepted this session"));
        }
        Verdict::Keep
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Rejection {
    pub suggestion: Suggestion,
    pub stage: StrategyKind,
    pub reason: String,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct FilterReport {
    pub accepted: Vec<Suggestion>,
    pub rejected: Vec<Rejection>,
}

pub struct FilterPipeline<'a> {
    conn: &'a Connection,
    graph: &'a dyn NoteGraph,
    encoder: &'a dyn EmbeddingProvider,
    session_date: NaiveDate,
    window_days: i64,
    strategies: Vec<(StrategyKind, Box<dyn SuggestionFilter>)>,
    /// Loaded on first use, then extended with every acceptance.
    history: Option<Vec<HistoryEntry>>,
}

impl<'a> FilterPipeline<'a> {
    pub fn new(
        conn: &'a Connection,
        graph: &'a dyn NoteGraph,
        encoder: &'a dyn EmbeddingProvider,
        session_date: NaiveDate,
        config: &FilterConfig,
    ) -> Result<Self, ConfigError> {
        validate_config(config)?;
        let strategies = parse_strategies(&config.strategies)?
            .into_iter()
            .map(|kind| (kind, kind.build(config)))
            .collect();
        Ok(Self {
            conn,
            graph,
            encoder,
            session_date,
            window_days: config.novelty_window_days,
            strategies,
            history: None,
        })
    }

    /// Add a custom strategy after the configured ones, reported under `stage`.
    pub fn push(&mut self, stage: StrategyKind, filter: Box<dyn SuggestionFilter>) {
        self.strategies.push((stage, filter));
    }

    pub fn stages(&self) -> Vec<StrategyKind> {
        self.strategies.iter().map(|(kind, _)| *kind).collect()
    }

    /// Accepted candidates, in input order.
    pub fn filter_all(&mut self, candidates: impl IntoIterator<Item = Suggestion>) -> Result<Vec<Suggestion>> {
        Ok(self.filter_all_with_report(candidates)?.accepted)
    }

    pub fn filter_all_with_report(
        &mut self,
        candidates: impl IntoIterator<Item = Suggestion>,
    ) -> Result<FilterReport> {
        let mut history = match self.history.take() {
            Some(history) => history,
            None => self.load_history()?,
        };
        let result = self.run(candidates, &mut history);
        self.history = Some(history);
        result
    }

    fn run(
        &self,
        candidates: impl IntoIterator<Item = Suggestion>,
        history: &mut Vec<HistoryEntry>,
    ) -> Result<FilterReport> {
        let mut report = FilterReport::default();
        for candidate in candidates {
            let (verdict, embedding) = {
                let ctx = FilterContext::new(self.session_date, self.graph, self.encoder, history.as_slice());
                let verdict = self.strategies.iter().find_map(|(stage, filter)| {
                    match filter.check(&candidate, &ctx) {
                        Verdict::Keep => None,
                        Verdict::Drop(reason) => Some((*stage, reason)),
                    }
                });
                let embedding = match verdict {
                    None => ctx.embedding(&candidate.text),
                    Some(_) => None,
                };
                (verdict, embedding)
            };

            match verdict {
                Some((stage, reason)) => {
                    tracing::debug!(analyzer = %candidate.analyzer_id, %stage, %reason, "suggestion rejected");
                    report.rejected.push(Rejection {
                        suggestion: candidate,
                        stage,
                        reason,
                    });
                }
                None => {
                    let entry = history::append(
                        self.conn,
                        &candidate,
                        self.session_date,
                        embedding.as_deref().map(Vec::as_slice),
                    )?;
                    history.push(entry);
                    report.accepted.push(candidate);
                }
            }
        }

        tracing::info!(
            accepted = report.accepted.len(),
            rejected = report.rejected.len(),
            "suggestions filtered"
        );
        Ok(report)
    }

    /// Windowed history with every embedding filled in where the encoder allows.
    fn load_history(&self) -> Result<Vec<HistoryEntry>> {
        let mut entries = history::load_window(self.conn, self.session_date, self.window_days)?;
        let missing: Vec<usize> = entries
            .iter()
            .enumerate()
            .filter(|(_, e)| e.embedding.is_none())
            .map(|(i, _)| i)
            .collect();
        if missing.is_empty() {
            return Ok(entries);
        }

        let texts: Vec<&str> = missing.iter().map(|&i| entries[i].text.as_str()).collect();
        match self.encoder.embed_batch(&texts) {
            Ok(vectors) if vectors.len() == missing.len() => {
                for (i, vector) in missing.into_iter().zip(vectors) {
                    history::cache_embedding(self.conn, &entries[i].stable_id, &vector)?;
                    entries[i].embedding = Some(vector);
                }
            }
            Ok(_) => tracing::warn!("encoder returned the wrong number of history embeddings"),
            Err(err) => tracing::warn!(error = %err, "could not embed suggestion history"),
        }
        Ok(entries)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vault::{InMemoryVault, Note};

    struct FixedEncoder;

    impl EmbeddingProvider for FixedEncoder {
        fn embed(&self, text: &str) -> Result<Vec<f32>> {
            Ok(if text.contains("garden") {
                vec![1.0, 0.0]
            } else {
                vec![0.0, 1.0]
            })
        }
    }

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn config(strategies: &[&str]) -> FilterConfig {
        FilterConfig {
            strategies: strategies.iter().map(|s| s.to_string()).collect(),
            ..FilterConfig::default()
        }
    }

    fn vault() -> InMemoryVault {
        InMemoryVault::new(vec![Note::new("rust.md", "Rust", "")])
    }

    #[test]
    fn validate_rejects_bad_settings() {
        assert!(matches!(
            validate_config(&config(&["quality", "spelling"])),
            Err(ConfigError::UnknownName { .. })
        ));
        assert!(matches!(
            validate_config(&config(&["quality", "quality"])),
            Err(ConfigError::DuplicateStrategy(_))
        ));
        let mut c = config(&[]);
        c.min_length = 500;
        c.max_length = 10;
        assert!(matches!(validate_config(&c), Err(ConfigError::Inconsistent(_))));
        let mut c = config(&[]);
        c.novelty_threshold = 1.5;
        assert!(validate_config(&c).is_err());
        let mut c = config(&[]);
        c.max_per_cluster = Some(0);
        assert!(validate_config(&c).is_err());
        assert!(validate_config(&FilterConfig::default()).is_ok());
    }

    #[test]
    fn quality_checks_length_and_repetition() {
        let vault = vault();
        let ctx = FilterContext::new(date(2026, 1, 1), &vault, &FixedEncoder, &[]);
        let q = QualityFilter {
            min_length: 10,
            max_length: 200,
            max_word_repetition: 0.4,
        };
        assert_eq!(q.check(&Suggestion::new("a", "short"), &ctx), Verdict::Drop("length 5 outside [10, 200]".into()));
        assert_eq!(q.check(&Suggestion::new("a", "x".repeat(150)), &ctx), Verdict::Keep);
        assert!(matches!(q.check(&Suggestion::new("a", "x".repeat(300)), &ctx), Verdict::Drop(_)));
        assert!(matches!(
            q.check(&Suggestion::new("a", "notes notes notes notes about things"), &ctx),
            Verdict::Drop(_)
        ));
        // Short words do not count towards repetition.
        assert_eq!(
            q.check(&Suggestion::new("a", "a a a a a garden plan today"), &ctx),
            Verdict::Keep
        );
    }

    #[test]
    fn boundary_requires_known_notes() {
        let vault = vault();
        let ctx = FilterContext::new(date(2026, 1, 1), &vault, &FixedEncoder, &[]);
        let known = Suggestion::new("a", "about rust").with_notes(["Rust"]);
        let unknown = Suggestion::new("a", "about ghosts").with_notes(["rust.md", "ghost.md"]);
        assert_eq!(BoundaryFilter.check(&known, &ctx), Verdict::Keep);
        assert!(matches!(BoundaryFilter.check(&unknown, &ctx), Verdict::Drop(r) if r.contains("ghost.md")));
    }

    #[test]
    fn empty_pipeline_passes_everything() {
        let conn = crate::db::open_in_memory().unwrap();
        let vault = vault();
        let mut pipeline =
            FilterPipeline::new(&conn, &vault, &FixedEncoder, date(2026, 1, 1), &config(&[])).unwrap();
        let out = pipeline
            .filter_all(vec![Suggestion::new("a", "x"), Suggestion::new("b", "garden garden")])
            .unwrap();
        assert_eq!(out.len(), 2);
    }

    #[test]
    fn accepted_suggestions_suppress_later_duplicates_in_same_batch() {
        let conn = crate::db::open_in_memory().unwrap();
        let vault = vault();
        let mut pipeline =
            FilterPipeline::new(&conn, &vault, &FixedEncoder, date(2026, 1, 1), &config(&["novelty"])).unwrap();
        let report = pipeline
            .filter_all_with_report(vec![
                Suggestion::new("a", "plant a garden"),
                Suggestion::new("b", "garden again"),
                Suggestion::new("c", "something else"),
            ])
            .unwrap();
        assert_eq!(report.accepted.len(), 2);
        assert_eq!(report.rejected.len(), 1);
        assert_eq!(report.rejected[0].stage, StrategyKind::Novelty);
        assert_eq!(report.rejected[0].suggestion.analyzer_id, "b");
    }

    #[test]
    fn diversity_caps_per_analyzer() {
        let conn = crate::db::open_in_memory().unwrap();
        let vault = vault();
        let mut c = config(&["diversity"]);
        c.max_per_analyzer = 2;
        let mut pipeline = FilterPipeline::new(&conn, &vault, &FixedEncoder, date(2026, 1, 1), &c).unwrap();
        let out = pipeline
            .filter_all((0..4).map(|i| Suggestion::new("same", format!("idea {i}"))))
            .unwrap();
        assert_eq!(out.len(), 2);
    }

    #[test]
    fn diversity_caps_per_topic() {
        let conn = crate::db::open_in_memory().unwrap();
        let vault = vault();
        let mut c = config(&["diversity"]);
        c.max_per_cluster = Some(1);
        let mut pipeline = FilterPipeline::new(&conn, &vault, &FixedEncoder, date(2026, 1, 1), &c).unwrap();
        let out = pipeline
            .filter_all(vec![
                Suggestion::new("a", "garden one"),
                Suggestion::new("b", "garden two"),
                Suggestion::new("c", "elsewhere"),
            ])
            .unwrap();
        let analyzers: Vec<&str> = out.iter().map(|s| s.analyzer_id.as_str()).collect();
        assert_eq!(analyzers, vec!["a", "c"]);
    }

    #[test]
    fn first_failing_stage_is_reported() {
        let conn = crate::db::open_in_memory().unwrap();
        let vault = vault();
        let mut c = config(&["quality", "boundary"]);
        c.max_length = 200;
        let mut pipeline = FilterPipeline::new(&conn, &vault, &FixedEncoder, date(2026, 1, 1), &c).unwrap();
        let long = Suggestion::new("a", "y".repeat(300)).with_notes(["nowhere.md"]);
        let report = pipeline.filter_all_with_report(vec![long]).unwrap();
        assert_eq!(report.rejected[0].stage, StrategyKind::Quality);
    }
}
