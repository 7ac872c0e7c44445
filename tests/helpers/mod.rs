#![allow(dead_code)]

use std::cell::Cell;
use std::collections::HashMap;

use anyhow::Result;
use chrono::{NaiveDate, TimeZone, Utc};
use geist::config::{EmbeddingConfig, GeistConfig};
use geist::embedding::EmbeddingProvider;
use geist::vault::Note;
use rusqlite::Connection;

pub const DIM: usize = 16;

/// Open a fresh in-memory database with schema and migrations applied.
pub fn test_db() -> Connection {
    geist::db::open_in_memory().unwrap()
}

pub fn date(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).unwrap()
}

/// Config with no temporal tail, so snapshot geometry is the encoder's geometry.
pub fn test_config() -> GeistConfig {
    let mut config = GeistConfig::default();
    config.embedding = semantic_only();
    config
}

pub fn semantic_only() -> EmbeddingConfig {
    EmbeddingConfig {
        semantic_weight: 1.0,
        temporal_weight: 0.0,
        batch_size: 4,
        ..EmbeddingConfig::default()
    }
}

/// Unit vector along axis `axis`.
pub fn spike(axis: usize) -> Vec<f32> {
    let mut v = vec![0.0f32; DIM];
    v[axis % DIM] = 1.0;
    v
}

/// Unit vector whose cosine with `spike(axis)` is exactly `cos`.
pub fn at_cosine(axis: usize, cos: f32) -> Vec<f32> {
    let mut v = vec![0.0f32; DIM];
    v[axis % DIM] = cos;
    v[(axis + 1) % DIM] = (1.0 - cos * cos).max(0.0).sqrt();
    v
}

/// `base` nudged slightly towards the axis after `axis`, by `step`.
pub fn jitter(axis: usize, step: f32) -> Vec<f32> {
    let mut v = spike(axis);
    v[(axis + 2) % DIM] = step;
    let norm = v.iter().map(|x| x * x).sum::<f32>().sqrt();
    v.iter().map(|x| x / norm).collect()
}

pub fn note(path: &str, title: &str, content: &str) -> Note {
    Note::new(path, title, content).created_at(Utc.with_ymd_and_hms(2025, 6, 1, 12, 0, 0).unwrap())
}

/// Deterministic encoder keyed on the first line of each text.
///
/// Known keys map to fixed vectors; anything else hashes its words into
/// buckets. Counts calls so tests can assert on caching.
#[derive(Default)]
pub struct FakeEncoder {
    table: HashMap<String, Vec<f32>>,
    pub batch_calls: Cell<usize>,
    pub texts_encoded: Cell<usize>,
}

impl FakeEncoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, key: &str, vector: Vec<f32>) -> Self {
        self.table.insert(key.to_string(), vector);
        self
    }

    fn vector_for(&self, text: &str) -> Vec<f32> {
        let key = text.lines().next().unwrap_or("").trim();
        if let Some(v) = self.table.get(key) {
            return v.clone();
        }
        let mut v = vec![0.0f32; DIM];
        for word in text.split_whitespace() {
            let bucket = word
                .to_lowercase()
                .bytes()
                .fold(2166136261u32, |h, b| (h ^ b as u32).wrapping_mul(16777619));
            v[bucket as usize % DIM] += 1.0;
        }
        let norm = v.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm > 0.0 {
            v.iter_mut().for_each(|x| *x /= norm);
        }
        v
    }
}

impl EmbeddingProvider for FakeEncoder {
    fn embed(&self, text: &str) -> Result<Vec<f32>> {
        self.texts_encoded.set(self.texts_encoded.get() + 1);
        Ok(self.vector_for(text))
    }

    fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>> {
        self.batch_calls.set(self.batch_calls.get() + 1);
        texts.iter().map(|t| self.embed(t)).collect()
    }

    fn dimensions(&self) -> usize {
        DIM
    }
}

/// An encoder that is always unavailable.
pub struct FailingEncoder;

impl EmbeddingProvider for FailingEncoder {
    fn embed(&self, _text: &str) -> Result<Vec<f32>> {
        anyhow::bail!("encoder offline")
    }

    fn dimensions(&self) -> usize {
        DIM
    }
}

/// Fails the first `outage` calls to `embed`, then answers like a [`FakeEncoder`].
pub struct FlakyEncoder {
    pub inner: FakeEncoder,
    pub outage: Cell<usize>,
}

impl FlakyEncoder {
    pub fn new(outage: usize) -> Self {
        Self {
            inner: FakeEncoder::new(),
            outage: Cell::new(outage),
        }
    }
}

impl EmbeddingProvider for FlakyEncoder {
    fn embed(&self, text: &str) -> Result<Vec<f32>> {
        if self.outage.get() > 0 {
            self.outage.set(self.outage.get() - 1);
            anyhow::bail!("encoder warming up");
        }
        self.inner.embed(text)
    }

    fn dimensions(&self) -> usize {
        DIM
    }
}
