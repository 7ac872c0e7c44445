//! Embedding snapshots, vector backends and the shared similarity vocabulary.
//!
//! - [`store`]: per-session snapshot persistence ([`EmbeddingStore`])
//! - [`backend`]: interchangeable similarity search over one session
//! - [`similarity`]: cosine and friends
//!
//! [`SimilarityBands`] is the single threshold table analyzers use to turn a
//! score into a word; no caller hard-codes its own cutoffs.

pub mod backend;
pub mod similarity;
pub mod store;

use serde::Serialize;

use crate::config::SimilarityConfig;
use crate::error::ConfigError;

pub use backend::{BackendKind, InMemoryBackend, SqliteVecBackend, VectorBackend};
pub use store::{EmbeddingStore, EnsureReport};

/// One note's embedding in one session.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Snapshot {
    pub session_id: i64,
    pub path: String,
    pub vector: Vec<f32>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SimilarityBand {
    Negligible,
    Weak,
    Moderate,
    High,
    VeryHigh,
}

impl SimilarityBand {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Negligible => "negligible",
            Self::Weak => "weak",
            Self::Moderate => "moderate",
            Self::High => "high",
            Self::VeryHigh => "very_high",
        }
    }
}

impl std::fmt::Display for SimilarityBand {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lower bounds for each band above negligible, strictly increasing.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SimilarityBands {
    weak: f32,
    moderate: f32,
    high: f32,
    very_high: f32,
}

impl SimilarityBands {
    pub fn new(weak: f32, moderate: f32, high: f32, very_high: f32) -> Result<Self, ConfigError> {
        for (name, v) in [
            ("similarity.weak", weak),
            ("similarity.moderate", moderate),
            ("similarity.high", high),
            ("similarity.very_high", very_high),
        ] {
            if !(-1.0..=1.0).contains(&v) {
                return Err(ConfigError::out_of_range(name, v as f64, "[-1, 1]"));
            }
        }
        if !(weak < moderate && moderate < high && high < very_high) {
            return Err(ConfigError::Inconsistent(format!(
                "similarity bands must increase: weak {weak} < moderate {moderate} < high {high} < very_high {very_high}"
            )));
        }
        Ok(Self {
            weak,
            moderate,
            high,
            very_high,
        })
    }

    pub fn from_config(config: &SimilarityConfig) -> Result<Self, ConfigError> {
        Self::new(config.weak, config.moderate, config.high, config.very_high)
    }

    pub fn classify(&self, score: f32) -> SimilarityBand {
        if score >= self.very_high {
            SimilarityBand::VeryHigh
        } else if score >= self.high {
            SimilarityBand::High
        } else if score >= self.moderate {
            SimilarityBand::Moderate
        } else if score >= self.weak {
            SimilarityBand::Weak
        } else {
            SimilarityBand::Negligible
        }
    }

    /// Lower bound of `band` (negligible has none, so it reports -1).
    pub fn threshold(&self, band: SimilarityBand) -> f32 {
        match band {
            SimilarityBand::Negligible => -1.0,
            SimilarityBand::Weak => self.weak,
            SimilarityBand::Moderate => self.moderate,
            SimilarityBand::High => self.high,
            SimilarityBand::VeryHigh => self.very_high,
        }
    }
}

impl Default for SimilarityBands {
    fn default() -> Self {
        let c = SimilarityConfig::default();
        Self {
            weak: c.weak,
            moderate: c.moderate,
            high: c.high,
            very_high: c.very_high,
        }
    }
}
