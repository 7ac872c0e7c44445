//! Session snapshot composition: semantic vector + temporal features.
//!
//! A snapshot is `semantic * semantic_weight ++ temporal * temporal_weight`.
//! The temporal block depends on the session date, which is why each session
//! stores its own snapshot instead of reusing the previous one.

use chrono::{DateTime, Datelike, NaiveDate, Utc};

/// Number of temporal features appended to every snapshot.
pub const TEMPORAL_FEATURES: usize = 3;

/// Ages beyond this many days all map to 1.0.
const AGE_HORIZON_DAYS: f32 = 3650.0;

const DAYS_PER_YEAR: f32 = 365.25;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SnapshotWeights {
    pub semantic: f32,
    pub temporal: f32,
}

impl Default for SnapshotWeights {
    fn default() -> Self {
        Self {
            semantic: 0.9,
            temporal: 0.1,
        }
    }
}

impl From<&crate::config::EmbeddingConfig> for SnapshotWeights {
    fn from(config: &crate::config::EmbeddingConfig) -> Self {
        Self {
            semantic: config.semantic_weight,
            temporal: config.temporal_weight,
        }
    }
}

/// `[age, creation season, session season]` for a note seen on `session_date`.
pub fn temporal_features(created: DateTime<Utc>, session_date: NaiveDate) -> [f32; TEMPORAL_FEATURES] {
    let age_days = (session_date - created.date_naive()).num_days().max(0) as f32;
    [
        (age_days / AGE_HORIZON_DAYS).min(1.0),
        season(created.ordinal()),
        season(session_date.ordinal()),
    ]
}

fn season(day_of_year: u32) -> f32 {
    (2.0 * std::f32::consts::PI * day_of_year as f32 / DAYS_PER_YEAR).sin()
}

/// Build the stored snapshot vector from an encoder output.
pub fn compose_snapshot(
    semantic: &[f32],
    created: DateTime<Utc>,
    session_date: NaiveDate,
    weights: SnapshotWeights,
) -> Vec<f32> {
    let mut vector = Vec::with_capacity(semantic.len() + TEMPORAL_FEATURES);
    vector.extend(semantic.iter().map(|x| x * weights.semantic));
    vector.extend(
        temporal_features(created, session_date)
            .iter()
            .map(|x| x * weights.temporal),
    );
    vector
}

/// The semantic part of a snapshot (everything but the trailing temporal block).
pub fn semantic_part(snapshot: &[f32]) -> &[f32] {
    &snapshot[..snapshot.len().saturating_sub(TEMPORAL_FEATURES)]
}
