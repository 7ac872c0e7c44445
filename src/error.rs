//! Typed configuration errors.
//!
//! Everything else in the crate reports failures through `anyhow::Result` or
//! degrades to an empty/optional result. A [`ConfigError`] is the one failure
//! the invoking process is expected to treat as fatal, and it is raised at
//! construction time, never mid-run.

use thiserror::Error;

#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    /// A numeric threshold fell outside its allowed range.
    #[error("invalid {name}: {value} (expected {expected})")]
    OutOfRange {
        name: &'static str,
        value: f64,
        expected: &'static str,
    },

    /// Two related settings contradict each other (e.g. min > max).
    #[error("inconsistent settings: {0}")]
    Inconsistent(String),

    /// A strategy/backend/labeler name that no implementation answers to.
    #[error("unknown {kind}: {name}")]
    UnknownName { kind: &'static str, name: String },

    /// A strategy appears more than once in the configured order.
    #[error("duplicate filter strategy: {0}")]
    DuplicateStrategy(String),
}

impl ConfigError {
    pub(crate) fn out_of_range(name: &'static str, value: f64, expected: &'static str) -> Self {
        Self::OutOfRange {
            name,
            value,
            expected,
        }
    }
}
