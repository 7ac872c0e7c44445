use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use tracing::info;

use crate::error::ConfigError;

#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default)]
pub struct GeistConfig {
    pub log: LogConfig,
    pub storage: StorageConfig,
    pub embedding: EmbeddingConfig,
    pub vector: VectorConfig,
    pub similarity: SimilarityConfig,
    pub clustering: ClusteringConfig,
    pub filter: FilterConfig,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct LogConfig {
    pub level: String,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct StorageConfig {
    pub db_path: String,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct EmbeddingConfig {
    pub provider: String,
    pub model: String,
    pub cache_dir: String,
    pub batch_size: usize,
    /// Weight applied to the encoder's (unit-length) output.
    pub semantic_weight: f32,
    /// Weight applied to the temporal feature block appended to each snapshot.
    pub temporal_weight: f32,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct VectorConfig {
    /// `"memory"` or `"sqlite-vec"`.
    pub backend: String,
}

/// Lower bounds of each similarity band. Anything below `weak` is negligible.
#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct SimilarityConfig {
    pub weak: f32,
    pub moderate: f32,
    pub high: f32,
    pub very_high: f32,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ClusteringConfig {
    pub min_cluster_size: usize,
    pub min_samples: Option<usize>,
    /// `"frequency"` or `"semantic"`.
    pub labeling: String,
    pub label_terms: usize,
    /// Semantic labels: terms more similar than this to an already chosen term are dropped.
    pub label_diversity: f32,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct FilterConfig {
    /// Strategy names, applied in order. An empty list passes everything.
    pub strategies: Vec<String>,
    pub min_length: usize,
    pub max_length: usize,
    pub max_word_repetition: f64,
    pub novelty_threshold: f32,
    pub novelty_window_days: i64,
    pub max_per_analyzer: usize,
    pub max_per_cluster: Option<usize>,
    pub cluster_similarity: f32,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".into(),
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        let db_path = default_geist_dir()
            .join("geist.db")
            .to_string_lossy()
            .into_owned();
        Self { db_path }
    }
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        let cache_dir = default_geist_dir()
            .join("models")
            .to_string_lossy()
            .into_owned();
        Self {
            provider: "local".into(),
            model: "all-MiniLM-L6-v2".into(),
            cache_dir,
            batch_size: 32,
            semantic_weight: 0.9,
            temporal_weight: 0.1,
        }
    }
}

impl Default for VectorConfig {
    fn default() -> Self {
        Self {
            backend: "memory".into(),
        }
    }
}

impl Default for SimilarityConfig {
    fn default() -> Self {
        Self {
            weak: 0.3,
            moderate: 0.5,
            high: 0.65,
            very_high: 0.8,
        }
    }
}

impl Default for ClusteringConfig {
    fn default() -> Self {
        Self {
            min_cluster_size: 5,
            min_samples: None,
            labeling: "frequency".into(),
            label_terms: 4,
            label_diversity: 0.85,
        }
    }
}

impl Default for FilterConfig {
    fn default() -> Self {
        Self {
            strategies: vec![
                "boundary".into(),
                "quality".into(),
                "novelty".into(),
                "diversity".into(),
            ],
            min_length: 10,
            max_length: 2000,
            max_word_repetition: 0.4,
            novelty_threshold: 0.85,
            novelty_window_days: 60,
            max_per_analyzer: 5,
            max_per_cluster: None,
            cluster_similarity: 0.8,
        }
    }
}

/// Returns `~/.geist/`
pub fn default_geist_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".geist")
}

/// Returns the default config file path: `~/.geist/config.toml`
pub fn default_config_path() -> PathBuf {
    default_geist_dir().join("config.toml")
}

impl GeistConfig {
    /// Load config from TOML file (if it exists), apply env var overrides, validate.
    pub fn load() -> Result<Self> {
        Self::load_from(default_config_path())
    }

    /// Load from a specific path, then apply env var overrides and validate.
    pub fn load_from(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let mut config = if path.exists() {
            let contents =
                std::fs::read_to_string(path).context("failed to read config file")?;
            toml::from_str(&contents).context("failed to parse config TOML")?
        } else {
            info!("no config file at {}, using defaults", path.display());
            GeistConfig::default()
        };

        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Apply environment variable overrides (GEIST_DB, GEIST_LOG_LEVEL, GEIST_BACKEND).
    fn apply_env_overrides(&mut self) {
        if let Ok(val) = std::env::var("GEIST_DB") {
            self.storage.db_path = val;
        }
        if let Ok(val) = std::env::var("GEIST_LOG_LEVEL") {
            self.log.level = val;
        }
        if let Ok(val) = std::env::var("GEIST_BACKEND") {
            self.vector.backend = val;
        }
    }

    /// Check every section that has constraints. Fails on the first violation.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let e = &self.embedding;
        if e.batch_size == 0 {
            return Err(ConfigError::out_of_range(
                "embedding.batch_size",
                0.0,
                ">= 1",
            ));
        }
        for (name, w) in [
            ("embedding.semantic_weight", e.semantic_weight),
            ("embedding.temporal_weight", e.temporal_weight),
        ] {
            if !(0.0..=1.0).contains(&w) {
                return Err(ConfigError::out_of_range(name, w as f64, "[0, 1]"));
            }
        }

        crate::semantic::backend::BackendKind::parse(&self.vector.backend)?;
        crate::semantic::SimilarityBands::from_config(&self.similarity)?;

        let c = &self.clustering;
        if c.min_cluster_size < 2 {
            return Err(ConfigError::out_of_range(
                "clustering.min_cluster_size",
                c.min_cluster_size as f64,
                ">= 2",
            ));
        }
        crate::cluster::labeling::LabelingKind::parse(&c.labeling)?;
        if !(-1.0..=1.0).contains(&c.label_diversity) {
            return Err(ConfigError::out_of_range(
                "clustering.label_diversity",
                c.label_diversity as f64,
                "[-1, 1]",
            ));
        }

        crate::filter::validate_config(&self.filter)
    }

    /// Resolve the database path, expanding `~` if needed.
    pub fn resolved_db_path(&self) -> PathBuf {
        expand_tilde(&self.storage.db_path)
    }
}

pub fn expand_tilde(path: &str) -> PathBuf {
    match (path.strip_prefix("~/"), dirs::home_dir()) {
        (Some(rest), Some(home)) => home.join(rest),
        _ => PathBuf::from(path),
    }
}
