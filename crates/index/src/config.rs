//! Per-corpus index configuration.

use serde::{Deserialize, Serialize};
use simdex_core::config::STATE_DIR;
use simdex_core::{AppError, AppResult};
use std::fs;
use std::path::{Path, PathBuf};

use crate::embeddings::EmbeddingConfig;
use crate::vector_index::Metric;

/// What `update_item` does with an id the corpus has never seen.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnknownIdPolicy {
    /// Add the item as new
    #[default]
    Create,
    /// Fail with a validation error
    Reject,
}

/// What a rebuild does when one record cannot be embedded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RebuildFailurePolicy {
    /// Fail the whole operation and write nothing
    #[default]
    Abort,
    /// Leave the record unindexed, persist the rest, report the id
    Skip,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmbeddingCacheConfig {
    #[serde(default)]
    pub enabled: bool,

    #[serde(default = "default_cache_capacity")]
    pub capacity: usize,
}

fn default_cache_capacity() -> usize {
    10_000
}

impl Default for EmbeddingCacheConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            capacity: default_cache_capacity(),
        }
    }
}

/// Settings for one corpus, stored at `.simdex/corpora/<name>/config.yaml`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexConfig {
    /// Name of the corpus
    #[serde(default)]
    pub name: String,

    #[serde(default)]
    pub embedding: EmbeddingConfig,

    #[serde(default)]
    pub metric: Metric,

    /// Maximum distance (L2) or minimum similarity (cosine) for a hit to be returned
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_score: Option<f32>,

    #[serde(default)]
    pub unknown_id_policy: UnknownIdPolicy,

    #[serde(default)]
    pub rebuild_failure_policy: RebuildFailurePolicy,

    #[serde(default)]
    pub embedding_cache: EmbeddingCacheConfig,

    /// Committed snapshot generations kept on disk, the current one included
    #[serde(default = "default_keep_generations")]
    pub keep_generations: usize,
}

fn default_keep_generations() -> usize {
    2
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            name: String::new(),
            embedding: EmbeddingConfig::default(),
            metric: Metric::default(),
            min_score: None,
            unknown_id_policy: UnknownIdPolicy::default(),
            rebuild_failure_policy: RebuildFailurePolicy::default(),
            embedding_cache: EmbeddingCacheConfig::default(),
            keep_generations: default_keep_generations(),
        }
    }
}

impl IndexConfig {
    pub fn validate(&self) -> AppResult<()> {
        self.embedding.validate()?;

        if self.keep_generations == 0 {
            return Err(AppError::Config(
                "keep_generations must be at least 1".to_string(),
            ));
        }

        if let Some(threshold) = self.min_score {
            if !threshold.is_finite() {
                return Err(AppError::Config(format!(
                    "min_score must be a finite number, got {}",
                    threshold
                )));
            }
        }

        Ok(())
    }
}

/// Load corpus configuration.
///
/// Reads `.simdex/corpora/<name>/config.yaml` if it exists, otherwise returns
/// the defaults for `corpus`.
pub fn load_config(workspace: &Path, corpus: &str) -> AppResult<IndexConfig> {
    let config_path = get_config_path(workspace, corpus);

    if config_path.exists() {
        let content = fs::read_to_string(&config_path).map_err(|e| {
            AppError::Config(format!("Failed to read config at {:?}: {}", config_path, e))
        })?;

        let mut config: IndexConfig = serde_yaml::from_str(&content).map_err(|e| {
            AppError::Config(format!("Failed to parse config at {:?}: {}", config_path, e))
        })?;

        config.name = corpus.to_string();

        tracing::debug!("Loaded index config for corpus '{}'", corpus);
        Ok(config)
    } else {
        let config = IndexConfig {
            name: corpus.to_string(),
            ..Default::default()
        };

        tracing::debug!(
            "Using default index config for corpus '{}' (no config file found)",
            corpus
        );
        Ok(config)
    }
}

/// Save corpus configuration.
pub fn save_config(workspace: &Path, config: &IndexConfig) -> AppResult<()> {
    let config_path = get_config_path(workspace, &config.name);

    if let Some(parent) = config_path.parent() {
        fs::create_dir_all(parent).map_err(|e| {
            AppError::Config(format!("Failed to create config directory: {}", e))
        })?;
    }

    let yaml = serde_yaml::to_string(config)
        .map_err(|e| AppError::Config(format!("Failed to serialize config: {}", e)))?;

    fs::write(&config_path, yaml).map_err(|e| {
        AppError::Config(format!("Failed to write config to {:?}: {}", config_path, e))
    })?;

    tracing::debug!("Saved index config for corpus '{}'", config.name);
    Ok(())
}

/// Directory holding everything for one corpus.
pub fn get_corpus_dir(workspace: &Path, corpus: &str) -> PathBuf {
    workspace.join(STATE_DIR).join("corpora").join(corpus)
}

pub fn get_config_path(workspace: &Path, corpus: &str) -> PathBuf {
    get_corpus_dir(workspace, corpus).join("config.yaml")
}

/// Directory the snapshot store writes generations into.
pub fn get_snapshot_dir(workspace: &Path, corpus: &str) -> PathBuf {
    get_corpus_dir(workspace, corpus).join("snapshots")
}
