//! Configuration management for simdex.
//!
//! Configuration is merged from, in increasing precedence:
//! - Built-in defaults
//! - Environment variables (`SIMDEX_*`)
//! - The workspace config file (`.simdex/config.yaml`)
//! - Command-line flags
//!
//! Environment variables that name the workspace or config file are read
//! before the YAML file so they can locate it; the remaining variables are
//! applied after it and win over the file.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{AppError, AppResult};
use crate::logging::LogFormat;

/// Name of the per-workspace state directory.
pub const STATE_DIR: &str = ".simdex";

/// Corpus used when none is named.
pub const DEFAULT_CORPUS: &str = "default";

/// Embedding providers the service knows how to construct.
pub const KNOWN_PROVIDERS: [&str; 2] = ["mock", "ollama"];

/// Main application configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Path to the workspace root (contains .simdex/)
    pub workspace: PathBuf,

    /// Optional config file path
    pub config_file: Option<PathBuf>,

    /// Corpus to operate on
    pub corpus: String,

    /// Embedding provider override (replaces the corpus config's provider)
    pub provider: Option<String>,

    /// Embedding model override
    pub model: Option<String>,

    /// Embedding endpoint override (e.g. an Ollama base URL)
    pub endpoint: Option<String>,

    /// Log level override
    pub log_level: Option<String>,

    /// Log line format
    #[serde(skip)]
    pub log_format: LogFormat,

    /// Verbose mode (enables debug logging)
    pub verbose: bool,

    /// Disable colored output
    pub no_color: bool,
}

/// Full configuration file structure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct ConfigFile {
    workspace: Option<WorkspaceSection>,
    logging: Option<LoggingSection>,
    embedding: Option<EmbeddingSection>,
    corpus: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct WorkspaceSection {
    path: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct LoggingSection {
    level: Option<String>,
    color: Option<bool>,
    format: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct EmbeddingSection {
    provider: Option<String>,
    model: Option<String>,
    endpoint: Option<String>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            workspace: std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")),
            config_file: None,
            corpus: DEFAULT_CORPUS.to_string(),
            provider: None,
            model: None,
            endpoint: None,
            log_level: None,
            log_format: LogFormat::Text,
            verbose: false,
            no_color: false,
        }
    }
}

impl AppConfig {
    /// Load configuration from environment variables, the config file and defaults.
    ///
    /// Environment variables:
    /// - `SIMDEX_WORKSPACE`: Override workspace path
    /// - `SIMDEX_CONFIG`: Path to config file
    /// - `SIMDEX_CORPUS`: Corpus name
    /// - `SIMDEX_PROVIDER`: Embedding provider
    /// - `SIMDEX_MODEL`: Embedding model
    /// - `SIMDEX_ENDPOINT`: Embedding endpoint
    /// - `SIMDEX_LOG_FORMAT`: `text` or `json`
    /// - `RUST_LOG`: Log level
    /// - `NO_COLOR`: Disable colored output
    pub fn load() -> AppResult<Self> {
        let mut config = Self::default();

        if let Ok(workspace) = std::env::var("SIMDEX_WORKSPACE") {
            config.workspace = PathBuf::from(workspace);
        }

        if let Ok(config_file) = std::env::var("SIMDEX_CONFIG") {
            config.config_file = Some(PathBuf::from(config_file));
        }

        if !config.workspace.exists() {
            return Err(AppError::Config(format!(
                "Workspace directory does not exist: {:?}",
                config.workspace
            )));
        }

        let config_path = config
            .config_file
            .clone()
            .unwrap_or_else(|| config.workspace.join(STATE_DIR).join("config.yaml"));

        if config_path.exists() {
            config = config.merge_yaml(&config_path)?;
        }

        if let Ok(corpus) = std::env::var("SIMDEX_CORPUS") {
            config.corpus = corpus;
        }

        if let Ok(provider) = std::env::var("SIMDEX_PROVIDER") {
            config.provider = Some(provider);
        }

        if let Ok(model) = std::env::var("SIMDEX_MODEL") {
            config.model = Some(model);
        }

        if let Ok(endpoint) = std::env::var("SIMDEX_ENDPOINT") {
            config.endpoint = Some(endpoint);
        }

        if let Ok(format) = std::env::var("SIMDEX_LOG_FORMAT") {
            config.log_format = LogFormat::parse(&format)?;
        }

        if let Ok(level) = std::env::var("RUST_LOG") {
            config.log_level = Some(level);
        }

        if std::env::var("NO_COLOR").is_ok() {
            config.no_color = true;
        }

        Ok(config)
    }

    /// Merge a YAML configuration file into a copy of this config.
    pub fn merge_yaml(&self, path: &Path) -> AppResult<Self> {
        let contents = std::fs::read_to_string(path).map_err(|e| {
            AppError::Config(format!("Failed to read config file {:?}: {}", path, e))
        })?;

        let config_file: ConfigFile = serde_yaml::from_str(&contents).map_err(|e| {
            AppError::Config(format!("Failed to parse config file {:?}: {}", path, e))
        })?;

        let mut result = self.clone();

        if let Some(path) = config_file.workspace.and_then(|ws| ws.path) {
            result.workspace = PathBuf::from(path);
        }

        if let Some(corpus) = config_file.corpus {
            result.corpus = corpus;
        }

        if let Some(logging) = config_file.logging {
            if let Some(level) = logging.level {
                result.log_level = Some(level);
            }
            if let Some(color) = logging.color {
                result.no_color = !color;
            }
            if let Some(format) = logging.format {
                result.log_format = LogFormat::parse(&format)?;
            }
        }

        if let Some(embedding) = config_file.embedding {
            result.provider = embedding.provider.or(result.provider);
            result.model = embedding.model.or(result.model);
            result.endpoint = embedding.endpoint.or(result.endpoint);
        }

        Ok(result)
    }

    /// Apply CLI overrides to the configuration.
    ///
    /// Flags take precedence over environment variables and the config file.
    #[allow(clippy::too_many_arguments)]
    pub fn with_overrides(
        mut self,
        workspace: Option<PathBuf>,
        config_file: Option<PathBuf>,
        corpus: Option<String>,
        provider: Option<String>,
        log_level: Option<String>,
        verbose: bool,
        no_color: bool,
    ) -> Self {
        if let Some(workspace) = workspace {
            self.workspace = workspace;
        }

        if let Some(config_file) = config_file {
            self.config_file = Some(config_file);
        }

        if let Some(corpus) = corpus {
            self.corpus = corpus;
        }

        if let Some(provider) = provider {
            self.provider = Some(provider);
        }

        if let Some(log_level) = log_level {
            self.log_level = Some(log_level);
        }

        if verbose {
            self.verbose = true;
            if self.log_level.is_none() {
                self.log_level = Some("debug".to_string());
            }
        }

        if no_color {
            self.no_color = true;
        }

        self
    }

    /// Get the path to the .simdex directory.
    pub fn state_dir(&self) -> PathBuf {
        self.workspace.join(STATE_DIR)
    }

    /// Ensure the .simdex directory exists.
    pub fn ensure_state_dir(&self) -> AppResult<()> {
        let state_dir = self.state_dir();
        if !state_dir.exists() {
            std::fs::create_dir_all(&state_dir).map_err(|e| {
                AppError::Config(format!("Failed to create {} directory: {}", STATE_DIR, e))
            })?;
        }
        Ok(())
    }

    /// Validate the merged configuration.
    pub fn validate(&self) -> AppResult<()> {
        if let Some(provider) = &self.provider {
            if !KNOWN_PROVIDERS.contains(&provider.as_str()) {
                return Err(AppError::Config(format!(
                    "Unknown embedding provider: {}. Supported: {}",
                    provider,
                    KNOWN_PROVIDERS.join(", ")
                )));
            }
        }

        let corpus_ok = !self.corpus.is_empty()
            && self
                .corpus
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
        if !corpus_ok {
            return Err(AppError::Config(format!(
                "Invalid corpus name '{}': use letters, digits, '-' or '_'",
                self.corpus
            )));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_default_config() {
        let config = AppConfig::default();
        assert_eq!(config.corpus, "default");
        assert!(config.provider.is_none());
        assert!(!config.verbose);
        assert!(!config.no_color);
    }

    #[test]
    fn test_state_dir() {
        let config = AppConfig::default();
        assert!(config.state_dir().ends_with(".simdex"));
    }

    #[test]
    fn test_with_overrides() {
        let config = AppConfig::default().with_overrides(
            None,
            None,
            Some("trips".to_string()),
            Some("ollama".to_string()),
            None,
            true,
            false,
        );

        assert_eq!(config.corpus, "trips");
        assert_eq!(config.provider.as_deref(), Some("ollama"));
        assert!(config.verbose);
        assert_eq!(config.log_level, Some("debug".to_string()));
    }

    #[test]
    fn test_merge_yaml() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("config.yaml");
        std::fs::write(
            &path,
            "corpus: courses\nlogging:\n  level: warn\n  color: false\n  format: json\nembedding:\n  provider: mock\n",
        )
        .unwrap();

        let merged = AppConfig::default().merge_yaml(&path).unwrap();
        assert_eq!(merged.corpus, "courses");
        assert_eq!(merged.log_level.as_deref(), Some("warn"));
        assert!(merged.no_color);
        assert_eq!(merged.log_format, LogFormat::Json);
        assert_eq!(merged.provider.as_deref(), Some("mock"));
    }

    #[test]
    fn test_validate_unknown_provider() {
        let config = AppConfig {
            provider: Some("unknown".to_string()),
            ..AppConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_corpus_name() {
        let config = AppConfig {
            corpus: "../escape".to_string(),
            ..AppConfig::default()
        };
        assert!(config.validate().is_err());

        let config = AppConfig {
            provider: Some("ollama".to_string()),
            ..AppConfig::default()
        };
        assert!(config.validate().is_ok());
    }
}
