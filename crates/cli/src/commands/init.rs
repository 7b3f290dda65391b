//! Init command handler.
//!
//! Writes the per-corpus config so later commands agree on provider,
//! dimension and metric.

use clap::Args;
use simdex_core::{config::AppConfig, AppError, AppResult};
use simdex_index::{config, IndexConfig, Metric, RebuildFailurePolicy, UnknownIdPolicy};

use super::print_json;

/// Create or overwrite the configuration of a corpus
#[derive(Args, Debug)]
pub struct InitCommand {
    /// Embedding dimensions (defaults to the model's, 768 for nomic-embed-text)
    #[arg(long)]
    pub dimensions: Option<usize>,

    /// Distance metric: l2 or cosine
    #[arg(long, default_value = "l2")]
    pub metric: String,

    /// Maximum L2 distance / minimum cosine similarity for a hit
    #[arg(long)]
    pub min_score: Option<f32>,

    /// Reject updates of unknown ids instead of adding them
    #[arg(long)]
    pub reject_unknown_ids: bool,

    /// Skip records that fail to embed during a rebuild instead of aborting
    #[arg(long)]
    pub skip_failed: bool,

    /// Cache embeddings in memory so rebuilds only re-embed changed items
    #[arg(long)]
    pub cache: bool,

    /// Overwrite an existing config
    #[arg(long)]
    pub force: bool,

    /// Output as JSON
    #[arg(long)]
    pub json: bool,
}

impl InitCommand {
    pub async fn execute(&self, app: &AppConfig) -> AppResult<()> {
        tracing::info!("Executing init command for corpus '{}'", app.corpus);

        let path = config::get_config_path(&app.workspace, &app.corpus);
        if path.exists() && !self.force {
            return Err(AppError::Validation(format!(
                "Corpus '{}' is already configured at {:?}; pass --force to overwrite",
                app.corpus, path
            )));
        }

        let index_config = self.build(app)?;
        config::save_config(&app.workspace, &index_config)?;

        if self.json {
            return print_json(&index_config);
        }

        println!(
            "Configured corpus '{}': {} / {} ({}-d, {})",
            index_config.name,
            index_config.embedding.provider,
            index_config.embedding.model,
            index_config.embedding.dimensions,
            index_config.metric
        );
        println!("Config written to {:?}", path);
        Ok(())
    }

    fn build(&self, app: &AppConfig) -> AppResult<IndexConfig> {
        let mut index_config = IndexConfig {
            name: app.corpus.clone(),
            metric: Metric::parse(&self.metric)?,
            min_score: self.min_score,
            ..Default::default()
        };

        if let Some(provider) = &app.provider {
            index_config.embedding.provider = provider.clone();
            if provider == "mock" {
                index_config.embedding.model = "trigram-v1".to_string();
            }
        }
        if let Some(model) = &app.model {
            index_config.embedding.model = model.clone();
        }
        if let Some(endpoint) = &app.endpoint {
            index_config.embedding.endpoint = Some(endpoint.clone());
        }
        if let Some(dimensions) = self.dimensions {
            index_config.embedding.dimensions = dimensions;
        }
        if self.reject_unknown_ids {
            index_config.unknown_id_policy = UnknownIdPolicy::Reject;
        }
        if self.skip_failed {
            index_config.rebuild_failure_policy = RebuildFailurePolicy::Skip;
        }
        index_config.embedding_cache.enabled = self.cache;

        index_config.validate()?;
        Ok(index_config)
    }
}
