//! Stats command handler.

use clap::Args;
use simdex_core::{config::AppConfig, AppResult};

use super::{open_manager, print_json};

/// Show corpus and index statistics
#[derive(Args, Debug)]
pub struct StatsCommand {
    /// Output as JSON
    #[arg(long)]
    pub json: bool,
}

impl StatsCommand {
    pub async fn execute(&self, config: &AppConfig) -> AppResult<()> {
        tracing::info!("Executing stats command for corpus '{}'", config.corpus);

        let manager = open_manager(config)?;
        let stats = manager.stats().await?;

        if self.json {
            return print_json(&serde_json::json!({
                "corpus": config.corpus,
                "provider": manager.config().embedding.provider,
                "model": manager.config().embedding.model,
                "stats": stats,
            }));
        }

        println!("Corpus:      {}", config.corpus);
        println!(
            "Embeddings:  {} / {}",
            manager.config().embedding.provider,
            manager.config().embedding.model
        );
        println!("Items:       {}", stats.items);
        println!("Vectors:     {} ({}-d, {})", stats.vectors, stats.dimension, stats.metric);
        println!("Mapped:      {}", stats.mapped);
        println!("Generation:  {}", stats.generation);

        if stats.mapped != stats.items {
            println!(
                "Warning: {} item(s) have no vector; run 'simdex rebuild'",
                stats.items.saturating_sub(stats.mapped)
            );
        }

        Ok(())
    }
}
