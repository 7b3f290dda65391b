//! Search command handler.

use clap::Args;
use simdex_core::{config::AppConfig, AppResult};
use simdex_index::render_context;

use super::{open_manager, print_json};

/// Find the items closest to a query
#[derive(Args, Debug)]
pub struct SearchCommand {
    /// Query text
    pub query: String,

    /// Number of items to return
    #[arg(short = 'k', long, default_value = "3")]
    pub top_k: usize,

    /// Print a plain-text context block instead of a result list
    #[arg(long, conflicts_with = "json")]
    pub context: bool,

    /// Output as JSON
    #[arg(long)]
    pub json: bool,
}

impl SearchCommand {
    pub async fn execute(&self, config: &AppConfig) -> AppResult<()> {
        tracing::info!("Executing search command for corpus '{}'", config.corpus);

        let manager = open_manager(config)?;
        let hits = manager.search(&self.query, self.top_k).await?;

        tracing::debug!(
            "Search scores: {:?}",
            hits.iter().map(|h| h.score).collect::<Vec<_>>()
        );

        if self.json {
            return print_json(&hits);
        }

        if self.context {
            println!("{}", render_context(&hits));
            return Ok(());
        }

        if hits.is_empty() {
            println!("No matching items");
            return Ok(());
        }

        let metric = manager.config().metric;
        for (rank, hit) in hits.iter().enumerate() {
            println!(
                "{}. [{}] {} ({} {:.4})",
                rank + 1,
                hit.item.id,
                hit.item.name,
                metric,
                hit.score
            );
            println!("   {}", hit.item.description);
        }

        Ok(())
    }
}
