//! Rebuild command handler.

use clap::Args;
use simdex_core::{config::AppConfig, AppResult};

use super::{open_manager, print_json};

/// Re-embed the whole corpus into a fresh index
#[derive(Args, Debug)]
pub struct RebuildCommand {
    /// Output as JSON
    #[arg(long)]
    pub json: bool,
}

impl RebuildCommand {
    pub async fn execute(&self, config: &AppConfig) -> AppResult<()> {
        tracing::info!("Executing rebuild command for corpus '{}'", config.corpus);

        let manager = open_manager(config)?;
        let report = manager.rebuild().await?;

        if self.json {
            return print_json(&report);
        }

        println!(
            "Rebuilt '{}': {} vectors ({} embedded, {} cached)",
            config.corpus,
            report.indexed(),
            report.embedded,
            report.cached
        );
        if let Some(warning) = report.partial_failure() {
            println!("Warning: {}", warning);
        }

        Ok(())
    }
}
