//! Import command handler.
//!
//! Loads a JSON array of items, such as a hand-edited corpus file, and
//! rebuilds the index over the result.

use clap::Args;
use serde_json::Value;
use simdex_core::{config::AppConfig, AppError, AppResult};
use simdex_index::{ImportMode, ItemDraft};
use std::path::{Path, PathBuf};

use super::{open_manager, print_json};

/// Bulk-load items from a JSON file
#[derive(Args, Debug)]
pub struct ImportCommand {
    /// JSON file holding an array of items
    pub path: PathBuf,

    /// Replace the corpus instead of merging into it
    #[arg(long)]
    pub replace: bool,

    /// Output as JSON
    #[arg(long)]
    pub json: bool,
}

impl ImportCommand {
    pub async fn execute(&self, config: &AppConfig) -> AppResult<()> {
        tracing::info!("Executing import command from {:?}", self.path);

        let (drafts, unreadable) = read_drafts(&self.path)?;
        let mode = if self.replace {
            ImportMode::Replace
        } else {
            ImportMode::Merge
        };

        let manager = open_manager(config)?;
        let mut report = manager.import(drafts, mode).await?;
        report.rejected += unreadable;

        if self.json {
            return print_json(&report);
        }

        println!(
            "Imported into '{}': {} indexed ({} embedded, {} cached), {} rejected",
            config.corpus,
            report.indexed(),
            report.embedded,
            report.cached,
            report.rejected
        );
        if let Some(warning) = report.partial_failure() {
            println!("Warning: {}", warning);
        }

        Ok(())
    }
}

/// Parse the file into drafts, counting array entries that are not item objects.
fn read_drafts(path: &Path) -> AppResult<(Vec<ItemDraft>, usize)> {
    let content = std::fs::read_to_string(path).map_err(|e| {
        AppError::Validation(format!("Failed to read import file {:?}: {}", path, e))
    })?;

    let rows: Vec<Value> = serde_json::from_str(&content).map_err(|e| {
        AppError::Validation(format!(
            "Import file {:?} is not a JSON array: {}",
            path, e
        ))
    })?;

    let mut drafts = Vec::with_capacity(rows.len());
    let mut unreadable = 0;
    for (row, value) in rows.into_iter().enumerate() {
        match serde_json::from_value::<ItemDraft>(value) {
            Ok(draft) => drafts.push(draft),
            Err(e) => {
                tracing::warn!("Skipping import row {}: {}", row, e);
                unreadable += 1;
            }
        }
    }

    Ok((drafts, unreadable))
}
