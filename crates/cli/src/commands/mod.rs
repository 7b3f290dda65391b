//! Command handlers for the simdex CLI.
//!
//! Every command resolves the corpus configuration the same way: the stored
//! per-corpus config, with any provider, model or endpoint given on the
//! command line, in the environment or in the workspace config layered on top.

pub mod import;
pub mod init;
pub mod item;
pub mod rebuild;
pub mod search;
pub mod stats;

pub use import::ImportCommand;
pub use init::InitCommand;
pub use item::{AddCommand, DeleteCommand, UpdateCommand};
pub use rebuild::RebuildCommand;
pub use search::SearchCommand;
pub use stats::StatsCommand;

use serde::Serialize;
use simdex_core::{config::AppConfig, AppResult};
use simdex_index::{config, IndexConfig, IndexManager, ItemId};

/// Load the corpus config and apply the application-level overrides.
pub fn resolve_index_config(app: &AppConfig) -> AppResult<IndexConfig> {
    let mut index_config = config::load_config(&app.workspace, &app.corpus)?;

    if let Some(provider) = &app.provider {
        index_config.embedding.provider = provider.clone();
    }
    if let Some(model) = &app.model {
        index_config.embedding.model = model.clone();
    }
    if let Some(endpoint) = &app.endpoint {
        index_config.embedding.endpoint = Some(endpoint.clone());
    }

    index_config.validate()?;
    Ok(index_config)
}

pub fn open_manager(app: &AppConfig) -> AppResult<IndexManager> {
    let index_config = resolve_index_config(app)?;
    tracing::debug!(
        "Opening corpus '{}' with {} / {} ({}-d, {})",
        index_config.name,
        index_config.embedding.provider,
        index_config.embedding.model,
        index_config.embedding.dimensions,
        index_config.metric
    );
    IndexManager::open(&app.workspace, index_config)
}

/// Ids given on the command line: integers stay integers.
pub fn parse_id(raw: &str) -> ItemId {
    raw.parse::<i64>()
        .map(ItemId::Int)
        .unwrap_or_else(|_| ItemId::Text(raw.to_string()))
}

pub fn print_json<T: Serialize>(value: &T) -> AppResult<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
