//! Add, update and delete command handlers.

use clap::Args;
use serde_json::Value;
use simdex_core::{config::AppConfig, AppError, AppResult};
use simdex_index::{DeleteOutcome, ItemDraft, UpdateOutcome};

use super::{open_manager, parse_id, print_json};

/// Item fields shared by `add` and `update`.
#[derive(Args, Debug, Clone)]
pub struct ItemArgs {
    /// Item name
    #[arg(long)]
    pub name: Option<String>,

    /// Free-text description
    #[arg(short, long)]
    pub description: Option<String>,

    /// Destination
    #[arg(long)]
    pub destination: Option<String>,

    /// Price (numbers are stored as numbers)
    #[arg(long)]
    pub price: Option<String>,

    /// Extra metadata as key=value, repeatable
    #[arg(long = "field", value_name = "KEY=VALUE")]
    pub fields: Vec<String>,
}

impl ItemArgs {
    fn into_draft(self, id: Option<String>) -> AppResult<ItemDraft> {
        let mut draft = ItemDraft {
            id: id.as_deref().map(parse_id),
            name: self.name,
            description: self.description,
            destination: self.destination,
            price: self.price.map(|raw| parse_value(&raw)),
            ..Default::default()
        };

        for field in self.fields {
            let (key, value) = field.split_once('=').ok_or_else(|| {
                AppError::Validation(format!("Expected KEY=VALUE, got '{}'", field))
            })?;
            draft.extra.insert(key.trim().to_string(), parse_value(value));
        }

        Ok(draft)
    }
}

fn parse_value(raw: &str) -> Value {
    raw.parse::<i64>()
        .map(Value::from)
        .or_else(|_| raw.parse::<f64>().map(Value::from))
        .unwrap_or_else(|_| Value::String(raw.to_string()))
}

/// Add an item to the corpus
#[derive(Args, Debug)]
pub struct AddCommand {
    /// Item id (generated from the current time when omitted)
    #[arg(long)]
    pub id: Option<String>,

    #[command(flatten)]
    pub item: ItemArgs,

    /// Output as JSON
    #[arg(long)]
    pub json: bool,
}

impl AddCommand {
    pub async fn execute(&self, config: &AppConfig) -> AppResult<()> {
        tracing::info!("Executing add command for corpus '{}'", config.corpus);

        let draft = self.item.clone().into_draft(self.id.clone())?;
        let manager = open_manager(config)?;
        let id = manager.add_item(draft).await?;

        if self.json {
            print_json(&serde_json::json!({ "id": id }))?;
        } else {
            println!("Added item {}", id);
        }

        Ok(())
    }
}

/// Replace an existing item and rebuild the index
#[derive(Args, Debug)]
pub struct UpdateCommand {
    /// Item id
    pub id: String,

    #[command(flatten)]
    pub item: ItemArgs,

    /// Output as JSON
    #[arg(long)]
    pub json: bool,
}

impl UpdateCommand {
    pub async fn execute(&self, config: &AppConfig) -> AppResult<()> {
        tracing::info!("Executing update command for item '{}'", self.id);

        let draft = self.item.clone().into_draft(Some(self.id.clone()))?;
        let manager = open_manager(config)?;
        let outcome = manager.update_item(draft).await?;

        if self.json {
            return print_json(&outcome);
        }

        match outcome {
            UpdateOutcome::Created { id } => println!("Item {} did not exist; added it", id),
            UpdateOutcome::Updated { report } => {
                println!(
                    "Updated item {} ({} vectors rebuilt, {} from cache)",
                    self.id,
                    report.indexed(),
                    report.cached
                );
                if let Some(warning) = report.partial_failure() {
                    println!("Warning: {}", warning);
                }
            }
        }

        Ok(())
    }
}

/// Remove an item from the corpus
#[derive(Args, Debug)]
pub struct DeleteCommand {
    /// Item id
    pub id: String,

    /// Output as JSON
    #[arg(long)]
    pub json: bool,
}

impl DeleteCommand {
    pub async fn execute(&self, config: &AppConfig) -> AppResult<()> {
        tracing::info!("Executing delete command for item '{}'", self.id);

        let manager = open_manager(config)?;
        let outcome = manager.delete_item(&parse_id(&self.id)).await?;

        if self.json {
            return print_json(&outcome);
        }

        match outcome {
            DeleteOutcome::NotFound => println!("No item {}; nothing to delete", self.id),
            DeleteOutcome::Deleted { report } => {
                println!(
                    "Deleted item {} ({} vectors remain)",
                    self.id,
                    report.indexed()
                );
                if let Some(warning) = report.partial_failure() {
                    println!("Warning: {}", warning);
                }
            }
        }

        Ok(())
    }
}
