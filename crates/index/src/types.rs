//! Item and result type definitions.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use simdex_core::{AppError, AppResult};
use std::hash::{Hash, Hasher};

use crate::vector_index::Metric;

/// Caller-assigned item identity.
///
/// Ids arrive either as JSON integers or strings. Two ids are equal when their
/// canonical string forms are equal, so `7` and `"7"` name the same item.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ItemId {
    Int(i64),
    Text(String),
}

impl ItemId {
    /// Canonical string form used as the mapping key.
    pub fn key(&self) -> String {
        match self {
            ItemId::Int(n) => n.to_string(),
            ItemId::Text(s) => s.clone(),
        }
    }

    pub fn is_blank(&self) -> bool {
        matches!(self, ItemId::Text(s) if s.trim().is_empty())
    }
}

impl PartialEq for ItemId {
    fn eq(&self, other: &Self) -> bool {
        self.key() == other.key()
    }
}

impl Eq for ItemId {}

impl Hash for ItemId {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.key().hash(state);
    }
}

impl std::fmt::Display for ItemId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ItemId::Int(n) => write!(f, "{}", n),
            ItemId::Text(s) => f.write_str(s),
        }
    }
}

impl From<i64> for ItemId {
    fn from(id: i64) -> Self {
        ItemId::Int(id)
    }
}

impl From<i32> for ItemId {
    fn from(id: i32) -> Self {
        ItemId::Int(id.into())
    }
}

impl From<&str> for ItemId {
    fn from(id: &str) -> Self {
        ItemId::Text(id.to_string())
    }
}

impl From<String> for ItemId {
    fn from(id: String) -> Self {
        ItemId::Text(id)
    }
}

/// Unvalidated item as supplied by a caller or read from a hand-edited corpus.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ItemDraft {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<ItemId>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub destination: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub price: Option<Value>,

    /// Any other metadata carried through untouched
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl ItemDraft {
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
            description: Some(description.into()),
            ..Default::default()
        }
    }

    pub fn with_id(mut self, id: impl Into<ItemId>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn with_destination(mut self, destination: impl Into<String>) -> Self {
        self.destination = Some(destination.into());
        self
    }

    pub fn with_price(mut self, price: impl Into<Value>) -> Self {
        self.price = Some(price.into());
        self
    }

    pub fn with_field(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.extra.insert(key.into(), value.into());
        self
    }

    /// Names of required fields that are absent.
    pub fn missing_fields(&self) -> Vec<&'static str> {
        let mut missing = Vec::new();
        if self.id.as_ref().map_or(true, ItemId::is_blank) {
            missing.push("id");
        }
        if self.name.is_none() {
            missing.push("name");
        }
        if self.description.is_none() {
            missing.push("description");
        }
        missing
    }
}

/// A validated corpus entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ItemRecord {
    pub id: ItemId,
    pub name: String,
    pub description: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub destination: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub price: Option<Value>,

    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl ItemRecord {
    /// Validate a draft into a record.
    ///
    /// Fails with a validation error naming every missing required field.
    pub fn from_draft(draft: ItemDraft) -> AppResult<Self> {
        let missing = draft.missing_fields();
        if !missing.is_empty() {
            return Err(AppError::Validation(format!(
                "Item is missing required field(s): {}",
                missing.join(", ")
            )));
        }

        match draft {
            ItemDraft {
                id: Some(id),
                name: Some(name),
                description: Some(description),
                destination,
                price,
                extra,
            } => Ok(Self {
                id,
                name,
                description,
                destination,
                price,
                extra,
            }),
            _ => Err(AppError::Validation(
                "Item is missing required fields".to_string(),
            )),
        }
    }

    /// Mapping key for this record.
    pub fn key(&self) -> String {
        self.id.key()
    }

    /// Text the embedding for this record is computed from.
    pub fn embedding_text(&self) -> String {
        let price = match &self.price {
            None | Some(Value::Null) => "not provided".to_string(),
            Some(Value::String(s)) => s.clone(),
            Some(other) => other.to_string(),
        };

        format!(
            "Name: {}. Description: {}. Destination: {}. Price: {}.",
            self.name,
            self.description,
            self.destination.as_deref().unwrap_or(""),
            price
        )
    }
}

/// One search result.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchHit {
    pub item: ItemRecord,

    /// Squared L2 distance (lower is closer) or cosine similarity (higher is closer)
    pub score: f32,

    /// Position of the matched vector in the index
    pub slot: usize,
}

/// What a rebuild did.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RebuildReport {
    /// Records whose embeddings were requested from the provider
    pub embedded: usize,

    /// Records whose embeddings came from the cache
    pub cached: usize,

    /// Ids of records left without a vector
    pub skipped: Vec<String>,

    /// Import rows dropped before the rebuild because they were not valid records
    #[serde(default, skip_serializing_if = "is_zero")]
    pub rejected: usize,
}

fn is_zero(n: &usize) -> bool {
    *n == 0
}

impl RebuildReport {
    pub fn indexed(&self) -> usize {
        self.embedded + self.cached
    }

    pub fn is_partial(&self) -> bool {
        !self.skipped.is_empty()
    }

    /// The skipped records as a `RebuildPartialFailure`, if any.
    pub fn partial_failure(&self) -> Option<AppError> {
        self.is_partial().then(|| AppError::RebuildPartialFailure {
            skipped: self.skipped.clone(),
        })
    }
}

/// How `import` combines incoming items with the stored corpus.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ImportMode {
    /// Upsert incoming items into the existing corpus
    #[default]
    Merge,
    /// Discard the existing corpus first
    Replace,
}

/// Result of `update_item`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "camelCase")]
pub enum UpdateOutcome {
    /// The id was unknown and the item was added instead
    Created { id: ItemId },
    /// The item was replaced and the index rebuilt
    Updated { report: RebuildReport },
}

/// Result of `delete_item`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "camelCase")]
pub enum DeleteOutcome {
    Deleted { report: RebuildReport },
    /// Nothing to delete; nothing was written
    NotFound,
}

/// Snapshot statistics.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IndexStats {
    pub items: usize,
    pub vectors: usize,
    pub mapped: usize,
    pub dimension: usize,
    pub metric: Metric,
    pub generation: u64,
}
