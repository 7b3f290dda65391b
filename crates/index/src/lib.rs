//! Mutable similarity index over an item corpus.
//!
//! Items are embedded into an append-only flat vector index. A slot mapping
//! ties each item id to its vector, and the index, corpus and mapping are
//! persisted together as one snapshot. [`IndexManager`] is the entry point.

pub mod config;
pub mod context;
pub mod corpus;
pub mod embeddings;
pub mod manager;
pub mod mapping;
pub mod snapshot;
pub mod types;
pub mod vector_index;

#[cfg(test)]
mod tests;

// Re-export commonly used types
pub use config::{IndexConfig, RebuildFailurePolicy, UnknownIdPolicy};
pub use context::render_context;
pub use manager::{IndexManager, IndexState};
pub use snapshot::{FileSnapshotStore, SnapshotStore, StoreLock, StoreLockGuard, Triad};
pub use types::{
    DeleteOutcome, ImportMode, IndexStats, ItemDraft, ItemId, ItemRecord, RebuildReport,
    SearchHit, UpdateOutcome,
};
pub use vector_index::{FlatIndex, Metric};
