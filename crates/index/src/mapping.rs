//! Item id to index slot mapping.

use simdex_core::AppResult;
use std::collections::{BTreeMap, HashMap};

use crate::corpus::CorpusStore;

/// Bijection between item ids and vector index slots.
///
/// The inverse `slot -> id` table is kept in step with the forward map so a
/// search can resolve each returned slot without scanning.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SlotMapping {
    by_id: HashMap<String, usize>,
    by_slot: HashMap<usize, String>,
}

impl SlotMapping {
    pub fn new() -> Self {
        Self::default()
    }

    /// Map `key` to `slot`, dropping whatever either side was mapped to before.
    pub fn insert(&mut self, key: impl Into<String>, slot: usize) {
        let key = key.into();
        if let Some(old_slot) = self.by_id.insert(key.clone(), slot) {
            self.by_slot.remove(&old_slot);
        }
        if let Some(old_key) = self.by_slot.insert(slot, key.clone()) {
            if old_key != key {
                self.by_id.remove(&old_key);
            }
        }
    }

    pub fn remove(&mut self, key: &str) -> Option<usize> {
        let slot = self.by_id.remove(key)?;
        self.by_slot.remove(&slot);
        Some(slot)
    }

    pub fn slot_of(&self, key: &str) -> Option<usize> {
        self.by_id.get(key).copied()
    }

    pub fn id_at(&self, slot: usize) -> Option<&str> {
        self.by_slot.get(&slot).map(String::as_str)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.by_id.contains_key(key)
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.by_id.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.by_id.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_id.is_empty()
    }

    /// Drop entries that point past the index or at ids missing from the corpus.
    ///
    /// Returns the number of entries dropped.
    pub fn retain_consistent(&mut self, corpus: &CorpusStore, index_size: usize) -> usize {
        let stale: Vec<String> = self
            .by_id
            .iter()
            .filter(|(key, slot)| **slot >= index_size || !corpus.contains(key))
            .map(|(key, _)| key.clone())
            .collect();

        for key in &stale {
            tracing::warn!(
                "Dropping mapping entry '{}' (slot {:?}): no matching vector or record",
                key,
                self.by_id.get(key)
            );
            self.remove(key);
        }
        stale.len()
    }

    /// Serialize as a JSON object of id to slot, keys sorted.
    pub fn to_json(&self) -> AppResult<String> {
        let sorted: BTreeMap<&str, usize> =
            self.by_id.iter().map(|(k, &v)| (k.as_str(), v)).collect();
        Ok(serde_json::to_string_pretty(&sorted)?)
    }

    pub fn from_json(json: &str) -> AppResult<Self> {
        let entries: BTreeMap<String, usize> = serde_json::from_str(json)?;
        let mut mapping = Self::new();
        for (key, slot) in entries {
            if let Some(existing) = mapping.id_at(slot) {
                tracing::warn!(
                    "Slot {} claimed by both '{}' and '{}'; keeping '{}'",
                    slot,
                    existing,
                    key,
                    existing
                );
                continue;
            }
            mapping.insert(key, slot);
        }
        Ok(mapping)
    }
}
