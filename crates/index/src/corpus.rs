//! Ordered item store keyed by item id.

use serde_json::Value;
use simdex_core::AppResult;
use std::collections::HashMap;

use crate::types::{ItemDraft, ItemId, ItemRecord};

/// Item records in insertion order with O(1) lookup by id.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CorpusStore {
    records: Vec<ItemRecord>,
    positions: HashMap<String, usize>,
}

impl CorpusStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a store from validated records; later duplicates of an id are dropped.
    pub fn from_records(records: impl IntoIterator<Item = ItemRecord>) -> Self {
        let mut store = Self::new();
        for record in records {
            if store.contains(&record.key()) {
                tracing::warn!("Dropping duplicate corpus record with id '{}'", record.id);
                continue;
            }
            store.upsert(record);
        }
        store
    }

    /// Build a store from raw JSON rows, dropping any row that is not a valid record.
    ///
    /// Hand-edited and partially migrated corpora carry stale rows; each one is
    /// logged and skipped instead of failing the whole load.
    pub fn from_rows(rows: Vec<Value>) -> Self {
        let total = rows.len();
        let records = rows.into_iter().enumerate().filter_map(|(row, value)| {
            let draft = match serde_json::from_value::<ItemDraft>(value) {
                Ok(draft) => draft,
                Err(e) => {
                    tracing::warn!("Dropping corpus row {}: {}", row, e);
                    return None;
                }
            };
            match ItemRecord::from_draft(draft) {
                Ok(record) => Some(record),
                Err(e) => {
                    tracing::warn!("Dropping corpus row {}: {}", row, e);
                    None
                }
            }
        });

        let store = Self::from_records(records);
        if store.len() < total {
            tracing::info!(
                "Corpus cleanup removed {} of {} rows",
                total - store.len(),
                total
            );
        }
        store
    }

    pub fn get(&self, key: &str) -> Option<&ItemRecord> {
        self.positions.get(key).map(|&pos| &self.records[pos])
    }

    pub fn contains(&self, key: &str) -> bool {
        self.positions.contains_key(key)
    }

    /// Insert a record, replacing any record with the same id in place.
    ///
    /// Returns true when a record was replaced.
    pub fn upsert(&mut self, record: ItemRecord) -> bool {
        let key = record.key();
        match self.positions.get(&key) {
            Some(&pos) => {
                self.records[pos] = record;
                true
            }
            None => {
                self.positions.insert(key, self.records.len());
                self.records.push(record);
                false
            }
        }
    }

    pub fn remove(&mut self, key: &str) -> Option<ItemRecord> {
        let pos = self.positions.remove(key)?;
        let record = self.records.remove(pos);
        for (i, shifted) in self.records.iter().enumerate().skip(pos) {
            self.positions.insert(shifted.key(), i);
        }
        Some(record)
    }

    /// Records in insertion order.
    pub fn all(&self) -> &[ItemRecord] {
        &self.records
    }

    pub fn ids(&self) -> impl Iterator<Item = &ItemId> {
        self.records.iter().map(|r| &r.id)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Serialize as a JSON array, insertion order.
    pub fn to_json(&self) -> AppResult<String> {
        Ok(serde_json::to_string_pretty(&self.records)?)
    }
}
