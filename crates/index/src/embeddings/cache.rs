//! In-process embedding cache keyed by text digest.

use sha2::{Digest, Sha256};
use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

/// Bounded map from SHA-256 of the embedded text to its vector.
///
/// Oldest entries are evicted first once `capacity` is reached.
#[derive(Debug)]
pub struct EmbeddingCache {
    capacity: usize,
    inner: Mutex<CacheInner>,
}

#[derive(Debug, Default)]
struct CacheInner {
    entries: HashMap<String, Vec<f32>>,
    order: VecDeque<String>,
}

impl EmbeddingCache {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            inner: Mutex::new(CacheInner::default()),
        }
    }

    pub fn digest(text: &str) -> String {
        let hash = Sha256::digest(text.as_bytes());
        hash.iter().map(|b| format!("{:02x}", b)).collect()
    }

    pub fn get(&self, text: &str) -> Option<Vec<f32>> {
        let key = Self::digest(text);
        let inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        inner.entries.get(&key).cloned()
    }

    pub fn insert(&self, text: &str, embedding: Vec<f32>) {
        if self.capacity == 0 {
            return;
        }

        let key = Self::digest(text);
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        if inner.entries.insert(key.clone(), embedding).is_some() {
            return;
        }
        inner.order.push_back(key);

        while inner.order.len() > self.capacity {
            if let Some(oldest) = inner.order.pop_front() {
                inner.entries.remove(&oldest);
            }
        }
    }

    pub fn len(&self) -> usize {
        let inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        inner.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
