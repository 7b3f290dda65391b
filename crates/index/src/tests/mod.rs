//! Cross-component tests for the index manager and its collaborators.

mod scenarios;

use async_trait::async_trait;
use simdex_core::{AppError, AppResult};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

use crate::config::IndexConfig;
use crate::embeddings::providers::mock::MockProvider;
use crate::embeddings::{EmbeddingConfig, EmbeddingProvider};
use crate::manager::IndexManager;
use crate::snapshot::{FileSnapshotStore, SnapshotStore, StoreLock, StoreLockGuard, Triad};
use crate::vector_index::Metric;

pub(crate) const DIM: usize = 1024;

pub(crate) fn mock_config(metric: Metric) -> IndexConfig {
    IndexConfig {
        name: "courses".to_string(),
        embedding: EmbeddingConfig {
            timeout_secs: 1,
            ..EmbeddingConfig::mock(DIM)
        },
        metric,
        ..Default::default()
    }
}

pub(crate) fn file_store(temp: &TempDir, metric: Metric) -> Arc<FileSnapshotStore> {
    Arc::new(FileSnapshotStore::new(temp.path().join("snapshots"), DIM, metric))
}

pub(crate) fn manager_with(
    config: IndexConfig,
    provider: Arc<dyn EmbeddingProvider>,
    store: Arc<dyn SnapshotStore>,
) -> IndexManager {
    IndexManager::new(config, provider, store).unwrap()
}

pub(crate) fn mock_manager(temp: &TempDir, metric: Metric) -> (IndexManager, Arc<FileSnapshotStore>) {
    let store = file_store(temp, metric);
    let manager = manager_with(
        mock_config(metric),
        Arc::new(MockProvider::new(DIM)),
        store.clone(),
    );
    (manager, store)
}

/// Mapping keys equal corpus ids and every record has a vector.
pub(crate) fn assert_dense(triad: &Triad) {
    let mut corpus_ids: Vec<String> = triad.corpus.ids().map(|id| id.key()).collect();
    let mut mapped: Vec<String> = triad.mapping.keys().map(str::to_string).collect();
    corpus_ids.sort();
    mapped.sort();
    assert_eq!(mapped, corpus_ids);
    assert_eq!(triad.index.size(), triad.corpus.len());
    assert!(triad.is_consistent());
}

/// Every file under `root` with its contents.
pub(crate) fn read_tree(root: &Path) -> BTreeMap<PathBuf, Vec<u8>> {
    let mut files = BTreeMap::new();
    let mut pending = vec![root.to_path_buf()];
    while let Some(dir) = pending.pop() {
        for entry in std::fs::read_dir(&dir).unwrap() {
            let path = entry.unwrap().path();
            if path.is_dir() {
                pending.push(path);
            } else {
                let bytes = std::fs::read(&path).unwrap();
                files.insert(path, bytes);
            }
        }
    }
    files
}

/// Mock provider that counts provider calls.
#[derive(Debug)]
pub(crate) struct CountingProvider {
    inner: MockProvider,
    calls: AtomicUsize,
}

impl CountingProvider {
    pub fn new() -> Self {
        Self {
            inner: MockProvider::new(DIM),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl EmbeddingProvider for CountingProvider {
    fn provider_name(&self) -> &str {
        "counting"
    }

    fn model_name(&self) -> &str {
        self.inner.model_name()
    }

    fn dimensions(&self) -> usize {
        DIM
    }

    async fn embed_batch(&self, texts: &[String]) -> AppResult<Vec<Vec<f32>>> {
        self.calls.fetch_add(texts.len(), Ordering::SeqCst);
        self.inner.embed_batch(texts).await
    }
}

/// Mock provider that refuses any text containing `poison`.
#[derive(Debug)]
pub(crate) struct PoisonedProvider {
    inner: MockProvider,
}

impl PoisonedProvider {
    pub fn new() -> Self {
        Self {
            inner: MockProvider::new(DIM),
        }
    }
}

#[async_trait]
impl EmbeddingProvider for PoisonedProvider {
    fn provider_name(&self) -> &str {
        "poisoned"
    }

    fn model_name(&self) -> &str {
        self.inner.model_name()
    }

    fn dimensions(&self) -> usize {
        DIM
    }

    async fn embed_batch(&self, texts: &[String]) -> AppResult<Vec<Vec<f32>>> {
        if texts.iter().any(|t| t.contains("poison")) {
            return Err(AppError::Embedding("model server returned 500".to_string()));
        }
        self.inner.embed_batch(texts).await
    }
}

/// Provider that never answers in time.
#[derive(Debug)]
pub(crate) struct StalledProvider;

#[async_trait]
impl EmbeddingProvider for StalledProvider {
    fn provider_name(&self) -> &str {
        "stalled"
    }

    fn model_name(&self) -> &str {
        "stalled-v1"
    }

    fn dimensions(&self) -> usize {
        DIM
    }

    async fn embed_batch(&self, texts: &[String]) -> AppResult<Vec<Vec<f32>>> {
        tokio::time::sleep(Duration::from_secs(30)).await;
        Ok(texts.iter().map(|_| vec![0.0; DIM]).collect())
    }
}

/// File store whose saves can be made to fail.
#[derive(Debug)]
pub(crate) struct FlakyStore {
    inner: FileSnapshotStore,
    pub fail_saves: AtomicBool,
}

impl FlakyStore {
    pub fn new(temp: &TempDir, metric: Metric) -> Self {
        Self {
            inner: FileSnapshotStore::new(temp.path().join("snapshots"), DIM, metric),
            fail_saves: AtomicBool::new(false),
        }
    }
}

impl SnapshotStore for FlakyStore {
    fn load_triad(&self) -> AppResult<Triad> {
        self.inner.load_triad()
    }

    fn save_triad(&self, triad: &Triad) -> AppResult<()> {
        if self.fail_saves.load(Ordering::SeqCst) {
            return Err(AppError::Io(std::io::Error::new(
                std::io::ErrorKind::Other,
                "disk full",
            )));
        }
        self.inner.save_triad(triad)
    }

    fn generation(&self) -> AppResult<u64> {
        self.inner.generation()
    }

    fn lock(&self, lock: StoreLock) -> AppResult<StoreLockGuard> {
        self.inner.lock(lock)
    }
}
