//! Index manager: keeps corpus, slot mapping and vector index in step.
//!
//! Every operation loads the committed triad from the snapshot store, works on
//! a private copy and, for mutations, commits the whole triad back before
//! returning. A failed operation simply drops its copy, so the store keeps the
//! previous triad.
//!
//! The vector index only grows by appends. Adding a new item appends one
//! vector; anything that changes or removes an existing vector rebuilds the
//! index from the corpus so slots stay dense (`0..N`).
//!
//! The in-process locks below have cross-process twins on the snapshot store
//! ([`StoreLock`]), so managers in different processes sharing a workspace
//! serialize their mutations the same way.

use chrono::Utc;
use simdex_core::{AppError, AppResult};
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::{Arc, Mutex as StdMutex};
use tokio::sync::{Mutex, MutexGuard, RwLock};
use tracing::{debug, error, info, warn};

use crate::config::{get_snapshot_dir, IndexConfig, RebuildFailurePolicy, UnknownIdPolicy};
use crate::corpus::CorpusStore;
use crate::embeddings::{create_provider, Embedder, EmbeddingProvider, EmbeddingSource};
use crate::mapping::SlotMapping;
use crate::snapshot::{FileSnapshotStore, SnapshotStore, StoreLock, StoreLockGuard, Triad};
use crate::types::{
    DeleteOutcome, ImportMode, IndexStats, ItemDraft, ItemId, ItemRecord, RebuildReport,
    SearchHit, UpdateOutcome,
};
use crate::vector_index::FlatIndex;

/// Lifecycle of the manager's view of its corpus.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "lowercase")]
pub enum IndexState {
    /// Nothing loaded yet
    Empty,
    /// The committed triad is the current one
    Loaded,
    /// A mutation is in flight on a working copy
    Dirty,
}

/// Resets the state to `Loaded` when a mutation ends, however it ends.
struct DirtyGuard<'a>(&'a StdMutex<IndexState>);

impl Drop for DirtyGuard<'_> {
    fn drop(&mut self) {
        *self.0.lock().unwrap_or_else(|e| e.into_inner()) = IndexState::Loaded;
    }
}

#[derive(Debug)]
pub struct IndexManager {
    config: IndexConfig,
    store: Arc<dyn SnapshotStore>,
    embedder: Embedder,
    /// Serializes mutations from load to commit
    writer: Mutex<()>,
    /// Readers share it while loading; the writer holds it exclusively while committing
    swap: RwLock<()>,
    state: StdMutex<IndexState>,
}

impl IndexManager {
    pub fn new(
        config: IndexConfig,
        provider: Arc<dyn EmbeddingProvider>,
        store: Arc<dyn SnapshotStore>,
    ) -> AppResult<Self> {
        config.validate()?;

        if provider.dimensions() != config.embedding.dimensions {
            return Err(AppError::Config(format!(
                "Provider '{}' produces {}-d vectors but corpus '{}' is configured for {}",
                provider.provider_name(),
                provider.dimensions(),
                config.name,
                config.embedding.dimensions
            )));
        }

        let mut embedder = Embedder::new(provider, config.embedding.timeout());
        if config.embedding_cache.enabled {
            embedder = embedder.with_cache(config.embedding_cache.capacity);
        }

        Ok(Self {
            config,
            store,
            embedder,
            writer: Mutex::new(()),
            swap: RwLock::new(()),
            state: StdMutex::new(IndexState::Empty),
        })
    }

    /// Open a corpus in `workspace` with the configured provider and on-disk snapshots.
    pub fn open(workspace: &Path, config: IndexConfig) -> AppResult<Self> {
        config.validate()?;
        let provider = create_provider(&config.embedding)?;
        let store = FileSnapshotStore::new(
            get_snapshot_dir(workspace, &config.name),
            config.embedding.dimensions,
            config.metric,
        )
        .with_keep_generations(config.keep_generations);

        Self::new(config, provider, Arc::new(store))
    }

    pub fn config(&self) -> &IndexConfig {
        &self.config
    }

    pub fn embedder(&self) -> &Embedder {
        &self.embedder
    }

    pub fn state(&self) -> IndexState {
        *self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Add an item and return its id.
    ///
    /// A missing id is synthesized from the current time in milliseconds. An
    /// id that already exists is treated as an update of that item.
    pub async fn add_item(&self, draft: ItemDraft) -> AppResult<ItemId> {
        self.add_inner(draft).await.map_err(AppError::into_boundary)
    }

    /// Replace an existing item and rebuild the index.
    ///
    /// An unknown id is added or rejected according to the corpus policy.
    pub async fn update_item(&self, draft: ItemDraft) -> AppResult<UpdateOutcome> {
        self.update_inner(draft)
            .await
            .map_err(AppError::into_boundary)
    }

    /// Remove an item. Deleting an unknown id succeeds and writes nothing.
    pub async fn delete_item(&self, id: &ItemId) -> AppResult<DeleteOutcome> {
        self.delete_inner(id).await.map_err(AppError::into_boundary)
    }

    /// Up to `k` items closest to `query`, best first.
    pub async fn search(&self, query: &str, k: usize) -> AppResult<Vec<SearchHit>> {
        self.search_inner(query, k)
            .await
            .map_err(AppError::into_boundary)
    }

    /// Load many items at once and rebuild.
    ///
    /// Drafts that are not valid records are dropped with a warning and
    /// counted in the report instead of failing the import.
    pub async fn import(&self, drafts: Vec<ItemDraft>, mode: ImportMode) -> AppResult<RebuildReport> {
        self.import_inner(drafts, mode)
            .await
            .map_err(AppError::into_boundary)
    }

    /// Re-embed the whole corpus into a fresh index.
    ///
    /// Only the stored corpus is read, so this also recovers an index written
    /// with a different dimension or metric.
    pub async fn rebuild(&self) -> AppResult<RebuildReport> {
        self.rebuild_inner().await.map_err(AppError::into_boundary)
    }

    pub async fn stats(&self) -> AppResult<IndexStats> {
        self.stats_inner().await.map_err(AppError::into_boundary)
    }

    async fn add_inner(&self, mut draft: ItemDraft) -> AppResult<ItemId> {
        // Fail fast on anything but the id before touching the store
        let missing: Vec<&str> = draft
            .missing_fields()
            .into_iter()
            .filter(|field| *field != "id")
            .collect();
        if !missing.is_empty() {
            return Err(AppError::Validation(format!(
                "Item is missing required field(s): {}",
                missing.join(", ")
            )));
        }

        let _writer = self.begin_write().await?;
        let triad = self.load_for_write()?;

        if draft.id.as_ref().map_or(true, ItemId::is_blank) {
            let id = synthesize_id(&triad.corpus);
            debug!("Assigned id {} to new item", id);
            draft.id = Some(id);
        }
        let record = ItemRecord::from_draft(draft)?;
        let id = record.id.clone();

        if triad.corpus.contains(&record.key()) {
            info!("Item {} already exists; replacing it", id);
            self.replace_locked(triad, record).await?;
        } else {
            self.insert_locked(triad, record).await?;
        }

        Ok(id)
    }

    async fn update_inner(&self, draft: ItemDraft) -> AppResult<UpdateOutcome> {
        if draft.id.as_ref().map_or(true, ItemId::is_blank) {
            return Err(AppError::Validation(
                "Update requires a non-empty id".to_string(),
            ));
        }
        let record = ItemRecord::from_draft(draft)?;

        let _writer = self.begin_write().await?;
        let triad = self.load_for_write()?;

        if triad.corpus.contains(&record.key()) {
            let report = self.replace_locked(triad, record).await?;
            return Ok(UpdateOutcome::Updated { report });
        }

        match self.config.unknown_id_policy {
            UnknownIdPolicy::Create => {
                info!("Item {} not found; adding it", record.id);
                let id = record.id.clone();
                self.insert_locked(triad, record).await?;
                Ok(UpdateOutcome::Created { id })
            }
            UnknownIdPolicy::Reject => Err(AppError::Validation(format!(
                "No item with id '{}'",
                record.id
            ))),
        }
    }

    async fn delete_inner(&self, id: &ItemId) -> AppResult<DeleteOutcome> {
        if id.is_blank() {
            return Err(AppError::Validation(
                "Delete requires a non-empty id".to_string(),
            ));
        }

        let _writer = self.begin_write().await?;
        let triad = self.load_for_write()?;
        let key = id.key();

        if !triad.corpus.contains(&key) && !triad.mapping.contains(&key) {
            debug!("Delete of unknown id {}; nothing to do", id);
            return Ok(DeleteOutcome::NotFound);
        }

        let _dirty = self.mark_dirty();
        let mut corpus = triad.corpus.clone();
        corpus.remove(&key);
        let (triad, report) = self.rebuild_from(&triad, corpus).await?;
        self.commit(&triad).await?;

        info!("Deleted item {} ({} items remain)", id, triad.corpus.len());
        Ok(DeleteOutcome::Deleted { report })
    }

    async fn search_inner(&self, query: &str, k: usize) -> AppResult<Vec<SearchHit>> {
        if query.trim().is_empty() {
            return Err(AppError::Validation(
                "Search query must not be empty".to_string(),
            ));
        }

        let triad = {
            let _read = self.swap.read().await;
            let _shared = self.lock_store(StoreLock::Read).await?;
            self.store.load_triad()?
        };
        self.mark_loaded();

        if k == 0 || triad.index.is_empty() {
            return Ok(Vec::new());
        }

        let (embedding, _) = self.embedder.embed(query).await?;

        // Rank every slot so orphaned ones cannot starve the top k
        let neighbors = triad.index.nearest(&embedding, triad.index.size())?;
        let metric = triad.index.metric();

        let hits: Vec<SearchHit> = neighbors
            .into_iter()
            .filter(|n| {
                self.config
                    .min_score
                    .map_or(true, |threshold| metric.passes(n.score, threshold))
            })
            .filter_map(|n| {
                let key = triad.mapping.id_at(n.slot)?;
                let item = triad.corpus.get(key)?.clone();
                Some(SearchHit {
                    item,
                    score: n.score,
                    slot: n.slot,
                })
            })
            .take(k)
            .collect();

        debug!("Search returned {} of {} requested hits", hits.len(), k);
        Ok(hits)
    }

    async fn import_inner(
        &self,
        drafts: Vec<ItemDraft>,
        mode: ImportMode,
    ) -> AppResult<RebuildReport> {
        let _writer = self.begin_write().await?;
        let triad = self.load_for_write()?;
        let _dirty = self.mark_dirty();

        let mut corpus = match mode {
            ImportMode::Merge => triad.corpus.clone(),
            ImportMode::Replace => CorpusStore::new(),
        };

        let total = drafts.len();
        let mut rejected = 0;
        for (row, draft) in drafts.into_iter().enumerate() {
            match ItemRecord::from_draft(draft) {
                Ok(record) => {
                    corpus.upsert(record);
                }
                Err(e) => {
                    warn!("Skipping import row {}: {}", row, e);
                    rejected += 1;
                }
            }
        }

        let (triad, mut report) = self.rebuild_from(&triad, corpus).await?;
        self.commit(&triad).await?;
        report.rejected = rejected;

        info!(
            "Imported {} of {} rows; corpus now holds {} items",
            total - rejected,
            total,
            triad.corpus.len()
        );
        Ok(report)
    }

    async fn rebuild_inner(&self) -> AppResult<RebuildReport> {
        let _writer = self.begin_write().await?;
        let corpus = self.store.load_corpus()?;
        self.mark_loaded();
        let _dirty = self.mark_dirty();

        // Re-embed everything: the stored vectors may be what needs replacing
        let nothing_to_reuse = Triad::empty(self.config.embedding.dimensions, self.config.metric);
        let (triad, report) = self.rebuild_from(&nothing_to_reuse, corpus).await?;
        self.commit(&triad).await?;

        info!(
            "Rebuilt index for corpus '{}': {} vectors ({} embedded, {} cached, {} skipped)",
            self.config.name,
            triad.index.size(),
            report.embedded,
            report.cached,
            report.skipped.len()
        );
        Ok(report)
    }

    async fn stats_inner(&self) -> AppResult<IndexStats> {
        let (triad, generation) = {
            let _read = self.swap.read().await;
            let _shared = self.lock_store(StoreLock::Read).await?;
            (self.store.load_triad()?, self.store.generation()?)
        };
        self.mark_loaded();

        Ok(IndexStats {
            items: triad.corpus.len(),
            vectors: triad.index.size(),
            mapped: triad.mapping.len(),
            dimension: triad.index.dimension(),
            metric: triad.index.metric(),
            generation,
        })
    }

    /// Append one new record, rebuilding the rest first when the stored
    /// triad is not dense.
    ///
    /// The new record is embedded before anything else, so its failure always
    /// fails the add whatever the rebuild failure policy says.
    async fn insert_locked(&self, triad: Triad, record: ItemRecord) -> AppResult<()> {
        let text = record.embedding_text();
        let (embedding, _) = self.embedder.embed(&text).await?;

        let _dirty = self.mark_dirty();
        let mut triad = if triad.is_consistent() {
            triad
        } else {
            warn!(
                "Stored index for corpus '{}' is out of step with its corpus; rebuilding",
                self.config.name
            );
            let (rebuilt, _) = self.rebuild_from(&triad, triad.corpus.clone()).await?;
            rebuilt
        };

        let key = record.key();
        let id = record.id.clone();
        triad.corpus.upsert(record);
        let slot = triad.index.append(&embedding)?;
        triad.fingerprints.insert(key.clone(), self.embedder.fingerprint(&text));
        triad.mapping.insert(key, slot);
        self.commit(&triad).await?;

        info!("Added item {} at slot {}", id, slot);
        Ok(())
    }

    async fn replace_locked(&self, triad: Triad, record: ItemRecord) -> AppResult<RebuildReport> {
        let _dirty = self.mark_dirty();
        let id = record.id.clone();
        let mut corpus = triad.corpus.clone();
        corpus.upsert(record);

        let (triad, report) = self.rebuild_from(&triad, corpus).await?;
        self.commit(&triad).await?;

        info!("Updated item {} and rebuilt {} vectors", id, triad.index.size());
        Ok(report)
    }

    /// Fresh index and mapping over `corpus`, slots assigned in corpus order.
    ///
    /// With the embedding cache enabled, a record whose fingerprint matches
    /// the one stored in `previous` keeps its stored vector instead of going
    /// back to the provider.
    async fn rebuild_from(
        &self,
        previous: &Triad,
        corpus: CorpusStore,
    ) -> AppResult<(Triad, RebuildReport)> {
        let mut index = FlatIndex::new(self.config.embedding.dimensions, self.config.metric);
        let mut mapping = SlotMapping::new();
        let mut fingerprints = BTreeMap::new();
        let mut report = RebuildReport::default();
        let reuse = self.config.embedding_cache.enabled;

        for record in corpus.all() {
            let key = record.key();
            let text = record.embedding_text();
            let fingerprint = self.embedder.fingerprint(&text);

            let stored = if reuse {
                previous.reusable_vector(&key, &fingerprint)
            } else {
                None
            };
            if let Some(stored) = stored {
                let slot = index.append(stored)?;
                mapping.insert(key.clone(), slot);
                fingerprints.insert(key, fingerprint);
                report.cached += 1;
                continue;
            }

            match self.embedder.embed(&text).await {
                Ok((embedding, source)) => {
                    let slot = index.append(&embedding)?;
                    mapping.insert(key.clone(), slot);
                    fingerprints.insert(key, fingerprint);
                    match source {
                        EmbeddingSource::Provider => report.embedded += 1,
                        EmbeddingSource::Cache => report.cached += 1,
                    }
                }
                Err(e) => match self.config.rebuild_failure_policy {
                    RebuildFailurePolicy::Abort => {
                        error!("Rebuild aborted at item {}: {}", record.id, e);
                        return Err(e);
                    }
                    RebuildFailurePolicy::Skip => {
                        warn!("Leaving item {} out of the index: {}", record.id, e);
                        report.skipped.push(key);
                    }
                },
            }
        }

        Ok((
            Triad {
                index,
                corpus,
                mapping,
                fingerprints,
            },
            report,
        ))
    }

    async fn commit(&self, triad: &Triad) -> AppResult<()> {
        let _swap = self.swap.write().await;
        let _exclusive = self.lock_store(StoreLock::Commit).await?;
        self.store.save_triad(triad)
    }

    /// Writer locks of this manager and of the store, held until the
    /// mutation commits or fails.
    async fn begin_write(&self) -> AppResult<(MutexGuard<'_, ()>, StoreLockGuard)> {
        let writer = self.writer.lock().await;
        let store_writer = self.lock_store(StoreLock::Writer).await?;
        Ok((writer, store_writer))
    }

    /// Wait for a store lock on the blocking pool so the runtime keeps going.
    async fn lock_store(&self, lock: StoreLock) -> AppResult<StoreLockGuard> {
        let store = Arc::clone(&self.store);
        tokio::task::spawn_blocking(move || store.lock(lock))
            .await
            .map_err(|e| AppError::Persistence(format!("Snapshot lock task failed: {}", e)))?
    }

    fn load_for_write(&self) -> AppResult<Triad> {
        let triad = self.store.load_triad()?;
        self.mark_loaded();
        Ok(triad)
    }

    fn mark_loaded(&self) {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        if *state == IndexState::Empty {
            *state = IndexState::Loaded;
        }
    }

    fn mark_dirty(&self) -> DirtyGuard<'_> {
        *self.state.lock().unwrap_or_else(|e| e.into_inner()) = IndexState::Dirty;
        DirtyGuard(&self.state)
    }
}

/// Millisecond timestamp id, bumped past any id already in use.
fn synthesize_id(corpus: &CorpusStore) -> ItemId {
    let mut candidate = Utc::now().timestamp_millis();
    while corpus.contains(&candidate.to_string()) {
        candidate += 1;
    }
    ItemId::Int(candidate)
}
