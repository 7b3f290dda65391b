//! Durable storage for the index triad.
//!
//! A triad is the vector index, the corpus and the slot mapping. The three are
//! only meaningful together, so they are loaded together and committed
//! together.
//!
//! [`FileSnapshotStore`] lays a corpus out as numbered generations:
//!
//! ```text
//! snapshots/
//!   CURRENT          -> "gen-000007"
//!   WRITER.lock
//!   SWAP.lock
//!   gen-000006/      previous generation, kept for recovery
//!   gen-000007/
//!     index.bin
//!     corpus.json
//!     mapping.json
//!     fingerprints.json
//! ```
//!
//! A save writes a complete new generation under a temporary name, syncs it,
//! renames it into place and finally swaps `CURRENT`. Readers only ever follow
//! `CURRENT`, so they see either the old triad or the new one. An existing
//! generation directory is never replaced.
//!
//! Separate processes coordinate through advisory locks on the two lock files
//! (see [`StoreLock`]).

use fs2::FileExt;
use serde_json::Value;
use simdex_core::{AppError, AppResult};
use std::collections::BTreeMap;
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use crate::corpus::CorpusStore;
use crate::mapping::SlotMapping;
use crate::vector_index::{FlatIndex, Metric};

const CURRENT_FILE: &str = "CURRENT";
const INDEX_FILE: &str = "index.bin";
const CORPUS_FILE: &str = "corpus.json";
const MAPPING_FILE: &str = "mapping.json";
const FINGERPRINTS_FILE: &str = "fingerprints.json";
const WRITER_LOCK_FILE: &str = "WRITER.lock";
const SWAP_LOCK_FILE: &str = "SWAP.lock";
const GENERATION_PREFIX: &str = "gen-";
const TMP_SUFFIX: &str = ".tmp";

const INDEX_MAGIC: &[u8; 4] = b"SDXF";
const INDEX_VERSION: u32 = 1;
/// magic + version + metric + dimension + count
const INDEX_HEADER_LEN: usize = 4 + 4 + 1 + 4 + 8;

static SAVE_SEQUENCE: AtomicU64 = AtomicU64::new(0);

/// Index, corpus and mapping of one corpus.
///
/// `fingerprints` records, per mapped id, which text and model produced its
/// vector (see [`crate::embeddings::Embedder::fingerprint`]). It lets a
/// rebuild reuse vectors whose record did not change.
#[derive(Debug, Clone, PartialEq)]
pub struct Triad {
    pub index: FlatIndex,
    pub corpus: CorpusStore,
    pub mapping: SlotMapping,
    pub fingerprints: BTreeMap<String, String>,
}

impl Triad {
    pub fn empty(dimension: usize, metric: Metric) -> Self {
        Self {
            index: FlatIndex::new(dimension, metric),
            corpus: CorpusStore::new(),
            mapping: SlotMapping::new(),
            fingerprints: BTreeMap::new(),
        }
    }

    /// Stored vector of `key`, if it was embedded from a text and model
    /// matching `fingerprint`.
    pub fn reusable_vector(&self, key: &str, fingerprint: &str) -> Option<&[f32]> {
        if self.fingerprints.get(key).map(String::as_str) != Some(fingerprint) {
            return None;
        }
        self.index.vector(self.mapping.slot_of(key)?)
    }

    /// Every record is mapped and every vector belongs to a mapped record.
    pub fn is_consistent(&self) -> bool {
        self.mapping.len() == self.corpus.len()
            && self.index.size() == self.corpus.len()
            && self.corpus.ids().all(|id| self.mapping.contains(&id.key()))
    }
}

/// Locks a snapshot store shares with other processes.
///
/// `Writer` serializes mutations from loading the triad to committing it.
/// `Read` and `Commit` are the shared and exclusive sides of the lock that
/// guards the swap of the committed generation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreLock {
    Writer,
    Read,
    Commit,
}

/// A held [`StoreLock`]; dropping it releases the lock.
#[derive(Debug)]
pub struct StoreLockGuard {
    file: Option<File>,
}

impl StoreLockGuard {
    /// Guard for stores that have nothing to lock.
    pub fn unlocked() -> Self {
        Self { file: None }
    }
}

impl Drop for StoreLockGuard {
    fn drop(&mut self) {
        if let Some(file) = self.file.take() {
            if let Err(e) = FileExt::unlock(&file) {
                tracing::warn!("Failed to release snapshot lock: {}", e);
            }
        }
    }
}

/// Where triads live between operations.
pub trait SnapshotStore: Send + Sync + std::fmt::Debug {
    /// Load the committed triad, or an empty one when nothing was ever saved.
    fn load_triad(&self) -> AppResult<Triad>;

    /// Commit `triad`. Either the whole triad becomes visible or none of it does.
    fn save_triad(&self, triad: &Triad) -> AppResult<()>;

    /// Load only the committed corpus.
    ///
    /// Rebuilds use this so a corpus can be re-embedded even when its stored
    /// index no longer matches the configured dimension or metric.
    fn load_corpus(&self) -> AppResult<CorpusStore> {
        Ok(self.load_triad()?.corpus)
    }

    /// Number of the committed generation, 0 when nothing was saved.
    fn generation(&self) -> AppResult<u64> {
        Ok(0)
    }

    /// Block until `lock` is held. Stores only used by one process need not
    /// lock anything.
    fn lock(&self, _lock: StoreLock) -> AppResult<StoreLockGuard> {
        Ok(StoreLockGuard::unlocked())
    }
}

/// Generation-directory snapshot store on the local filesystem.
#[derive(Debug, Clone)]
pub struct FileSnapshotStore {
    root: PathBuf,
    dimension: usize,
    metric: Metric,
    keep_generations: usize,
}

impl FileSnapshotStore {
    pub fn new(root: impl Into<PathBuf>, dimension: usize, metric: Metric) -> Self {
        Self {
            root: root.into(),
            dimension,
            metric,
            keep_generations: 2,
        }
    }

    /// Keep `keep` committed generations on disk, the current one included.
    pub fn with_keep_generations(mut self, keep: usize) -> Self {
        self.keep_generations = keep.max(1);
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Directory of the committed generation, if any.
    pub fn current_dir(&self) -> AppResult<Option<PathBuf>> {
        Ok(self
            .current_generation()?
            .map(|generation| self.generation_dir(generation)))
    }

    fn current_generation(&self) -> AppResult<Option<u64>> {
        let path = self.root.join(CURRENT_FILE);
        if !path.exists() {
            return Ok(None);
        }

        let content = fs::read_to_string(&path)
            .map_err(|e| persistence(format!("Failed to read {:?}", path), e))?;
        let name = content.trim();
        parse_generation(name).map(Some).ok_or_else(|| {
            AppError::Persistence(format!(
                "Snapshot pointer {:?} names an invalid generation '{}'",
                path, name
            ))
        })
    }

    fn generation_dir(&self, generation: u64) -> PathBuf {
        self.root.join(generation_name(generation))
    }

    fn committed_dir(&self) -> AppResult<Option<PathBuf>> {
        let Some(dir) = self.current_dir()? else {
            return Ok(None);
        };
        if !dir.is_dir() {
            return Err(AppError::Persistence(format!(
                "Snapshot pointer names {:?}, which does not exist",
                dir
            )));
        }
        Ok(Some(dir))
    }

    fn read_corpus(dir: &Path) -> AppResult<CorpusStore> {
        let path = dir.join(CORPUS_FILE);
        let content = fs::read_to_string(&path)
            .map_err(|e| persistence(format!("Failed to read {:?}", path), e))?;
        let rows: Vec<Value> = serde_json::from_str(&content)
            .map_err(|e| persistence(format!("Failed to parse {:?}", path), e))?;
        Ok(CorpusStore::from_rows(rows))
    }

    /// Fingerprints are an optimization: a missing or unreadable file only
    /// means every record is embedded again.
    fn read_fingerprints(dir: &Path, mapping: &SlotMapping) -> BTreeMap<String, String> {
        let path = dir.join(FINGERPRINTS_FILE);
        let content = match fs::read_to_string(&path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return BTreeMap::new(),
            Err(e) => {
                tracing::warn!("Ignoring unreadable {:?}: {}", path, e);
                return BTreeMap::new();
            }
        };

        match serde_json::from_str::<BTreeMap<String, String>>(&content) {
            Ok(mut fingerprints) => {
                fingerprints.retain(|key, _| mapping.contains(key));
                fingerprints
            }
            Err(e) => {
                tracing::warn!("Ignoring malformed {:?}: {}", path, e);
                BTreeMap::new()
            }
        }
    }

    fn write_generation(&self, dir: &Path, triad: &Triad) -> AppResult<()> {
        fs::create_dir_all(dir)
            .map_err(|e| persistence(format!("Failed to create {:?}", dir), e))?;

        write_synced(&dir.join(INDEX_FILE), &encode_index(&triad.index))?;
        write_synced(&dir.join(CORPUS_FILE), triad.corpus.to_json()?.as_bytes())?;
        write_synced(&dir.join(MAPPING_FILE), triad.mapping.to_json()?.as_bytes())?;
        write_synced(
            &dir.join(FINGERPRINTS_FILE),
            serde_json::to_string_pretty(&triad.fingerprints)?.as_bytes(),
        )?;
        sync_dir(dir)
    }

    /// Highest generation number with a directory on disk, committed or not.
    fn highest_generation(&self) -> AppResult<u64> {
        let entries = fs::read_dir(&self.root)
            .map_err(|e| persistence(format!("Failed to list {:?}", self.root), e))?;
        Ok(entries
            .filter_map(Result::ok)
            .filter_map(|entry| parse_generation(&entry.file_name().to_string_lossy()))
            .max()
            .unwrap_or(0))
    }

    /// Remove uncommitted leftovers and generations older than the retention window.
    fn prune(&self, current: u64) {
        let entries = match fs::read_dir(&self.root) {
            Ok(entries) => entries,
            Err(e) => {
                tracing::warn!("Could not list {:?} for pruning: {}", self.root, e);
                return;
            }
        };

        let oldest_kept = current.saturating_sub(self.keep_generations as u64 - 1);
        for entry in entries.filter_map(Result::ok) {
            let name = entry.file_name().to_string_lossy().to_string();
            let stale = if name.ends_with(TMP_SUFFIX) {
                name.starts_with(GENERATION_PREFIX) || name.starts_with(CURRENT_FILE)
            } else {
                parse_generation(&name).is_some_and(|g| g < oldest_kept)
            };
            if !stale {
                continue;
            }

            let path = entry.path();
            let removed = if path.is_dir() {
                fs::remove_dir_all(&path)
            } else {
                fs::remove_file(&path)
            };
            match removed {
                Ok(()) => tracing::debug!("Pruned snapshot entry {:?}", path),
                Err(e) => tracing::warn!("Failed to prune {:?}: {}", path, e),
            }
        }
    }
}

impl SnapshotStore for FileSnapshotStore {
    fn load_triad(&self) -> AppResult<Triad> {
        let Some(dir) = self.committed_dir()? else {
            tracing::debug!("No snapshot under {:?}; starting empty", self.root);
            return Ok(Triad::empty(self.dimension, self.metric));
        };

        let index_path = dir.join(INDEX_FILE);
        let bytes = fs::read(&index_path)
            .map_err(|e| persistence(format!("Failed to read {:?}", index_path), e))?;
        let index = decode_index(&bytes)?;

        if index.dimension() != self.dimension || index.metric() != self.metric {
            return Err(AppError::Persistence(format!(
                "Snapshot index is {}-d {} but the corpus is configured for {}-d {}; rebuild the index",
                index.dimension(),
                index.metric(),
                self.dimension,
                self.metric
            )));
        }

        let corpus = Self::read_corpus(&dir)?;

        let mapping_path = dir.join(MAPPING_FILE);
        let content = fs::read_to_string(&mapping_path)
            .map_err(|e| persistence(format!("Failed to read {:?}", mapping_path), e))?;
        let mut mapping = SlotMapping::from_json(&content)
            .map_err(|e| persistence(format!("Failed to parse {:?}", mapping_path), e))?;

        let dropped = mapping.retain_consistent(&corpus, index.size());
        if dropped > 0 {
            tracing::warn!(
                "Dropped {} inconsistent mapping entries while loading {:?}",
                dropped,
                dir
            );
        }

        tracing::debug!(
            "Loaded snapshot {:?}: {} items, {} vectors",
            dir,
            corpus.len(),
            index.size()
        );

        let fingerprints = Self::read_fingerprints(&dir, &mapping);

        Ok(Triad {
            index,
            corpus,
            mapping,
            fingerprints,
        })
    }

    fn save_triad(&self, triad: &Triad) -> AppResult<()> {
        if triad.index.dimension() != self.dimension || triad.index.metric() != self.metric {
            return Err(AppError::Persistence(format!(
                "Refusing to save a {}-d {} index into a {}-d {} store",
                triad.index.dimension(),
                triad.index.metric(),
                self.dimension,
                self.metric
            )));
        }

        fs::create_dir_all(&self.root)
            .map_err(|e| persistence(format!("Failed to create {:?}", self.root), e))?;

        // Skip past uncommitted directories instead of reusing their number
        let current = self.current_generation()?.unwrap_or(0);
        let generation = current.max(self.highest_generation()?) + 1;
        let final_dir = self.generation_dir(generation);

        let tmp_dir = self.root.join(format!(
            "{}.{}-{}{}",
            generation_name(generation),
            std::process::id(),
            SAVE_SEQUENCE.fetch_add(1, Ordering::Relaxed),
            TMP_SUFFIX
        ));
        if let Err(e) = self.write_generation(&tmp_dir, triad) {
            let _ = fs::remove_dir_all(&tmp_dir);
            return Err(e);
        }

        if final_dir.exists() {
            let _ = fs::remove_dir_all(&tmp_dir);
            return Err(AppError::Persistence(format!(
                "Snapshot generation {:?} already exists; another writer committed concurrently",
                final_dir
            )));
        }
        fs::rename(&tmp_dir, &final_dir)
            .map_err(|e| persistence(format!("Failed to move {:?} into place", tmp_dir), e))?;
        sync_dir(&self.root)?;

        let pointer_tmp = self.root.join(format!(
            "{CURRENT_FILE}.{}{TMP_SUFFIX}",
            std::process::id()
        ));
        write_synced(&pointer_tmp, generation_name(generation).as_bytes())?;
        fs::rename(&pointer_tmp, self.root.join(CURRENT_FILE))
            .map_err(|e| persistence("Failed to commit snapshot pointer".to_string(), e))?;
        sync_dir(&self.root)?;

        tracing::debug!(
            "Committed snapshot generation {} ({} items, {} vectors)",
            generation,
            triad.corpus.len(),
            triad.index.size()
        );

        self.prune(generation);
        Ok(())
    }

    fn load_corpus(&self) -> AppResult<CorpusStore> {
        match self.committed_dir()? {
            Some(dir) => Self::read_corpus(&dir),
            None => Ok(CorpusStore::new()),
        }
    }

    fn generation(&self) -> AppResult<u64> {
        Ok(self.current_generation()?.unwrap_or(0))
    }

    fn lock(&self, lock: StoreLock) -> AppResult<StoreLockGuard> {
        fs::create_dir_all(&self.root)
            .map_err(|e| persistence(format!("Failed to create {:?}", self.root), e))?;

        let path = self.root.join(match lock {
            StoreLock::Writer => WRITER_LOCK_FILE,
            StoreLock::Read | StoreLock::Commit => SWAP_LOCK_FILE,
        });
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&path)
            .map_err(|e| persistence(format!("Failed to open {:?}", path), e))?;

        let locked = match lock {
            StoreLock::Read => FileExt::lock_shared(&file),
            StoreLock::Writer | StoreLock::Commit => FileExt::lock_exclusive(&file),
        };
        locked.map_err(|e| persistence(format!("Failed to lock {:?}", path), e))?;

        tracing::trace!("Holding {:?} lock on {:?}", lock, path);
        Ok(StoreLockGuard { file: Some(file) })
    }
}

fn generation_name(generation: u64) -> String {
    format!("{}{:06}", GENERATION_PREFIX, generation)
}

fn parse_generation(name: &str) -> Option<u64> {
    name.strip_prefix(GENERATION_PREFIX)?.parse().ok()
}

fn persistence(context: String, err: impl std::fmt::Display) -> AppError {
    AppError::Persistence(format!("{}: {}", context, err))
}

fn write_synced(path: &Path, bytes: &[u8]) -> AppResult<()> {
    let mut file =
        File::create(path).map_err(|e| persistence(format!("Failed to create {:?}", path), e))?;
    file.write_all(bytes)
        .map_err(|e| persistence(format!("Failed to write {:?}", path), e))?;
    file.sync_all()
        .map_err(|e| persistence(format!("Failed to sync {:?}", path), e))
}

#[cfg(unix)]
fn sync_dir(path: &Path) -> AppResult<()> {
    File::open(path)
        .and_then(|dir| dir.sync_all())
        .map_err(|e| persistence(format!("Failed to sync directory {:?}", path), e))
}

#[cfg(not(unix))]
fn sync_dir(_path: &Path) -> AppResult<()> {
    Ok(())
}

/// Serialize an index as a little-endian header followed by the raw f32 rows.
pub fn encode_index(index: &FlatIndex) -> Vec<u8> {
    let raw = index.raw();
    let mut bytes = Vec::with_capacity(INDEX_HEADER_LEN + raw.len() * 4);
    bytes.extend_from_slice(INDEX_MAGIC);
    bytes.extend_from_slice(&INDEX_VERSION.to_le_bytes());
    bytes.push(match index.metric() {
        Metric::L2 => 0,
        Metric::Cosine => 1,
    });
    bytes.extend_from_slice(&(index.dimension() as u32).to_le_bytes());
    bytes.extend_from_slice(&(index.size() as u64).to_le_bytes());
    for &value in raw {
        bytes.extend_from_slice(&value.to_le_bytes());
    }
    bytes
}

/// Parse bytes produced by [`encode_index`].
pub fn decode_index(bytes: &[u8]) -> AppResult<FlatIndex> {
    if bytes.len() < INDEX_HEADER_LEN || &bytes[0..4] != INDEX_MAGIC {
        return Err(AppError::Persistence(
            "Index file is truncated or not a simdex index".to_string(),
        ));
    }

    let version = u32::from_le_bytes([bytes[4], bytes[5], bytes[6], bytes[7]]);
    if version != INDEX_VERSION {
        return Err(AppError::Persistence(format!(
            "Unsupported index file version {}",
            version
        )));
    }

    let metric = match bytes[8] {
        0 => Metric::L2,
        1 => Metric::Cosine,
        other => {
            return Err(AppError::Persistence(format!(
                "Unknown metric tag {} in index file",
                other
            )))
        }
    };

    let dimension = u32::from_le_bytes([bytes[9], bytes[10], bytes[11], bytes[12]]) as usize;
    let mut count_bytes = [0u8; 8];
    count_bytes.copy_from_slice(&bytes[13..21]);
    let count = u64::from_le_bytes(count_bytes) as usize;

    let payload = &bytes[INDEX_HEADER_LEN..];
    let expected = count
        .checked_mul(dimension)
        .and_then(|n| n.checked_mul(4))
        .ok_or_else(|| AppError::Persistence("Index file header overflows".to_string()))?;
    if payload.len() != expected {
        return Err(AppError::Persistence(format!(
            "Index file holds {} payload bytes, header promises {}",
            payload.len(),
            expected
        )));
    }

    let data = payload
        .chunks_exact(4)
        .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect();

    FlatIndex::from_raw(dimension, metric, data)
}
