use crate::data::{IndexKey, IndexValue};
use crate::error::IndexError;
use crate::forward::{
    ForwardIndexMode, IntInputDataCodec, MemoryForwardIndex, MemoryIntForwardIndex,
    PersistentForwardIndex, PersistentIntForwardIndex,
};
use crate::ids::IndexId;
use crate::storage::{IndexStorage, MemoryIndexStorage, PersistentIndexStorage};
use crate::validation::ValueValidation;
use fs2::FileExt;
use nova_config::{CompressionSetting, IndexConfig, MAX_SHARD_COUNT};
use nova_storage::Compression;
use serde::{Deserialize, Serialize};
use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};

// Bump whenever the directory layout or metadata interpretation changes.
pub const LAYOUT_SCHEMA_VERSION: u32 = 1;

const METADATA_FILE: &str = "index.json";
const LOCK_FILE: &str = ".lock";
const REBUILD_MARKER: &str = "rebuild-required";
const STORAGE_DIR: &str = "storage";
const FORWARD_DIR: &str = "forward";

/// Runtime options for persistent indexes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IndexOptions {
    pub shard_count: u32,
    pub compression: Compression,
    pub value_validation: ValueValidation,
}

impl Default for IndexOptions {
    fn default() -> Self {
        Self {
            shard_count: nova_config::DEFAULT_SHARD_COUNT,
            compression: Compression::None,
            value_validation: ValueValidation::default(),
        }
    }
}

impl IndexOptions {
    pub fn from_config(config: &IndexConfig) -> Self {
        Self {
            shard_count: config.shard_count,
            compression: match config.compression {
                CompressionSetting::None => Compression::None,
                CompressionSetting::Zstd => Compression::Zstd,
            },
            value_validation: config.effective_value_validation().into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ForwardEncoding {
    Generic,
    Integer,
}

/// Contents of `index.json`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexMetadata {
    pub schema_version: u32,
    pub indexer_version: u32,
    pub forward_encoding: ForwardEncoding,
    pub shard_count: u32,
}

/// Exclusive ownership of an index directory, released on drop.
#[derive(Debug)]
pub struct DirLock {
    file: File,
    path: PathBuf,
}

impl DirLock {
    fn acquire(path: PathBuf) -> Result<Self, IndexError> {
        let file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .read(true)
            .write(true)
            .open(&path)?;
        if file.try_lock_exclusive().is_err() {
            return Err(IndexError::Locked { path });
        }
        Ok(Self { file, path })
    }
}

impl Drop for DirLock {
    fn drop(&mut self) {
        if let Err(err) = FileExt::unlock(&self.file) {
            tracing::debug!(
                target = "nova.index",
                path = %self.path.display(),
                error = %err,
                "failed to release index directory lock"
            );
        }
    }
}

/// Storage backends for one index, ready to hand to
/// [`crate::MapReduceIndex::builder`].
pub struct IndexParts<K, V> {
    pub storage: Box<dyn IndexStorage<K, V>>,
    pub forward: ForwardIndexMode<K, V>,
    pub dir_lock: Option<DirLock>,
    /// File recording an outstanding rebuild request across restarts.
    pub rebuild_marker: Option<PathBuf>,
    /// The previous on-disk contents were discarded; every input must be
    /// re-indexed.
    pub was_reset: bool,
}

impl<K: IndexKey, V: IndexValue> IndexParts<K, V> {
    pub fn in_memory() -> Self {
        Self {
            storage: Box::new(MemoryIndexStorage::new()),
            forward: ForwardIndexMode::generic(MemoryForwardIndex::new()),
            dir_lock: None,
            rebuild_marker: None,
            was_reset: false,
        }
    }

    pub fn in_memory_integer(codec: impl IntInputDataCodec<K, V> + 'static) -> Self {
        Self {
            storage: Box::new(MemoryIndexStorage::new()),
            forward: ForwardIndexMode::integer(MemoryIntForwardIndex::new(), codec),
            dir_lock: None,
            rebuild_marker: None,
            was_reset: false,
        }
    }

    /// Opens `<root>/<id>/` with a byte-snapshot forward index.
    pub fn open_persistent(
        root: &Path,
        id: &IndexId,
        indexer_version: u32,
        options: IndexOptions,
    ) -> Result<Self, IndexError> {
        let prepared = prepare_dir(root, id, indexer_version, ForwardEncoding::Generic, options)?;
        let forward = PersistentForwardIndex::open(
            &prepared.dir.join(FORWARD_DIR),
            options.shard_count,
            options.compression,
        )?;
        prepared.into_parts(options, ForwardIndexMode::generic(forward))
    }

    /// Opens `<root>/<id>/` with an integer forward index.
    pub fn open_persistent_integer(
        root: &Path,
        id: &IndexId,
        indexer_version: u32,
        options: IndexOptions,
        codec: impl IntInputDataCodec<K, V> + 'static,
    ) -> Result<Self, IndexError> {
        let prepared = prepare_dir(root, id, indexer_version, ForwardEncoding::Integer, options)?;
        let forward = PersistentIntForwardIndex::open(
            &prepared.dir.join(FORWARD_DIR),
            options.shard_count,
            options.compression,
        )?;
        prepared.into_parts(options, ForwardIndexMode::integer(forward, codec))
    }
}

struct PreparedDir {
    dir: PathBuf,
    lock: DirLock,
    was_reset: bool,
}

impl PreparedDir {
    fn into_parts<K: IndexKey, V: IndexValue>(
        self,
        options: IndexOptions,
        forward: ForwardIndexMode<K, V>,
    ) -> Result<IndexParts<K, V>, IndexError> {
        let storage = PersistentIndexStorage::open(
            &self.dir.join(STORAGE_DIR),
            options.shard_count,
            options.compression,
        )?;
        Ok(IndexParts {
            storage: Box::new(storage),
            forward,
            dir_lock: Some(self.lock),
            rebuild_marker: Some(self.dir.join(REBUILD_MARKER)),
            was_reset: self.was_reset,
        })
    }
}

fn prepare_dir(
    root: &Path,
    id: &IndexId,
    indexer_version: u32,
    forward_encoding: ForwardEncoding,
    options: IndexOptions,
) -> Result<PreparedDir, IndexError> {
    if options.shard_count == 0 || options.shard_count > MAX_SHARD_COUNT {
        return Err(IndexError::InvalidShardCount {
            shard_count: options.shard_count,
        });
    }

    let dir = root.join(id.as_str());
    std::fs::create_dir_all(&dir)?;
    let lock = DirLock::acquire(dir.join(LOCK_FILE))?;

    let expected = IndexMetadata {
        schema_version: LAYOUT_SCHEMA_VERSION,
        indexer_version,
        forward_encoding,
        shard_count: options.shard_count,
    };

    let metadata_path = dir.join(METADATA_FILE);
    let found = match std::fs::read(&metadata_path) {
        Ok(bytes) => Some(serde_json::from_slice::<IndexMetadata>(&bytes).ok()),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => None,
        Err(err) => return Err(err.into()),
    };

    let marker = dir.join(REBUILD_MARKER);
    let pending_rebuild = marker.exists();
    let was_reset = match found {
        _ if pending_rebuild => {
            tracing::info!(
                target = "nova.index",
                index = %id,
                "rebuild was pending; discarding persisted data"
            );
            remove_dir_if_exists(&dir.join(STORAGE_DIR))?;
            remove_dir_if_exists(&dir.join(FORWARD_DIR))?;
            true
        }
        Some(Some(found)) if found == expected => false,
        None if !dir.join(STORAGE_DIR).exists() && !dir.join(FORWARD_DIR).exists() => false,
        found => {
            tracing::info!(
                target = "nova.index",
                index = %id,
                found = ?found.flatten(),
                expected = ?expected,
                "index format changed; discarding persisted data"
            );
            remove_dir_if_exists(&dir.join(STORAGE_DIR))?;
            remove_dir_if_exists(&dir.join(FORWARD_DIR))?;
            // Emptied but not yet rebuilt; a crash before the rebuild must
            // not reopen the directory as trusted.
            nova_storage::atomic_write(&marker, b"index format changed")?;
            true
        }
    };

    if was_reset || !metadata_path.exists() {
        let bytes = serde_json::to_vec_pretty(&expected)?;
        nova_storage::atomic_write(&metadata_path, &bytes)?;
    }

    Ok(PreparedDir {
        dir,
        lock,
        was_reset,
    })
}

fn remove_dir_if_exists(path: &Path) -> Result<(), IndexError> {
    match std::fs::remove_dir_all(path) {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(err) => Err(err.into()),
    }
}
