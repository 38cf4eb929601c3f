use crate::data::IndexKey;
use crate::ids::InputId;
use nova_storage::{
    decode, encode, read_artifact, write_artifact_atomic, ArtifactKind, Compression, StorageError,
};
use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::path::{Path, PathBuf};

// Bump whenever the shard payload layout changes.
pub(crate) const SHARD_SCHEMA_VERSION: u32 = 1;

/// Maps a key to its shard for a given shard count.
pub(crate) type Router<K> = fn(&K, u32) -> Result<u32, StorageError>;

/// Approximate in-memory footprint of one entry value.
pub(crate) trait Weigh {
    fn weigh(&self) -> u64;
}

impl Weigh for Vec<u8> {
    fn weigh(&self) -> u64 {
        (self.len() + std::mem::size_of::<Vec<u8>>()) as u64
    }
}

impl Weigh for u64 {
    fn weigh(&self) -> u64 {
        8
    }
}

/// Routes a key by hashing its `bincode` encoding with blake3.
pub(crate) fn shard_for_key<K: Serialize>(key: &K, shard_count: u32) -> Result<u32, StorageError> {
    if shard_count == 0 {
        return Ok(0);
    }

    let bytes = encode(key)?;
    let hash = blake3::hash(&bytes);
    let mut prefix = [0u8; 8];
    prefix.copy_from_slice(&hash.as_bytes()[..8]);
    let value = u64::from_le_bytes(prefix);
    Ok((value % shard_count as u64) as u32)
}

/// Routes inputs round-robin; dense ids spread evenly.
pub(crate) fn shard_for_input(input: &InputId, shard_count: u32) -> Result<u32, StorageError> {
    Ok(input.get() % shard_count.max(1))
}

struct Shard<K, T> {
    entries: HashMap<K, T>,
    dirty: bool,
}

/// A key/value map split across `shard_count` artifact files.
///
/// Shards are loaded on first access, mutated in memory and written back by
/// [`ShardedFile::flush`]. Dirty shards are never dropped from memory before
/// they have been written.
pub(crate) struct ShardedFile<K, T> {
    dir: PathBuf,
    kind: ArtifactKind,
    compression: Compression,
    shard_count: u32,
    route: Router<K>,
    shards: Mutex<HashMap<u32, Shard<K, T>>>,
}

impl<K, T> ShardedFile<K, T>
where
    K: IndexKey,
    T: Serialize + DeserializeOwned + Send + Weigh,
{
    pub(crate) fn open(
        dir: &Path,
        kind: ArtifactKind,
        compression: Compression,
        shard_count: u32,
        route: Router<K>,
    ) -> Result<Self, StorageError> {
        std::fs::create_dir_all(dir)?;
        Ok(Self {
            dir: dir.to_path_buf(),
            kind,
            compression,
            shard_count: shard_count.max(1),
            route,
            shards: Mutex::new(HashMap::new()),
        })
    }

    fn shard_path(&self, shard: u32) -> PathBuf {
        self.dir.join(format!("shard-{shard:04}.bin"))
    }

    fn load(&self, shard: u32) -> Result<HashMap<K, T>, StorageError> {
        match read_artifact(&self.shard_path(shard), self.kind, SHARD_SCHEMA_VERSION)? {
            Some(payload) => decode(&payload),
            None => Ok(HashMap::new()),
        }
    }

    fn loaded<'a>(
        &self,
        shards: &'a mut HashMap<u32, Shard<K, T>>,
        shard: u32,
    ) -> Result<&'a mut Shard<K, T>, StorageError> {
        match shards.entry(shard) {
            Entry::Occupied(entry) => Ok(entry.into_mut()),
            Entry::Vacant(entry) => {
                let entries = self.load(shard)?;
                Ok(entry.insert(Shard {
                    entries,
                    dirty: false,
                }))
            }
        }
    }

    /// Runs `f` against the current entry for `key`.
    pub(crate) fn read<R>(
        &self,
        key: &K,
        f: impl FnOnce(Option<&T>) -> R,
    ) -> Result<R, StorageError> {
        let shard = (self.route)(key, self.shard_count)?;
        let mut shards = self.shards.lock();
        let shard = self.loaded(&mut shards, shard)?;
        Ok(f(shard.entries.get(key)))
    }

    /// Runs `f` against the shard owning `key`; `f` returns whether it changed
    /// anything.
    pub(crate) fn update(
        &self,
        key: &K,
        f: impl FnOnce(&mut HashMap<K, T>) -> bool,
    ) -> Result<bool, StorageError> {
        let shard = (self.route)(key, self.shard_count)?;
        let mut shards = self.shards.lock();
        let shard = self.loaded(&mut shards, shard)?;
        let changed = f(&mut shard.entries);
        shard.dirty |= changed;
        Ok(changed)
    }

    /// Calls `f` for every key in every shard until it returns `false`.
    ///
    /// Shards that are not loaded are read without being cached. `f` runs
    /// without the shard lock held.
    pub(crate) fn for_each_key(&self, f: &mut dyn FnMut(&K) -> bool) -> Result<bool, StorageError> {
        for shard in 0..self.shard_count {
            let cached: Option<Vec<K>> = self
                .shards
                .lock()
                .get(&shard)
                .map(|loaded| loaded.entries.keys().cloned().collect());
            let keys = match cached {
                Some(keys) => keys,
                None => self.load(shard)?.into_keys().collect(),
            };
            for key in &keys {
                if !f(key) {
                    return Ok(false);
                }
            }
        }
        Ok(true)
    }

    /// Writes every dirty shard.
    pub(crate) fn flush(&self) -> Result<(), StorageError> {
        let mut shards = self.shards.lock();
        let mut written = 0usize;
        for (id, shard) in shards.iter_mut() {
            if !shard.dirty {
                continue;
            }
            let payload = encode(&shard.entries)?;
            write_artifact_atomic(
                &self.shard_path(*id),
                self.kind,
                SHARD_SCHEMA_VERSION,
                &payload,
                self.compression,
            )?;
            shard.dirty = false;
            written += 1;
        }

        if written > 0 {
            tracing::debug!(
                target = "nova.storage",
                dir = %self.dir.display(),
                shards = written,
                "flushed shards"
            );
        }
        Ok(())
    }

    /// Drops every loaded shard and deletes all shard files.
    pub(crate) fn clear(&self) -> Result<(), StorageError> {
        let mut shards = self.shards.lock();
        shards.clear();
        for shard in 0..self.shard_count {
            match std::fs::remove_file(self.shard_path(shard)) {
                Ok(()) => {}
                Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
                Err(err) => return Err(err.into()),
            }
        }
        Ok(())
    }

    /// Drops clean shards from memory; dirty shards stay until flushed.
    pub(crate) fn clear_caches(&self) {
        self.shards.lock().retain(|_, shard| shard.dirty);
    }

    pub(crate) fn close(&self) -> Result<(), StorageError> {
        self.flush()?;
        self.shards.lock().clear();
        Ok(())
    }

    pub(crate) fn estimated_bytes(&self) -> u64 {
        let key_bytes = std::mem::size_of::<K>() as u64;
        let shards = self.shards.lock();
        shards
            .values()
            .flat_map(|shard| shard.entries.values())
            .map(|value| key_bytes.saturating_add(value.weigh()))
            .fold(0u64, u64::saturating_add)
    }

    #[cfg(test)]
    pub(crate) fn loaded_shards(&self) -> usize {
        self.shards.lock().len()
    }
}
