use crate::data::{IndexKey, IndexValue, ValueContainer};
use crate::ids::InputId;
use crate::shards::{shard_for_key, ShardedFile, Weigh};
use nova_storage::{ArtifactKind, Compression, StorageError};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::path::Path;

/// The inverted index: key -> every `(input, value)` association.
///
/// Implementations synchronize internally; the owning index serializes
/// mutations with its own lock, so implementations only need to make
/// concurrent reads, flushes and cache clearing safe. A mutation that
/// returns an error must leave storage unchanged.
pub trait IndexStorage<K, V>: Send + Sync {
    /// Current associations for `key`; empty when the key is unknown.
    fn read(&self, key: &K) -> Result<ValueContainer<V>, StorageError>;

    /// The value `input` contributed under `key`, if any.
    fn read_value(&self, key: &K, input: InputId) -> Result<Option<V>, StorageError>
    where
        V: Clone,
    {
        Ok(self.read(key)?.get(input).cloned())
    }

    fn add_value(&self, key: &K, input: InputId, value: V) -> Result<(), StorageError>;

    fn remove_all_values(&self, key: &K, input: InputId) -> Result<(), StorageError>;

    /// Calls `processor` for every stored key until it returns `false`.
    ///
    /// Returns `false` if the enumeration was stopped early.
    fn process_keys(&self, processor: &mut dyn FnMut(&K) -> bool) -> Result<bool, StorageError>;

    fn clear(&self) -> Result<(), StorageError>;

    /// Persists pending changes without altering logical content.
    fn flush(&self) -> Result<(), StorageError>;

    /// Releases in-memory caches that can be reloaded from disk.
    fn clear_caches(&self) -> Result<(), StorageError>;

    fn close(&self) -> Result<(), StorageError>;

    /// Approximate bytes held in memory.
    fn estimated_bytes(&self) -> u64 {
        0
    }
}

/// Heap-only storage; contents are lost when dropped.
pub struct MemoryIndexStorage<K, V> {
    map: Mutex<HashMap<K, ValueContainer<V>>>,
}

impl<K, V> MemoryIndexStorage<K, V> {
    pub fn new() -> Self {
        Self {
            map: Mutex::new(HashMap::new()),
        }
    }
}

impl<K, V> Default for MemoryIndexStorage<K, V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K: IndexKey, V: IndexValue> IndexStorage<K, V> for MemoryIndexStorage<K, V> {
    fn read(&self, key: &K) -> Result<ValueContainer<V>, StorageError> {
        Ok(self.map.lock().get(key).cloned().unwrap_or_default())
    }

    fn read_value(&self, key: &K, input: InputId) -> Result<Option<V>, StorageError> {
        Ok(self
            .map
            .lock()
            .get(key)
            .and_then(|container| container.get(input).cloned()))
    }

    fn add_value(&self, key: &K, input: InputId, value: V) -> Result<(), StorageError> {
        self.map
            .lock()
            .entry(key.clone())
            .or_default()
            .add_value(input, value);
        Ok(())
    }

    fn remove_all_values(&self, key: &K, input: InputId) -> Result<(), StorageError> {
        let mut map = self.map.lock();
        if let Some(container) = map.get_mut(key) {
            container.remove_value(input);
            if container.is_empty() {
                map.remove(key);
            }
        }
        Ok(())
    }

    fn process_keys(&self, processor: &mut dyn FnMut(&K) -> bool) -> Result<bool, StorageError> {
        let keys: Vec<K> = self.map.lock().keys().cloned().collect();
        Ok(keys.iter().all(|key| processor(key)))
    }

    fn clear(&self) -> Result<(), StorageError> {
        self.map.lock().clear();
        Ok(())
    }

    fn flush(&self) -> Result<(), StorageError> {
        Ok(())
    }

    fn clear_caches(&self) -> Result<(), StorageError> {
        Ok(())
    }

    fn close(&self) -> Result<(), StorageError> {
        self.map.lock().clear();
        Ok(())
    }

    fn estimated_bytes(&self) -> u64 {
        let map = self.map.lock();
        map.values()
            .map(|container| std::mem::size_of::<K>() as u64 + container.weigh())
            .sum()
    }
}

impl<V> Weigh for ValueContainer<V> {
    fn weigh(&self) -> u64 {
        let per_entry = std::mem::size_of::<InputId>() + std::mem::size_of::<V>() + 16;
        (self.len() * per_entry) as u64
    }
}

/// Sharded on-disk storage.
///
/// Keys are routed by hashing their `bincode` encoding; each shard is one
/// [`ArtifactKind::InvertedIndexShard`] artifact written on flush.
pub struct PersistentIndexStorage<K, V> {
    shards: ShardedFile<K, ValueContainer<V>>,
}

impl<K: IndexKey, V: IndexValue> PersistentIndexStorage<K, V> {
    pub fn open(dir: &Path, shard_count: u32, compression: Compression) -> Result<Self, StorageError> {
        let shards = ShardedFile::open(
            dir,
            ArtifactKind::InvertedIndexShard,
            compression,
            shard_count,
            shard_for_key::<K>,
        )?;
        Ok(Self { shards })
    }

    #[cfg(test)]
    pub(crate) fn loaded_shards(&self) -> usize {
        self.shards.loaded_shards()
    }
}

impl<K: IndexKey, V: IndexValue> IndexStorage<K, V> for PersistentIndexStorage<K, V> {
    fn read(&self, key: &K) -> Result<ValueContainer<V>, StorageError> {
        self.shards
            .read(key, |container| container.cloned().unwrap_or_default())
    }

    fn read_value(&self, key: &K, input: InputId) -> Result<Option<V>, StorageError> {
        self.shards.read(key, |container| {
            container.and_then(|container| container.get(input).cloned())
        })
    }

    fn add_value(&self, key: &K, input: InputId, value: V) -> Result<(), StorageError> {
        self.shards.update(key, |entries| {
            entries
                .entry(key.clone())
                .or_default()
                .add_value(input, value);
            true
        })?;
        Ok(())
    }

    fn remove_all_values(&self, key: &K, input: InputId) -> Result<(), StorageError> {
        self.shards.update(key, |entries| {
            let Some(container) = entries.get_mut(key) else {
                return false;
            };
            let removed = container.remove_value(input);
            if container.is_empty() {
                entries.remove(key);
            }
            removed
        })?;
        Ok(())
    }

    fn process_keys(&self, processor: &mut dyn FnMut(&K) -> bool) -> Result<bool, StorageError> {
        self.shards.for_each_key(processor)
    }

    fn clear(&self) -> Result<(), StorageError> {
        self.shards.clear()
    }

    fn flush(&self) -> Result<(), StorageError> {
        self.shards.flush()
    }

    fn clear_caches(&self) -> Result<(), StorageError> {
        self.shards.clear_caches();
        Ok(())
    }

    fn close(&self) -> Result<(), StorageError> {
        self.shards.close()
    }

    fn estimated_bytes(&self) -> u64 {
        self.shards.estimated_bytes()
    }
}
