//! Forward indexes: the last committed [`InputData`] of every input.
//!
//! The map-reduce index reads the previous snapshot before every commit to
//! compute the minimal storage diff. Two encodings exist:
//! - [`ForwardIndex`] stores an opaque byte snapshot (`bincode` of the map).
//! - [`IntForwardIndex`] stores one `u64` per input for indexes whose data
//!   fits an [`IntInputDataCodec`]; `0` means absent.

use crate::data::{IndexKey, IndexValue, InputData};
use crate::diff::InputDataDiffBuilder;
use crate::ids::InputId;
use crate::shards::{shard_for_input, ShardedFile, Weigh};
use nova_storage::{decode, encode, ArtifactKind, Compression, StorageError};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::path::Path;

/// Byte-snapshot forward index.
pub trait ForwardIndex: Send + Sync {
    fn get(&self, input: InputId) -> Result<Option<Vec<u8>>, StorageError>;

    /// Stores `snapshot`; `None` removes the entry.
    fn put(&self, input: InputId, snapshot: Option<Vec<u8>>) -> Result<(), StorageError>;

    fn clear(&self) -> Result<(), StorageError>;

    /// Persists pending writes.
    fn force(&self) -> Result<(), StorageError>;

    fn clear_caches(&self) -> Result<(), StorageError> {
        Ok(())
    }

    fn close(&self) -> Result<(), StorageError>;

    fn estimated_bytes(&self) -> u64 {
        0
    }
}

/// Integer forward index; `0` is the absent value.
pub trait IntForwardIndex: Send + Sync {
    fn get(&self, input: InputId) -> Result<u64, StorageError>;

    /// Stores `value`; `0` removes the entry.
    fn put(&self, input: InputId, value: u64) -> Result<(), StorageError>;

    fn clear(&self) -> Result<(), StorageError>;

    fn force(&self) -> Result<(), StorageError>;

    fn clear_caches(&self) -> Result<(), StorageError> {
        Ok(())
    }

    fn close(&self) -> Result<(), StorageError>;

    fn estimated_bytes(&self) -> u64 {
        0
    }
}

/// Converts [`InputData`] to and from a single integer.
///
/// `encode` must return `0` exactly for empty data.
pub trait IntInputDataCodec<K, V>: Send + Sync {
    fn encode(&self, data: &InputData<K, V>) -> Result<u64, StorageError>;

    fn decode(&self, raw: u64) -> Result<InputData<K, V>, StorageError>;
}

/// Codec for key-only indexes where each input contributes at most one `u32`
/// key. The key is stored as `key + 1`.
#[derive(Debug, Clone, Copy, Default)]
pub struct SingleKeyCodec;

impl IntInputDataCodec<u32, ()> for SingleKeyCodec {
    fn encode(&self, data: &InputData<u32, ()>) -> Result<u64, StorageError> {
        let mut keys = data.map().keys();
        match (keys.next(), keys.next()) {
            (None, _) => Ok(0),
            (Some(key), None) => Ok(u64::from(*key) + 1),
            (Some(_), Some(_)) => Err(StorageError::inconsistent(format!(
                "single-key codec cannot encode {} keys",
                data.len()
            ))),
        }
    }

    fn decode(&self, raw: u64) -> Result<InputData<u32, ()>, StorageError> {
        if raw == 0 {
            return Ok(InputData::empty());
        }
        let key = u32::try_from(raw - 1).map_err(|_| {
            StorageError::inconsistent(format!("single-key codec value {raw} out of range"))
        })?;
        Ok(InputData::new(HashMap::from([(key, ())])))
    }
}

#[derive(Default)]
pub struct MemoryForwardIndex {
    map: Mutex<HashMap<InputId, Vec<u8>>>,
}

impl MemoryForwardIndex {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ForwardIndex for MemoryForwardIndex {
    fn get(&self, input: InputId) -> Result<Option<Vec<u8>>, StorageError> {
        Ok(self.map.lock().get(&input).cloned())
    }

    fn put(&self, input: InputId, snapshot: Option<Vec<u8>>) -> Result<(), StorageError> {
        let mut map = self.map.lock();
        match snapshot {
            Some(bytes) => {
                map.insert(input, bytes);
            }
            None => {
                map.remove(&input);
            }
        }
        Ok(())
    }

    fn clear(&self) -> Result<(), StorageError> {
        self.map.lock().clear();
        Ok(())
    }

    fn force(&self) -> Result<(), StorageError> {
        Ok(())
    }

    fn close(&self) -> Result<(), StorageError> {
        self.map.lock().clear();
        Ok(())
    }

    fn estimated_bytes(&self) -> u64 {
        self.map
            .lock()
            .values()
            .map(|bytes| bytes.weigh() + std::mem::size_of::<InputId>() as u64)
            .sum()
    }
}

#[derive(Default)]
pub struct MemoryIntForwardIndex {
    map: Mutex<HashMap<InputId, u64>>,
}

impl MemoryIntForwardIndex {
    pub fn new() -> Self {
        Self::default()
    }
}

impl IntForwardIndex for MemoryIntForwardIndex {
    fn get(&self, input: InputId) -> Result<u64, StorageError> {
        Ok(self.map.lock().get(&input).copied().unwrap_or(0))
    }

    fn put(&self, input: InputId, value: u64) -> Result<(), StorageError> {
        let mut map = self.map.lock();
        if value == 0 {
            map.remove(&input);
        } else {
            map.insert(input, value);
        }
        Ok(())
    }

    fn clear(&self) -> Result<(), StorageError> {
        self.map.lock().clear();
        Ok(())
    }

    fn force(&self) -> Result<(), StorageError> {
        Ok(())
    }

    fn close(&self) -> Result<(), StorageError> {
        self.map.lock().clear();
        Ok(())
    }

    fn estimated_bytes(&self) -> u64 {
        (self.map.lock().len() * (std::mem::size_of::<InputId>() + 8)) as u64
    }
}

/// Sharded on-disk byte forward index.
pub struct PersistentForwardIndex {
    shards: ShardedFile<InputId, Vec<u8>>,
}

impl PersistentForwardIndex {
    pub fn open(dir: &Path, shard_count: u32, compression: Compression) -> Result<Self, StorageError> {
        Ok(Self {
            shards: ShardedFile::open(
                dir,
                ArtifactKind::ForwardIndexShard,
                compression,
                shard_count,
                shard_for_input,
            )?,
        })
    }
}

impl ForwardIndex for PersistentForwardIndex {
    fn get(&self, input: InputId) -> Result<Option<Vec<u8>>, StorageError> {
        self.shards.read(&input, |bytes| bytes.cloned())
    }

    fn put(&self, input: InputId, snapshot: Option<Vec<u8>>) -> Result<(), StorageError> {
        self.shards.update(&input, |entries| match snapshot {
            Some(bytes) => entries.insert(input, bytes.clone()).as_ref() != Some(&bytes),
            None => entries.remove(&input).is_some(),
        })?;
        Ok(())
    }

    fn clear(&self) -> Result<(), StorageError> {
        self.shards.clear()
    }

    fn force(&self) -> Result<(), StorageError> {
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

/// Sharded on-disk integer forward index.
pub struct PersistentIntForwardIndex {
    shards: ShardedFile<InputId, u64>,
}

impl PersistentIntForwardIndex {
    pub fn open(dir: &Path, shard_count: u32, compression: Compression) -> Result<Self, StorageError> {
        Ok(Self {
            shards: ShardedFile::open(
                dir,
                ArtifactKind::IntForwardIndexShard,
                compression,
                shard_count,
                shard_for_input,
            )?,
        })
    }
}

impl IntForwardIndex for PersistentIntForwardIndex {
    fn get(&self, input: InputId) -> Result<u64, StorageError> {
        self.shards.read(&input, |value| value.copied().unwrap_or(0))
    }

    fn put(&self, input: InputId, value: u64) -> Result<(), StorageError> {
        self.shards.update(&input, |entries| {
            if value == 0 {
                entries.remove(&input).is_some()
            } else {
                entries.insert(input, value) != Some(value)
            }
        })?;
        Ok(())
    }

    fn clear(&self) -> Result<(), StorageError> {
        self.shards.clear()
    }

    fn force(&self) -> Result<(), StorageError> {
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

/// Encoded forward-index entry for one input, computed before the commit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum ForwardSnapshot {
    Bytes(Option<Vec<u8>>),
    Int(u64),
}

/// The forward-index encoding of one index, fixed at construction.
pub enum ForwardIndexMode<K, V> {
    Generic(Box<dyn ForwardIndex>),
    Integer {
        store: Box<dyn IntForwardIndex>,
        codec: Box<dyn IntInputDataCodec<K, V>>,
    },
}

impl<K: IndexKey, V: IndexValue> ForwardIndexMode<K, V> {
    pub fn generic(store: impl ForwardIndex + 'static) -> Self {
        ForwardIndexMode::Generic(Box::new(store))
    }

    pub fn integer(
        store: impl IntForwardIndex + 'static,
        codec: impl IntInputDataCodec<K, V> + 'static,
    ) -> Self {
        ForwardIndexMode::Integer {
            store: Box::new(store),
            codec: Box::new(codec),
        }
    }

    /// Encodes `data`; does not touch the store.
    pub(crate) fn snapshot(&self, data: &InputData<K, V>) -> Result<ForwardSnapshot, StorageError> {
        match self {
            ForwardIndexMode::Generic(_) if data.is_empty() => Ok(ForwardSnapshot::Bytes(None)),
            ForwardIndexMode::Generic(_) => Ok(ForwardSnapshot::Bytes(Some(encode(data.map())?))),
            ForwardIndexMode::Integer { codec, .. } => Ok(ForwardSnapshot::Int(codec.encode(data)?)),
        }
    }

    pub(crate) fn write(&self, input: InputId, snapshot: &ForwardSnapshot) -> Result<(), StorageError> {
        match (self, snapshot) {
            (ForwardIndexMode::Generic(store), ForwardSnapshot::Bytes(bytes)) => {
                store.put(input, bytes.clone())
            }
            (ForwardIndexMode::Integer { store, .. }, ForwardSnapshot::Int(raw)) => {
                store.put(input, *raw)
            }
            _ => Err(StorageError::inconsistent(
                "forward snapshot encoding does not match the index",
            )),
        }
    }

    /// Previous data of `input`, in a form the diff can consume lazily.
    pub(crate) fn diff_builder(&self, input: InputId) -> Result<InputDataDiffBuilder<'_, K, V>, StorageError> {
        match self {
            ForwardIndexMode::Generic(store) => match store.get(input)? {
                None => Ok(InputDataDiffBuilder::Empty),
                Some(bytes) => {
                    let map: HashMap<K, V> = decode(&bytes)?;
                    Ok(InputDataDiffBuilder::Map(InputData::new(map)))
                }
            },
            ForwardIndexMode::Integer { store, codec } => match store.get(input)? {
                0 => Ok(InputDataDiffBuilder::Empty),
                previous => Ok(InputDataDiffBuilder::Int {
                    previous,
                    codec: codec.as_ref(),
                }),
            },
        }
    }

    /// Fully decoded previous data of `input`.
    pub(crate) fn read_data(&self, input: InputId) -> Result<InputData<K, V>, StorageError> {
        match self {
            ForwardIndexMode::Generic(store) => match store.get(input)? {
                None => Ok(InputData::empty()),
                Some(bytes) => Ok(InputData::new(decode(&bytes)?)),
            },
            ForwardIndexMode::Integer { store, codec } => codec.decode(store.get(input)?),
        }
    }

    pub(crate) fn clear(&self) -> Result<(), StorageError> {
        match self {
            ForwardIndexMode::Generic(store) => store.clear(),
            ForwardIndexMode::Integer { store, .. } => store.clear(),
        }
    }

    pub(crate) fn force(&self) -> Result<(), StorageError> {
        match self {
            ForwardIndexMode::Generic(store) => store.force(),
            ForwardIndexMode::Integer { store, .. } => store.force(),
        }
    }

    pub(crate) fn clear_caches(&self) -> Result<(), StorageError> {
        match self {
            ForwardIndexMode::Generic(store) => store.clear_caches(),
            ForwardIndexMode::Integer { store, .. } => store.clear_caches(),
        }
    }

    pub(crate) fn close(&self) -> Result<(), StorageError> {
        match self {
            ForwardIndexMode::Generic(store) => store.close(),
            ForwardIndexMode::Integer { store, .. } => store.close(),
        }
    }

    pub(crate) fn estimated_bytes(&self) -> u64 {
        match self {
            ForwardIndexMode::Generic(store) => store.estimated_bytes(),
            ForwardIndexMode::Integer { store, .. } => store.estimated_bytes(),
        }
    }
}
