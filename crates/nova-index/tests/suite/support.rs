#![allow(dead_code)]

use nova_index::{
    CancellationToken, DataIndexer, ForwardIndexMode, IndexId, IndexParts, IndexStorage, InputId,
    MapError, MapReduceIndex, MemoryForwardIndex, MemoryIndexStorage, StorageError,
    ValueContainer,
};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

/// Counts whitespace-separated words. Content starting with `!fail` is
/// rejected by the indexer.
#[derive(Debug, Default, Clone, Copy)]
pub struct WordIndexer;

impl DataIndexer<str> for WordIndexer {
    type Key = String;
    type Value = u32;

    fn map(
        &self,
        content: &str,
        cancel: &CancellationToken,
    ) -> Result<HashMap<String, u32>, MapError> {
        if cancel.is_cancelled() {
            return Err(MapError::Cancelled);
        }
        if content.starts_with("!fail") {
            return Err(anyhow::anyhow!("refusing to index {content:?}").into());
        }

        let mut words = HashMap::new();
        for word in content.split_whitespace() {
            *words.entry(word.to_string()).or_insert(0) += 1;
        }
        Ok(words)
    }
}

pub type WordIndex = MapReduceIndex<WordIndexer, str>;

pub fn input(raw: i64) -> InputId {
    InputId::new(raw).expect("valid input id")
}

pub fn index_id(name: &str) -> IndexId {
    IndexId::new(name).expect("valid index name")
}

pub fn memory_index(name: &str) -> WordIndex {
    MapReduceIndex::builder(index_id(name), WordIndexer, IndexParts::in_memory()).build()
}

pub fn commit(index: &WordIndex, raw: i64, content: Option<&str>) -> bool {
    index
        .update(input(raw), content, &CancellationToken::new())
        .expect("update")
        .apply()
        .expect("apply")
}

/// Input ids contributing to `word`, ascending.
pub fn inputs_for(index: &WordIndex, word: &str) -> Vec<u32> {
    index
        .get_data(&word.to_string())
        .expect("read")
        .input_ids()
        .map(InputId::get)
        .collect()
}

pub fn count_for(index: &WordIndex, word: &str, raw: i64) -> Option<u32> {
    index
        .get_data(&word.to_string())
        .expect("read")
        .get(input(raw))
        .copied()
}

/// Switches for [`FlakyStorage`].
#[derive(Default)]
pub struct Faults {
    pub fail_writes: AtomicBool,
    pub cancel_writes: AtomicBool,
    pub fail_reads: AtomicBool,
    pub fail_flush: AtomicBool,
    pub fail_close: AtomicBool,
    pub cache_clears: AtomicUsize,
    pub flushes: AtomicUsize,
    /// Writes attempted so far, failed ones included.
    pub writes: AtomicUsize,
    fail_at: AtomicUsize,
    fail_from: AtomicUsize,
    cancel_at: AtomicUsize,
}

impl Faults {
    /// Fails only the `nth` write from now, counting from 1.
    pub fn fail_nth_write(&self, nth: usize) {
        self.fail_at.store(self.writes.load(Ordering::SeqCst) + nth, Ordering::SeqCst);
    }

    /// Fails the `nth` write from now and every write after it.
    pub fn fail_writes_from(&self, nth: usize) {
        self.fail_from.store(self.writes.load(Ordering::SeqCst) + nth, Ordering::SeqCst);
    }

    /// Reports cancellation for only the `nth` write from now.
    pub fn cancel_nth_write(&self, nth: usize) {
        self.cancel_at.store(self.writes.load(Ordering::SeqCst) + nth, Ordering::SeqCst);
    }

    fn check_write(&self) -> Result<(), StorageError> {
        let write = self.writes.fetch_add(1, Ordering::SeqCst) + 1;
        if self.cancel_at.load(Ordering::SeqCst) == write {
            return Err(StorageError::Cancelled);
        }
        if self.fail_at.load(Ordering::SeqCst) == write {
            return Err(StorageError::inconsistent("injected write failure"));
        }
        let fail_from = self.fail_from.load(Ordering::SeqCst);
        if fail_from != 0 && write >= fail_from {
            return Err(StorageError::inconsistent("injected write failure"));
        }
        if self.cancel_writes.load(Ordering::SeqCst) {
            return Err(StorageError::Cancelled);
        }
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(StorageError::inconsistent("injected write failure"));
        }
        Ok(())
    }
}

/// In-memory storage with injectable failures.
pub struct FlakyStorage {
    faults: Arc<Faults>,
    inner: MemoryIndexStorage<String, u32>,
}

impl IndexStorage<String, u32> for FlakyStorage {
    fn read(&self, key: &String) -> Result<ValueContainer<u32>, StorageError> {
        if self.faults.fail_reads.load(Ordering::SeqCst) {
            return Err(StorageError::inconsistent("injected read failure"));
        }
        self.inner.read(key)
    }

    fn add_value(&self, key: &String, input: InputId, value: u32) -> Result<(), StorageError> {
        self.faults.check_write()?;
        self.inner.add_value(key, input, value)
    }

    fn remove_all_values(&self, key: &String, input: InputId) -> Result<(), StorageError> {
        self.faults.check_write()?;
        self.inner.remove_all_values(key, input)
    }

    fn process_keys(
        &self,
        processor: &mut dyn FnMut(&String) -> bool,
    ) -> Result<bool, StorageError> {
        self.inner.process_keys(processor)
    }

    fn clear(&self) -> Result<(), StorageError> {
        self.inner.clear()
    }

    fn flush(&self) -> Result<(), StorageError> {
        self.faults.flushes.fetch_add(1, Ordering::SeqCst);
        if self.faults.fail_flush.load(Ordering::SeqCst) {
            return Err(StorageError::inconsistent("injected flush failure"));
        }
        self.inner.flush()
    }

    fn clear_caches(&self) -> Result<(), StorageError> {
        self.faults.cache_clears.fetch_add(1, Ordering::SeqCst);
        self.inner.clear_caches()
    }

    fn close(&self) -> Result<(), StorageError> {
        if self.faults.fail_close.load(Ordering::SeqCst) {
            return Err(StorageError::inconsistent("injected close failure"));
        }
        self.inner.close()
    }
}

pub fn flaky_parts() -> (IndexParts<String, u32>, Arc<Faults>) {
    let faults = Arc::new(Faults::default());
    let parts = IndexParts {
        storage: Box::new(FlakyStorage {
            faults: Arc::clone(&faults),
            inner: MemoryIndexStorage::new(),
        }),
        forward: ForwardIndexMode::generic(MemoryForwardIndex::new()),
        dir_lock: None,
        rebuild_marker: None,
        was_reset: false,
    };
    (parts, faults)
}

pub fn flaky_index(name: &str) -> (WordIndex, Arc<Faults>) {
    let (parts, faults) = flaky_parts();
    let index = MapReduceIndex::builder(index_id(name), WordIndexer, parts).build();
    (index, faults)
}
