use crate::data::{IndexKey, IndexValue, InputData, ValueContainer};
use crate::diff::UpdateProcessor;
use crate::error::{Cancelled, UpdateError};
use crate::forward::{ForwardIndexMode, ForwardSnapshot};
use crate::ids::{IndexId, InputId};
use crate::indexer::DataIndexer;
use crate::layout::{DirLock, IndexParts};
use crate::rebuild::{RebuildListener, RebuildRequest, RebuildState, RebuildStatus};
use crate::storage::IndexStorage;
use crate::validation::ValueValidation;
use nova_memory::{
    EvictionRequest, EvictionResult, MemoryCategory, MemoryEvictor, MemoryManager,
    MemoryRegistration, MemoryTracker,
};
use nova_storage::StorageError;
use parking_lot::{Mutex, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::marker::PhantomData;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, OnceLock, Weak};
use tokio_util::sync::CancellationToken;

// Memory usage is re-sampled after this many commits (and on every flush).
const COMMITS_PER_MEMORY_SAMPLE: u64 = 256;

/// Reader/writer lock guarding one or more indexes.
///
/// Each index gets a private lock unless one is passed to
/// [`MapReduceIndexBuilder::shared_lock`]; indexes sharing a lock commit
/// atomically with respect to each other's readers.
#[derive(Clone, Default)]
pub struct IndexLock(Arc<RwLock<()>>);

impl IndexLock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn ptr_eq(&self, other: &IndexLock) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }

    pub(crate) fn read(&self) -> RwLockReadGuard<'_, ()> {
        self.0.read()
    }

    pub(crate) fn write(&self) -> RwLockWriteGuard<'_, ()> {
        self.0.write()
    }
}

impl std::fmt::Debug for IndexLock {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IndexLock").finish_non_exhaustive()
    }
}

struct Inner<K, V> {
    id: IndexId,
    lock: IndexLock,
    storage: Box<dyn IndexStorage<K, V>>,
    forward: ForwardIndexMode<K, V>,
    validation: ValueValidation,
    was_reset: bool,
    stamp: AtomicU64,
    flushed_stamp: AtomicU64,
    commits: AtomicU64,
    disposed: AtomicBool,
    rebuild: RebuildState,
    registration: Mutex<Option<MemoryRegistration>>,
    tracker: OnceLock<MemoryTracker>,
    dir_lock: Mutex<Option<DirLock>>,
}

impl<K: IndexKey, V: IndexValue> Inner<K, V> {
    fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::Acquire)
    }

    fn request_rebuild(&self, cause: String) -> bool {
        self.rebuild.request(&self.id, cause)
    }

    /// Logs a storage failure and marks the index for rebuild.
    fn storage_failed(&self, operation: &'static str, err: &StorageError) {
        if err.is_cancelled() {
            return;
        }
        tracing::error!(
            target = "nova.index",
            index = %self.id,
            operation,
            error = %err,
            "index storage failed"
        );
        self.request_rebuild(format!("{operation} failed: {err}"));
    }

    /// Applies one update. On failure every operation that reached storage is
    /// undone, so storage keeps matching the forward index.
    fn commit_locked(&self, update: &UpdateData<K, V>) -> Result<bool, CommitError> {
        let previous = self
            .forward
            .diff_builder(update.input)
            .map_err(CommitError::RolledBack)?;
        if previous.is_empty() && update.data.is_empty() {
            return Ok(false);
        }

        let mut processor = StorageUpdater::new(self.storage.as_ref(), &self.stamp);
        let result = previous
            .differentiate(update.input, &update.data, &mut processor)
            .and_then(|changed| {
                if changed {
                    self.forward.write(update.input, &update.snapshot)?;
                }
                Ok(changed)
            });

        match result {
            Ok(changed) => Ok(changed),
            Err(cause) => match processor.roll_back() {
                Ok(undone) => {
                    if undone > 0 {
                        tracing::debug!(
                            target = "nova.index",
                            index = %self.id,
                            input_id = update.input.get(),
                            undone,
                            "rolled back partial commit"
                        );
                    }
                    Err(CommitError::RolledBack(cause))
                }
                Err(undo) => Err(CommitError::Partial { cause, undo }),
            },
        }
    }

    /// Caller holds at least the read lock.
    fn flush_locked(&self) -> Result<(), StorageError> {
        let stamp = self.stamp.load(Ordering::Acquire);
        self.forward.force()?;
        self.storage.flush()?;
        self.flushed_stamp.store(stamp, Ordering::Release);
        Ok(())
    }

    fn flush(&self) -> Result<(), StorageError> {
        let result = {
            let _guard = self.lock.read();
            if self.is_disposed() {
                return Ok(());
            }
            self.flush_locked()
        };
        if let Err(err) = &result {
            self.storage_failed("flush", err);
        }
        self.refresh_memory();
        result
    }

    fn handle_low_memory(&self) -> Result<(), StorageError> {
        let _guard = self.lock.read();
        if self.is_disposed() {
            return Ok(());
        }
        self.storage.clear_caches()?;
        self.forward.clear_caches()?;
        self.flush_locked()
    }

    fn estimated_bytes(&self) -> u64 {
        self.storage
            .estimated_bytes()
            .saturating_add(self.forward.estimated_bytes())
    }

    fn refresh_memory(&self) {
        if let Some(tracker) = self.tracker.get() {
            tracker.set_bytes(self.estimated_bytes());
        }
    }

    fn dispose(&self) -> Result<(), StorageError> {
        let result = {
            let _guard = self.lock.write();
            if self.disposed.swap(true, Ordering::AcqRel) {
                return Ok(());
            }

            let storage = self.storage.close();
            if let Err(err) = self.forward.close() {
                tracing::warn!(
                    target = "nova.index",
                    index = %self.id,
                    error = %err,
                    "failed to close forward index"
                );
            }
            storage
        };

        if let Some(tracker) = self.tracker.get() {
            tracker.set_bytes(0);
        }
        drop(self.registration.lock().take());
        self.rebuild.detach_marker();
        drop(self.dir_lock.lock().take());

        match &result {
            Ok(()) => tracing::debug!(target = "nova.index", index = %self.id, "index disposed"),
            Err(err) => tracing::error!(
                target = "nova.index",
                index = %self.id,
                error = %err,
                "failed to close index storage"
            ),
        }
        result
    }
}

/// Why a commit did not apply.
enum CommitError {
    /// Storage is back in its pre-commit state.
    RolledBack(StorageError),
    /// Undoing the applied operations failed as well; storage holds part of
    /// the diff.
    Partial {
        cause: StorageError,
        undo: StorageError,
    },
}

/// Applies diff operations to storage, one stamp per operation.
///
/// Each pair's prior value is journaled once its first write lands so a
/// failed commit can be undone.
struct StorageUpdater<'a, K, V> {
    storage: &'a dyn IndexStorage<K, V>,
    stamp: &'a AtomicU64,
    journal: Vec<(K, InputId, Option<V>)>,
}

impl<'a, K: IndexKey, V: IndexValue> StorageUpdater<'a, K, V> {
    fn new(storage: &'a dyn IndexStorage<K, V>, stamp: &'a AtomicU64) -> Self {
        Self {
            storage,
            stamp,
            journal: Vec::new(),
        }
    }

    /// Restores journaled values, newest first. Returns how many pairs were
    /// restored.
    fn roll_back(&mut self) -> Result<usize, StorageError> {
        let mut undone = 0;
        while let Some((key, input, previous)) = self.journal.pop() {
            self.storage.remove_all_values(&key, input)?;
            if let Some(value) = previous {
                self.storage.add_value(&key, input, value)?;
            }
            self.stamp.fetch_add(1, Ordering::AcqRel);
            undone += 1;
        }
        Ok(undone)
    }
}

impl<K: IndexKey, V: IndexValue> UpdateProcessor<K, V> for StorageUpdater<'_, K, V> {
    fn add(&mut self, key: &K, value: &V, input: InputId) -> Result<(), StorageError> {
        let previous = self.storage.read_value(key, input)?;
        self.storage.add_value(key, input, value.clone())?;
        self.journal.push((key.clone(), input, previous));
        self.stamp.fetch_add(1, Ordering::AcqRel);
        Ok(())
    }

    fn update(&mut self, key: &K, value: &V, input: InputId) -> Result<(), StorageError> {
        let previous = self.storage.read_value(key, input)?;
        self.storage.remove_all_values(key, input)?;
        self.journal.push((key.clone(), input, previous));
        self.storage.add_value(key, input, value.clone())?;
        self.stamp.fetch_add(1, Ordering::AcqRel);
        Ok(())
    }

    fn remove(&mut self, key: &K, input: InputId) -> Result<(), StorageError> {
        let previous = self.storage.read_value(key, input)?;
        self.storage.remove_all_values(key, input)?;
        self.journal.push((key.clone(), input, previous));
        self.stamp.fetch_add(1, Ordering::AcqRel);
        Ok(())
    }
}

struct UpdateData<K, V> {
    input: InputId,
    data: InputData<K, V>,
    snapshot: ForwardSnapshot,
}

/// A computed but not yet applied update of one input.
///
/// Produced by [`MapReduceIndex::update`] without taking the index lock;
/// [`DeferredCommit::apply`] is the only step that mutates the index.
#[must_use = "an update has no effect until `apply` is called"]
pub struct DeferredCommit<K, V> {
    inner: Arc<Inner<K, V>>,
    update: UpdateData<K, V>,
}

impl<K: IndexKey, V: IndexValue> DeferredCommit<K, V> {
    pub fn input(&self) -> InputId {
        self.update.input
    }

    pub fn data(&self) -> &InputData<K, V> {
        &self.update.data
    }

    /// Applies the update under the write lock and returns whether the index
    /// changed.
    ///
    /// A failed commit is undone, logged and turned into a rebuild request (the
    /// call then returns `Ok(false)`). Cancellation reported by the storage
    /// layer is returned as an error once the commit has been undone; if it
    /// cannot be undone it is handled as a failure. Applying to a disposed
    /// index is a no-op.
    pub fn apply(self) -> Result<bool, Cancelled> {
        let inner = &self.inner;
        let input = self.update.input;
        let result = {
            let _guard = inner.lock.write();
            if inner.is_disposed() {
                return Ok(false);
            }
            inner.commit_locked(&self.update)
        };

        match result {
            Ok(changed) => {
                let commits = inner.commits.fetch_add(1, Ordering::Relaxed) + 1;
                if commits % COMMITS_PER_MEMORY_SAMPLE == 0 {
                    inner.refresh_memory();
                }
                Ok(changed)
            }
            Err(CommitError::RolledBack(err)) if err.is_cancelled() => Err(Cancelled),
            Err(CommitError::RolledBack(err)) => {
                tracing::error!(
                    target = "nova.index",
                    index = %inner.id,
                    input_id = input.get(),
                    error = %err,
                    "failed to commit index update"
                );
                inner.request_rebuild(format!("commit of input {input} failed: {err}"));
                Ok(false)
            }
            Err(CommitError::Partial { cause, undo }) => {
                tracing::error!(
                    target = "nova.index",
                    index = %inner.id,
                    input_id = input.get(),
                    error = %cause,
                    undo_error = %undo,
                    "index update left partially applied"
                );
                inner.request_rebuild(format!(
                    "commit of input {input} left partially applied: {cause} (undo failed: {undo})"
                ));
                Ok(false)
            }
        }
    }
}

/// Registered with the [`MemoryManager`]; holds the index weakly so the
/// registration never keeps a disposed index alive.
struct LowMemoryHook<K, V> {
    name: String,
    inner: Weak<Inner<K, V>>,
}

impl<K: IndexKey, V: IndexValue> MemoryEvictor for LowMemoryHook<K, V> {
    fn name(&self) -> &str {
        &self.name
    }

    fn category(&self) -> MemoryCategory {
        MemoryCategory::InvertedIndex
    }

    fn evict(&self, _request: EvictionRequest) -> EvictionResult {
        let Some(inner) = self.inner.upgrade() else {
            return EvictionResult::default();
        };

        let before = inner.estimated_bytes();
        if let Err(err) = inner.handle_low_memory() {
            inner.storage_failed("low-memory flush", &err);
        }
        inner.refresh_memory();
        let after = inner.estimated_bytes();
        tracing::debug!(
            target = "nova.index",
            index = %inner.id,
            before_bytes = before,
            after_bytes = after,
            "released index caches"
        );
        EvictionResult {
            before_bytes: before,
            after_bytes: after,
        }
    }

    fn flush_to_disk(&self) -> std::io::Result<()> {
        match self.inner.upgrade() {
            Some(inner) => inner.flush().map_err(std::io::Error::other),
            None => Ok(()),
        }
    }
}

/// An incrementally maintained inverted index over `C` contents.
///
/// Mapping ([`MapReduceIndex::update`]) runs without any lock and can be
/// parallelized freely; committing ([`DeferredCommit::apply`]), [`clear`] and
/// [`dispose`] take the write lock; queries and flushes take the read lock.
///
/// [`clear`]: MapReduceIndex::clear
/// [`dispose`]: MapReduceIndex::dispose
pub struct MapReduceIndex<I, C>
where
    I: DataIndexer<C>,
    C: ?Sized,
{
    inner: Arc<Inner<I::Key, I::Value>>,
    indexer: I,
    _content: PhantomData<fn(&C)>,
}

/// Configures a [`MapReduceIndex`] before construction.
pub struct MapReduceIndexBuilder<I, C>
where
    I: DataIndexer<C>,
    C: ?Sized,
{
    id: IndexId,
    indexer: I,
    parts: IndexParts<I::Key, I::Value>,
    lock: Option<IndexLock>,
    memory: Option<MemoryManager>,
    validation: ValueValidation,
    _content: PhantomData<fn(&C)>,
}

impl<I, C> MapReduceIndexBuilder<I, C>
where
    I: DataIndexer<C>,
    C: ?Sized,
{
    /// Share `lock` with other indexes instead of using a private one.
    pub fn shared_lock(mut self, lock: IndexLock) -> Self {
        self.lock = Some(lock);
        self
    }

    /// Register with `manager` so memory pressure releases index caches.
    pub fn memory_manager(mut self, manager: &MemoryManager) -> Self {
        self.memory = Some(manager.clone());
        self
    }

    pub fn value_validation(mut self, validation: ValueValidation) -> Self {
        self.validation = validation;
        self
    }

    pub fn build(self) -> MapReduceIndex<I, C> {
        let IndexParts {
            storage,
            forward,
            dir_lock,
            rebuild_marker,
            was_reset,
        } = self.parts;

        let status = if was_reset {
            RebuildStatus::RequiresRebuild
        } else {
            RebuildStatus::Ok
        };

        let inner = Arc::new(Inner {
            id: self.id,
            lock: self.lock.unwrap_or_default(),
            storage,
            forward,
            validation: self.validation,
            was_reset,
            stamp: AtomicU64::new(0),
            flushed_stamp: AtomicU64::new(0),
            commits: AtomicU64::new(0),
            disposed: AtomicBool::new(false),
            rebuild: RebuildState::new(status, rebuild_marker),
            registration: Mutex::new(None),
            tracker: OnceLock::new(),
            dir_lock: Mutex::new(dir_lock),
        });

        if let Some(manager) = self.memory {
            let hook = Arc::new(LowMemoryHook {
                name: format!("index:{}", inner.id),
                inner: Arc::downgrade(&inner),
            });
            let registration = manager.register_evictor(
                hook.name.clone(),
                MemoryCategory::InvertedIndex,
                hook,
            );
            let _ = inner.tracker.set(registration.tracker());
            *inner.registration.lock() = Some(registration);
            inner.refresh_memory();
        }

        tracing::debug!(
            target = "nova.index",
            index = %inner.id,
            was_reset,
            "index opened"
        );

        MapReduceIndex {
            inner,
            indexer: self.indexer,
            _content: PhantomData,
        }
    }
}

impl<I, C> MapReduceIndex<I, C>
where
    I: DataIndexer<C>,
    C: ?Sized,
{
    pub fn builder(
        id: IndexId,
        indexer: I,
        parts: IndexParts<I::Key, I::Value>,
    ) -> MapReduceIndexBuilder<I, C> {
        MapReduceIndexBuilder {
            id,
            indexer,
            parts,
            lock: None,
            memory: None,
            validation: ValueValidation::default(),
            _content: PhantomData,
        }
    }

    pub fn id(&self) -> &IndexId {
        &self.inner.id
    }

    pub fn indexer(&self) -> &I {
        &self.indexer
    }

    /// The lock guarding this index, for sharing with other indexes.
    pub fn index_lock(&self) -> IndexLock {
        self.inner.lock.clone()
    }

    /// Maps `content` (absent content maps to no data) and prepares the commit.
    ///
    /// Nothing is written until [`DeferredCommit::apply`]; dropping the commit
    /// abandons the update without side effects.
    pub fn update(
        &self,
        input: InputId,
        content: Option<&C>,
        cancel: &CancellationToken,
    ) -> Result<DeferredCommit<I::Key, I::Value>, UpdateError> {
        if cancel.is_cancelled() {
            return Err(UpdateError::Cancelled);
        }

        let data = match content {
            Some(content) => InputData::new(self.indexer.map(content, cancel)?),
            None => InputData::empty(),
        };

        if cancel.is_cancelled() {
            return Err(UpdateError::Cancelled);
        }

        self.inner.validation.check(&self.inner.id, input, &data)?;
        let snapshot = self
            .inner
            .forward
            .snapshot(&data)
            .map_err(UpdateError::Snapshot)?;

        Ok(DeferredCommit {
            inner: Arc::clone(&self.inner),
            update: UpdateData {
                input,
                data,
                snapshot,
            },
        })
    }

    /// Associations stored under `key`. Empty once the index is disposed.
    ///
    /// A storage failure also marks the index for rebuild.
    pub fn get_data(&self, key: &I::Key) -> Result<ValueContainer<I::Value>, StorageError> {
        let result = {
            let _guard = self.inner.lock.read();
            if self.inner.is_disposed() {
                return Ok(ValueContainer::new());
            }
            self.inner.storage.read(key)
        };
        if let Err(err) = &result {
            self.inner.storage_failed("read", err);
        }
        result
    }

    /// The data last committed for `input`.
    pub fn indexed_data(&self, input: InputId) -> Result<InputData<I::Key, I::Value>, StorageError> {
        let result = {
            let _guard = self.inner.lock.read();
            if self.inner.is_disposed() {
                return Ok(InputData::empty());
            }
            self.inner.forward.read_data(input)
        };
        if let Err(err) = &result {
            self.inner.storage_failed("forward read", err);
        }
        result
    }

    /// Calls `processor` for every key until it returns `false`.
    ///
    /// `processor` runs under the read lock and must not call back into this
    /// index (or any index sharing its lock).
    pub fn process_all_keys(
        &self,
        mut processor: impl FnMut(&I::Key) -> bool,
    ) -> Result<bool, StorageError> {
        let result = {
            let _guard = self.inner.lock.read();
            if self.inner.is_disposed() {
                return Ok(true);
            }
            self.inner.storage.process_keys(&mut processor)
        };
        if let Err(err) = &result {
            self.inner.storage_failed("key enumeration", err);
        }
        result
    }

    /// Drops every association and forward snapshot.
    pub fn clear(&self) -> Result<(), StorageError> {
        let result = {
            let _guard = self.inner.lock.write();
            if self.inner.is_disposed() {
                return Ok(());
            }
            self.inner.stamp.fetch_add(1, Ordering::AcqRel);
            self.inner
                .storage
                .clear()
                .and_then(|()| self.inner.forward.clear())
        };
        if let Err(err) = &result {
            self.inner.storage_failed("clear", err);
        }
        self.inner.refresh_memory();
        result
    }

    /// Persists the forward index and storage.
    pub fn flush(&self) -> Result<(), StorageError> {
        self.inner.flush()
    }

    /// Closes storage and forward index and unregisters from memory
    /// accounting. Idempotent; later calls on the index are no-ops.
    pub fn dispose(&self) -> Result<(), StorageError> {
        self.inner.dispose()
    }

    pub fn is_disposed(&self) -> bool {
        self.inner.is_disposed()
    }

    /// Number of elementary storage mutations applied so far.
    pub fn modification_stamp(&self) -> u64 {
        self.inner.stamp.load(Ordering::Acquire)
    }

    /// Whether anything changed since the last successful flush.
    pub fn is_dirty(&self) -> bool {
        self.modification_stamp() != self.inner.flushed_stamp.load(Ordering::Acquire)
    }

    /// Whether opening discarded previously persisted data.
    pub fn was_reset(&self) -> bool {
        self.inner.was_reset
    }

    /// Approximate bytes of index state held in memory.
    pub fn estimated_memory_bytes(&self) -> u64 {
        self.inner.estimated_bytes()
    }

    pub fn rebuild_status(&self) -> RebuildStatus {
        self.inner.rebuild.status()
    }

    pub fn last_rebuild_request(&self) -> Option<RebuildRequest> {
        self.inner.rebuild.last_request()
    }

    pub fn subscribe_rebuild(&self, listener: RebuildListener) {
        self.inner.rebuild.subscribe(listener);
    }

    /// Marks the index as untrusted. Returns `false` if a rebuild was already
    /// pending.
    pub fn request_rebuild(&self, cause: impl Into<String>) -> bool {
        self.inner.request_rebuild(cause.into())
    }

    /// Enters [`RebuildStatus::DoingRebuild`]; `false` if one is running.
    pub fn begin_rebuild(&self) -> bool {
        self.inner.rebuild.begin()
    }

    /// Returns to [`RebuildStatus::Ok`] unless a new request arrived meanwhile.
    pub fn finish_rebuild(&self) -> bool {
        self.inner.rebuild.finish()
    }
}

impl<I, C> Drop for MapReduceIndex<I, C>
where
    I: DataIndexer<C>,
    C: ?Sized,
{
    fn drop(&mut self) {
        // Failures are already logged by `dispose`.
        let _ = self.inner.dispose();
    }
}

impl<I, C> std::fmt::Debug for MapReduceIndex<I, C>
where
    I: DataIndexer<C>,
    C: ?Sized,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MapReduceIndex")
            .field("id", &self.inner.id)
            .field("modification_stamp", &self.modification_stamp())
            .field("disposed", &self.is_disposed())
            .finish_non_exhaustive()
    }
}
