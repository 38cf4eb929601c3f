//! Incrementally maintained map-reduce inverted indexes.
//!
//! A [`DataIndexer`] maps the content of each input to key/value pairs. A
//! [`MapReduceIndex`] keeps the inverted view (`key -> {input -> value}`) in an
//! [`IndexStorage`] and the per-input view in a forward index, so re-indexing an
//! input only touches the keys whose values changed.

mod data;
mod diff;
mod error;
mod forward;
mod ids;
mod index;
mod indexer;
mod layout;
mod rebuild;
mod reindex;
mod shards;
mod storage;
mod validation;

pub use data::{IndexKey, IndexValue, InputData, ValueContainer};
pub use diff::{InputDataDiffBuilder, UpdateProcessor};
pub use error::{
    Cancelled, ContractViolation, IndexError, MapError, UpdateError, ViolationKind,
};
pub use forward::{
    ForwardIndex, ForwardIndexMode, IntForwardIndex, IntInputDataCodec, MemoryForwardIndex,
    MemoryIntForwardIndex, PersistentForwardIndex, PersistentIntForwardIndex, SingleKeyCodec,
};
pub use ids::{IndexId, InputId};
pub use index::{DeferredCommit, IndexLock, MapReduceIndex, MapReduceIndexBuilder};
pub use indexer::DataIndexer;
pub use layout::{
    DirLock, ForwardEncoding, IndexMetadata, IndexOptions, IndexParts, LAYOUT_SCHEMA_VERSION,
};
pub use rebuild::{RebuildListener, RebuildRequest, RebuildStatus};
pub use reindex::RebuildReport;
pub use storage::{IndexStorage, MemoryIndexStorage, PersistentIndexStorage};
pub use validation::{check_value, ValueValidation};

pub use nova_storage::{Compression, StorageError};
pub use tokio_util::sync::CancellationToken;
