use crate::ids::{IndexId, InputId};
use nova_storage::StorageError;
use std::path::PathBuf;

/// Cooperative cancellation observed before a commit started.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("operation cancelled")]
pub struct Cancelled;

/// Failure of an indexer's `map` step.
#[derive(Debug, thiserror::Error)]
pub enum MapError {
    #[error("operation cancelled")]
    Cancelled,

    #[error(transparent)]
    Indexer(#[from] anyhow::Error),
}

impl From<Cancelled> for MapError {
    fn from(_: Cancelled) -> Self {
        MapError::Cancelled
    }
}

/// Why a value failed the serialization round-trip check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ViolationKind {
    /// The value could not be encoded or decoded at all.
    Codec(String),
    /// `decode(encode(v)) != v`.
    NotEqual,
    /// `decode(encode(v)) == v` but the hashes differ.
    HashMismatch,
}

/// A value whose `Eq`/`Hash` contract does not survive serialization.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("index {index}: value for input {input} breaks the round-trip contract ({kind:?}): {value}")]
pub struct ContractViolation {
    pub index: IndexId,
    pub input: InputId,
    pub kind: ViolationKind,
    /// `Debug` rendering of the offending value.
    pub value: String,
}

/// Errors from [`crate::MapReduceIndex::update`].
///
/// None of these leave a trace in the index: nothing is written before
/// [`crate::DeferredCommit::apply`].
#[derive(Debug, thiserror::Error)]
pub enum UpdateError {
    #[error("operation cancelled")]
    Cancelled,

    #[error("indexer failed: {0}")]
    Indexer(#[source] anyhow::Error),

    #[error(transparent)]
    ContractViolation(#[from] ContractViolation),

    #[error("failed to encode forward snapshot: {0}")]
    Snapshot(#[source] StorageError),
}

impl From<MapError> for UpdateError {
    fn from(err: MapError) -> Self {
        match err {
            MapError::Cancelled => UpdateError::Cancelled,
            MapError::Indexer(err) => UpdateError::Indexer(err),
        }
    }
}

impl From<Cancelled> for UpdateError {
    fn from(_: Cancelled) -> Self {
        UpdateError::Cancelled
    }
}

/// Errors from opening, rebuilding, or otherwise managing an index.
#[derive(Debug, thiserror::Error)]
pub enum IndexError {
    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("invalid index metadata: {message}")]
    Metadata { message: String },

    #[error("invalid index name {name:?}")]
    InvalidIndexName { name: String },

    #[error("invalid shard count {shard_count}")]
    InvalidShardCount { shard_count: u32 },

    #[error("index directory {path} is locked by another owner")]
    Locked { path: PathBuf },

    #[error("index {index} is already being rebuilt")]
    RebuildInProgress { index: IndexId },

    #[error("operation cancelled")]
    Cancelled,
}

impl From<Cancelled> for IndexError {
    fn from(_: Cancelled) -> Self {
        IndexError::Cancelled
    }
}

impl From<serde_json::Error> for IndexError {
    fn from(err: serde_json::Error) -> Self {
        IndexError::Metadata {
            message: err.to_string(),
        }
    }
}
