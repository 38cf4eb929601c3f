use std::io;
use std::path::Path;

use thiserror::Error;

use crate::header::{content_hash, ArtifactKind, Compression, StorageHeader, HEADER_LEN};

/// Hard upper bound for any payload we will attempt to decode from disk.
///
/// A corrupted length field should surface as an error, not an out-of-memory
/// abort.
pub const PAYLOAD_LIMIT_BYTES: u64 = 256 * 1024 * 1024;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("io error: {0}")]
    Io(#[from] io::Error),
    #[error("invalid header: {0}")]
    InvalidHeader(&'static str),
    #[error("incompatible artifact kind: expected {expected:?}, found {found:?}")]
    WrongArtifact {
        expected: ArtifactKind,
        found: ArtifactKind,
    },
    #[error("incompatible schema version: expected {expected}, found {found}")]
    WrongSchema { expected: u32, found: u32 },
    #[error("truncated file: expected at least {expected} bytes, found {found}")]
    Truncated { expected: usize, found: usize },
    #[error("decompression failed: {0}")]
    Decompression(String),
    #[error("unsupported compression tag {0}")]
    UnsupportedCompression(u8),
    #[error("payload size {payload_len} exceeds the {PAYLOAD_LIMIT_BYTES} byte limit")]
    OversizedPayload { payload_len: u64 },
    #[error("payload hash mismatch: expected {expected}, found {found}")]
    HashMismatch { expected: u64, found: u64 },
    #[error("codec error: {0}")]
    Codec(#[from] bincode::Error),
    #[error("{0}")]
    Inconsistent(String),
    /// The surrounding system abandoned the I/O operation.
    #[error("storage operation cancelled")]
    Cancelled,
}

impl StorageError {
    pub fn inconsistent(message: impl Into<String>) -> Self {
        Self::Inconsistent(message.into())
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, StorageError::Cancelled)
    }
}

/// Reads and validates an artifact written by [`crate::write_artifact_atomic`].
///
/// Returns `Ok(None)` when the file does not exist. Any other failure,
/// including a header for a different artifact kind or schema, is an error:
/// callers own the decision of whether to discard the file.
pub fn read_artifact(
    path: &Path,
    expected_kind: ArtifactKind,
    expected_schema: u32,
) -> Result<Option<Vec<u8>>, StorageError> {
    let bytes = match std::fs::read(path) {
        Ok(bytes) => bytes,
        Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(None),
        Err(err) => return Err(err.into()),
    };

    let header = StorageHeader::decode(&bytes)?;
    validate_header(&header, expected_kind, expected_schema)?;

    let payload_len = checked_len(header.payload_len)?;
    let uncompressed_len = checked_len(header.uncompressed_len)?;
    let expected = HEADER_LEN
        .checked_add(payload_len)
        .ok_or(StorageError::InvalidHeader("payload length overflow"))?;
    if bytes.len() < expected {
        return Err(StorageError::Truncated {
            expected,
            found: bytes.len(),
        });
    }

    let payload = &bytes[HEADER_LEN..expected];
    let uncompressed = match header.compression {
        Compression::None => payload.to_vec(),
        Compression::Zstd => zstd::bulk::decompress(payload, uncompressed_len)
            .map_err(|e| StorageError::Decompression(e.to_string()))?,
    };

    if uncompressed.len() != uncompressed_len {
        return Err(StorageError::InvalidHeader("uncompressed length mismatch"));
    }

    let found = content_hash(&uncompressed);
    if found != header.content_hash {
        return Err(StorageError::HashMismatch {
            expected: header.content_hash,
            found,
        });
    }

    Ok(Some(uncompressed))
}

fn validate_header(
    header: &StorageHeader,
    expected_kind: ArtifactKind,
    expected_schema: u32,
) -> Result<(), StorageError> {
    if header.kind != expected_kind {
        return Err(StorageError::WrongArtifact {
            expected: expected_kind,
            found: header.kind,
        });
    }

    if header.schema_version != expected_schema {
        return Err(StorageError::WrongSchema {
            expected: expected_schema,
            found: header.schema_version,
        });
    }

    Ok(())
}

fn checked_len(len: u64) -> Result<usize, StorageError> {
    if len > PAYLOAD_LIMIT_BYTES {
        return Err(StorageError::OversizedPayload { payload_len: len });
    }
    usize::try_from(len).map_err(|_| StorageError::OversizedPayload { payload_len: len })
}
