//! Framed, checksummed on-disk artifacts for Nova's persistent indexes.
//!
//! ## Format
//! Each persisted artifact is stored as:
//! - a fixed-size header (48 bytes, little-endian)
//! - a payload (usually `bincode`, see [`encode`]), optionally zstd-compressed
//!
//! The header embeds:
//! - the artifact kind and a caller-owned schema version
//! - compression flag (currently whole-payload zstd or none)
//! - stored and uncompressed payload lengths
//! - a blake3-derived content hash of the uncompressed payload
//!
//! Any mismatch is reported as a [`StorageError`]; this crate never silently
//! returns partial data.

mod codec;
mod header;
mod persisted;
mod write;

pub use codec::{decode, encode};
pub use header::{ArtifactKind, Compression, StorageHeader, HEADER_LEN};
pub use persisted::{read_artifact, StorageError, PAYLOAD_LIMIT_BYTES};
pub use write::{atomic_write, write_artifact_atomic};
