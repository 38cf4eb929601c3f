use byteorder::{ByteOrder, LittleEndian};

use crate::persisted::StorageError;

pub const HEADER_LEN: usize = 48;

const MAGIC: [u8; 8] = *b"NOVASTOR";
const FORMAT_VERSION: u32 = 1;

/// Identifies what a persisted artifact contains.
///
/// The tag is part of the header so a shard file copied into the wrong
/// directory is rejected instead of being decoded as garbage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ArtifactKind {
    InvertedIndexShard,
    ForwardIndexShard,
    IntForwardIndexShard,
}

impl ArtifactKind {
    fn tag(self) -> u8 {
        match self {
            ArtifactKind::InvertedIndexShard => 1,
            ArtifactKind::ForwardIndexShard => 2,
            ArtifactKind::IntForwardIndexShard => 3,
        }
    }

    fn from_tag(tag: u8) -> Result<Self, StorageError> {
        match tag {
            1 => Ok(ArtifactKind::InvertedIndexShard),
            2 => Ok(ArtifactKind::ForwardIndexShard),
            3 => Ok(ArtifactKind::IntForwardIndexShard),
            _ => Err(StorageError::InvalidHeader("unknown artifact kind")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Compression {
    #[default]
    None,
    Zstd,
}

impl Compression {
    fn tag(self) -> u8 {
        match self {
            Compression::None => 0,
            Compression::Zstd => 1,
        }
    }

    fn from_tag(tag: u8) -> Result<Self, StorageError> {
        match tag {
            0 => Ok(Compression::None),
            1 => Ok(Compression::Zstd),
            other => Err(StorageError::UnsupportedCompression(other)),
        }
    }
}

/// Fixed-size little-endian header written in front of every artifact payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorageHeader {
    pub kind: ArtifactKind,
    pub schema_version: u32,
    pub compression: Compression,
    /// Length of the payload as stored on disk (after compression).
    pub payload_len: u64,
    pub uncompressed_len: u64,
    /// First 8 bytes of the blake3 hash of the uncompressed payload.
    pub content_hash: u64,
}

impl StorageHeader {
    pub fn new(
        kind: ArtifactKind,
        schema_version: u32,
        compression: Compression,
        payload_len: u64,
        uncompressed_len: u64,
        content_hash: u64,
    ) -> Self {
        Self {
            kind,
            schema_version,
            compression,
            payload_len,
            uncompressed_len,
            content_hash,
        }
    }

    pub fn encode(&self) -> [u8; HEADER_LEN] {
        let mut out = [0u8; HEADER_LEN];
        out[0..8].copy_from_slice(&MAGIC);
        LittleEndian::write_u32(&mut out[8..12], FORMAT_VERSION);
        out[12] = self.kind.tag();
        out[13] = self.compression.tag();
        LittleEndian::write_u32(&mut out[16..20], self.schema_version);
        LittleEndian::write_u64(&mut out[24..32], self.payload_len);
        LittleEndian::write_u64(&mut out[32..40], self.uncompressed_len);
        LittleEndian::write_u64(&mut out[40..48], self.content_hash);
        out
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, StorageError> {
        if bytes.len() < HEADER_LEN {
            return Err(StorageError::Truncated {
                expected: HEADER_LEN,
                found: bytes.len(),
            });
        }
        if bytes[0..8] != MAGIC {
            return Err(StorageError::InvalidHeader("bad magic"));
        }
        let format_version = LittleEndian::read_u32(&bytes[8..12]);
        if format_version != FORMAT_VERSION {
            return Err(StorageError::InvalidHeader("unsupported header format version"));
        }

        Ok(Self {
            kind: ArtifactKind::from_tag(bytes[12])?,
            compression: Compression::from_tag(bytes[13])?,
            schema_version: LittleEndian::read_u32(&bytes[16..20]),
            payload_len: LittleEndian::read_u64(&bytes[24..32]),
            uncompressed_len: LittleEndian::read_u64(&bytes[32..40]),
            content_hash: LittleEndian::read_u64(&bytes[40..48]),
        })
    }
}

pub(crate) fn content_hash(payload: &[u8]) -> u64 {
    let hash = blake3::hash(payload);
    LittleEndian::read_u64(&hash.as_bytes()[..8])
}
