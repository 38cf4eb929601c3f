use bincode::Options;
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::persisted::{StorageError, PAYLOAD_LIMIT_BYTES};

fn bincode_options() -> impl bincode::Options + Copy {
    bincode::DefaultOptions::new()
        .with_fixint_encoding()
        .with_little_endian()
}

/// Serializes a value with Nova's fixed bincode configuration.
pub fn encode<T: Serialize + ?Sized>(value: &T) -> Result<Vec<u8>, StorageError> {
    Ok(bincode_options().serialize(value)?)
}

/// Deserializes a value encoded by [`encode`], refusing payloads above
/// [`PAYLOAD_LIMIT_BYTES`].
pub fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T, StorageError> {
    Ok(bincode_options()
        .with_limit(PAYLOAD_LIMIT_BYTES)
        .deserialize(bytes)?)
}
