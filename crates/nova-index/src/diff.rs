use crate::data::{IndexKey, IndexValue, InputData};
use crate::forward::IntInputDataCodec;
use crate::ids::InputId;
use nova_storage::StorageError;

/// Receives the elementary operations of one input's diff.
pub trait UpdateProcessor<K, V> {
    /// `key` is new for `input`.
    fn add(&mut self, key: &K, value: &V, input: InputId) -> Result<(), StorageError>;

    /// `key` stays but its value changed.
    fn update(&mut self, key: &K, value: &V, input: InputId) -> Result<(), StorageError>;

    /// `key` is no longer produced for `input`.
    fn remove(&mut self, key: &K, input: InputId) -> Result<(), StorageError>;
}

/// Previous data of one input, as reconstructed from the forward index.
pub enum InputDataDiffBuilder<'a, K, V> {
    /// No prior contribution (first indexing).
    Empty,
    /// Fully decoded previous data.
    Map(InputData<K, V>),
    /// Integer-encoded previous data, decoded only if the encodings differ.
    Int {
        previous: u64,
        codec: &'a dyn IntInputDataCodec<K, V>,
    },
}

impl<K: IndexKey, V: IndexValue> InputDataDiffBuilder<'_, K, V> {
    /// Whether the input had no prior contribution.
    pub fn is_empty(&self) -> bool {
        matches!(self, InputDataDiffBuilder::Empty)
    }

    /// Feeds the operations turning the previous data into `new_data` to
    /// `processor`. Returns whether any operation was emitted.
    pub fn differentiate(
        &self,
        input: InputId,
        new_data: &InputData<K, V>,
        processor: &mut dyn UpdateProcessor<K, V>,
    ) -> Result<bool, StorageError> {
        match self {
            InputDataDiffBuilder::Empty => {
                for (key, value) in new_data.iter() {
                    processor.add(key, value, input)?;
                }
                Ok(!new_data.is_empty())
            }
            InputDataDiffBuilder::Map(previous) => {
                diff_maps(input, previous, new_data, processor)
            }
            InputDataDiffBuilder::Int { previous, codec } => {
                if codec.encode(new_data)? == *previous {
                    return Ok(false);
                }
                let previous = codec.decode(*previous)?;
                diff_maps(input, &previous, new_data, processor)
            }
        }
    }
}

fn diff_maps<K: IndexKey, V: IndexValue>(
    input: InputId,
    previous: &InputData<K, V>,
    new_data: &InputData<K, V>,
    processor: &mut dyn UpdateProcessor<K, V>,
) -> Result<bool, StorageError> {
    let mut changed = false;

    for (key, previous_value) in previous.iter() {
        match new_data.get(key) {
            Some(value) if value == previous_value => {}
            Some(value) => {
                processor.update(key, value, input)?;
                changed = true;
            }
            None => {
                processor.remove(key, input)?;
                changed = true;
            }
        }
    }

    for (key, value) in new_data.iter() {
        if previous.get(key).is_none() {
            processor.add(key, value, input)?;
            changed = true;
        }
    }

    Ok(changed)
}
