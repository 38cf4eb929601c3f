use crate::data::{IndexValue, InputData};
use crate::error::{ContractViolation, ViolationKind};
use crate::ids::{IndexId, InputId};
use nova_config::ValueValidationSetting;
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

/// Round-trip checking applied to every value produced by an indexer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueValidation {
    Off,
    /// Report violations with `tracing::error!` and keep indexing.
    Log,
    /// Fail the update with [`crate::UpdateError::ContractViolation`].
    Strict,
}

impl Default for ValueValidation {
    fn default() -> Self {
        if cfg!(debug_assertions) {
            ValueValidation::Strict
        } else {
            ValueValidation::Log
        }
    }
}

impl From<ValueValidationSetting> for ValueValidation {
    fn from(setting: ValueValidationSetting) -> Self {
        match setting {
            ValueValidationSetting::Off => ValueValidation::Off,
            ValueValidationSetting::Log => ValueValidation::Log,
            ValueValidationSetting::Strict => ValueValidation::Strict,
        }
    }
}

impl ValueValidation {
    /// Checks every value of `data` and applies the configured policy.
    pub(crate) fn check<K, V: IndexValue>(
        self,
        index: &IndexId,
        input: InputId,
        data: &InputData<K, V>,
    ) -> Result<(), ContractViolation> {
        if self == ValueValidation::Off {
            return Ok(());
        }

        for (_, value) in data.iter() {
            let Err(kind) = check_value(value) else {
                continue;
            };
            let violation = ContractViolation {
                index: index.clone(),
                input,
                kind,
                value: format!("{value:?}"),
            };
            match self {
                ValueValidation::Strict => return Err(violation),
                _ => tracing::error!(
                    target = "nova.index",
                    index = %index,
                    input_id = input.get(),
                    error = %violation,
                    "index value contract violated"
                ),
            }
        }
        Ok(())
    }
}

/// `decode(encode(v))` must equal `v` and hash identically.
pub fn check_value<V: IndexValue>(value: &V) -> Result<(), ViolationKind> {
    let bytes = nova_storage::encode(value).map_err(|err| ViolationKind::Codec(err.to_string()))?;
    let decoded: V =
        nova_storage::decode(&bytes).map_err(|err| ViolationKind::Codec(err.to_string()))?;

    if decoded != *value {
        return Err(ViolationKind::NotEqual);
    }
    if hash_of(&decoded) != hash_of(value) {
        return Err(ViolationKind::HashMismatch);
    }
    Ok(())
}

fn hash_of<V: Hash>(value: &V) -> u64 {
    let mut hasher = DefaultHasher::new();
    value.hash(&mut hasher);
    hasher.finish()
}
