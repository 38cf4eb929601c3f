use crate::data::{IndexKey, IndexValue};
use crate::error::MapError;
use std::collections::HashMap;
use tokio_util::sync::CancellationToken;

/// Maps the content of one input to the key/value pairs it contributes.
///
/// Implementations must be deterministic for a given content snapshot and
/// should poll `cancel` during long computations, returning
/// [`MapError::Cancelled`] once it fires.
pub trait DataIndexer<C: ?Sized>: Send + Sync {
    type Key: IndexKey;
    type Value: IndexValue;

    fn map(
        &self,
        content: &C,
        cancel: &CancellationToken,
    ) -> Result<HashMap<Self::Key, Self::Value>, MapError>;
}

impl<C: ?Sized, T: DataIndexer<C> + ?Sized> DataIndexer<C> for std::sync::Arc<T> {
    type Key = T::Key;
    type Value = T::Value;

    fn map(
        &self,
        content: &C,
        cancel: &CancellationToken,
    ) -> Result<HashMap<Self::Key, Self::Value>, MapError> {
        (**self).map(content, cancel)
    }
}
