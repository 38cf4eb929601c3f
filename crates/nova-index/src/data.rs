use crate::ids::InputId;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fmt::Debug;
use std::hash::Hash;

/// Bounds shared by every index key type.
pub trait IndexKey:
    Clone + Eq + Hash + Debug + Serialize + DeserializeOwned + Send + Sync + 'static
{
}

impl<T> IndexKey for T where
    T: Clone + Eq + Hash + Debug + Serialize + DeserializeOwned + Send + Sync + 'static
{
}

/// Bounds shared by every index value type.
///
/// Values must survive `bincode` round-trips with equal `Eq` and `Hash`; see
/// [`crate::ValueValidation`].
pub trait IndexValue:
    Clone + Eq + Hash + Debug + Serialize + DeserializeOwned + Send + Sync + 'static
{
}

impl<T> IndexValue for T where
    T: Clone + Eq + Hash + Debug + Serialize + DeserializeOwned + Send + Sync + 'static
{
}

/// The key/value map an indexer produced for one input.
#[derive(Debug, Clone)]
pub struct InputData<K, V> {
    map: HashMap<K, V>,
}

impl<K, V> InputData<K, V> {
    pub fn empty() -> Self {
        Self {
            map: HashMap::new(),
        }
    }

    pub fn new(map: HashMap<K, V>) -> Self {
        Self { map }
    }

    pub fn map(&self) -> &HashMap<K, V> {
        &self.map
    }

    pub fn into_map(self) -> HashMap<K, V> {
        self.map
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&K, &V)> {
        self.map.iter()
    }
}

impl<K: Eq + Hash, V> InputData<K, V> {
    pub fn get(&self, key: &K) -> Option<&V> {
        self.map.get(key)
    }
}

impl<K, V> Default for InputData<K, V> {
    fn default() -> Self {
        Self::empty()
    }
}

impl<K: Eq + Hash, V: PartialEq> PartialEq for InputData<K, V> {
    fn eq(&self, other: &Self) -> bool {
        self.map == other.map
    }
}

impl<K: Eq + Hash, V: Eq> Eq for InputData<K, V> {}

impl<K, V> From<HashMap<K, V>> for InputData<K, V> {
    fn from(map: HashMap<K, V>) -> Self {
        Self::new(map)
    }
}

/// Every `(input, value)` association currently stored under one key.
///
/// Returned by value: it is a snapshot and never aliases index state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValueContainer<V> {
    values: BTreeMap<InputId, V>,
}

impl<V> ValueContainer<V> {
    pub fn new() -> Self {
        Self {
            values: BTreeMap::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn get(&self, input: InputId) -> Option<&V> {
        self.values.get(&input)
    }

    pub fn contains_input(&self, input: InputId) -> bool {
        self.values.contains_key(&input)
    }

    /// Input ids in ascending order.
    pub fn input_ids(&self) -> impl Iterator<Item = InputId> + '_ {
        self.values.keys().copied()
    }

    pub fn iter(&self) -> impl Iterator<Item = (InputId, &V)> {
        self.values.iter().map(|(input, value)| (*input, value))
    }

    /// Records `value` for `input`, replacing a previous value.
    pub fn add_value(&mut self, input: InputId, value: V) -> Option<V> {
        self.values.insert(input, value)
    }

    /// Drops the association for `input`; returns whether one existed.
    pub fn remove_value(&mut self, input: InputId) -> bool {
        self.values.remove(&input).is_some()
    }
}

impl<V: Eq + Hash> ValueContainer<V> {
    /// Inputs grouped by the value they contributed.
    pub fn group_by_value(&self) -> HashMap<&V, Vec<InputId>> {
        let mut out: HashMap<&V, Vec<InputId>> = HashMap::new();
        for (input, value) in &self.values {
            out.entry(value).or_default().push(*input);
        }
        out
    }
}

impl<V> Default for ValueContainer<V> {
    fn default() -> Self {
        Self::new()
    }
}
