use serde::{Deserialize, Serialize};

/// Coarse categories for the index engine's memory budget.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MemoryCategory {
    /// Loaded inverted-index (key -> associations) shards.
    InvertedIndex,
    /// Loaded forward-index (input -> snapshot) shards.
    ForwardIndex,
    Other,
}

/// Per-category memory breakdown in bytes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemoryBreakdown {
    pub inverted_index: u64,
    pub forward_index: u64,
    pub other: u64,
}

impl MemoryBreakdown {
    pub fn total(self) -> u64 {
        self.inverted_index
            .saturating_add(self.forward_index)
            .saturating_add(self.other)
    }

    pub fn get(self, category: MemoryCategory) -> u64 {
        match category {
            MemoryCategory::InvertedIndex => self.inverted_index,
            MemoryCategory::ForwardIndex => self.forward_index,
            MemoryCategory::Other => self.other,
        }
    }

    pub fn set(&mut self, category: MemoryCategory, bytes: u64) {
        match category {
            MemoryCategory::InvertedIndex => self.inverted_index = bytes,
            MemoryCategory::ForwardIndex => self.forward_index = bytes,
            MemoryCategory::Other => self.other = bytes,
        }
    }

    pub fn categories() -> [MemoryCategory; 3] {
        [
            MemoryCategory::InvertedIndex,
            MemoryCategory::ForwardIndex,
            MemoryCategory::Other,
        ]
    }
}
