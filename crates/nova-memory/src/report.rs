use crate::budget::MemoryBudget;
use crate::pressure::MemoryPressure;
use crate::types::{MemoryBreakdown, MemoryCategory};
use serde::{Deserialize, Serialize};

/// Snapshot of memory state intended for logging and diagnostics.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemoryReport {
    pub budget: MemoryBudget,
    pub usage: MemoryBreakdown,
    pub pressure: MemoryPressure,
}

impl MemoryReport {
    pub fn usage_total_bytes(&self) -> u64 {
        self.usage.total()
    }
}

/// Usage reported by a single registered component.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComponentUsage {
    pub name: String,
    pub category: MemoryCategory,
    pub bytes: u64,
}
