//! Memory budgeting and eviction orchestration for Nova's indexes.
//!
//! This crate is intentionally lightweight and "best-effort":
//! - Accounting is approximate and driven by the owning components.
//! - Eviction is cooperative via [`MemoryEvictor`] implementors.
//! - The runtime can broadcast a low-memory signal with
//!   [`MemoryManager::notify_low_memory`]; components never poll for it.

mod budget;
mod eviction;
mod manager;
mod pressure;
mod report;
mod types;

pub use budget::{
    parse_byte_size, MemoryBreakdownOverrides, MemoryBudget, MemoryBudgetOverrides, GB, KB, MB,
};
pub use eviction::{EvictionRequest, EvictionResult, MemoryEvictor};
pub use manager::{MemoryEvent, MemoryManager, MemoryRegistration, MemoryTracker};
pub use pressure::{MemoryPressure, MemoryPressureOverrides, MemoryPressureThresholds};
pub use report::{ComponentUsage, MemoryReport};
pub use types::{MemoryBreakdown, MemoryCategory};
