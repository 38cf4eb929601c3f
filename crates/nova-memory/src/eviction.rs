use crate::pressure::MemoryPressure;
use crate::types::MemoryCategory;

/// Ask a component to shrink its in-memory footprint to `target_bytes`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EvictionRequest {
    pub pressure: MemoryPressure,
    pub target_bytes: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct EvictionResult {
    pub before_bytes: u64,
    pub after_bytes: u64,
}

impl EvictionResult {
    pub fn freed_bytes(self) -> u64 {
        self.before_bytes.saturating_sub(self.after_bytes)
    }
}

/// A component that can drop cached state on request.
///
/// Eviction must never drop data that has not been persisted: components with
/// dirty state are expected to flush first (or keep the dirty part).
pub trait MemoryEvictor: Send + Sync {
    fn name(&self) -> &str;

    fn category(&self) -> MemoryCategory;

    fn evict(&self, request: EvictionRequest) -> EvictionResult;

    /// Persist cold state so a following [`MemoryEvictor::evict`] can release it.
    fn flush_to_disk(&self) -> std::io::Result<()> {
        Ok(())
    }
}
