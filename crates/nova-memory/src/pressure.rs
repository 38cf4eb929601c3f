use serde::{Deserialize, Serialize};

/// How close tracked usage is to the budget.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MemoryPressure {
    Low,
    Medium,
    High,
    Critical,
}

impl MemoryPressure {
    /// Share of each category budget evictors are asked to shrink to.
    pub fn eviction_target_ratio(self) -> f64 {
        match self {
            MemoryPressure::Low => 1.0,
            MemoryPressure::Medium => 0.70,
            MemoryPressure::High => 0.50,
            MemoryPressure::Critical => 0.0,
        }
    }

    /// Whether evictors flush dirty index shards before evicting, so the
    /// eviction can release them.
    pub fn flushes_first(self) -> bool {
        self >= MemoryPressure::High
    }
}

/// Usage-to-budget ratios at which each [`MemoryPressure`] level starts.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MemoryPressureThresholds {
    pub medium: f64,
    pub high: f64,
    pub critical: f64,
}

impl Default for MemoryPressureThresholds {
    fn default() -> Self {
        Self {
            medium: 0.70,
            high: 0.85,
            critical: 0.95,
        }
    }
}

/// Per-level threshold overrides, typically read from `[memory]` config.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct MemoryPressureOverrides {
    pub medium: Option<f64>,
    pub high: Option<f64>,
    pub critical: Option<f64>,
}

impl MemoryPressureThresholds {
    pub fn apply_overrides(self, overrides: MemoryPressureOverrides) -> Self {
        Self {
            medium: overrides.medium.unwrap_or(self.medium),
            high: overrides.high.unwrap_or(self.high),
            critical: overrides.critical.unwrap_or(self.critical),
        }
    }

    /// `0 < medium <= high <= critical`, all finite.
    pub fn is_ordered(self) -> bool {
        [self.medium, self.high, self.critical]
            .iter()
            .all(|ratio| ratio.is_finite())
            && self.medium > 0.0
            && self.medium <= self.high
            && self.high <= self.critical
    }

    pub fn level_for_ratio(self, ratio: f64) -> MemoryPressure {
        if ratio >= self.critical {
            MemoryPressure::Critical
        } else if ratio >= self.high {
            MemoryPressure::High
        } else if ratio >= self.medium {
            MemoryPressure::Medium
        } else {
            MemoryPressure::Low
        }
    }

    /// Level for `usage` bytes against a `budget`; a zero budget counts as one
    /// byte so any usage is critical.
    pub fn level_for(self, usage: u64, budget: u64) -> MemoryPressure {
        self.level_for_ratio(usage as f64 / budget.max(1) as f64)
    }
}
