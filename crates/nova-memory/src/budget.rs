use crate::types::{MemoryBreakdown, MemoryCategory};
use serde::{Deserialize, Serialize};

pub const KB: u64 = 1024;
pub const MB: u64 = 1024 * KB;
pub const GB: u64 = 1024 * MB;

/// Total memory budget and its per-category split.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemoryBudget {
    pub total: u64,
    pub categories: MemoryBreakdown,
}

/// Optional per-category overrides (typically sourced from config).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MemoryBreakdownOverrides {
    pub inverted_index: Option<u64>,
    pub forward_index: Option<u64>,
    pub other: Option<u64>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MemoryBudgetOverrides {
    pub total: Option<u64>,
    pub categories: MemoryBreakdownOverrides,
}

impl MemoryBudget {
    /// Default budget used when nothing is configured.
    pub const DEFAULT_TOTAL: u64 = 512 * MB;

    /// Split `total` across categories. Inverted-index shards dominate query
    /// traffic, so they get the largest share.
    pub fn from_total(total: u64) -> Self {
        let inverted_index = total / 100 * 60;
        let forward_index = total / 100 * 25;
        let other = total
            .saturating_sub(inverted_index)
            .saturating_sub(forward_index);
        Self {
            total,
            categories: MemoryBreakdown {
                inverted_index,
                forward_index,
                other,
            },
        }
    }

    pub fn apply_overrides(self, overrides: MemoryBudgetOverrides) -> Self {
        let mut budget = match overrides.total {
            Some(total) => Self::from_total(total),
            None => self,
        };

        let categories = overrides.categories;
        for (category, value) in [
            (MemoryCategory::InvertedIndex, categories.inverted_index),
            (MemoryCategory::ForwardIndex, categories.forward_index),
            (MemoryCategory::Other, categories.other),
        ] {
            if let Some(bytes) = value {
                budget.categories.set(category, bytes);
            }
        }

        // An explicit total always wins; otherwise keep the total consistent with
        // overridden categories.
        if overrides.total.is_none() {
            budget.total = budget.total.max(budget.categories.total());
        }
        budget
    }
}

impl Default for MemoryBudget {
    fn default() -> Self {
        Self::from_total(Self::DEFAULT_TOTAL)
    }
}

/// Parses `"4096"`, `"64KB"`, `"512M"`, `"2GiB"` and similar into bytes.
///
/// Suffixes are case-insensitive and use binary multiples.
pub fn parse_byte_size(input: &str) -> Result<u64, String> {
    let trimmed = input.trim();
    if trimmed.is_empty() {
        return Err("empty byte size".to_string());
    }

    let split = trimmed
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(trimmed.len());
    let (digits, suffix) = trimmed.split_at(split);
    if digits.is_empty() {
        return Err(format!("byte size must start with a number: {trimmed}"));
    }

    let value: u64 = digits
        .parse()
        .map_err(|err| format!("invalid byte size {trimmed}: {err}"))?;

    let multiplier = match suffix.trim().to_ascii_lowercase().as_str() {
        "" | "b" => 1,
        "k" | "kb" | "kib" => KB,
        "m" | "mb" | "mib" => MB,
        "g" | "gb" | "gib" => GB,
        other => return Err(format!("unknown byte size suffix `{other}`")),
    };

    value
        .checked_mul(multiplier)
        .ok_or_else(|| format!("byte size overflows u64: {trimmed}"))
}
