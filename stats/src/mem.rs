use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Peak allocated bytes per data space.
#[derive(Clone, Default, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemoryFootprint {
    pub peak_bytes: BTreeMap<String, u64>,
}

impl MemoryFootprint {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, space: impl Into<String>, bytes: u64) {
        let peak = self.peak_bytes.entry(space.into()).or_insert(0);
        *peak = (*peak).max(bytes);
    }

    #[must_use]
    pub fn get(&self, space: &str) -> u64 {
        self.peak_bytes.get(space).copied().unwrap_or(0)
    }

    #[must_use]
    pub fn total(&self) -> u64 {
        self.peak_bytes.values().sum()
    }
}

impl std::ops::AddAssign for MemoryFootprint {
    fn add_assign(&mut self, other: Self) {
        for (space, bytes) in other.peak_bytes {
            self.record(space, bytes);
        }
    }
}

impl std::fmt::Display for MemoryFootprint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut first = true;
        for (space, bytes) in &self.peak_bytes {
            if !first {
                write!(f, ", ")?;
            }
            first = false;
            write!(f, "{space}={}", human_bytes::human_bytes(*bytes as f64))?;
        }
        Ok(())
    }
}
