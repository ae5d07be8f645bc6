//! Tuning configurations of accelerator variants.
//!
//! A tuning pairs a block size with a grid sizing strategy. Enumeration is a
//! deterministic cross product of the candidate block sizes and the
//! strategies a variant supports, in candidate order and with
//! [`GridStrategy::Fixed`] before [`GridStrategy::OccupancyCalculated`] for
//! each block size.

use exec::DeviceProperties;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use strum::IntoEnumIterator;

pub const DEFAULT_TUNING: &str = "default";

#[derive(
    Debug,
    Clone,
    Copy,
    Hash,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    strum::EnumIter,
    strum::Display,
    Serialize,
    Deserialize,
)]
pub enum GridStrategy {
    /// One thread per iteration: `ceil(iterations / block_size)` blocks.
    Fixed,
    /// The fixed grid capped at the device's maximum number of concurrently
    /// resident blocks.
    OccupancyCalculated,
}

impl GridStrategy {
    #[must_use]
    pub fn prefix(self) -> &'static str {
        match self {
            Self::Fixed => "block",
            Self::OccupancyCalculated => "occgs",
        }
    }

    #[must_use]
    pub fn tuning_name(self, block_size: u32) -> String {
        format!("{}_{}", self.prefix(), block_size)
    }
}

#[derive(Debug, Clone, Hash, PartialEq, Eq, Serialize, Deserialize)]
pub struct TuningConfig {
    pub index: usize,
    pub name: String,
    pub block_size: Option<u32>,
    pub strategy: Option<GridStrategy>,
}

impl TuningConfig {
    /// The single tuning of host variants.
    #[must_use]
    pub fn host_default() -> Self {
        Self {
            index: 0,
            name: DEFAULT_TUNING.to_string(),
            block_size: None,
            strategy: None,
        }
    }
}

impl std::fmt::Display for TuningConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.index, self.name)
    }
}

/// Tunings a variant supports.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TuningSpace {
    /// Only the `default` tuning.
    Default,
    /// Block size and grid strategy tunings.
    ///
    /// Candidate block sizes must be a multiple of `block_multiple`.
    Grid {
        strategies: Vec<GridStrategy>,
        block_multiple: u32,
    },
}

impl TuningSpace {
    #[must_use]
    pub fn fixed() -> Self {
        Self::Grid {
            strategies: vec![GridStrategy::Fixed],
            block_multiple: 1,
        }
    }

    #[must_use]
    pub fn all_strategies() -> Self {
        Self::Grid {
            strategies: GridStrategy::iter().collect(),
            block_multiple: 1,
        }
    }

    #[must_use]
    pub fn with_block_multiple(self, multiple: u32) -> Self {
        match self {
            Self::Default => Self::Default,
            Self::Grid { strategies, .. } => Self::Grid {
                strategies,
                block_multiple: multiple.max(1),
            },
        }
    }
}

#[derive(Debug, Clone, Hash, PartialEq, Eq)]
pub struct OccupancyKey {
    pub function: &'static str,
    pub block_size: u32,
    pub shared_mem_bytes: usize,
    pub device: String,
}

/// Memoized device occupancy queries.
///
/// Entries are computed once and never invalidated.
#[derive(Debug, Default)]
pub struct OccupancyCache {
    entries: Mutex<HashMap<OccupancyKey, u32>>,
    queries: AtomicUsize,
}

impl OccupancyCache {
    pub fn get_or_query(&self, key: OccupancyKey, device: &DeviceProperties) -> u32 {
        let mut entries = self.entries.lock();
        *entries.entry(key).or_insert_with_key(|key| {
            self.queries.fetch_add(1, Ordering::Relaxed);
            let max_blocks = device.occupancy_max_blocks(key.block_size, key.shared_mem_bytes);
            log::debug!(
                "occupancy of {} with block size {} and {} bytes shared memory on {}: {} blocks",
                key.function,
                key.block_size,
                key.shared_mem_bytes,
                key.device,
                max_blocks
            );
            max_blocks
        })
    }

    /// Number of device queries performed.
    #[must_use]
    pub fn num_queries(&self) -> usize {
        self.queries.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[must_use]
pub fn fixed_grid_size(iterations: u64, block_size: u32) -> u32 {
    let blocks = iterations.div_ceil(u64::from(block_size.max(1)));
    u32::try_from(blocks).unwrap_or(u32::MAX).max(1)
}

#[derive(Debug, Default)]
pub struct TuningSelector {
    candidates: Vec<u32>,
    allow: Vec<u32>,
    cache: OccupancyCache,
}

impl TuningSelector {
    /// Selector over `candidates` restricted to the `allow` list.
    ///
    /// An empty allow list admits all candidates.
    #[must_use]
    pub fn new(candidates: Vec<u32>, allow: Vec<u32>) -> Self {
        Self {
            candidates,
            allow,
            cache: OccupancyCache::default(),
        }
    }

    #[must_use]
    pub fn cache(&self) -> &OccupancyCache {
        &self.cache
    }

    #[must_use]
    pub fn block_sizes(&self, block_multiple: u32, device: &DeviceProperties) -> Vec<u32> {
        self.candidates
            .iter()
            .copied()
            .filter(|size| *size > 0)
            .filter(|size| self.allow.is_empty() || self.allow.contains(size))
            .filter(|size| *size <= device.max_threads_per_block)
            .filter(|size| size % block_multiple.max(1) == 0)
            .collect()
    }

    /// Enumerate the tunings of a variant.
    ///
    /// Grid tunings without a device yield no tunings.
    #[must_use]
    pub fn enumerate(&self, space: &TuningSpace, device: Option<&DeviceProperties>) -> Vec<TuningConfig> {
        let TuningSpace::Grid {
            strategies,
            block_multiple,
        } = space
        else {
            return vec![TuningConfig::host_default()];
        };
        let Some(device) = device else {
            return vec![];
        };
        let strategies: Vec<GridStrategy> = GridStrategy::iter()
            .filter(|strategy| strategies.contains(strategy))
            .collect();

        let mut tunings = Vec::new();
        for block_size in self.block_sizes(*block_multiple, device) {
            for strategy in &strategies {
                tunings.push(TuningConfig {
                    index: tunings.len(),
                    name: strategy.tuning_name(block_size),
                    block_size: Some(block_size),
                    strategy: Some(*strategy),
                });
            }
        }
        tunings
    }

    #[must_use]
    pub fn max_concurrent_blocks(
        &self,
        function: &'static str,
        block_size: u32,
        shared_mem_bytes: usize,
        device: &DeviceProperties,
    ) -> u32 {
        let key = OccupancyKey {
            function,
            block_size,
            shared_mem_bytes,
            device: device.name.clone(),
        };
        self.cache.get_or_query(key, device)
    }

    /// Number of blocks to launch for `iterations` under `strategy`.
    #[must_use]
    pub fn grid_size(
        &self,
        strategy: GridStrategy,
        function: &'static str,
        block_size: u32,
        iterations: u64,
        shared_mem_bytes: usize,
        device: &DeviceProperties,
    ) -> u32 {
        let fixed = fixed_grid_size(iterations, block_size);
        match strategy {
            GridStrategy::Fixed => fixed,
            GridStrategy::OccupancyCalculated => {
                let max_blocks =
                    self.max_concurrent_blocks(function, block_size, shared_mem_bytes, device);
                fixed.min(max_blocks).max(1)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{fixed_grid_size, GridStrategy, TuningConfig, TuningSelector, TuningSpace};
    use exec::DeviceProperties;
    use similar_asserts as diff;

    fn names(tunings: &[TuningConfig]) -> Vec<(usize, String)> {
        tunings.iter().map(|t| (t.index, t.name.clone())).collect()
    }

    #[test]
    fn test_enumeration_order() {
        let selector = TuningSelector::new(vec![64, 128, 256], vec![]);
        let device = DeviceProperties::grid_a();
        let tunings = selector.enumerate(&TuningSpace::all_strategies(), Some(&device));
        diff::assert_eq!(
            have: names(&tunings),
            want: vec![
                (0, "block_64".to_string()),
                (1, "occgs_64".to_string()),
                (2, "block_128".to_string()),
                (3, "occgs_128".to_string()),
                (4, "block_256".to_string()),
                (5, "occgs_256".to_string()),
            ]
        );
    }

    #[test]
    fn test_enumeration_is_stable_for_allow_list() {
        let device = DeviceProperties::grid_b();
        let space = TuningSpace::Grid {
            strategies: vec![GridStrategy::OccupancyCalculated, GridStrategy::Fixed],
            block_multiple: 1,
        };
        let first = TuningSelector::new(vec![128, 64, 2048, 512], vec![512, 64, 2048]);
        let second = TuningSelector::new(vec![128, 64, 2048, 512], vec![512, 64, 2048]);
        let have = first.enumerate(&space, Some(&device));
        diff::assert_eq!(have: have.clone(), want: second.enumerate(&space, Some(&device)));
        diff::assert_eq!(
            have: names(&have),
            want: vec![
                (0, "block_64".to_string()),
                (1, "occgs_64".to_string()),
                (2, "block_512".to_string()),
                (3, "occgs_512".to_string()),
            ]
        );
    }

    #[test]
    fn test_block_multiple() {
        let selector = TuningSelector::new(vec![16, 64, 96, 1024], vec![]);
        let device = DeviceProperties::grid_a();
        let tunings = selector.enumerate(
            &TuningSpace::fixed().with_block_multiple(32),
            Some(&device),
        );
        diff::assert_eq!(
            have: names(&tunings),
            want: vec![
                (0, "block_64".to_string()),
                (1, "block_96".to_string()),
                (2, "block_1024".to_string()),
            ]
        );
    }

    #[test]
    fn test_host_default() {
        let selector = TuningSelector::new(vec![64], vec![]);
        let tunings = selector.enumerate(&TuningSpace::Default, None);
        diff::assert_eq!(have: tunings, want: vec![TuningConfig::host_default()]);
        assert!(selector
            .enumerate(&TuningSpace::fixed(), None)
            .is_empty());
    }

    #[test]
    fn test_occupancy_grid_is_bounded_by_fixed_grid() {
        let selector = TuningSelector::new(vec![], vec![]);
        for device in [DeviceProperties::grid_a(), DeviceProperties::grid_b()] {
            for block_size in [32, 64, 100, 128, 256, 512, 1024] {
                for iterations in [0, 1, 31, 1000, 1_000_000, 100_000_000] {
                    let fixed = selector.grid_size(
                        GridStrategy::Fixed,
                        "test",
                        block_size,
                        iterations,
                        0,
                        &device,
                    );
                    let occupancy = selector.grid_size(
                        GridStrategy::OccupancyCalculated,
                        "test",
                        block_size,
                        iterations,
                        block_size as usize * 8,
                        &device,
                    );
                    assert!(occupancy >= 1);
                    assert!(occupancy <= fixed);
                }
            }
        }
    }

    #[test]
    fn test_occupancy_is_cached() {
        let selector = TuningSelector::new(vec![], vec![]);
        let device = DeviceProperties::grid_a();
        for _ in 0..3 {
            assert_eq!(selector.max_concurrent_blocks("pi", 1024, 0, &device), 40);
            assert_eq!(selector.max_concurrent_blocks("pi", 256, 0, &device), 160);
        }
        assert_eq!(selector.max_concurrent_blocks("other", 256, 0, &device), 160);
        assert_eq!(selector.cache().num_queries(), 3);
        assert_eq!(selector.cache().len(), 3);
    }

    #[test]
    fn test_fixed_grid_size() {
        assert_eq!(fixed_grid_size(0, 256), 1);
        assert_eq!(fixed_grid_size(256, 256), 1);
        assert_eq!(fixed_grid_size(257, 256), 2);
        assert_eq!(fixed_grid_size(1_000_000, 1024), 977);
    }
}
