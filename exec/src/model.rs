use serde::{Deserialize, Serialize};

/// Floating point type used by all kernels.
pub type Real = f64;

#[derive(Debug, Clone, Copy, Hash, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Dim {
    pub x: u32,
    pub y: u32,
    pub z: u32,
}

impl Dim {
    pub const ZERO: Self = Self { x: 0, y: 0, z: 0 };
    pub const ONE: Self = Self { x: 1, y: 1, z: 1 };

    #[must_use]
    #[inline]
    pub fn new(x: u32, y: u32, z: u32) -> Self {
        Self { x, y, z }
    }

    #[must_use]
    #[inline]
    pub fn size(&self) -> u64 {
        u64::from(self.x) * u64::from(self.y) * u64::from(self.z)
    }

    /// Iterate over all points inside this dimension, `x` varying fastest.
    #[must_use]
    pub fn points(&self) -> Iter {
        Iter {
            bounds: *self,
            current: 0,
        }
    }
}

impl std::fmt::Display for Dim {
    #[inline]
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "({},{},{})", self.x, self.y, self.z)
    }
}

impl From<u32> for Dim {
    #[inline]
    fn from(x: u32) -> Self {
        Self { x, y: 1, z: 1 }
    }
}

impl From<(u32, u32)> for Dim {
    #[inline]
    fn from((x, y): (u32, u32)) -> Self {
        Self { x, y, z: 1 }
    }
}

impl From<(u32, u32, u32)> for Dim {
    #[inline]
    fn from((x, y, z): (u32, u32, u32)) -> Self {
        Self { x, y, z }
    }
}

/// Iterates over 3-dimensional coordinates in linear (`x` fastest) order.
#[derive(Debug, Clone)]
pub struct Iter {
    bounds: Dim,
    current: u64,
}

impl Iterator for Iter {
    type Item = Dim;

    #[allow(clippy::cast_possible_truncation)]
    fn next(&mut self) -> Option<Self::Item> {
        let Self { current, bounds } = self;
        if *current >= bounds.size() {
            return None;
        }
        let plane = u64::from(bounds.x) * u64::from(bounds.y);
        let z = *current / plane;
        let xy = *current % plane;
        let y = xy / u64::from(bounds.x);
        let x = xy % u64::from(bounds.x);
        self.current += 1;
        Some(Dim {
            x: x as u32,
            y: y as u32,
            z: z as u32,
        })
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = usize::try_from(self.bounds.size() - self.current).unwrap_or(usize::MAX);
        (remaining, Some(remaining))
    }
}

impl ExactSizeIterator for Iter {}

#[must_use]
pub fn pad_to_multiple(n: u32, k: u32) -> u32 {
    let rem = n % k;
    if rem == 0 {
        n
    } else {
        ((n / k) + 1) * k
    }
}

/// Accelerator device properties.
#[derive(Debug, Clone, Hash, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct DeviceProperties {
    pub name: String,
    /// Warp (or wavefront) size.
    pub warp_size: u32,
    /// Number of cores (streaming multiprocessors / compute units).
    pub num_cores: u32,
    /// Maximum number of resident threads per core.
    pub max_threads_per_core: u32,
    /// Maximum number of resident blocks per core.
    pub max_blocks_per_core: u32,
    /// Maximum number of threads per block.
    pub max_threads_per_block: u32,
    /// Shared memory per core in bytes.
    pub shared_memory_per_core: usize,
    /// Maximum shared memory per block in bytes.
    pub shared_memory_per_block: usize,
    /// Global memory in bytes.
    pub memory_bytes: u64,
}

impl DeviceProperties {
    /// Warp-based device with 32 threads per warp.
    #[must_use]
    pub fn grid_a() -> Self {
        Self {
            name: "grid-a".to_string(),
            warp_size: 32,
            num_cores: 20,
            max_threads_per_core: 2048,
            max_blocks_per_core: 32,
            max_threads_per_block: 1024,
            shared_memory_per_core: 96 * 1024,
            shared_memory_per_block: 48 * 1024,
            memory_bytes: 8 * 1024 * 1024 * 1024,
        }
    }

    /// Wavefront-based device with 64 threads per wavefront.
    #[must_use]
    pub fn grid_b() -> Self {
        Self {
            name: "grid-b".to_string(),
            warp_size: 64,
            num_cores: 60,
            max_threads_per_core: 2560,
            max_blocks_per_core: 32,
            max_threads_per_block: 1024,
            shared_memory_per_core: 64 * 1024,
            shared_memory_per_block: 64 * 1024,
            memory_bytes: 16 * 1024 * 1024 * 1024,
        }
    }

    /// Maximum number of blocks of a kernel that can be resident on one core.
    ///
    /// Limited by the number of threads, the shared memory and the number of
    /// block slots per core.
    #[must_use]
    pub fn max_active_blocks_per_core(&self, threads_per_block: u32, shared_mem_bytes: usize) -> u32 {
        if threads_per_block == 0 {
            return 0;
        }
        let threads_per_block = pad_to_multiple(threads_per_block, self.warp_size.max(1));
        let by_thread_limit = self.max_threads_per_core / threads_per_block;

        let by_shared_mem_limit = if shared_mem_bytes > 0 {
            Some(u32::try_from(self.shared_memory_per_core / shared_mem_bytes).unwrap_or(u32::MAX))
        } else {
            None
        };

        [
            Some(by_thread_limit),
            by_shared_mem_limit,
            Some(self.max_blocks_per_core),
        ]
        .into_iter()
        .flatten()
        .min()
        .unwrap_or(0)
    }

    /// Maximum number of concurrently resident blocks on the whole device.
    #[must_use]
    pub fn occupancy_max_blocks(&self, threads_per_block: u32, shared_mem_bytes: usize) -> u32 {
        self.max_active_blocks_per_core(threads_per_block, shared_mem_bytes)
            .saturating_mul(self.num_cores)
    }
}

impl Default for DeviceProperties {
    fn default() -> Self {
        Self::grid_a()
    }
}

#[cfg(test)]
mod tests {
    use super::{DeviceProperties, Dim};
    use similar_asserts as diff;

    #[test]
    fn test_points_are_x_major() {
        let points: Vec<_> = Dim::new(2, 2, 1)
            .points()
            .map(|p| (p.x, p.y, p.z))
            .collect();
        diff::assert_eq!(
            have: points,
            want: vec![(0, 0, 0), (1, 0, 0), (0, 1, 0), (1, 1, 0)]
        );
    }

    #[test]
    fn test_empty_dim_has_no_points() {
        assert_eq!(Dim::new(0, 4, 1).points().count(), 0);
        assert_eq!(Dim::from(7).points().len(), 7);
    }

    #[test]
    fn test_occupancy_limits() {
        let device = DeviceProperties::grid_a();
        // thread limit: 2048 / 1024
        assert_eq!(device.max_active_blocks_per_core(1024, 0), 2);
        // block slot limit
        assert_eq!(device.max_active_blocks_per_core(32, 0), 32);
        // shared memory limit: 96KiB / 32KiB
        assert_eq!(device.max_active_blocks_per_core(64, 32 * 1024), 3);
        // padded to full warps: 2048 / 64
        assert_eq!(device.max_active_blocks_per_core(33, 0), 32);
        assert_eq!(device.occupancy_max_blocks(1024, 0), 40);
    }

    #[test]
    fn test_occupancy_of_empty_block() {
        let device = DeviceProperties::grid_b();
        assert_eq!(device.occupancy_max_blocks(0, 0), 0);
    }
}
