use super::kernel::{Kernel, ThreadBlock, ThreadIndex};
use super::model::{DeviceProperties, Dim, Real};
use std::sync::Arc;
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy, Hash, PartialEq, Eq)]
pub struct LaunchConfig {
    pub grid: Dim,
    pub block: Dim,
    pub shared_mem_bytes: usize,
}

impl LaunchConfig {
    #[must_use]
    pub fn new(grid: impl Into<Dim>, block: impl Into<Dim>) -> Self {
        Self {
            grid: grid.into(),
            block: block.into(),
            shared_mem_bytes: 0,
        }
    }

    #[must_use]
    pub fn with_shared_mem(mut self, shared_mem_bytes: usize) -> Self {
        self.shared_mem_bytes = shared_mem_bytes;
        self
    }
}

impl std::fmt::Display for LaunchConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "<<<{}, {}, {}>>>",
            self.grid, self.block, self.shared_mem_bytes
        )
    }
}

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum LaunchError {
    #[error("invalid empty grid {grid}")]
    EmptyGrid { grid: Dim },

    #[error("invalid empty block {block}")]
    EmptyBlock { block: Dim },

    #[error("block size {block} ({threads_per_block} threads) too large (limit is {max_threads_per_block} threads per block)")]
    BlockSizeTooLarge {
        block: Dim,
        threads_per_block: u64,
        max_threads_per_block: u32,
    },

    #[error("{requested} bytes of shared memory exceed the limit of {limit} bytes per block")]
    SharedMemoryTooLarge { requested: usize, limit: usize },
}

#[derive(thiserror::Error, Debug)]
pub enum Error<K> {
    #[error(transparent)]
    Kernel(K),
    #[error(transparent)]
    Launch(#[from] LaunchError),
}

impl From<Error<std::convert::Infallible>> for LaunchError {
    fn from(err: Error<std::convert::Infallible>) -> Self {
        match err {
            Error::Kernel(never) => match never {},
            Error::Launch(err) => err,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LaunchStats {
    pub num_blocks: u64,
    pub num_threads: u64,
    pub elapsed: Duration,
}

pub fn validate(device: &DeviceProperties, config: &LaunchConfig) -> Result<(), LaunchError> {
    if config.grid.size() == 0 {
        return Err(LaunchError::EmptyGrid { grid: config.grid });
    }
    let threads_per_block = config.block.size();
    if threads_per_block == 0 {
        return Err(LaunchError::EmptyBlock {
            block: config.block,
        });
    }
    if threads_per_block > u64::from(device.max_threads_per_block) {
        return Err(LaunchError::BlockSizeTooLarge {
            block: config.block,
            threads_per_block,
            max_threads_per_block: device.max_threads_per_block,
        });
    }
    if config.shared_mem_bytes > device.shared_memory_per_block {
        return Err(LaunchError::SharedMemoryTooLarge {
            requested: config.shared_mem_bytes,
            limit: device.shared_memory_per_block,
        });
    }
    Ok(())
}

/// Launch a kernel on a grid of thread blocks.
///
/// Threads of a block run as cooperating futures sharing a barrier and the
/// block's shared memory. Blocks run one after another, which lets them
/// reuse a single shared memory allocation.
pub async fn launch<K>(
    device: &DeviceProperties,
    config: LaunchConfig,
    kernel: &K,
) -> Result<LaunchStats, Error<K::Error>>
where
    K: Kernel + Sync,
    <K as Kernel>::Error: Send,
{
    validate(device, &config)?;

    let start = Instant::now();
    let threads_per_block = config.block.size() as usize;
    let shared_len = config
        .shared_mem_bytes
        .div_ceil(std::mem::size_of::<Real>());
    let shared = Arc::new(parking_lot::Mutex::new(vec![0.0; shared_len]));

    log::trace!(
        "launching kernel {:?} {} on {}",
        kernel.name(),
        config,
        device.name
    );

    for block_idx in config.grid.points() {
        shared.lock().fill(0.0);
        let barrier = Arc::new(tokio::sync::Barrier::new(threads_per_block));

        let threads = config.block.points().map(|thread_idx| {
            let block = ThreadBlock {
                barrier: barrier.clone(),
                shared: shared.clone(),
            };
            let idx = ThreadIndex {
                grid_dim: config.grid,
                block_idx,
                block_dim: config.block,
                thread_idx,
            };
            async move { kernel.run(&block, &idx).await }
        });

        let results = futures::future::join_all(threads).await;
        if let Some(err) = results.into_iter().find_map(Result::err) {
            return Err(Error::Kernel(err));
        }
    }

    let stats = LaunchStats {
        num_blocks: config.grid.size(),
        num_threads: config.grid.size() * config.block.size(),
        elapsed: start.elapsed(),
    };
    log::debug!(
        "ran {} blocks of kernel {:?} in {:?}",
        stats.num_blocks,
        kernel.name(),
        stats.elapsed
    );
    Ok(stats)
}
