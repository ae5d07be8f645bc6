use super::model::{Dim, Real};
use std::sync::Arc;

/// Block-local scratch memory shared by all threads of a block.
pub type SharedMemory = parking_lot::Mutex<Vec<Real>>;

pub struct ThreadBlock {
    pub(crate) barrier: Arc<tokio::sync::Barrier>,
    pub(crate) shared: Arc<SharedMemory>,
}

impl ThreadBlock {
    /// Wait until all threads of this block reached the barrier.
    pub async fn synchronize_threads(&self) {
        self.barrier.wait().await;
    }

    /// Access the shared memory of this block.
    ///
    /// The guard must not be held across `synchronize_threads`.
    pub fn shared(&self) -> parking_lot::MutexGuard<'_, Vec<Real>> {
        self.shared.lock()
    }
}

#[derive(Debug, Clone, Copy, Hash, PartialEq, Eq, PartialOrd, Ord)]
pub struct ThreadIndex {
    pub grid_dim: Dim,
    pub block_idx: Dim,
    pub block_dim: Dim,
    pub thread_idx: Dim,
}

impl ThreadIndex {
    /// Global thread index along `x`.
    #[must_use]
    #[inline]
    pub fn global_x(&self) -> usize {
        self.block_idx.x as usize * self.block_dim.x as usize + self.thread_idx.x as usize
    }

    /// Global thread index along `y`.
    #[must_use]
    #[inline]
    pub fn global_y(&self) -> usize {
        self.block_idx.y as usize * self.block_dim.y as usize + self.thread_idx.y as usize
    }

    /// Total number of threads in the grid along `x`.
    #[must_use]
    #[inline]
    pub fn grid_stride_x(&self) -> usize {
        self.grid_dim.x as usize * self.block_dim.x as usize
    }

    /// Linear thread index inside the block, `x` varying fastest.
    #[must_use]
    #[inline]
    pub fn local_linear(&self) -> usize {
        let Dim { x, y, .. } = self.block_dim;
        let t = self.thread_idx;
        (t.z as usize * y as usize + t.y as usize) * x as usize + t.x as usize
    }

    /// Linear thread index over the whole grid.
    #[must_use]
    #[inline]
    pub fn global_linear(&self) -> usize {
        let Dim { x, y, .. } = self.grid_dim;
        let b = self.block_idx;
        let block = (b.z as usize * y as usize + b.y as usize) * x as usize + b.x as usize;
        block * self.block_dim.size() as usize + self.local_linear()
    }

    /// Total number of threads in the grid.
    #[must_use]
    #[inline]
    pub fn grid_stride(&self) -> usize {
        (self.grid_dim.size() * self.block_dim.size()) as usize
    }
}

/// A kernel implementation.
#[async_trait::async_trait]
pub trait Kernel {
    type Error: std::error::Error;

    /// Run an instance of the kernel on a thread identified by its index
    async fn run(&self, block: &ThreadBlock, idx: &ThreadIndex) -> Result<(), Self::Error>;

    fn name(&self) -> Option<&str> {
        None
    }
}
