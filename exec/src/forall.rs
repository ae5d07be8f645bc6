//! Policy based loop abstraction.
//!
//! The same loop body, given as a plain function over an explicit parameter
//! struct, runs sequentially ([`Seq`]), on a host thread pool ([`Par`]) or as a
//! grid of thread blocks on an accelerator device ([`Grid`]).

use super::atomic::AtomicReal;
use super::kernel::{Kernel, ThreadBlock, ThreadIndex};
use super::launch::{self, LaunchConfig, LaunchError, LaunchStats};
use super::model::{DeviceProperties, Dim, Real};
use std::ops::Range;

/// Host execution policy.
pub trait HostPolicy {
    fn forall<P: Sync>(&self, range: Range<usize>, params: &P, body: fn(&P, usize));

    fn forall_2d<P: Sync>(
        &self,
        rows: Range<usize>,
        cols: Range<usize>,
        params: &P,
        body: fn(&P, usize, usize),
    );

    fn reduce_sum<P: Sync>(
        &self,
        range: Range<usize>,
        init: Real,
        params: &P,
        body: fn(&P, usize) -> Real,
    ) -> Real;
}

/// Sequential execution in program order.
#[derive(Debug, Clone, Copy, Default)]
pub struct Seq;

impl HostPolicy for Seq {
    fn forall<P: Sync>(&self, range: Range<usize>, params: &P, body: fn(&P, usize)) {
        for i in range {
            body(params, i);
        }
    }

    fn forall_2d<P: Sync>(
        &self,
        rows: Range<usize>,
        cols: Range<usize>,
        params: &P,
        body: fn(&P, usize, usize),
    ) {
        for i in rows {
            for j in cols.clone() {
                body(params, i, j);
            }
        }
    }

    fn reduce_sum<P: Sync>(
        &self,
        range: Range<usize>,
        init: Real,
        params: &P,
        body: fn(&P, usize) -> Real,
    ) -> Real {
        range.fold(init, |acc, i| acc + body(params, i))
    }
}

/// Parallel execution on the current rayon thread pool.
#[cfg(feature = "parallel")]
#[derive(Debug, Clone, Copy, Default)]
pub struct Par;

#[cfg(feature = "parallel")]
impl HostPolicy for Par {
    fn forall<P: Sync>(&self, range: Range<usize>, params: &P, body: fn(&P, usize)) {
        use rayon::prelude::*;
        range.into_par_iter().for_each(|i| body(params, i));
    }

    fn forall_2d<P: Sync>(
        &self,
        rows: Range<usize>,
        cols: Range<usize>,
        params: &P,
        body: fn(&P, usize, usize),
    ) {
        use rayon::prelude::*;
        rows.into_par_iter().for_each(|i| {
            for j in cols.clone() {
                body(params, i, j);
            }
        });
    }

    fn reduce_sum<P: Sync>(
        &self,
        range: Range<usize>,
        init: Real,
        params: &P,
        body: fn(&P, usize) -> Real,
    ) -> Real {
        use rayon::prelude::*;
        let total = AtomicReal::new(init);
        range
            .into_par_iter()
            .fold(|| 0.0, |acc, i| acc + body(params, i))
            .for_each(|partial| {
                total.fetch_add(partial);
            });
        total.into_inner()
    }
}

/// Execution as a grid of thread blocks on an accelerator device.
///
/// Loops use grid-stride iteration, so any grid size covers the full range.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Grid {
    pub grid: Dim,
    pub block: Dim,
}

impl Grid {
    #[must_use]
    pub fn new(grid: impl Into<Dim>, block: impl Into<Dim>) -> Self {
        Self {
            grid: grid.into(),
            block: block.into(),
        }
    }

    pub async fn forall<P>(
        &self,
        device: &DeviceProperties,
        range: Range<usize>,
        params: P,
        body: fn(&P, usize),
    ) -> Result<LaunchStats, LaunchError>
    where
        P: Send + Sync,
    {
        let kernel = ForallKernel {
            params,
            body,
            range,
        };
        let config = LaunchConfig::new(self.grid, self.block);
        Ok(launch::launch(device, config, &kernel).await?)
    }

    pub async fn forall_2d<P>(
        &self,
        device: &DeviceProperties,
        rows: usize,
        cols: usize,
        params: P,
        body: fn(&P, usize, usize),
    ) -> Result<LaunchStats, LaunchError>
    where
        P: Send + Sync,
    {
        let kernel = Forall2dKernel {
            params,
            body,
            rows,
            cols,
        };
        let config = LaunchConfig::new(self.grid, self.block);
        Ok(launch::launch(device, config, &kernel).await?)
    }

    /// Sum `body` over `range`.
    ///
    /// Each block reduces its partial sums in shared memory and combines the
    /// block result with a single atomic addition.
    pub async fn reduce_sum<P>(
        &self,
        device: &DeviceProperties,
        range: Range<usize>,
        init: Real,
        params: P,
        body: fn(&P, usize) -> Real,
    ) -> Result<Real, LaunchError>
    where
        P: Send + Sync,
    {
        let kernel = ReduceSumKernel {
            params,
            body,
            range,
            total: AtomicReal::new(init),
        };
        let shared_mem_bytes = self.block.size() as usize * std::mem::size_of::<Real>();
        let config = LaunchConfig::new(self.grid, self.block).with_shared_mem(shared_mem_bytes);
        launch::launch(device, config, &kernel).await?;
        Ok(kernel.total.into_inner())
    }
}

struct ForallKernel<P> {
    params: P,
    body: fn(&P, usize),
    range: Range<usize>,
}

#[async_trait::async_trait]
impl<P> Kernel for ForallKernel<P>
where
    P: Send + Sync,
{
    type Error = std::convert::Infallible;

    async fn run(&self, _block: &ThreadBlock, tid: &ThreadIndex) -> Result<(), Self::Error> {
        let mut i = self.range.start + tid.global_x();
        while i < self.range.end {
            (self.body)(&self.params, i);
            i += tid.grid_stride_x();
        }
        Ok(())
    }

    fn name(&self) -> Option<&str> {
        Some("forall")
    }
}

struct Forall2dKernel<P> {
    params: P,
    body: fn(&P, usize, usize),
    rows: usize,
    cols: usize,
}

#[async_trait::async_trait]
impl<P> Kernel for Forall2dKernel<P>
where
    P: Send + Sync,
{
    type Error = std::convert::Infallible;

    async fn run(&self, _block: &ThreadBlock, tid: &ThreadIndex) -> Result<(), Self::Error> {
        let stride_y = tid.grid_dim.y as usize * tid.block_dim.y as usize;
        let stride_x = tid.grid_stride_x();
        let mut i = tid.global_y();
        while i < self.rows {
            let mut j = tid.global_x();
            while j < self.cols {
                (self.body)(&self.params, i, j);
                j += stride_x;
            }
            i += stride_y;
        }
        Ok(())
    }

    fn name(&self) -> Option<&str> {
        Some("forall_2d")
    }
}

struct ReduceSumKernel<P> {
    params: P,
    body: fn(&P, usize) -> Real,
    range: Range<usize>,
    total: AtomicReal,
}

#[async_trait::async_trait]
impl<P> Kernel for ReduceSumKernel<P>
where
    P: Send + Sync,
{
    type Error = std::convert::Infallible;

    async fn run(&self, block: &ThreadBlock, tid: &ThreadIndex) -> Result<(), Self::Error> {
        let block_size = tid.block_dim.size() as usize;
        let local = tid.local_linear();

        let mut partial = 0.0;
        let mut i = self.range.start + tid.global_linear();
        while i < self.range.end {
            partial += (self.body)(&self.params, i);
            i += tid.grid_stride();
        }
        block.shared()[local] = partial;
        block.synchronize_threads().await;

        // non power of two block sizes fold the upper half first
        let mut offset = block_size.next_power_of_two() / 2;
        while offset > 0 {
            if local < offset && local + offset < block_size {
                let mut shared = block.shared();
                let other = shared[local + offset];
                shared[local] += other;
            }
            block.synchronize_threads().await;
            offset /= 2;
        }

        if local == 0 {
            let block_sum = block.shared()[0];
            self.total.fetch_add(block_sum);
        }
        Ok(())
    }

    fn name(&self) -> Option<&str> {
        Some("reduce_sum")
    }
}
