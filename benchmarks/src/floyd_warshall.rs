//! All pairs shortest paths over a dense `n x n` weight matrix.
//!
//! Every step `k` reads one path matrix and writes the other, so threads of
//! a step never observe each other's writes.

use exec::forall::{Grid, HostPolicy, Seq};
use exec::lambda::Lambda2d;
use exec::{Dim, LaunchConfig, Real, ThreadBlock, ThreadIndex};
use kernelperf::kernel::{Capabilities, Complexity, Kernel, KernelInfo, RunContext};
use kernelperf::tuning::TuningSpace;
use kernelperf::variant::{Backend, Style};
use kernelperf::{checksum, Buffer, BufferPtr, Error};

/// Threads of a block along `j`.
pub const J_BLOCK_SIZE: u32 = 32;

/// Weight of missing edges.
pub const NO_EDGE: Real = 999.0;

#[must_use]
pub fn initial_weights(n: usize) -> Vec<Real> {
    let mut weights = vec![0.0; n * n];
    for i in 0..n {
        for j in 0..n {
            let sum = i + j;
            weights[i * n + j] = if sum % 13 == 0 || sum % 7 == 0 || sum % 11 == 0 {
                NO_EDGE
            } else {
                ((i * j) % 7 + 1) as Real
            };
        }
    }
    weights
}

/// Block and grid shape for an `n x n` iteration space.
///
/// Blocks are `32 x block_size / 32` threads.
#[must_use]
pub fn launch_dims(n: usize, block_size: u32) -> (Dim, Dim) {
    let i_block_size = (block_size / J_BLOCK_SIZE).max(1);
    let n = u32::try_from(n).unwrap_or(u32::MAX);
    let grid = Dim::from((n.div_ceil(J_BLOCK_SIZE).max(1), n.div_ceil(i_block_size).max(1)));
    let block = Dim::from((J_BLOCK_SIZE, i_block_size));
    (grid, block)
}

pub struct StepParams {
    pub pin: BufferPtr<Real>,
    pub pout: BufferPtr<Real>,
    pub k: usize,
    pub n: usize,
}

#[inline]
pub fn relax(params: &StepParams, i: usize, j: usize) {
    let n = params.n;
    let ij = params.pin.load(i * n + j);
    let ik_kj = params.pin.load(i * n + params.k) + params.pin.load(params.k * n + j);
    params.pout.store(i * n + j, if ik_kj < ij { ik_kj } else { ij });
}

pub struct FloydWarshallKernel {
    pub params: StepParams,
}

#[exec::async_trait]
impl exec::Kernel for FloydWarshallKernel {
    type Error = std::convert::Infallible;

    async fn run(&self, _block: &ThreadBlock, tid: &ThreadIndex) -> Result<(), Self::Error> {
        let i = tid.global_y();
        let j = tid.global_x();
        let n = self.params.n;
        if i < n && j < n {
            let pin = &self.params.pin;
            let ij = pin.load(i * n + j);
            let ik_kj = pin.load(i * n + self.params.k) + pin.load(self.params.k * n + j);
            self.params
                .pout
                .store(i * n + j, if ik_kj < ij { ik_kj } else { ij });
        }
        Ok(())
    }

    fn name(&self) -> Option<&str> {
        Some("floyd_warshall")
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct FloydWarshall;

pub struct FloydWarshallData {
    input: Buffer<Real>,
    paths: [Buffer<Real>; 2],
    result: Buffer<Real>,
}

impl FloydWarshallData {
    /// Path matrices read and written by step `k`.
    fn step(&self, k: usize) -> (&Buffer<Real>, &Buffer<Real>) {
        (&self.paths[k % 2], &self.paths[(k + 1) % 2])
    }

    fn step_params(&self, k: usize, ctx: &RunContext<'_>) -> Result<StepParams, Error> {
        let (pin, pout) = self.step(k);
        Ok(StepParams {
            pin: pin.ptr(ctx.model())?,
            pout: pout.ptr(ctx.model())?,
            k,
            n: ctx.size,
        })
    }

    /// Shortest path lengths in row major order.
    pub fn paths(&self) -> Result<Vec<Real>, Error> {
        Ok(self.result.host()?.to_vec())
    }
}

impl FloydWarshall {
    /// Run all steps of one repetition.
    ///
    /// The input weights are copied into the first path matrix before the
    /// first step, the last written path matrix is copied to the result after
    /// the last step.
    fn repeat(
        data: &FloydWarshallData,
        ctx: &RunContext<'_>,
        mut step: impl FnMut(&FloydWarshallData, usize) -> Result<(), Error>,
    ) -> Result<(), Error> {
        let n = ctx.size;
        ctx.data
            .copy(&data.paths[0], &data.input, n * n, ctx.resource)?;
        for k in 0..n {
            step(data, k)?;
        }
        ctx.data
            .copy(&data.result, &data.paths[n % 2], n * n, ctx.resource)
    }

    fn base_seq(&self, data: &mut FloydWarshallData, ctx: &RunContext<'_>) -> Result<(), Error> {
        let n = ctx.size;
        Self::repeat(data, ctx, |data, k| {
            let (pin, pout) = data.step(k);
            let pin = pin.host()?;
            let mut pout = pout.host_mut()?;
            for i in 0..n {
                for j in 0..n {
                    let ik_kj = pin[i * n + k] + pin[k * n + j];
                    let ij = pin[i * n + j];
                    pout[i * n + j] = if ik_kj < ij { ik_kj } else { ij };
                }
            }
            Ok(())
        })
    }

    #[cfg(feature = "parallel")]
    fn base_par(&self, data: &mut FloydWarshallData, ctx: &RunContext<'_>) -> Result<(), Error> {
        use rayon::prelude::*;
        let n = ctx.size;
        Self::repeat(data, ctx, |data, k| {
            let (pin, pout) = data.step(k);
            let pin = pin.host()?;
            let pin: &[Real] = &pin;
            pout.host_mut()?
                .par_chunks_mut(n.max(1))
                .enumerate()
                .for_each(|(i, row)| {
                    for (j, path) in row.iter_mut().enumerate() {
                        let ik_kj = pin[i * n + k] + pin[k * n + j];
                        let ij = pin[i * n + j];
                        *path = if ik_kj < ij { ik_kj } else { ij };
                    }
                });
            Ok(())
        })
    }

    fn lambda_seq(&self, data: &mut FloydWarshallData, ctx: &RunContext<'_>) -> Result<(), Error> {
        let n = ctx.size;
        Self::repeat(data, ctx, |data, k| {
            let params = data.step_params(k, ctx)?;
            let body = relax;
            for i in 0..n {
                for j in 0..n {
                    body(&params, i, j);
                }
            }
            Ok(())
        })
    }

    #[cfg(feature = "parallel")]
    fn lambda_par(&self, data: &mut FloydWarshallData, ctx: &RunContext<'_>) -> Result<(), Error> {
        use rayon::prelude::*;
        let n = ctx.size;
        Self::repeat(data, ctx, |data, k| {
            let params = data.step_params(k, ctx)?;
            let body = relax;
            (0..n).into_par_iter().for_each(|i| {
                for j in 0..n {
                    body(&params, i, j);
                }
            });
            Ok(())
        })
    }

    fn library_seq(&self, data: &mut FloydWarshallData, ctx: &RunContext<'_>) -> Result<(), Error> {
        let n = ctx.size;
        Self::repeat(data, ctx, |data, k| {
            let params = data.step_params(k, ctx)?;
            Seq.forall_2d(0..n, 0..n, &params, relax);
            Ok(())
        })
    }

    #[cfg(feature = "parallel")]
    fn library_par(&self, data: &mut FloydWarshallData, ctx: &RunContext<'_>) -> Result<(), Error> {
        let n = ctx.size;
        Self::repeat(data, ctx, |data, k| {
            let params = data.step_params(k, ctx)?;
            exec::forall::Par.forall_2d(0..n, 0..n, &params, relax);
            Ok(())
        })
    }

    fn base_grid(&self, data: &mut FloydWarshallData, ctx: &RunContext<'_>) -> Result<(), Error> {
        let resource = ctx.resource()?;
        let (grid, block) = launch_dims(ctx.size, ctx.block_size()?);
        Self::repeat(data, ctx, |data, k| {
            let kernel = FloydWarshallKernel {
                params: data.step_params(k, ctx)?,
            };
            resource.launch(LaunchConfig::new(grid, block), kernel)
        })
    }

    fn lambda_grid(&self, data: &mut FloydWarshallData, ctx: &RunContext<'_>) -> Result<(), Error> {
        let resource = ctx.resource()?;
        let (grid, block) = launch_dims(ctx.size, ctx.block_size()?);
        Self::repeat(data, ctx, |data, k| {
            let kernel = Lambda2d {
                params: data.step_params(k, ctx)?,
                body: relax,
                rows: ctx.size,
                cols: ctx.size,
            };
            resource.launch(LaunchConfig::new(grid, block), kernel)
        })
    }

    fn library_grid(&self, data: &mut FloydWarshallData, ctx: &RunContext<'_>) -> Result<(), Error> {
        let resource = ctx.resource()?;
        let (grid, block) = launch_dims(ctx.size, ctx.block_size()?);
        let policy = Grid::new(grid, block);
        Self::repeat(data, ctx, |data, k| {
            let params = data.step_params(k, ctx)?;
            let device = resource.device().clone();
            let n = ctx.size;
            resource.enqueue(async move {
                policy.forall_2d(&device, n, n, params, relax).await?;
                Ok(())
            })
        })
    }
}

impl Kernel for FloydWarshall {
    type Data = FloydWarshallData;

    fn info(&self) -> KernelInfo {
        KernelInfo::new("FLOYD_WARSHALL", "Polybench")
            .default_size(100)
            .default_reps(8)
    }

    fn complexity(&self, size: usize) -> Complexity {
        let n = size as u64;
        Complexity {
            bytes_per_rep: 2 * std::mem::size_of::<Real>() as u64 * n * n * n,
            flops_per_rep: n * n * n,
            iterations_per_rep: n * n * n,
            kernels_per_rep: n,
        }
    }

    fn capabilities(&self) -> Capabilities<Self> {
        let grid_tunings = TuningSpace::fixed().with_block_multiple(J_BLOCK_SIZE);
        let caps = Capabilities::new()
            .with(Style::Base, Backend::Seq, Self::base_seq, TuningSpace::Default)
            .with(Style::Lambda, Backend::Seq, Self::lambda_seq, TuningSpace::Default)
            .with(Style::Library, Backend::Seq, Self::library_seq, TuningSpace::Default);
        #[cfg(feature = "parallel")]
        let caps = caps
            .with(Style::Base, Backend::Par, Self::base_par, TuningSpace::Default)
            .with(Style::Lambda, Backend::Par, Self::lambda_par, TuningSpace::Default)
            .with(Style::Library, Backend::Par, Self::library_par, TuningSpace::Default);
        caps.with_accelerators(Style::Base, Self::base_grid, &grid_tunings)
            .with_accelerators(Style::Lambda, Self::lambda_grid, &grid_tunings)
            .with_accelerators(Style::Library, Self::library_grid, &grid_tunings)
    }

    fn set_up(&self, ctx: &RunContext<'_>) -> Result<Self::Data, Error> {
        let n = ctx.size;
        let input = ctx
            .data
            .allocate_from(ctx.data_space(), &initial_weights(n))?;
        let paths = [
            ctx.data.allocate(ctx.data_space(), n * n)?,
            ctx.data.allocate(ctx.data_space(), n * n)?,
        ];
        let result = if ctx.variant.backend.is_accelerator() {
            ctx.data.allocate(ctx.host_space(), n * n)?
        } else {
            paths[n % 2].clone()
        };
        Ok(FloydWarshallData {
            input,
            paths,
            result,
        })
    }

    fn checksum(&self, data: &Self::Data, _ctx: &RunContext<'_>) -> Result<Real, Error> {
        Ok(checksum(
            data.result.host()?.as_slice(),
            self.info().checksum_scale,
        ))
    }
}
