//! Approximation of pi by midpoint integration of `4 / (1 + x^2)` over `[0, 1]`.
//!
//! Repetitions store the raw sum, the factor of four is applied when the
//! checksum is taken.

use exec::forall::{Grid, HostPolicy, Seq};
use exec::{LaunchConfig, Real, ThreadBlock, ThreadIndex};
use kernelperf::kernel::{Capabilities, Complexity, Kernel, KernelInfo, RunContext};
use kernelperf::tuning::TuningSpace;
use kernelperf::variant::{Backend, Style};
use kernelperf::{checksum, Buffer, BufferPtr, Error};

pub const PI_INIT: Real = 0.0;

pub struct PiParams {
    pub dx: Real,
}

#[inline]
pub fn pi_term(params: &PiParams, i: usize) -> Real {
    let x = (i as Real + 0.5) * params.dx;
    params.dx / (1.0 + x * x)
}

/// Block-wise tree reduction in shared memory.
///
/// Thread zero of every block adds the block's partial sum to `dpi`.
pub struct PiReduceKernel {
    pub dx: Real,
    pub dpi: BufferPtr<Real>,
    pub n: usize,
}

#[exec::async_trait]
impl exec::Kernel for PiReduceKernel {
    type Error = std::convert::Infallible;

    async fn run(&self, block: &ThreadBlock, tid: &ThreadIndex) -> Result<(), Self::Error> {
        let block_size = tid.block_dim.x as usize;
        let local = tid.thread_idx.x as usize;

        let mut partial = 0.0;
        let mut i = tid.global_x();
        while i < self.n {
            let x = (i as Real + 0.5) * self.dx;
            partial += self.dx / (1.0 + x * x);
            i += tid.grid_stride_x();
        }
        block.shared()[local] = partial;
        block.synchronize_threads().await;

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
            self.dpi.atomic_add(0, block_sum);
        }
        Ok(())
    }

    fn name(&self) -> Option<&str> {
        Some("pi_reduce")
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct PiReduce;

pub struct PiReduceData {
    init: Buffer<Real>,
    dpi: Buffer<Real>,
    pi: Buffer<Real>,
}

impl PiReduceData {
    /// The approximation of pi after the last repetition.
    pub fn pi(&self) -> Result<Real, Error> {
        Ok(4.0 * self.pi.host()?[0])
    }
}

fn dx(ctx: &RunContext<'_>) -> Real {
    1.0 / ctx.size.max(1) as Real
}

fn shared_mem_bytes(block_size: u32) -> usize {
    block_size as usize * std::mem::size_of::<Real>()
}

impl PiReduce {
    fn base_seq(&self, data: &mut PiReduceData, ctx: &RunContext<'_>) -> Result<(), Error> {
        let dx = dx(ctx);
        let mut pi = PI_INIT;
        for i in 0..ctx.size {
            let x = (i as Real + 0.5) * dx;
            pi += dx / (1.0 + x * x);
        }
        data.pi.host_mut()?[0] = pi;
        Ok(())
    }

    #[cfg(feature = "parallel")]
    fn base_par(&self, data: &mut PiReduceData, ctx: &RunContext<'_>) -> Result<(), Error> {
        use rayon::prelude::*;
        let dx = dx(ctx);
        let sum: Real = (0..ctx.size)
            .into_par_iter()
            .map(|i| {
                let x = (i as Real + 0.5) * dx;
                dx / (1.0 + x * x)
            })
            .sum();
        data.pi.host_mut()?[0] = PI_INIT + sum;
        Ok(())
    }

    fn lambda_seq(&self, data: &mut PiReduceData, ctx: &RunContext<'_>) -> Result<(), Error> {
        let params = PiParams { dx: dx(ctx) };
        let body = pi_term;
        let mut pi = PI_INIT;
        for i in 0..ctx.size {
            pi += body(&params, i);
        }
        data.pi.host_mut()?[0] = pi;
        Ok(())
    }

    #[cfg(feature = "parallel")]
    fn lambda_par(&self, data: &mut PiReduceData, ctx: &RunContext<'_>) -> Result<(), Error> {
        use rayon::prelude::*;
        let params = PiParams { dx: dx(ctx) };
        let body = pi_term;
        let sum: Real = (0..ctx.size)
            .into_par_iter()
            .map(|i| body(&params, i))
            .sum();
        data.pi.host_mut()?[0] = PI_INIT + sum;
        Ok(())
    }

    fn library_seq(&self, data: &mut PiReduceData, ctx: &RunContext<'_>) -> Result<(), Error> {
        let params = PiParams { dx: dx(ctx) };
        data.pi.host_mut()?[0] = Seq.reduce_sum(0..ctx.size, PI_INIT, &params, pi_term);
        Ok(())
    }

    #[cfg(feature = "parallel")]
    fn library_par(&self, data: &mut PiReduceData, ctx: &RunContext<'_>) -> Result<(), Error> {
        let params = PiParams { dx: dx(ctx) };
        data.pi.host_mut()?[0] = exec::forall::Par.reduce_sum(0..ctx.size, PI_INIT, &params, pi_term);
        Ok(())
    }

    fn base_grid(&self, data: &mut PiReduceData, ctx: &RunContext<'_>) -> Result<(), Error> {
        let resource = ctx.resource()?;
        let block_size = ctx.block_size()?;
        let shmem = shared_mem_bytes(block_size);
        let grid_size = ctx.grid_size("pi_reduce", ctx.size as u64, shmem)?;

        ctx.data.copy(&data.dpi, &data.init, 1, Some(resource))?;
        let kernel = PiReduceKernel {
            dx: dx(ctx),
            dpi: data.dpi.ptr(ctx.model())?,
            n: ctx.size,
        };
        resource.launch(
            LaunchConfig::new(grid_size, block_size).with_shared_mem(shmem),
            kernel,
        )?;
        ctx.data.copy(&data.pi, &data.dpi, 1, Some(resource))
    }

    fn library_grid(&self, data: &mut PiReduceData, ctx: &RunContext<'_>) -> Result<(), Error> {
        let resource = ctx.resource()?;
        let block_size = ctx.block_size()?;
        let grid_size = ctx.grid_size("reduce_sum", ctx.size as u64, shared_mem_bytes(block_size))?;
        let policy = Grid::new(grid_size, block_size);

        let device = resource.device().clone();
        let params = PiParams { dx: dx(ctx) };
        let dpi = data.dpi.ptr(ctx.model())?;
        let n = ctx.size;
        resource.enqueue(async move {
            let sum = policy.reduce_sum(&device, 0..n, PI_INIT, params, pi_term).await?;
            dpi.store(0, sum);
            Ok(())
        })?;
        ctx.data.copy(&data.pi, &data.dpi, 1, Some(resource))
    }
}

impl Kernel for PiReduce {
    type Data = PiReduceData;

    fn info(&self) -> KernelInfo {
        KernelInfo::new("PI_REDUCE", "Basic")
    }

    fn complexity(&self, size: usize) -> Complexity {
        Complexity {
            bytes_per_rep: 2 * std::mem::size_of::<Real>() as u64,
            flops_per_rep: 6 * size as u64,
            iterations_per_rep: size as u64,
            kernels_per_rep: 1,
        }
    }

    fn capabilities(&self) -> Capabilities<Self> {
        let caps = Capabilities::new()
            .with(Style::Base, Backend::Seq, Self::base_seq, TuningSpace::Default)
            .with(Style::Lambda, Backend::Seq, Self::lambda_seq, TuningSpace::Default)
            .with(Style::Library, Backend::Seq, Self::library_seq, TuningSpace::Default);
        #[cfg(feature = "parallel")]
        let caps = caps
            .with(Style::Base, Backend::Par, Self::base_par, TuningSpace::Default)
            .with(Style::Lambda, Backend::Par, Self::lambda_par, TuningSpace::Default)
            .with(Style::Library, Backend::Par, Self::library_par, TuningSpace::Default);
        caps.with_accelerators(Style::Base, Self::base_grid, &TuningSpace::all_strategies())
            .with_accelerators(Style::Library, Self::library_grid, &TuningSpace::all_strategies())
    }

    fn set_up(&self, ctx: &RunContext<'_>) -> Result<Self::Data, Error> {
        let init = ctx.data.allocate_from(ctx.host_space(), &[PI_INIT])?;
        let dpi = ctx.data.allocate_from(ctx.data_space(), &[PI_INIT])?;
        let pi = if ctx.variant.backend.is_accelerator() {
            ctx.data.allocate_from(ctx.host_space(), &[PI_INIT])?
        } else {
            dpi.clone()
        };
        Ok(PiReduceData { init, dpi, pi })
    }

    fn checksum(&self, data: &Self::Data, _ctx: &RunContext<'_>) -> Result<Real, Error> {
        Ok(checksum(&[data.pi()?], self.info().checksum_scale))
    }
}

#[cfg(test)]
mod tests {
    use super::{PiParams, PiReduce};
    use crate::testing::{init_test, run_variant};
    use color_eyre::eyre;
    use exec::forall::{HostPolicy, Seq};
    use kernelperf::variant::{Backend, Style, VariantId};
    use kernelperf::{Config, KernelRegistry, RunParams, TuningSelection, Verdict};
    use similar_asserts as diff;

    #[test]
    fn test_midpoint_rule() -> eyre::Result<()> {
        init_test();
        let variant = VariantId::new(Style::Base, Backend::Seq);
        let pi = run_variant(&PiReduce, variant, None, 1000, |data| data.pi())?;
        approx::assert_abs_diff_eq!(pi, 3.14159, epsilon = 1e-3);

        let sum = Seq.reduce_sum(0..1000, 0.0, &PiParams { dx: 1e-3 }, super::pi_term);
        approx::assert_relative_eq!(pi, 4.0 * sum, max_relative = 1e-14);
        Ok(())
    }

    #[test]
    fn test_grid_variants_match_sequential() -> eyre::Result<()> {
        init_test();
        let reference = run_variant(
            &PiReduce,
            VariantId::new(Style::Base, Backend::Seq),
            None,
            5000,
            |data| data.pi(),
        )?;
        for style in [Style::Base, Style::Library] {
            for block_size in [32, 96, 256] {
                let variant = VariantId::new(style, Backend::GridB);
                let pi = run_variant(&PiReduce, variant, Some(block_size), 5000, |data| data.pi())?;
                approx::assert_relative_eq!(pi, reference, max_relative = 1e-12);
            }
        }
        Ok(())
    }

    #[test]
    fn test_all_variants_pass() -> eyre::Result<()> {
        init_test();
        let mut config = Config::default();
        config.gpu_block_sizes = vec![64, 256];
        let mut registry = KernelRegistry::new(config);
        registry.register(PiReduce)?;

        let params = RunParams {
            size: Some(2000),
            reps: Some(2),
            threads: Some(2),
            ..RunParams::default()
        };
        let records = registry.run(&params)?;
        // 3 host styles per host backend, 2 styles with 4 tunings per accelerator
        let host_variants = if cfg!(feature = "parallel") { 6 } else { 3 };
        assert_eq!(records.len(), host_variants + 2 * 2 * 4);
        for record in &records {
            assert!(
                matches!(record.verdict, Verdict::Reference | Verdict::Passed),
                "{record}"
            );
            assert_eq!(record.measurement.reps(), 2);
            let pi = record.checksum.unwrap_or_default();
            approx::assert_abs_diff_eq!(pi, std::f64::consts::PI, epsilon = 1e-6);
        }
        Ok(())
    }

    #[test]
    fn test_grid_styles_share_footprint() -> eyre::Result<()> {
        init_test();
        let mut config = Config::default();
        config.gpu_block_sizes = vec![128];
        let mut registry = KernelRegistry::new(config);
        registry.register(PiReduce)?;

        for backend in Backend::accelerators() {
            let variants = [Style::Base, Style::Library]
                .map(|style| VariantId::new(style, backend).to_string());
            let params = RunParams {
                size: Some(1000),
                reps: Some(1),
                variants: variants.to_vec(),
                tunings: vec![TuningSelection::Name("block_128".to_string())],
                ..RunParams::default()
            };
            let records = registry.run(&params)?;
            assert_eq!(records.len(), 2);
            let (base, library) = (&records[0], &records[1]);
            assert_eq!(library.verdict, Verdict::Passed, "{library}");
            assert_eq!(library.failure, None);
            diff::assert_eq!(have: library.footprint.clone(), want: base.footprint.clone());
            // initial value, device accumulator and host result
            assert_eq!(library.footprint.total(), 3 * std::mem::size_of::<exec::Real>() as u64);
        }
        Ok(())
    }
}
