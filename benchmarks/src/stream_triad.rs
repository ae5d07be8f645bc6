//! STREAM triad: `a[i] = b[i] + scalar * c[i]`.

use exec::forall::{Grid, HostPolicy, Seq};
use exec::lambda::Lambda;
use exec::{LaunchConfig, Real, ThreadBlock, ThreadIndex};
use kernelperf::kernel::{Capabilities, Complexity, Kernel, KernelInfo, RunContext};
use kernelperf::tuning::TuningSpace;
use kernelperf::variant::{Backend, Style};
use kernelperf::{checksum, Buffer, BufferPtr, Error};

pub const SCALAR: Real = 3.0;

#[must_use]
pub fn initial_values(n: usize, period: usize, step: Real, offset: Real) -> Vec<Real> {
    (0..n)
        .map(|i| (i % period) as Real * step + offset)
        .collect()
}

pub struct TriadParams {
    pub a: BufferPtr<Real>,
    pub b: BufferPtr<Real>,
    pub c: BufferPtr<Real>,
    pub scalar: Real,
}

#[inline]
pub fn triad(params: &TriadParams, i: usize) {
    params
        .a
        .store(i, params.b.load(i) + params.scalar * params.c.load(i));
}

pub struct TriadKernel {
    pub params: TriadParams,
    pub n: usize,
}

#[exec::async_trait]
impl exec::Kernel for TriadKernel {
    type Error = std::convert::Infallible;

    async fn run(&self, _block: &ThreadBlock, tid: &ThreadIndex) -> Result<(), Self::Error> {
        let TriadParams { a, b, c, scalar } = &self.params;
        let mut i = tid.global_x();
        while i < self.n {
            a.store(i, b.load(i) + scalar * c.load(i));
            i += tid.grid_stride_x();
        }
        Ok(())
    }

    fn name(&self) -> Option<&str> {
        Some("stream_triad")
    }
}

#[derive(Debug, Clone, Copy)]
pub struct StreamTriad {
    pub scalar: Real,
}

impl Default for StreamTriad {
    fn default() -> Self {
        Self { scalar: SCALAR }
    }
}

pub struct StreamTriadData {
    a: Buffer<Real>,
    b: Buffer<Real>,
    c: Buffer<Real>,
    result: Buffer<Real>,
}

impl StreamTriadData {
    fn params(&self, scalar: Real, ctx: &RunContext<'_>) -> Result<TriadParams, Error> {
        Ok(TriadParams {
            a: self.a.ptr(ctx.model())?,
            b: self.b.ptr(ctx.model())?,
            c: self.c.ptr(ctx.model())?,
            scalar,
        })
    }

    pub fn result(&self) -> Result<Vec<Real>, Error> {
        Ok(self.result.host()?.to_vec())
    }
}

impl StreamTriad {
    fn base_seq(&self, data: &mut StreamTriadData, _ctx: &RunContext<'_>) -> Result<(), Error> {
        let (b, c) = (data.b.host()?, data.c.host()?);
        for (i, a) in data.a.host_mut()?.iter_mut().enumerate() {
            *a = b[i] + self.scalar * c[i];
        }
        Ok(())
    }

    #[cfg(feature = "parallel")]
    fn base_par(&self, data: &mut StreamTriadData, _ctx: &RunContext<'_>) -> Result<(), Error> {
        use rayon::prelude::*;
        let (b, c) = (data.b.host()?, data.c.host()?);
        let scalar = self.scalar;
        data.a
            .host_mut()?
            .par_iter_mut()
            .zip(b.par_iter())
            .zip(c.par_iter())
            .for_each(|((a, b), c)| *a = b + scalar * c);
        Ok(())
    }

    fn lambda_seq(&self, data: &mut StreamTriadData, ctx: &RunContext<'_>) -> Result<(), Error> {
        let params = data.params(self.scalar, ctx)?;
        let body = triad;
        for i in 0..ctx.size {
            body(&params, i);
        }
        Ok(())
    }

    #[cfg(feature = "parallel")]
    fn lambda_par(&self, data: &mut StreamTriadData, ctx: &RunContext<'_>) -> Result<(), Error> {
        use rayon::prelude::*;
        let params = data.params(self.scalar, ctx)?;
        let body = triad;
        (0..ctx.size)
            .into_par_iter()
            .for_each(|i| body(&params, i));
        Ok(())
    }

    fn library_seq(&self, data: &mut StreamTriadData, ctx: &RunContext<'_>) -> Result<(), Error> {
        let params = data.params(self.scalar, ctx)?;
        Seq.forall(0..ctx.size, &params, triad);
        Ok(())
    }

    #[cfg(feature = "parallel")]
    fn library_par(&self, data: &mut StreamTriadData, ctx: &RunContext<'_>) -> Result<(), Error> {
        let params = data.params(self.scalar, ctx)?;
        exec::forall::Par.forall(0..ctx.size, &params, triad);
        Ok(())
    }

    fn base_grid(&self, data: &mut StreamTriadData, ctx: &RunContext<'_>) -> Result<(), Error> {
        let resource = ctx.resource()?;
        let grid_size = ctx.grid_size("stream_triad", ctx.size as u64, 0)?;
        let kernel = TriadKernel {
            params: data.params(self.scalar, ctx)?,
            n: ctx.size,
        };
        resource.launch(LaunchConfig::new(grid_size, ctx.block_size()?), kernel)?;
        ctx.data
            .copy(&data.result, &data.a, ctx.size, Some(resource))
    }

    fn lambda_grid(&self, data: &mut StreamTriadData, ctx: &RunContext<'_>) -> Result<(), Error> {
        let resource = ctx.resource()?;
        let grid_size = ctx.grid_size("lambda", ctx.size as u64, 0)?;
        let kernel = Lambda {
            params: data.params(self.scalar, ctx)?,
            body: triad,
            len: ctx.size,
        };
        resource.launch(LaunchConfig::new(grid_size, ctx.block_size()?), kernel)?;
        ctx.data
            .copy(&data.result, &data.a, ctx.size, Some(resource))
    }

    fn library_grid(&self, data: &mut StreamTriadData, ctx: &RunContext<'_>) -> Result<(), Error> {
        let resource = ctx.resource()?;
        let policy = Grid::new(
            ctx.grid_size("forall", ctx.size as u64, 0)?,
            ctx.block_size()?,
        );
        let device = resource.device().clone();
        let params = data.params(self.scalar, ctx)?;
        let n = ctx.size;
        resource.enqueue(async move {
            policy.forall(&device, 0..n, params, triad).await?;
            Ok(())
        })?;
        ctx.data.copy(&data.result, &data.a, n, Some(resource))
    }
}

impl Kernel for StreamTriad {
    type Data = StreamTriadData;

    fn info(&self) -> KernelInfo {
        KernelInfo::new("STREAM_TRIAD", "Stream")
            .default_size(100_000)
            .default_reps(20)
    }

    fn complexity(&self, size: usize) -> Complexity {
        let n = size as u64;
        Complexity {
            bytes_per_rep: 3 * std::mem::size_of::<Real>() as u64 * n,
            flops_per_rep: 2 * n,
            iterations_per_rep: n,
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
        // lambda kernels map one thread to one index
        caps.with_accelerators(Style::Base, Self::base_grid, &TuningSpace::all_strategies())
            .with_accelerators(Style::Lambda, Self::lambda_grid, &TuningSpace::fixed())
            .with_accelerators(Style::Library, Self::library_grid, &TuningSpace::all_strategies())
    }

    fn set_up(&self, ctx: &RunContext<'_>) -> Result<Self::Data, Error> {
        let n = ctx.size;
        let space = ctx.data_space();
        let a = ctx.data.allocate(space, n)?;
        let b = ctx.data.allocate_from(space, &initial_values(n, 17, 0.25, 1.0))?;
        let c = ctx.data.allocate_from(space, &initial_values(n, 11, 0.5, -2.0))?;
        let result = if ctx.variant.backend.is_accelerator() {
            ctx.data.allocate(ctx.host_space(), n)?
        } else {
            a.clone()
        };
        Ok(StreamTriadData { a, b, c, result })
    }

    fn checksum(&self, data: &Self::Data, _ctx: &RunContext<'_>) -> Result<Real, Error> {
        Ok(checksum(
            data.result.host()?.as_slice(),
            self.info().checksum_scale,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::StreamTriad;
    use crate::testing::{init_test, run_variant};
    use color_eyre::eyre;
    use kernelperf::variant::{Backend, Style, VariantId};
    use kernelperf::{Config, KernelRegistry, RunParams, Verdict};
    use similar_asserts as diff;

    #[test]
    fn test_triad_values() -> eyre::Result<()> {
        init_test();
        let kernel = StreamTriad::default();
        let want = vec![-5.0, -3.25, -1.5, 0.25, 2.0];
        let variant = VariantId::new(Style::Base, Backend::Seq);
        diff::assert_eq!(have: run_variant(&kernel, variant, None, 5, |data| data.result())?, want: want.clone());
        let variant = VariantId::new(Style::Lambda, Backend::GridA);
        diff::assert_eq!(have: run_variant(&kernel, variant, Some(64), 5, |data| data.result())?, want: want);
        Ok(())
    }

    #[test]
    fn test_all_variants_pass() -> eyre::Result<()> {
        init_test();
        let mut config = Config::default();
        config.gpu_block_sizes = vec![128];
        let mut registry = KernelRegistry::new(config);
        registry.register(StreamTriad::default())?;

        let params = RunParams {
            size: Some(3000),
            reps: Some(1),
            passes: Some(2),
            threads: Some(2),
            ..RunParams::default()
        };
        let records = registry.run(&params)?;
        let host_variants = if cfg!(feature = "parallel") { 6 } else { 3 };
        // base and library: 2 tunings, lambda: 1 tuning per accelerator
        assert_eq!(records.len(), host_variants + 2 * (2 + 1 + 2));
        for record in &records {
            assert!(
                matches!(record.verdict, Verdict::Reference | Verdict::Passed),
                "{record}"
            );
            assert_eq!(record.measurement.reps(), 2);
        }
        Ok(())
    }
}
