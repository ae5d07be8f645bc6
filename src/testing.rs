use crate::checksum::checksum;
use crate::data_space::{Buffer, BufferPtr};
use crate::error::Error;
use crate::kernel::{Capabilities, Complexity, Kernel, KernelInfo, RunContext};
use crate::tuning::TuningSpace;
use crate::variant::{Backend, Style, VariantId};
use exec::{LaunchConfig, Real, ThreadBlock, ThreadIndex};

static INIT: std::sync::Once = std::sync::Once::new();

pub fn init_test() {
    INIT.call_once(|| {
        env_logger::builder().is_test(true).init();
        color_eyre::install().unwrap();
    });
}

/// Device kernel writing each element's index.
pub struct IndexFillKernel {
    pub out: BufferPtr<Real>,
    pub n: usize,
}

#[exec::async_trait]
impl exec::Kernel for IndexFillKernel {
    type Error = std::convert::Infallible;

    async fn run(&self, _block: &ThreadBlock, tid: &ThreadIndex) -> Result<(), Self::Error> {
        let mut i = tid.global_x();
        while i < self.n {
            self.out.store(i, i as Real);
            i += tid.grid_stride_x();
        }
        Ok(())
    }

    fn name(&self) -> Option<&str> {
        Some("index_fill")
    }
}

/// Fills a buffer with its indices.
///
/// The checksum of `skew.0` is off by a relative `skew.1`. The output buffer
/// holds `padding` elements beyond the problem size.
#[derive(Debug)]
pub struct IndexFill {
    pub name: &'static str,
    pub skew: Option<(VariantId, Real)>,
    pub padding: usize,
}

impl Default for IndexFill {
    fn default() -> Self {
        Self {
            name: "INDEX_FILL",
            skew: None,
            padding: 0,
        }
    }
}

pub struct IndexFillData {
    out: Buffer<Real>,
    result: Buffer<Real>,
}

struct FillParams {
    out: BufferPtr<Real>,
}

fn fill(params: &FillParams, i: usize) {
    params.out.store(i, i as Real);
}

impl IndexFill {
    #[must_use]
    pub fn expected_checksum(n: usize) -> Real {
        let values: Vec<Real> = (0..n).map(|i| i as Real).collect();
        checksum(&values, 1.0)
    }

    fn base_seq(&self, data: &mut IndexFillData, _ctx: &RunContext<'_>) -> Result<(), Error> {
        for (i, value) in data.out.host_mut()?.iter_mut().enumerate() {
            *value = i as Real;
        }
        Ok(())
    }

    #[cfg(feature = "parallel")]
    fn base_par(&self, data: &mut IndexFillData, _ctx: &RunContext<'_>) -> Result<(), Error> {
        use rayon::prelude::*;
        data.out
            .host_mut()?
            .par_iter_mut()
            .enumerate()
            .for_each(|(i, value)| *value = i as Real);
        Ok(())
    }

    fn base_grid(&self, data: &mut IndexFillData, ctx: &RunContext<'_>) -> Result<(), Error> {
        let resource = ctx.resource()?;
        let block_size = ctx.block_size()?;
        let grid_size = ctx.grid_size("index_fill", ctx.size as u64, 0)?;
        let kernel = IndexFillKernel {
            out: data.out.ptr(ctx.model())?,
            n: ctx.size,
        };
        resource.launch(LaunchConfig::new(grid_size, block_size), kernel)?;
        ctx.data
            .copy(&data.result, &data.out, ctx.size, Some(resource))
    }

    fn library_grid(&self, data: &mut IndexFillData, ctx: &RunContext<'_>) -> Result<(), Error> {
        let resource = ctx.resource()?;
        let device = resource.device().clone();
        let policy = exec::forall::Grid::new(
            ctx.grid_size("index_fill", ctx.size as u64, 0)?,
            ctx.block_size()?,
        );
        let params = FillParams {
            out: data.out.ptr(ctx.model())?,
        };
        let n = ctx.size;
        resource.enqueue(async move {
            policy.forall(&device, 0..n, params, fill).await?;
            Ok(())
        })?;
        ctx.data.copy(&data.result, &data.out, n, Some(resource))
    }
}

impl Kernel for IndexFill {
    type Data = IndexFillData;

    fn info(&self) -> KernelInfo {
        KernelInfo::new(self.name, "Test")
            .default_size(1000)
            .default_reps(2)
    }

    fn complexity(&self, size: usize) -> Complexity {
        Complexity {
            bytes_per_rep: size as u64 * 8,
            flops_per_rep: 0,
            iterations_per_rep: size as u64,
            kernels_per_rep: 1,
        }
    }

    fn capabilities(&self) -> Capabilities<Self> {
        let caps = Capabilities::new().with(Style::Base, Backend::Seq, Self::base_seq, TuningSpace::Default);
        #[cfg(feature = "parallel")]
        let caps = caps.with(Style::Base, Backend::Par, Self::base_par, TuningSpace::Default);
        caps.with_accelerators(Style::Base, Self::base_grid, &TuningSpace::all_strategies())
            .with_accelerators(Style::Library, Self::library_grid, &TuningSpace::fixed())
    }

    fn set_up(&self, ctx: &RunContext<'_>) -> Result<Self::Data, Error> {
        let out = ctx
            .data
            .allocate(ctx.data_space(), ctx.size.saturating_add(self.padding))?;
        let result = if ctx.variant.backend.is_accelerator() {
            ctx.data.allocate(ctx.host_space(), ctx.size)?
        } else {
            out.clone()
        };
        Ok(IndexFillData { out, result })
    }

    fn checksum(&self, data: &Self::Data, ctx: &RunContext<'_>) -> Result<Real, Error> {
        let value = checksum(&data.result.host()?[..ctx.size], self.info().checksum_scale);
        match self.skew {
            Some((variant, skew)) if variant == ctx.variant => Ok(value * (1.0 + skew)),
            _ => Ok(value),
        }
    }
}
