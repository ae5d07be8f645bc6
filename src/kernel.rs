use crate::checksum::DEFAULT_TOLERANCE;
use crate::data_space::{DataSpace, DataSpaceManager};
use crate::error::Error;
use crate::resource::ExecutionResource;
use crate::tuning::{GridStrategy, TuningConfig, TuningSelector, TuningSpace};
use crate::variant::{Backend, ConcurrencyModel, Style, VariantId};
use exec::{DeviceProperties, Real};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

/// Identity and defaults of a kernel.
#[derive(Debug, Clone, PartialEq)]
pub struct KernelInfo {
    pub name: &'static str,
    pub group: &'static str,
    pub default_size: usize,
    pub default_reps: usize,
    /// Relative checksum tolerance against the reference variant.
    pub tolerance: Real,
    pub checksum_scale: Real,
}

impl KernelInfo {
    #[must_use]
    pub fn new(name: &'static str, group: &'static str) -> Self {
        Self {
            name,
            group,
            default_size: 1_000_000,
            default_reps: 50,
            tolerance: DEFAULT_TOLERANCE,
            checksum_scale: 1.0,
        }
    }

    #[must_use]
    pub fn default_size(mut self, size: usize) -> Self {
        self.default_size = size;
        self
    }

    #[must_use]
    pub fn default_reps(mut self, reps: usize) -> Self {
        self.default_reps = reps;
        self
    }

    #[must_use]
    pub fn tolerance(mut self, tolerance: Real) -> Self {
        self.tolerance = tolerance;
        self
    }

    #[must_use]
    pub fn checksum_scale(mut self, scale: Real) -> Self {
        self.checksum_scale = scale;
        self
    }
}

/// Work performed by one repetition.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Complexity {
    pub bytes_per_rep: u64,
    pub flops_per_rep: u64,
    pub iterations_per_rep: u64,
    pub kernels_per_rep: u64,
}

/// Everything a kernel sees during one variant run.
pub struct RunContext<'a> {
    pub variant: VariantId,
    pub tuning: &'a TuningConfig,
    pub size: usize,
    pub reps: usize,
    pub data: &'a DataSpaceManager,
    pub resource: Option<&'a ExecutionResource>,
    pub selector: &'a TuningSelector,
}

impl<'a> RunContext<'a> {
    #[must_use]
    pub fn model(&self) -> ConcurrencyModel {
        self.variant.model()
    }

    /// Space of the working buffers.
    #[must_use]
    pub fn data_space(&self) -> DataSpace {
        self.variant.backend.data_space()
    }

    /// Space of the results read back by the host.
    #[must_use]
    pub fn host_space(&self) -> DataSpace {
        self.variant.backend.host_space()
    }

    pub fn resource(&self) -> Result<&'a ExecutionResource, Error> {
        self.resource
            .ok_or_else(|| Error::MissingResource(self.variant.to_string(), "an execution resource"))
    }

    pub fn device(&self) -> Result<&'a DeviceProperties, Error> {
        Ok(self.resource()?.device().as_ref())
    }

    pub fn block_size(&self) -> Result<u32, Error> {
        self.tuning.block_size.ok_or_else(|| {
            Error::MissingResource(format!("tuning {}", self.tuning.name), "a block size")
        })
    }

    /// Grid size for `iterations` under the current tuning.
    pub fn grid_size(
        &self,
        function: &'static str,
        iterations: u64,
        shared_mem_bytes: usize,
    ) -> Result<u32, Error> {
        let strategy = self.tuning.strategy.unwrap_or(GridStrategy::Fixed);
        Ok(self.selector.grid_size(
            strategy,
            function,
            self.block_size()?,
            iterations,
            shared_mem_bytes,
            self.device()?,
        ))
    }
}

/// One repetition of a variant.
///
/// Resets per-repetition state, runs (or enqueues) the body and, for
/// accelerator variants, enqueues the copy of the results to the host.
pub type RepFn<K> = fn(&K, &mut <K as Kernel>::Data, &RunContext<'_>) -> Result<(), Error>;

pub struct Capability<K: Kernel> {
    pub run: RepFn<K>,
    pub tunings: TuningSpace,
}

impl<K: Kernel> std::fmt::Debug for Capability<K> {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        f.debug_struct("Capability")
            .field("tunings", &self.tunings)
            .finish_non_exhaustive()
    }
}

/// Variants supported by a kernel.
pub struct Capabilities<K: Kernel> {
    entries: IndexMap<VariantId, Capability<K>>,
}

impl<K: Kernel> Default for Capabilities<K> {
    fn default() -> Self {
        Self {
            entries: IndexMap::new(),
        }
    }
}

impl<K: Kernel> Capabilities<K> {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a variant.
    ///
    /// Host backends always use the default tuning.
    #[must_use]
    pub fn with(mut self, style: Style, backend: Backend, run: RepFn<K>, tunings: TuningSpace) -> Self {
        let tunings = if backend.is_accelerator() {
            tunings
        } else {
            TuningSpace::Default
        };
        self.entries
            .insert(VariantId::new(style, backend), Capability { run, tunings });
        self
    }

    /// Add a variant for every accelerator backend.
    #[must_use]
    pub fn with_accelerators(mut self, style: Style, run: RepFn<K>, tunings: &TuningSpace) -> Self {
        for backend in Backend::accelerators() {
            self = self.with(style, backend, run, tunings.clone());
        }
        self
    }

    #[must_use]
    pub fn get(&self, variant: &VariantId) -> Option<&Capability<K>> {
        self.entries.get(variant)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&VariantId, &Capability<K>)> {
        self.entries.iter()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// A benchmark kernel.
///
/// Data is created by [`Kernel::set_up`] for exactly one variant run and
/// consumed by [`Kernel::tear_down`] at its end.
pub trait Kernel: Send + Sync + 'static {
    type Data: Send;

    fn info(&self) -> KernelInfo;

    fn complexity(&self, size: usize) -> Complexity;

    fn capabilities(&self) -> Capabilities<Self>
    where
        Self: Sized;

    /// Allocate and initialize the buffers of a run.
    fn set_up(&self, ctx: &RunContext<'_>) -> Result<Self::Data, Error>;

    /// Checksum of the results, computed on the host.
    fn checksum(&self, data: &Self::Data, ctx: &RunContext<'_>) -> Result<Real, Error>;

    fn tear_down(&self, data: Self::Data, ctx: &RunContext<'_>) {
        log::trace!("tearing down {} {}", self.info().name, ctx.variant);
        drop(data);
    }
}
