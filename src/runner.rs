use crate::data_space::DataSpaceManager;
use crate::error::Error;
use crate::harness::Harness;
use crate::kernel::{Capability, Kernel, RunContext};
use crate::resource::ExecutionResource;
use crate::timer::Timer;
use crate::tuning::{TuningConfig, TuningSelector};
use crate::variant::{ConcurrencyModel, VariantId};
use exec::Real;
use stats::{Measurement, MemoryFootprint};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum::Display)]
pub enum RunnerState {
    Uninitialized,
    DataSetUp,
    Running,
    Completed,
    DataTornDown,
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunSettings {
    pub size: usize,
    pub reps: usize,
    pub warmup: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RunOutput {
    pub measurement: Measurement,
    pub checksum: Real,
    pub footprint: MemoryFootprint,
}

#[derive(thiserror::Error, Debug)]
#[error("{source}")]
pub struct RunFailure {
    pub source: Error,
    pub footprint: MemoryFootprint,
}

/// Runs one (variant, tuning) combination of a kernel.
///
/// Every run gets its own data space manager and, for accelerator variants,
/// its own execution resource.
pub struct VariantRunner<'a, K: Kernel> {
    kernel: &'a K,
    variant: VariantId,
    capability: &'a Capability<K>,
    tuning: &'a TuningConfig,
    state: RunnerState,
}

impl<'a, K: Kernel> VariantRunner<'a, K> {
    pub fn new(
        kernel: &'a K,
        variant: VariantId,
        capability: &'a Capability<K>,
        tuning: &'a TuningConfig,
    ) -> Self {
        Self {
            kernel,
            variant,
            capability,
            tuning,
            state: RunnerState::Uninitialized,
        }
    }

    #[must_use]
    pub fn state(&self) -> RunnerState {
        self.state
    }

    pub fn run(
        &mut self,
        harness: &Harness<'_>,
        selector: &TuningSelector,
        settings: &RunSettings,
    ) -> Result<RunOutput, RunFailure> {
        let data = DataSpaceManager::with_limits(harness.memory_limits(self.variant.backend));
        let result = self.execute(harness, selector, settings, &data);
        let footprint = data.footprint();
        match result {
            Ok((measurement, checksum)) => Ok(RunOutput {
                measurement,
                checksum,
                footprint,
            }),
            Err(source) => {
                log::debug!(
                    "{} {} {} failed in state {}: {}",
                    self.kernel.info().name,
                    self.variant,
                    self.tuning.name,
                    self.state,
                    source
                );
                self.state = RunnerState::Failed;
                Err(RunFailure { source, footprint })
            }
        }
    }

    fn execute(
        &mut self,
        harness: &Harness<'_>,
        selector: &TuningSelector,
        settings: &RunSettings,
        data: &DataSpaceManager,
    ) -> Result<(Measurement, Real), Error> {
        let resource = match self.variant.model() {
            ConcurrencyModel::AcceleratorGrid => {
                let device = harness.device(self.variant.backend).ok_or_else(|| {
                    Error::MissingResource(self.variant.to_string(), "a device")
                })?;
                Some(ExecutionResource::new(device.clone())?)
            }
            ConcurrencyModel::Sequential | ConcurrencyModel::HostParallel => None,
        };
        let ctx = RunContext {
            variant: self.variant,
            tuning: self.tuning,
            size: settings.size,
            reps: settings.reps,
            data,
            resource: resource.as_ref(),
            selector,
        };

        let mut kernel_data = self.kernel.set_up(&ctx)?;
        self.state = RunnerState::DataSetUp;

        let result = match self.repeat(harness, &ctx, &mut kernel_data, settings) {
            Ok(measurement) => {
                self.state = RunnerState::Completed;
                self.kernel
                    .checksum(&kernel_data, &ctx)
                    .map(|checksum| (measurement, checksum))
            }
            Err(err) => Err(err),
        };

        self.kernel.tear_down(kernel_data, &ctx);
        if result.is_ok() {
            self.state = RunnerState::DataTornDown;
        }
        result
    }

    fn repeat(
        &mut self,
        harness: &Harness<'_>,
        ctx: &RunContext<'_>,
        data: &mut K::Data,
        settings: &RunSettings,
    ) -> Result<Measurement, Error> {
        self.state = RunnerState::Running;
        if settings.warmup {
            log::debug!("{} {}: warmup", self.kernel.info().name, self.variant);
            self.rep(harness, ctx, data)?;
        }

        let mut timer = Timer::new();
        for rep in 0..settings.reps {
            timer.start();
            self.rep(harness, ctx, data)?;
            let elapsed = timer.stop();
            log::debug!(
                "{} {} {}: rep {}/{} took {:?}",
                self.kernel.info().name,
                self.variant,
                self.tuning.name,
                rep + 1,
                settings.reps,
                elapsed.unwrap_or_default()
            );
        }
        Ok(timer.into_measurement())
    }

    /// Run one repetition to completion.
    ///
    /// Accelerator work is synchronized before returning so that timings
    /// include all enqueued work.
    fn rep(
        &self,
        harness: &Harness<'_>,
        ctx: &RunContext<'_>,
        data: &mut K::Data,
    ) -> Result<(), Error> {
        let (run, kernel) = (self.capability.run, self.kernel);
        match self.variant.model() {
            ConcurrencyModel::HostParallel => harness.install(|| run(kernel, data, ctx))?,
            ConcurrencyModel::Sequential | ConcurrencyModel::AcceleratorGrid => {
                run(kernel, data, ctx)?;
            }
        }
        if let Some(resource) = ctx.resource {
            resource.synchronize()?;
        }
        Ok(())
    }
}
