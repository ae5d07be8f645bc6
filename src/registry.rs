//! Catalog of kernels and the suite driver.
//!
//! Kernels are iterated in registration order, variants in capability order
//! and tunings in enumeration order. Failures never propagate past a single
//! (kernel, variant, tuning) record.

use crate::checksum;
use crate::config::{Config, RunParams};
use crate::error::Error;
use crate::harness::Harness;
use crate::kernel::{Capabilities, Complexity, Kernel, KernelInfo};
use crate::record::{RunRecord, Verdict};
use crate::runner::{RunFailure, RunOutput, RunSettings, VariantRunner};
use crate::tuning::{TuningConfig, TuningSelector, TuningSpace};
use crate::variant::VariantId;
use indexmap::IndexMap;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use stats::{Measurement, MemoryFootprint};
use std::collections::HashMap;
use std::sync::Arc;

/// Type erased registered kernel.
trait KernelEntry: Send + Sync {
    fn info(&self) -> KernelInfo;

    fn complexity(&self, size: usize) -> Complexity;

    fn variants(&self) -> Vec<(VariantId, TuningSpace)>;

    fn run(
        &self,
        harness: &Harness<'_>,
        selector: &TuningSelector,
        variant: VariantId,
        tuning: &TuningConfig,
        settings: &RunSettings,
    ) -> Result<RunOutput, RunFailure>;
}

struct Registered<K: Kernel> {
    kernel: K,
    capabilities: Capabilities<K>,
}

impl<K: Kernel> KernelEntry for Registered<K> {
    fn info(&self) -> KernelInfo {
        self.kernel.info()
    }

    fn complexity(&self, size: usize) -> Complexity {
        self.kernel.complexity(size)
    }

    fn variants(&self) -> Vec<(VariantId, TuningSpace)> {
        self.capabilities
            .iter()
            .map(|(variant, capability)| (*variant, capability.tunings.clone()))
            .collect()
    }

    fn run(
        &self,
        harness: &Harness<'_>,
        selector: &TuningSelector,
        variant: VariantId,
        tuning: &TuningConfig,
        settings: &RunSettings,
    ) -> Result<RunOutput, RunFailure> {
        let Some(capability) = self.capabilities.get(&variant) else {
            return Err(RunFailure {
                source: Error::UnsupportedVariant {
                    kernel: self.kernel.info().name.to_string(),
                    variant: variant.to_string(),
                },
                footprint: MemoryFootprint::default(),
            });
        };
        VariantRunner::new(&self.kernel, variant, capability, tuning).run(
            harness, selector, settings,
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VariantPlan {
    pub variant: String,
    pub tunings: Vec<TuningConfig>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KernelPlan {
    pub kernel: String,
    pub group: String,
    pub problem_size: usize,
    pub reps: usize,
    pub variants: Vec<VariantPlan>,
}

#[derive(Default)]
pub struct KernelRegistry {
    config: Config,
    kernels: IndexMap<&'static str, Box<dyn KernelEntry>>,
    /// Tuning selectors by block size allow list.
    ///
    /// Occupancy queries are cached for the lifetime of the registry.
    selectors: Mutex<HashMap<Vec<u32>, Arc<TuningSelector>>>,
}

impl std::fmt::Debug for KernelRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        f.debug_struct("KernelRegistry")
            .field("kernels", &self.kernels.keys().collect::<Vec<_>>())
            .finish_non_exhaustive()
    }
}

impl KernelRegistry {
    #[must_use]
    pub fn new(config: Config) -> Self {
        Self {
            config,
            kernels: IndexMap::new(),
            selectors: Mutex::new(HashMap::new()),
        }
    }

    #[must_use]
    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn register<K: Kernel>(&mut self, kernel: K) -> Result<&mut Self, Error> {
        let name = kernel.info().name;
        if self.kernels.contains_key(name) {
            return Err(Error::DuplicateKernel(name.to_string()));
        }
        let capabilities = kernel.capabilities();
        log::debug!("registered kernel {name} with {} variants", capabilities.len());
        self.kernels.insert(
            name,
            Box::new(Registered {
                kernel,
                capabilities,
            }),
        );
        Ok(self)
    }

    pub fn kernel_names(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.kernels.keys().copied()
    }

    fn selector(&self, params: &RunParams) -> Arc<TuningSelector> {
        let mut selectors = self.selectors.lock();
        let selector = selectors
            .entry(params.block_sizes.clone())
            .or_insert_with(|| {
                Arc::new(TuningSelector::new(
                    self.config.gpu_block_sizes.clone(),
                    params.block_sizes.clone(),
                ))
            });
        Arc::clone(selector)
    }

    fn selected_kernels<'a>(
        &'a self,
        params: &'a RunParams,
    ) -> impl Iterator<Item = &'a dyn KernelEntry> + 'a {
        self.kernels
            .values()
            .map(AsRef::as_ref)
            .filter(|entry| {
                let info = entry.info();
                params.selects_kernel(info.name, info.group)
            })
    }

    fn tunings(
        &self,
        selector: &TuningSelector,
        params: &RunParams,
        variant: VariantId,
        space: &TuningSpace,
    ) -> Vec<TuningConfig> {
        let device = self.config.devices.get(variant.backend);
        selector
            .enumerate(space, device)
            .into_iter()
            .filter(|tuning| params.selects_tuning(tuning))
            .collect()
    }

    /// Variants and tunings that [`KernelRegistry::run`] would execute.
    #[must_use]
    pub fn plan(&self, params: &RunParams) -> Vec<KernelPlan> {
        let selector = self.selector(params);
        self.selected_kernels(params)
            .map(|entry| {
                let info = entry.info();
                let variants = entry
                    .variants()
                    .into_iter()
                    .filter(|(variant, _)| params.selects_variant(variant))
                    .map(|(variant, space)| VariantPlan {
                        variant: variant.to_string(),
                        tunings: self.tunings(&selector, params, variant, &space),
                    })
                    .filter(|plan| !plan.tunings.is_empty())
                    .collect();
                KernelPlan {
                    kernel: info.name.to_string(),
                    group: info.group.to_string(),
                    problem_size: params.problem_size(info.default_size),
                    reps: params.reps(info.default_reps),
                    variants,
                }
            })
            .collect()
    }

    /// Run all selected kernels, variants and tunings.
    ///
    /// Records of the same combination are merged across passes.
    pub fn run(&self, params: &RunParams) -> Result<Vec<RunRecord>, Error> {
        let harness = Harness::new(&self.config, params.threads)?;
        let selector = self.selector(params);
        let passes = params.passes();

        let mut records: IndexMap<_, RunRecord> = IndexMap::new();
        for pass in 0..passes {
            log::info!("pass {}/{}", pass + 1, passes);
            for entry in self.selected_kernels(params) {
                for record in self.run_kernel(entry, &harness, &selector, params) {
                    match records.entry(record.key()) {
                        indexmap::map::Entry::Occupied(mut existing) => {
                            existing.get_mut().merge(record);
                        }
                        indexmap::map::Entry::Vacant(vacant) => {
                            vacant.insert(record);
                        }
                    }
                }
            }
        }
        Ok(records.into_values().collect())
    }

    fn run_kernel(
        &self,
        entry: &dyn KernelEntry,
        harness: &Harness<'_>,
        selector: &TuningSelector,
        params: &RunParams,
    ) -> Vec<RunRecord> {
        let info = entry.info();
        let settings = RunSettings {
            size: params.problem_size(info.default_size),
            reps: params.reps(info.default_reps),
            warmup: params.warmup,
        };
        let complexity = entry.complexity(settings.size);
        let record = |variant: String, tuning: Option<&TuningConfig>, verdict: Verdict| RunRecord {
            kernel: info.name.to_string(),
            variant,
            tuning_index: tuning.map(|tuning| tuning.index),
            tuning: tuning.map(|tuning| tuning.name.clone()),
            problem_size: settings.size,
            reps: settings.reps,
            measurement: Measurement::default(),
            checksum: None,
            verdict,
            footprint: MemoryFootprint::default(),
            complexity,
            failure: None,
        };

        let variants = entry.variants();
        let mut records = Vec::new();

        for name in &params.variants {
            let supported = name
                .parse::<VariantId>()
                .is_ok_and(|variant| variants.iter().any(|(v, _)| *v == variant));
            if !supported {
                log::warn!("kernel {} does not support variant {name}", info.name);
                records.push(record(name.clone(), None, Verdict::Unsupported));
            }
        }

        let mut fatal = false;
        for (variant, space) in variants {
            if !params.selects_variant(&variant) {
                continue;
            }
            for tuning in self.tunings(selector, params, variant, &space) {
                let mut current = record(variant.to_string(), Some(&tuning), Verdict::Unverified);
                if fatal {
                    current.verdict = Verdict::Skipped;
                    records.push(current);
                    continue;
                }
                match entry.run(harness, selector, variant, &tuning, &settings) {
                    Ok(output) => {
                        current.measurement = output.measurement;
                        current.checksum = Some(output.checksum);
                        current.footprint = output.footprint;
                        log::info!("{current}");
                    }
                    Err(failure) => {
                        fatal = failure.source.is_fatal_for_kernel();
                        if fatal {
                            log::error!(
                                "{} {} {} failed, skipping remaining runs of {}: {}",
                                info.name,
                                variant,
                                tuning.name,
                                info.name,
                                failure.source
                            );
                        } else {
                            log::warn!("{} {} {} failed: {}", info.name, variant, tuning.name, failure.source);
                        }
                        current.footprint = failure.footprint;
                        current.failure = Some(failure.source.to_string());
                    }
                }
                records.push(current);
            }
        }

        self.verify(&info, params, &mut records);
        records
    }

    /// Compare the checksums of all runs against the reference run.
    ///
    /// The reference is the first run of the requested reference variant, or
    /// the first run with a checksum.
    fn verify(&self, info: &KernelInfo, params: &RunParams, records: &mut [RunRecord]) {
        let reference = records.iter().position(|record| {
            record.checksum.is_some()
                && params
                    .reference_variant
                    .as_ref()
                    .map_or(true, |reference| *reference == record.variant)
        });
        let Some(reference) = reference else {
            if let Some(variant) = &params.reference_variant {
                log::warn!("reference variant {variant} of {} did not run", info.name);
            }
            return;
        };
        let Some(reference_checksum) = records[reference].checksum else {
            return;
        };
        records[reference].verdict = Verdict::Reference;

        for (idx, record) in records.iter_mut().enumerate() {
            let Some(value) = record.checksum else {
                continue;
            };
            if idx == reference {
                continue;
            }
            record.verdict = checksum::verify(value, reference_checksum, info.tolerance);
            if record.verdict.is_failure() {
                log::warn!(
                    "checksum mismatch for {} {} {}: {} (reference {})",
                    record.kernel,
                    record.variant,
                    record.tuning.as_deref().unwrap_or("-"),
                    record.verdict,
                    reference_checksum
                );
            }
        }
    }
}
