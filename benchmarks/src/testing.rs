use color_eyre::eyre;
use kernelperf::kernel::{Kernel, RunContext};
use kernelperf::tuning::{GridStrategy, TuningConfig, TuningSelector};
use kernelperf::variant::VariantId;
use kernelperf::{Config, DataSpaceManager, Error, ExecutionResource};

static INIT: std::sync::Once = std::sync::Once::new();

pub fn init_test() {
    INIT.call_once(|| {
        env_logger::builder().is_test(true).init();
        color_eyre::install().unwrap();
    });
}

/// Run a single repetition of `variant` and read back its results.
///
/// Accelerator variants use a fixed grid with `block_size` threads per block.
pub fn run_variant<K, R>(
    kernel: &K,
    variant: VariantId,
    block_size: Option<u32>,
    size: usize,
    read: impl FnOnce(&K::Data) -> Result<R, Error>,
) -> eyre::Result<R>
where
    K: Kernel,
{
    let config = Config::default();
    let resource = match config.devices.get(variant.backend) {
        Some(device) => Some(ExecutionResource::new(device.clone())?),
        None => None,
    };
    let tuning = match block_size {
        Some(block_size) => TuningConfig {
            index: 0,
            name: GridStrategy::Fixed.tuning_name(block_size),
            block_size: Some(block_size),
            strategy: Some(GridStrategy::Fixed),
        },
        None => TuningConfig::host_default(),
    };
    let data = DataSpaceManager::new();
    let selector = TuningSelector::new(vec![], vec![]);
    let ctx = RunContext {
        variant,
        tuning: &tuning,
        size,
        reps: 1,
        data: &data,
        resource: resource.as_ref(),
        selector: &selector,
    };

    let capabilities = kernel.capabilities();
    let capability = capabilities
        .get(&variant)
        .ok_or_else(|| eyre::eyre!("{} has no variant {variant}", kernel.info().name))?;

    let mut kernel_data = kernel.set_up(&ctx)?;
    (capability.run)(kernel, &mut kernel_data, &ctx)?;
    if let Some(resource) = &resource {
        resource.synchronize()?;
    }
    let result = read(&kernel_data)?;
    kernel.tear_down(kernel_data, &ctx);
    Ok(result)
}
