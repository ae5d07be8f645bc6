#![allow(clippy::missing_errors_doc, clippy::missing_panics_doc)]

use color_eyre::eyre;
use criterion::{black_box, Criterion};
use kernelperf::{Config, KernelRegistry, RunParams};
use kernelperf_benchmarks::pi_reduce::PiReduce;

fn registry() -> eyre::Result<KernelRegistry> {
    let mut config = Config::default();
    config.gpu_block_sizes = vec![256];
    let mut registry = KernelRegistry::new(config);
    registry.register(PiReduce)?;
    Ok(registry)
}

fn params(variant: &str, size: usize) -> RunParams {
    RunParams {
        size: Some(size),
        reps: Some(1),
        variants: vec![variant.to_string()],
        ..RunParams::default()
    }
}

pub fn run(registry: &KernelRegistry, params: &RunParams) -> eyre::Result<()> {
    let records = registry.run(params)?;
    if let Some(failed) = records.iter().find(|record| record.failure.is_some()) {
        eyre::bail!("{failed}");
    }
    Ok(())
}

pub fn host_benchmark(c: &mut Criterion) {
    let mut group = c.benchmark_group("pi_reduce/host");
    group.sample_size(10);
    group.sampling_mode(criterion::SamplingMode::Flat);
    let registry = registry().expect("build registry");

    for variant in ["Base_Seq", "Library_Seq", "Base_Par", "Library_Par"] {
        let params = params(variant, 1_000_000);
        group.bench_function(format!("{variant}/1000000"), |b| {
            b.iter(|| run(&registry, black_box(&params)).unwrap());
        });
    }
}

pub fn grid_benchmark(c: &mut Criterion) {
    let mut group = c.benchmark_group("pi_reduce/grid");
    group.sample_size(10);
    group.sampling_mode(criterion::SamplingMode::Flat);
    let registry = registry().expect("build registry");

    for variant in ["Base_GridA", "Library_GridA"] {
        let params = params(variant, 10_000);
        group.bench_function(format!("{variant}/10000"), |b| {
            b.iter(|| run(&registry, black_box(&params)).unwrap());
        });
    }
}

criterion::criterion_group!(benches, host_benchmark, grid_benchmark);
criterion::criterion_main!(benches);
