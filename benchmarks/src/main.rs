use clap::Parser;
use color_eyre::eyre;
use itertools::Itertools;
use kernelperf::{Config, RunParams, Verdict};
use kernelperf_benchmarks as benchmarks;
use std::path::{Path, PathBuf};
use std::time::Instant;

#[derive(Debug, Parser)]
#[command(author, version, about, long_about = None)]
struct Options {
    /// YAML configuration file
    #[arg(short = 'c', long = "config")]
    pub config: Option<PathBuf>,

    /// List the selected kernels, variants and tunings without running them
    #[arg(long = "plan")]
    pub plan: bool,

    /// Write the JSON results to this file instead of stdout
    #[arg(short = 'o', long = "output")]
    pub output: Option<PathBuf>,

    #[command(flatten)]
    pub run: RunParams,
}

fn write_json<T: serde::Serialize>(output: Option<&Path>, value: &T) -> eyre::Result<()> {
    match output {
        Some(path) => {
            let writer = std::io::BufWriter::new(std::fs::File::create(path)?);
            serde_json::to_writer_pretty(writer, value)?;
            log::info!("wrote {}", path.display());
        }
        None => {
            println!("{}", serde_json::to_string_pretty(value)?);
        }
    }
    Ok(())
}

fn main() -> eyre::Result<()> {
    color_eyre::install()?;
    env_logger::init();

    let options = Options::parse();
    let config = match &options.config {
        Some(path) => Config::from_path(path)?,
        None => Config::default(),
    };
    let params = config.run.clone().merge(&options.run);
    let registry = benchmarks::registry(config)?;

    if options.plan {
        let plans = registry.plan(&params);
        for plan in &plans {
            eprintln!(
                "{} ({}): size {}, {} reps",
                plan.kernel, plan.group, plan.problem_size, plan.reps
            );
            for variant in &plan.variants {
                eprintln!(
                    "\t{:<16} {}",
                    variant.variant,
                    variant.tunings.iter().map(ToString::to_string).join(", ")
                );
            }
        }
        return write_json(options.output.as_deref(), &plans);
    }

    let start = Instant::now();
    let records = registry.run(&params)?;

    for record in &records {
        let rates = record.rates();
        eprintln!(
            "{:<16} {:<16} {:<10} {:>12.3?} {:>8.2} GiB/s {:>8.2} GFLOP/s  {}",
            record.kernel,
            record.variant,
            record.tuning.as_deref().unwrap_or("-"),
            record.measurement.avg(),
            rates.bandwidth_gib_per_sec,
            rates.gflops,
            record.verdict
        );
    }
    let failed = records
        .iter()
        .filter(|record| record.verdict.is_failure() || record.failure.is_some())
        .count();
    let unsupported = records
        .iter()
        .filter(|record| record.verdict == Verdict::Unsupported)
        .count();
    eprintln!(
        "completed {} runs in {:?} ({failed} failed, {unsupported} unsupported)",
        records.len(),
        start.elapsed()
    );

    write_json(options.output.as_deref(), &records)
}
