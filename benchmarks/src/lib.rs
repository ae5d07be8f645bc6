#![allow(
    clippy::cast_precision_loss,
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss,
    clippy::cast_lossless,
    clippy::missing_panics_doc,
    clippy::missing_errors_doc
)]

pub mod floyd_warshall;
pub mod pi_reduce;
pub mod stream_triad;

#[cfg(test)]
pub mod testing;

use kernelperf::{Config, Error, KernelRegistry};

/// Registry of all benchmark kernels in catalog order.
pub fn registry(config: Config) -> Result<KernelRegistry, Error> {
    let mut registry = KernelRegistry::new(config);
    registry
        .register(pi_reduce::PiReduce)?
        .register(stream_triad::StreamTriad::default())?
        .register(floyd_warshall::FloydWarshall)?;
    Ok(registry)
}
