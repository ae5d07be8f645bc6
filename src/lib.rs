#![allow(
    clippy::missing_panics_doc,
    clippy::missing_errors_doc,
    clippy::module_name_repetitions,
    clippy::cast_precision_loss,
    clippy::cast_possible_truncation
)]

pub mod checksum;
pub mod config;
pub mod data_space;
pub mod error;
pub mod harness;
pub mod kernel;
pub mod record;
pub mod registry;
pub mod resource;
pub mod runner;
pub mod timer;
pub mod tuning;
pub mod variant;

#[cfg(test)]
pub mod testing;

pub use exec;
pub use stats;

pub use checksum::{checksum, ChecksumAccumulator};
pub use config::{Config, RunParams, TuningSelection};
pub use data_space::{Buffer, BufferPtr, DataSpace, DataSpaceManager};
pub use error::Error;
pub use kernel::{Capabilities, Complexity, Kernel, KernelInfo, RunContext};
pub use record::{RunRecord, Verdict};
pub use registry::{KernelPlan, KernelRegistry, VariantPlan};
pub use resource::ExecutionResource;
pub use timer::Timer;
pub use tuning::{GridStrategy, TuningConfig, TuningSelector, TuningSpace};
pub use variant::{Backend, ConcurrencyModel, Style, VariantId};
