use crate::data_space::DataSpace;
use crate::variant::ConcurrencyModel;
use std::path::PathBuf;

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("failed to allocate {requested} bytes in {space} ({in_use} of {capacity} bytes in use)")]
    Allocation {
        space: DataSpace,
        requested: u64,
        in_use: u64,
        capacity: u64,
    },

    #[error("buffer in {space} is not accessible from {model} execution")]
    InaccessibleSpace {
        space: DataSpace,
        model: ConcurrencyModel,
    },

    #[error("buffer {id} in {space} has {pending} pending asynchronous operations")]
    PendingWork {
        id: u64,
        space: DataSpace,
        pending: usize,
    },

    #[error("copy of {count} elements out of bounds (source has {src_len}, destination has {dst_len})")]
    CopyOutOfBounds {
        count: usize,
        src_len: usize,
        dst_len: usize,
    },

    #[error(transparent)]
    Launch(#[from] exec::LaunchError),

    #[error("kernel failed: {0}")]
    Kernel(String),

    #[error("device error: {0}")]
    Device(String),

    #[error("execution resource is closed")]
    ResourceClosed,

    #[error("failed to spawn execution resource")]
    Spawn(#[source] std::io::Error),

    #[error("variant {variant} is not supported by kernel {kernel}")]
    UnsupportedVariant { kernel: String, variant: String },

    #[error("{0} requires {1}")]
    MissingResource(String, &'static str),

    #[error("kernel {0} is already registered")]
    DuplicateKernel(String),

    #[error("invalid number of threads")]
    NumThreads(#[from] std::num::ParseIntError),

    #[error("failed to read config file {path:?}")]
    ReadConfig {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config")]
    ParseConfig(#[from] serde_yaml::Error),

    #[cfg(feature = "parallel")]
    #[error(transparent)]
    ThreadPool(#[from] rayon::ThreadPoolBuildError),
}

impl Error {
    /// Whether the error invalidates all remaining runs of the current kernel.
    ///
    /// Memory and device failures are fatal for the kernel, while failures of
    /// a single launch configuration only affect the current tuning.
    #[must_use]
    pub fn is_fatal_for_kernel(&self) -> bool {
        matches!(
            self,
            Self::Allocation { .. } | Self::Device(_) | Self::ResourceClosed | Self::Spawn(_)
        )
    }
}
