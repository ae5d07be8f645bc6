#![allow(
    clippy::missing_panics_doc,
    clippy::missing_errors_doc,
    clippy::cast_possible_truncation,
    clippy::cast_precision_loss
)]

pub mod atomic;
pub mod forall;
pub mod kernel;
pub mod lambda;
pub mod launch;
pub mod model;

pub use async_trait::async_trait;
pub use atomic::AtomicReal;
pub use kernel::{Kernel, ThreadBlock, ThreadIndex};
pub use launch::{launch, Error, LaunchConfig, LaunchError, LaunchStats};
pub use model::{DeviceProperties, Dim, Real};
