#![allow(clippy::cast_precision_loss)]

pub mod mem;
pub mod timing;

pub use mem::MemoryFootprint;
pub use timing::{Measurement, Rates, Summary};
