use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Elapsed time of the timed repetitions of one (kernel, variant, tuning) run.
#[derive(Clone, Default, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Measurement {
    pub samples: Vec<Duration>,
}

impl Measurement {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, sample: Duration) {
        self.samples.push(sample);
    }

    #[must_use]
    pub fn reps(&self) -> usize {
        self.samples.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    #[must_use]
    pub fn total(&self) -> Duration {
        self.samples.iter().sum()
    }

    #[must_use]
    pub fn min(&self) -> Duration {
        self.samples.iter().min().copied().unwrap_or_default()
    }

    #[must_use]
    pub fn max(&self) -> Duration {
        self.samples.iter().max().copied().unwrap_or_default()
    }

    #[must_use]
    pub fn avg(&self) -> Duration {
        match u32::try_from(self.samples.len()) {
            Ok(0) | Err(_) => Duration::ZERO,
            Ok(count) => self.total() / count,
        }
    }

    #[must_use]
    pub fn summary(&self) -> Summary {
        Summary {
            reps: self.reps(),
            min: self.min(),
            max: self.max(),
            avg: self.avg(),
            total: self.total(),
        }
    }

    /// Throughput derived from the average repetition time.
    #[must_use]
    pub fn rates(&self, bytes_per_rep: u64, flops_per_rep: u64) -> Rates {
        let secs = self.avg().as_secs_f64();
        if secs <= 0.0 {
            return Rates::default();
        }
        Rates {
            bandwidth_gib_per_sec: bytes_per_rep as f64 / secs / f64::from(1u32 << 30),
            gflops: flops_per_rep as f64 / secs / 1e9,
        }
    }
}

impl std::ops::AddAssign for Measurement {
    fn add_assign(&mut self, other: Self) {
        self.samples.extend(other.samples);
    }
}

#[derive(Clone, Copy, Default, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Summary {
    pub reps: usize,
    pub min: Duration,
    pub max: Duration,
    pub avg: Duration,
    pub total: Duration,
}

impl std::fmt::Display for Summary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "reps={} min={:?} max={:?} avg={:?} total={:?}",
            self.reps, self.min, self.max, self.avg, self.total
        )
    }
}

#[derive(Clone, Copy, Default, Debug, PartialEq, Serialize, Deserialize)]
pub struct Rates {
    pub bandwidth_gib_per_sec: f64,
    pub gflops: f64,
}
