use crate::kernel::Complexity;
use exec::Real;
use serde::{Deserialize, Serialize};
use stats::{Measurement, MemoryFootprint};

/// Correctness verdict of a run.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum Verdict {
    /// The run others are compared against.
    Reference,
    Passed,
    Failed { relative_error: Real },
    /// No reference or no checksum to compare.
    Unverified,
    /// Not run because of an earlier fatal error of the same kernel.
    Skipped,
    /// The variant does not exist for the kernel.
    Unsupported,
}

impl Verdict {
    fn severity(&self) -> u8 {
        match self {
            Self::Reference | Self::Passed => 0,
            Self::Unverified => 1,
            Self::Unsupported => 2,
            Self::Skipped => 3,
            Self::Failed { .. } => 4,
        }
    }

    #[must_use]
    pub fn is_failure(&self) -> bool {
        matches!(self, Self::Failed { .. })
    }
}

impl std::fmt::Display for Verdict {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Failed { relative_error } => {
                write!(f, "Failed (relative error {relative_error:e})")
            }
            other => write!(f, "{other:?}"),
        }
    }
}

/// Result of one (kernel, variant, tuning) combination.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunRecord {
    pub kernel: String,
    pub variant: String,
    pub tuning_index: Option<usize>,
    pub tuning: Option<String>,
    pub problem_size: usize,
    pub reps: usize,
    pub measurement: Measurement,
    pub checksum: Option<Real>,
    pub verdict: Verdict,
    pub footprint: MemoryFootprint,
    pub complexity: Complexity,
    pub failure: Option<String>,
}

impl RunRecord {
    /// Identifies the same combination across passes.
    #[must_use]
    pub fn key(&self) -> (String, String, Option<String>) {
        (self.kernel.clone(), self.variant.clone(), self.tuning.clone())
    }

    #[must_use]
    pub fn rates(&self) -> stats::Rates {
        self.measurement
            .rates(self.complexity.bytes_per_rep, self.complexity.flops_per_rep)
    }

    /// Merge the record of a later pass into this one.
    ///
    /// Samples and repetitions accumulate, the most severe verdict wins and
    /// the first failure is kept.
    pub fn merge(&mut self, other: Self) {
        self.reps += other.reps;
        self.measurement += other.measurement;
        self.footprint += other.footprint;
        if self.checksum.is_none() {
            self.checksum = other.checksum;
        }
        if other.verdict.severity() > self.verdict.severity() {
            self.verdict = other.verdict;
        }
        if self.failure.is_none() {
            self.failure = other.failure;
        }
    }
}

impl std::fmt::Display for RunRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} {} {} (size {}): {} [{}]",
            self.kernel,
            self.variant,
            self.tuning.as_deref().unwrap_or("-"),
            self.problem_size,
            self.measurement.summary(),
            self.verdict
        )?;
        if let Some(checksum) = self.checksum {
            write!(f, " checksum={checksum:.12e}")?;
        }
        if let Some(failure) = &self.failure {
            write!(f, " failure: {failure}")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::{RunRecord, Verdict};
    use crate::kernel::Complexity;
    use color_eyre::eyre;
    use stats::{Measurement, MemoryFootprint};
    use std::time::Duration;

    fn record(sample_ms: u64, verdict: Verdict) -> RunRecord {
        let mut measurement = Measurement::new();
        measurement.push(Duration::from_millis(sample_ms));
        RunRecord {
            kernel: "PI_REDUCE".to_string(),
            variant: "Base_GridA".to_string(),
            tuning_index: Some(0),
            tuning: Some("block_256".to_string()),
            problem_size: 1000,
            reps: 1,
            measurement,
            checksum: Some(3.14),
            verdict,
            footprint: MemoryFootprint::new(),
            complexity: Complexity::default(),
            failure: None,
        }
    }

    #[test]
    fn test_merge_passes() {
        let mut first = record(2, Verdict::Passed);
        first.merge(record(4, Verdict::Failed { relative_error: 0.5 }));
        first.merge(record(6, Verdict::Passed));
        assert_eq!(first.measurement.reps(), 3);
        assert_eq!(first.reps, first.measurement.reps());
        assert_eq!(first.measurement.avg(), Duration::from_millis(4));
        assert_eq!(first.verdict, Verdict::Failed { relative_error: 0.5 });
    }

    #[test]
    fn test_serialize_verdict() -> eyre::Result<()> {
        assert_eq!(serde_json::to_string(&Verdict::Skipped)?, r#""Skipped""#);
        assert_eq!(
            serde_json::to_string(&Verdict::Failed { relative_error: 0.25 })?,
            r#"{"Failed":{"relative_error":0.25}}"#
        );
        Ok(())
    }
}
