//! Order-fixed checksums of output buffers.

use crate::record::Verdict;
use exec::Real;

pub const DEFAULT_TOLERANCE: Real = 1e-10;

/// Values that can be reduced into a checksum.
pub trait AsReal: Copy {
    fn as_real(self) -> Real;
}

macro_rules! impl_as_real {
    ($($ty:ty),*) => {
        $(
            impl AsReal for $ty {
                #[allow(clippy::cast_lossless)]
                fn as_real(self) -> Real {
                    self as Real
                }
            }
        )*
    };
}

impl_as_real!(f32, f64, i32, i64, u32, u64, usize);

/// Index weighted sum in strict left-to-right order.
///
/// Element `i` contributes `(i + 1) * value`, summed with compensated
/// (Neumaier) summation.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ChecksumAccumulator {
    sum: Real,
    compensation: Real,
    count: u64,
    scale: Real,
}

impl Default for ChecksumAccumulator {
    fn default() -> Self {
        Self::new(1.0)
    }
}

impl ChecksumAccumulator {
    #[must_use]
    pub fn new(scale: Real) -> Self {
        Self {
            sum: 0.0,
            compensation: 0.0,
            count: 0,
            scale,
        }
    }

    pub fn add(&mut self, value: Real) {
        let weighted = (self.count + 1) as Real * value;
        let sum = self.sum + weighted;
        if self.sum.abs() >= weighted.abs() {
            self.compensation += (self.sum - sum) + weighted;
        } else {
            self.compensation += (weighted - sum) + self.sum;
        }
        self.sum = sum;
        self.count += 1;
    }

    pub fn extend<T: AsReal>(&mut self, values: &[T]) {
        for value in values {
            self.add(value.as_real());
        }
    }

    #[must_use]
    pub fn count(&self) -> u64 {
        self.count
    }

    #[must_use]
    pub fn finish(&self) -> Real {
        (self.sum + self.compensation) * self.scale
    }
}

/// Checksum of `values` scaled by `scale`.
#[must_use]
pub fn checksum<T: AsReal>(values: &[T], scale: Real) -> Real {
    let mut acc = ChecksumAccumulator::new(scale);
    acc.extend(values);
    acc.finish()
}

#[must_use]
pub fn relative_error(value: Real, reference: Real) -> Real {
    let diff = (value - reference).abs();
    if reference == 0.0 {
        diff
    } else {
        diff / reference.abs()
    }
}

/// Compare a checksum against the reference checksum.
#[must_use]
pub fn verify(value: Real, reference: Real, tolerance: Real) -> Verdict {
    let relative_error = relative_error(value, reference);
    if relative_error <= tolerance {
        Verdict::Passed
    } else {
        Verdict::Failed { relative_error }
    }
}

#[cfg(test)]
mod tests {
    use super::{checksum, relative_error, verify, ChecksumAccumulator};
    use crate::record::Verdict;
    use exec::Real;

    #[test]
    fn test_weighted_by_index() {
        // 1*1 + 2*2 + 3*3
        assert_eq!(checksum(&[1.0, 2.0, 3.0], 1.0), 14.0);
        assert_eq!(checksum(&[1u32, 2, 3], 0.5), 7.0);
        assert_eq!(checksum::<f64>(&[], 1.0), 0.0);
    }

    #[test]
    fn test_chunked_accumulation_is_identical() {
        let values: Vec<f64> = (0..1000).map(|i| (f64::from(i) * 0.37).sin()).collect();
        let mut chunked = ChecksumAccumulator::new(2.0);
        for chunk in values.chunks(7) {
            chunked.extend(chunk);
        }
        assert_eq!(chunked.count(), 1000);
        assert_eq!(chunked.finish(), checksum(&values, 2.0));
    }

    #[test]
    fn test_compensated_sum() {
        // weighted: 1e16 + 1 + 0 - 1e16, the 1 is lost by naive summation
        let mut acc = ChecksumAccumulator::new(1.0);
        acc.extend(&[1e16, 0.5, 0.0, -2.5e15]);
        assert_eq!(acc.finish(), 1.0);
    }

    #[test]
    fn test_verify() {
        assert_eq!(verify(1.0, 1.0, 1e-10), Verdict::Passed);
        assert_eq!(verify(0.0, 0.0, 1e-10), Verdict::Passed);
        assert!(matches!(
            verify(1.1, 1.0, 1e-10),
            Verdict::Failed { relative_error } if (relative_error - 0.1).abs() < 1e-12
        ));
        assert!(matches!(verify(Real::NAN, 1.0, 1e-10), Verdict::Failed { .. }));
        approx::assert_abs_diff_eq!(relative_error(3.0, -2.0), 2.5);
    }
}
