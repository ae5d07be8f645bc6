use super::model::Real;
use std::sync::atomic::{AtomicU64, Ordering};

/// Atomic floating point value.
///
/// Stored as raw bits, additions use a compare-and-swap loop.
#[derive(Debug, Default)]
pub struct AtomicReal(AtomicU64);

impl AtomicReal {
    #[must_use]
    pub fn new(value: Real) -> Self {
        Self(AtomicU64::new(value.to_bits()))
    }

    #[must_use]
    pub fn load(&self) -> Real {
        Real::from_bits(self.0.load(Ordering::Acquire))
    }

    pub fn store(&self, value: Real) {
        self.0.store(value.to_bits(), Ordering::Release);
    }

    /// Atomically add `value`, returning the previous value.
    pub fn fetch_add(&self, value: Real) -> Real {
        let mut current = self.0.load(Ordering::Relaxed);
        loop {
            let new = (Real::from_bits(current) + value).to_bits();
            match self
                .0
                .compare_exchange_weak(current, new, Ordering::AcqRel, Ordering::Relaxed)
            {
                Ok(previous) => return Real::from_bits(previous),
                Err(actual) => current = actual,
            }
        }
    }

    #[must_use]
    pub fn into_inner(self) -> Real {
        Real::from_bits(self.0.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::AtomicReal;

    #[test]
    fn test_fetch_add() {
        let value = AtomicReal::new(1.5);
        assert_eq!(value.fetch_add(2.0), 1.5);
        assert_eq!(value.load(), 3.5);
        value.store(-1.0);
        assert_eq!(value.into_inner(), -1.0);
    }

    #[test]
    fn test_concurrent_fetch_add() {
        let value = std::sync::Arc::new(AtomicReal::new(0.0));
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let value = value.clone();
                std::thread::spawn(move || {
                    for _ in 0..1000 {
                        value.fetch_add(1.0);
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(value.load(), 4000.0);
    }
}
