use stats::Measurement;
use std::time::{Duration, Instant};

/// Stopwatch collecting one sample per timed interval.
#[derive(Debug, Default)]
pub struct Timer {
    started: Option<Instant>,
    measurement: Measurement,
}

impl Timer {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn start(&mut self) {
        self.started = Some(Instant::now());
    }

    /// Stop the running interval and record its sample.
    ///
    /// Returns `None` if the timer was not started.
    pub fn stop(&mut self) -> Option<Duration> {
        let elapsed = self.started.take()?.elapsed();
        self.measurement.push(elapsed);
        Some(elapsed)
    }

    #[must_use]
    pub fn is_running(&self) -> bool {
        self.started.is_some()
    }

    pub fn time<R>(&mut self, f: impl FnOnce() -> R) -> R {
        self.start();
        let result = f();
        self.stop();
        result
    }

    #[must_use]
    pub fn measurement(&self) -> &Measurement {
        &self.measurement
    }

    #[must_use]
    pub fn into_measurement(self) -> Measurement {
        self.measurement
    }
}
