use std::time::Duration;

/// Running average of per-responsibility durations.
#[derive(Clone, Debug, Default)]
pub struct EtaEstimator {
    samples: u32,
    total: Duration,
}

impl EtaEstimator {
    pub fn record(&mut self, took: Duration) {
        self.samples += 1;
        self.total += took;
    }

    pub fn average(&self) -> Option<Duration> {
        if self.samples == 0 { return None; }
        Some(self.total / self.samples)
    }

    /// Estimate for `remaining` responsibilities, counting the one about to start.
    pub fn remaining_ms(&self, remaining: usize) -> Option<u64> {
        let avg = self.average()?;
        let ms = avg.as_millis().saturating_mul(remaining as u128);
        Some(u64::try_from(ms).unwrap_or(u64::MAX))
    }
}
