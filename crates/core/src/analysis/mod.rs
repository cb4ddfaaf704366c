use std::time::Duration;

use crate::TelemetryBatch;

const DEFAULT_THRESHOLD: f64 = 0.0;
const DEFAULT_MIN_INTERVAL: usize = 1;

/// Counts jumps in a window of vertical acceleration.
///
/// A jump is an upward crossing of `threshold` on the z axis. Crossings
/// closer than `min_interval` samples to the previous one are ignored.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct JumpDetector {
    pub threshold: f64,
    pub min_interval: usize,
}

impl Default for JumpDetector {
    fn default() -> Self {
        Self {
            threshold: DEFAULT_THRESHOLD,
            min_interval: DEFAULT_MIN_INTERVAL,
        }
    }
}

impl JumpDetector {
    pub fn new(threshold: f64, min_interval: usize) -> Self {
        Self {
            threshold,
            min_interval: min_interval.max(1),
        }
    }

    /// Returns the sample indices at which a jump was detected.
    pub fn detect(&self, z: &[f64]) -> Vec<usize> {
        let mut jumps = Vec::new();
        let mut last_jump: Option<usize> = None;

        for index in 1..z.len() {
            let crossed = z[index - 1] < self.threshold && self.threshold <= z[index];
            let spaced = last_jump
                .map(|last| index - last >= self.min_interval)
                .unwrap_or(true);
            if crossed && spaced {
                jumps.push(index);
                last_jump = Some(index);
            }
        }

        jumps
    }

    pub fn count(&self, batch: &TelemetryBatch) -> usize {
        let z: Vec<f64> = batch.points().iter().map(|point| point.z).collect();
        self.detect(&z).len()
    }

    /// Cadence over a batch that covers `span` of wall time.
    pub fn jumps_per_minute(&self, batch: &TelemetryBatch, span: Duration) -> f64 {
        if batch.is_empty() || span.is_zero() {
            return 0.0;
        }
        self.count(batch) as f64 / span.as_secs_f64() * 60.0
    }
}
