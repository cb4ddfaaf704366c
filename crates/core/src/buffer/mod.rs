use std::{collections::VecDeque, time::Duration};

use serde::{Deserialize, Serialize};

use crate::Acceleration;

/// A single accelerometer reading.
///
/// `captured_at` is measured on the engine's monotonic clock, as an offset
/// from the moment the engine started.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Sample {
    pub x: f64,
    pub y: f64,
    pub z: f64,
    pub captured_at: Duration,
}

impl Sample {
    pub fn new(acceleration: Acceleration, captured_at: Duration) -> Self {
        Self {
            x: acceleration.x,
            y: acceleration.y,
            z: acceleration.z,
            captured_at,
        }
    }
}

/// Wire projection of a [`Sample`]. Timestamps are not sent.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TelemetryPoint {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl From<&Sample> for TelemetryPoint {
    fn from(sample: &Sample) -> Self {
        Self {
            x: sample.x,
            y: sample.y,
            z: sample.z,
        }
    }
}

/// Serialised window, produced once per upload tick.
///
/// Serialises as a bare JSON array of `{x, y, z}` objects.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TelemetryBatch {
    points: Vec<TelemetryPoint>,
}

impl TelemetryBatch {
    pub fn new(points: Vec<TelemetryPoint>) -> Self {
        Self { points }
    }

    pub fn points(&self) -> &[TelemetryPoint] {
        &self.points
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }
}

/// Rolling, capture-time ordered window of motion samples.
///
/// A sample is evicted once it is `window` or more older than the newest
/// time the buffer has seen, so a 7.5 s window holding samples at
/// `0.0..=7.4` drops the `0.0` sample when a `7.5` sample arrives.
#[derive(Debug, Clone)]
pub struct SampleBuffer {
    window: Duration,
    samples: VecDeque<Sample>,
}

impl SampleBuffer {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            samples: VecDeque::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Inserts the sample in capture-time order and evicts everything that
    /// fell out of the window.
    pub fn append(&mut self, sample: Sample) {
        let newest = match self.samples.back().map(|last| last.captured_at) {
            Some(latest) if latest > sample.captured_at => {
                let index = self
                    .samples
                    .partition_point(|existing| existing.captured_at <= sample.captured_at);
                self.samples.insert(index, sample);
                latest
            }
            _ => {
                self.samples.push_back(sample);
                sample.captured_at
            }
        };

        self.evict(newest);
    }

    /// Removes every sample captured at or before `now - window`.
    pub fn evict(&mut self, now: Duration) {
        let Some(cutoff) = now.checked_sub(self.window) else {
            return;
        };

        while self
            .samples
            .front()
            .is_some_and(|oldest| oldest.captured_at <= cutoff)
        {
            self.samples.pop_front();
        }
    }

    /// Returns the current window without mutating it.
    pub fn snapshot(&self) -> Vec<Sample> {
        self.samples.iter().copied().collect()
    }

    /// Projects the current window into its wire form.
    pub fn to_batch(&self) -> TelemetryBatch {
        TelemetryBatch::new(self.samples.iter().map(TelemetryPoint::from).collect())
    }

    pub fn clear(&mut self) {
        self.samples.clear();
    }
}
