use std::{f64::consts::TAU, time::Duration};

use serde::{Deserialize, Serialize};

use crate::EngineHandle;

/// Raw acceleration reading in g.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Acceleration {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl Acceleration {
    pub fn new(x: f64, y: f64, z: f64) -> Self {
        Self { x, y, z }
    }
}

/// Failure reported by the sensor alongside a delivery.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("motion source error: {0}")]
pub struct MotionSourceError(pub String);

/// What an accelerometer callback hands to the engine. Errors and empty
/// deliveries are dropped.
pub type MotionDelivery = std::result::Result<Option<Acceleration>, MotionSourceError>;

/// Deterministic stand-in for a hardware accelerometer.
///
/// Produces a sinusoidal vertical signal with one upward zero crossing per
/// jump, at `cadence` jumps per minute, plus a constant lateral tilt.
#[derive(Debug, Clone)]
pub struct SyntheticMotion {
    cadence: f64,
    amplitude: f64,
    sample_interval: Duration,
    tick: u64,
}

impl SyntheticMotion {
    pub fn new(cadence: f64, sample_interval: Duration) -> Self {
        Self {
            cadence: cadence.max(0.0),
            amplitude: 1.2,
            sample_interval,
            tick: 0,
        }
    }

    /// Next reading, as if `sample_interval` elapsed since the previous one.
    pub fn next_reading(&mut self) -> Acceleration {
        let t = self.tick as f64 * self.sample_interval.as_secs_f64();
        self.tick += 1;

        let phase = TAU * (self.cadence / 60.0) * t;
        // Offset by a quarter sample so crossings never land exactly on zero.
        let z = self.amplitude * (phase - 0.25 * TAU * self.sample_interval.as_secs_f64()).sin();
        Acceleration::new(0.02, -0.05, z)
    }

    /// Feeds the engine at the configured rate until the engine stops.
    pub async fn drive(mut self, handle: EngineHandle) {
        // `interval` panics on a zero period.
        let period = self.sample_interval.max(Duration::from_micros(1));
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            ticker.tick().await;
            let reading = self.next_reading();
            if handle.record(Ok(Some(reading))).is_err() {
                tracing::debug!("engine stopped, synthetic motion source exiting");
                break;
            }
        }
    }
}

impl Iterator for SyntheticMotion {
    type Item = Acceleration;

    fn next(&mut self) -> Option<Self::Item> {
        Some(self.next_reading())
    }
}
