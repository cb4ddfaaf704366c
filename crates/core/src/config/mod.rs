use std::{path::Path, time::Duration};

use reqwest::Url;
use serde::{Deserialize, Serialize};

use crate::{JumpBeatError, Result};

/// Highest accepted accelerometer rate.
pub const MAX_SAMPLE_RATE_HZ: f64 = 1_000.0;

/// Item preloaded at start-up when the configuration names none. It carries
/// no audio.
pub const DEFAULT_PLACEHOLDER: &str = "about:blank";

/// Top-level configuration structure for the client.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub window: WindowConfig,
    pub network: NetworkConfig,
    pub motion: MotionConfig,
    pub reconcile: ReconcileConfig,
    pub playback: PlaybackConfig,
}

impl AppConfig {
    /// Reads a JSON configuration file. Missing sections fall back to their
    /// defaults.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let raw = std::fs::read(path.as_ref())?;
        let config: Self = serde_json::from_slice(&raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Configuration for running without an inference server.
    pub fn offline_defaults() -> Self {
        Self {
            network: NetworkConfig {
                poll_enabled: false,
                ..NetworkConfig::default()
            },
            ..Self::default()
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.window.duration_ms == 0 {
            return Err(JumpBeatError::config("window.duration_ms must be positive"));
        }
        if self.network.upload_period_ms == 0 {
            return Err(JumpBeatError::config(
                "network.upload_period_ms must be positive",
            ));
        }
        if self.network.poll_enabled && self.network.poll_period_ms == 0 {
            return Err(JumpBeatError::config(
                "network.poll_period_ms must be positive when polling is enabled",
            ));
        }
        self.motion.sample_interval()?;
        self.network.base_url()?;
        Ok(())
    }
}

/// Sliding window parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WindowConfig {
    pub duration_ms: u64,
    /// Empty the buffer after every upload instead of letting the window
    /// slide.
    pub clear_on_flush: bool,
}

impl WindowConfig {
    pub fn duration(&self) -> Duration {
        Duration::from_millis(self.duration_ms)
    }
}

impl Default for WindowConfig {
    fn default() -> Self {
        Self {
            duration_ms: 5_000,
            clear_on_flush: false,
        }
    }
}

/// Inference service endpoints and scheduler cadence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    pub base_url: String,
    pub upload_period_ms: u64,
    pub poll_period_ms: u64,
    pub poll_enabled: bool,
    pub request_timeout_ms: u64,
}

impl NetworkConfig {
    pub fn base_url(&self) -> Result<Url> {
        Url::parse(&self.base_url).map_err(|err| {
            JumpBeatError::config(format!("network.base_url `{}`: {err}", self.base_url))
        })
    }

    pub fn upload_period(&self) -> Duration {
        Duration::from_millis(self.upload_period_ms)
    }

    pub fn poll_period(&self) -> Duration {
        Duration::from_millis(self.poll_period_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}

impl Default for NetworkConfig {
    fn default() -> Self {
        let window = WindowConfig::default();
        Self {
            base_url: "http://127.0.0.1:5001".to_string(),
            upload_period_ms: window.duration_ms,
            poll_period_ms: window.duration_ms,
            poll_enabled: true,
            request_timeout_ms: 10_000,
        }
    }
}

/// Accelerometer sampling parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MotionConfig {
    pub sample_rate_hz: f64,
}

impl MotionConfig {
    /// Time between two readings. Rates outside `(0, MAX_SAMPLE_RATE_HZ]`
    /// are rejected.
    pub fn sample_interval(&self) -> Result<Duration> {
        let rate = self.sample_rate_hz;
        if !(rate > 0.0 && rate <= MAX_SAMPLE_RATE_HZ) {
            return Err(JumpBeatError::config(format!(
                "motion.sample_rate_hz must be in (0, {MAX_SAMPLE_RATE_HZ}], got {rate}"
            )));
        }
        Duration::try_from_secs_f64(1.0 / rate)
            .map_err(|err| JumpBeatError::config(format!("motion.sample_rate_hz {rate}: {err}")))
    }
}

impl Default for MotionConfig {
    fn default() -> Self {
        Self {
            sample_rate_hz: 60.0,
        }
    }
}

/// How responses that complete out of order are merged.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResponseOrdering {
    /// Drop responses to requests issued before the last applied one.
    #[default]
    LatestIssued,
    /// Apply whichever response completes last.
    LatestArrival,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconcileConfig {
    pub ordering: ResponseOrdering,
}

/// Audio output parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlaybackConfig {
    /// Audio item loaded during warm-up so the first real track starts
    /// without engine start-up latency.
    pub placeholder: String,
    pub start_muted: bool,
}

impl Default for PlaybackConfig {
    fn default() -> Self {
        Self {
            placeholder: DEFAULT_PLACEHOLDER.to_string(),
            start_muted: false,
        }
    }
}
