//! Core library for the JumpBeat client.
//!
//! The client samples an accelerometer, keeps a rolling window of readings,
//! uploads each window to an inference service and folds the service's
//! answers (jump cadence, a matching track, its cover art) into local
//! playback and display state. [`Engine`] owns all mutable state behind a
//! single actor task; everything else in the crate is a building block it
//! drives.

pub mod analysis;
pub mod audio;
pub mod buffer;
pub mod config;
pub mod engine;
pub mod error;
pub mod motion;
pub mod protocol;
pub mod reconcile;
pub mod timeline;
pub mod transport;

pub use analysis::JumpDetector;
pub use audio::{AudioSink, PlaybackController, PlaybackState, TracingSink};
pub use buffer::{Sample, SampleBuffer, TelemetryBatch, TelemetryPoint};
pub use config::{
    AppConfig, MotionConfig, NetworkConfig, PlaybackConfig, ReconcileConfig, ResponseOrdering,
    WindowConfig, DEFAULT_PLACEHOLDER, MAX_SAMPLE_RATE_HZ,
};
pub use engine::{Engine, EngineHandle, EngineSnapshot};
pub use error::{JumpBeatError, Result};
pub use motion::{Acceleration, MotionDelivery, MotionSourceError, SyntheticMotion};
pub use protocol::{ResourceResolver, ServerUpdate, POLL_PATH, UPLOAD_PATH};
pub use reconcile::{
    Changes, CoverRequest, DisplayState, ReconcileOutcome, Reconciler, RequestOrigin,
    TaggedResponse,
};
pub use timeline::{EngineClock, RequestSequencer};
pub use transport::{HttpTransport, InferenceTransport, OfflineTransport};
