use serde::{Deserialize, Serialize};

use crate::Result;

/// Output backend driven by [`PlaybackController`]. The engine never reads
/// anything back from it.
pub trait AudioSink: Send + 'static {
    /// Loads an item without starting it.
    fn preload(&mut self, locator: &str) -> Result<()>;

    /// Replaces the current item and starts playing it immediately.
    fn load_and_play(&mut self, locator: &str) -> Result<()>;

    /// Silences or restores output without interrupting playback.
    fn set_muted(&mut self, muted: bool);
}

/// Sink that only logs what it was asked to do.
#[derive(Debug, Default)]
pub struct TracingSink {
    muted: bool,
}

impl AudioSink for TracingSink {
    fn preload(&mut self, locator: &str) -> Result<()> {
        tracing::debug!(locator, "preloading audio item");
        Ok(())
    }

    fn load_and_play(&mut self, locator: &str) -> Result<()> {
        tracing::info!(locator, muted = self.muted, "playing track");
        Ok(())
    }

    fn set_muted(&mut self, muted: bool) {
        self.muted = muted;
        tracing::info!(muted, "audio output muted state changed");
    }
}

/// Playback facts owned by the controller.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlaybackState {
    /// Server path of the loaded track. This is what new recommendations are
    /// compared against.
    pub current_track_path: Option<String>,
    pub is_muted: bool,
}

/// Sole writer of the audio resource.
#[derive(Debug)]
pub struct PlaybackController<S> {
    sink: S,
    state: PlaybackState,
    warmed_up: bool,
}

impl<S: AudioSink> PlaybackController<S> {
    pub fn new(sink: S) -> Self {
        Self {
            sink,
            state: PlaybackState::default(),
            warmed_up: false,
        }
    }

    /// Preloads a placeholder item so the backend is already running when
    /// the first real track arrives. Calling it again is a no-op.
    pub fn warm_up(&mut self, placeholder: &str) -> Result<()> {
        if self.warmed_up {
            return Ok(());
        }
        self.sink.preload(placeholder)?;
        self.warmed_up = true;
        Ok(())
    }

    pub fn is_warmed_up(&self) -> bool {
        self.warmed_up
    }

    pub fn state(&self) -> &PlaybackState {
        &self.state
    }

    pub fn current_track_path(&self) -> Option<&str> {
        self.state.current_track_path.as_deref()
    }

    /// Switches to `path`, played from `locator`. Returns `false` when `path`
    /// is already loaded. The current path is only updated when the sink
    /// accepted the new item.
    pub fn change_track(&mut self, path: &str, locator: &str) -> Result<bool> {
        if self.current_track_path() == Some(path) {
            return Ok(false);
        }

        self.sink.load_and_play(locator)?;
        self.state.current_track_path = Some(path.to_string());
        Ok(true)
    }

    pub fn set_muted(&mut self, muted: bool) {
        if self.state.is_muted == muted {
            return;
        }
        self.sink.set_muted(muted);
        self.state.is_muted = muted;
    }
}
