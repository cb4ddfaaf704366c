//! Merges inference responses into display and playback state.
//!
//! Every response goes through [`Reconciler::reconcile`], whichever
//! scheduler issued it. Each field of an update is applied independently:
//!
//! 1. tempo is always overwritten,
//! 2. the track changes only when the server path differs from the loaded one,
//! 3. name and artist are written only when they differ,
//! 4. a cover path starts an asynchronous fetch; its bytes land later via
//!    [`Reconciler::apply_cover`].
//!
//! A response that failed anywhere before decoding completed leaves all state
//! untouched.

use std::fmt;

use reqwest::Url;
use serde::{Deserialize, Serialize};

use crate::{
    AudioSink, PlaybackController, ResourceResolver, ResponseOrdering, Result, ServerUpdate,
};

/// What the UI layer reads.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DisplayState {
    pub tempo: u32,
    pub track_name: String,
    pub track_artist: String,
    /// Undecoded cover image bytes.
    #[serde(skip)]
    pub cover_image: Option<Vec<u8>>,
}

/// Which scheduler issued a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestOrigin {
    Upload,
    Poll,
}

impl fmt::Display for RequestOrigin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Upload => f.write_str("upload"),
            Self::Poll => f.write_str("poll"),
        }
    }
}

/// A completed request, tagged with the sequence number it was issued with.
#[derive(Debug)]
pub struct TaggedResponse {
    pub seq: u64,
    pub origin: RequestOrigin,
    pub outcome: Result<ServerUpdate>,
}

/// Cover fetch the caller has to perform.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CoverRequest {
    pub seq: u64,
    pub url: Url,
}

/// Field-level mutations caused by one applied update.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Changes {
    pub tempo: bool,
    pub track: bool,
    pub track_name: bool,
    pub track_artist: bool,
    pub cover_request: Option<CoverRequest>,
}

impl Changes {
    /// Whether anything the UI reads was mutated.
    pub fn display_changed(&self) -> bool {
        self.tempo || self.track_name || self.track_artist
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReconcileOutcome {
    Applied(Changes),
    /// Response to a request older than the last applied one.
    Stale { seq: u64, last_applied: u64 },
    /// Transport, status or decode failure.
    Rejected,
}

#[derive(Debug)]
pub struct Reconciler {
    ordering: ResponseOrdering,
    resolver: ResourceResolver,
    last_applied: Option<u64>,
    latest_cover: Option<u64>,
}

impl Reconciler {
    pub fn new(ordering: ResponseOrdering, resolver: ResourceResolver) -> Self {
        Self {
            ordering,
            resolver,
            last_applied: None,
            latest_cover: None,
        }
    }

    pub fn last_applied(&self) -> Option<u64> {
        self.last_applied
    }

    pub fn reconcile<S: AudioSink>(
        &mut self,
        response: TaggedResponse,
        playback: &mut PlaybackController<S>,
        display: &mut DisplayState,
    ) -> ReconcileOutcome {
        let TaggedResponse {
            seq,
            origin,
            outcome,
        } = response;

        let update = match outcome {
            Ok(update) => update,
            Err(err) => {
                tracing::warn!(seq, %origin, error = %err, "dropping failed response");
                return ReconcileOutcome::Rejected;
            }
        };

        if self.ordering == ResponseOrdering::LatestIssued {
            if let Some(last_applied) = self.last_applied.filter(|&last| seq <= last) {
                tracing::debug!(seq, last_applied, %origin, "discarding stale response");
                return ReconcileOutcome::Stale { seq, last_applied };
            }
        }
        self.last_applied = Some(seq);

        let mut changes = Changes {
            tempo: display.tempo != update.tempo,
            ..Changes::default()
        };
        display.tempo = update.tempo;

        if let Some(path) = update.track_path.as_deref() {
            changes.track = self.apply_track(path, playback);
        }

        if let Some(name) = update.track_name {
            if display.track_name != name {
                display.track_name = name;
                changes.track_name = true;
            }
        }

        if let Some(artist) = update.track_artist {
            if display.track_artist != artist {
                display.track_artist = artist;
                changes.track_artist = true;
            }
        }

        if let Some(path) = update.cover_path.as_deref() {
            match self.resolver.resolve(path) {
                Ok(url) => {
                    self.latest_cover = Some(seq);
                    changes.cover_request = Some(CoverRequest { seq, url });
                }
                Err(err) => tracing::warn!(seq, path, error = %err, "skipping cover update"),
            }
        }

        let tempo = display.tempo;
        tracing::debug!(seq, %origin, tempo, ?changes, "applied server update");
        ReconcileOutcome::Applied(changes)
    }

    /// Stores fetched cover bytes. Returns `true` if the displayed image
    /// changed. Failed or superseded fetches keep the previous image.
    pub fn apply_cover(
        &mut self,
        seq: u64,
        fetched: Result<Vec<u8>>,
        display: &mut DisplayState,
    ) -> bool {
        if self.latest_cover.is_some_and(|latest| seq < latest) {
            tracing::debug!(seq, "discarding superseded cover image");
            return false;
        }

        match fetched {
            Ok(bytes) if display.cover_image.as_deref() == Some(bytes.as_slice()) => false,
            Ok(bytes) => {
                tracing::debug!(seq, size = bytes.len(), "cover image replaced");
                display.cover_image = Some(bytes);
                true
            }
            Err(err) => {
                tracing::warn!(seq, error = %err, "cover fetch failed, keeping previous image");
                false
            }
        }
    }

    fn apply_track<S: AudioSink>(&self, path: &str, playback: &mut PlaybackController<S>) -> bool {
        if playback.current_track_path() == Some(path) {
            return false;
        }

        let locator = match self.resolver.resolve(path) {
            Ok(url) => url,
            Err(err) => {
                tracing::warn!(path, error = %err, "skipping track change");
                return false;
            }
        };

        match playback.change_track(path, locator.as_str()) {
            Ok(changed) => {
                if changed {
                    tracing::info!(path, "track changed");
                }
                changed
            }
            Err(err) => {
                tracing::warn!(path, error = %err, "audio sink rejected track");
                false
            }
        }
    }
}
