//! Wire format of the inference service.

use reqwest::Url;
use serde::{Deserialize, Deserializer, Serialize};

use crate::{JumpBeatError, Result};

pub const UPLOAD_PATH: &str = "process";
pub const POLL_PATH: &str = "get_jpm";

/// One decoded answer from either the upload or the poll endpoint.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerUpdate {
    #[serde(rename = "jumps_per_minute", deserialize_with = "tempo_from_number")]
    pub tempo: u32,
    #[serde(
        rename = "song_path",
        default,
        deserialize_with = "non_empty",
        skip_serializing_if = "Option::is_none"
    )]
    pub track_path: Option<String>,
    #[serde(
        rename = "song_name",
        default,
        deserialize_with = "non_empty",
        skip_serializing_if = "Option::is_none"
    )]
    pub track_name: Option<String>,
    #[serde(
        rename = "song_artist",
        default,
        deserialize_with = "non_empty",
        skip_serializing_if = "Option::is_none"
    )]
    pub track_artist: Option<String>,
    #[serde(
        rename = "song_cover_path",
        default,
        deserialize_with = "non_empty",
        skip_serializing_if = "Option::is_none"
    )]
    pub cover_path: Option<String>,
}

impl ServerUpdate {
    pub fn with_tempo(tempo: u32) -> Self {
        Self {
            tempo,
            ..Default::default()
        }
    }

    /// Decodes a response body. Any shape mismatch fails the whole update.
    pub fn from_slice(body: &[u8]) -> Result<Self> {
        Ok(serde_json::from_slice(body)?)
    }
}

/// The server computes cadence as a float; the display shows whole jumps.
fn tempo_from_number<'de, D>(deserializer: D) -> std::result::Result<u32, D::Error>
where
    D: Deserializer<'de>,
{
    let value = f64::deserialize(deserializer)?;
    if !value.is_finite() || value < 0.0 || value > f64::from(u32::MAX) {
        return Err(serde::de::Error::custom(format!(
            "jumps_per_minute out of range: {value}"
        )));
    }
    Ok(value.round() as u32)
}

fn non_empty<'de, D>(deserializer: D) -> std::result::Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<String>::deserialize(deserializer)?;
    Ok(value.filter(|s| !s.trim().is_empty()))
}

/// Turns server-relative track and cover paths into absolute URLs.
#[derive(Debug, Clone)]
pub struct ResourceResolver {
    base: Url,
}

impl ResourceResolver {
    pub fn new(mut base: Url) -> Self {
        // `join` replaces the last segment unless the base is a directory.
        if !base.path().ends_with('/') {
            let path = format!("{}/", base.path());
            base.set_path(&path);
        }
        Self { base }
    }

    /// Absolute URLs are kept as is, anything else is joined onto the base.
    pub fn resolve(&self, path: &str) -> Result<Url> {
        let resolved = match Url::parse(path) {
            Ok(url) => url,
            Err(_) => self
                .base
                .join(path)
                .map_err(|_| JumpBeatError::InvalidResource(path.to_string()))?,
        };

        match resolved.scheme() {
            "http" | "https" | "file" => Ok(resolved),
            _ => Err(JumpBeatError::InvalidResource(path.to_string())),
        }
    }

    pub fn endpoint(&self, name: &str) -> Result<Url> {
        self.resolve(name)
    }
}
