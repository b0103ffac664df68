//! Track model and playback modes
//!
//! A [`Track`] identifies one playable library entry. It never carries a
//! playable URL: remote URLs are short-lived and are resolved again for every
//! playback attempt.

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Stable unique identifier of a library entry
///
/// Also used as the correlation id for asynchronous transcode events.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TrackId(String);

impl TrackId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TrackId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for TrackId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl From<String> for TrackId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

/// A playable library entry
///
/// Immutable for the duration of one playback session; a track change
/// replaces the whole value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Track {
    /// Stable unique id
    pub id: TrackId,

    /// Display filename, used to infer container/codec
    pub filename: String,

    /// Size of the remote file in bytes (0 when unknown)
    #[serde(default)]
    pub size_bytes: u64,

    /// Library location handed to the remote resolver
    pub location: String,

    /// Length learned during playback, whole milliseconds
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,
}

impl Track {
    pub fn new(
        id: impl Into<TrackId>,
        filename: impl Into<String>,
        size_bytes: u64,
        location: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            filename: filename.into(),
            size_bytes,
            location: location.into(),
            duration_ms: None,
        }
    }

    pub fn duration_secs(&self) -> Option<f64> {
        self.duration_ms.map(|ms| ms as f64 / 1000.0)
    }

    /// Remember a reported duration; non-finite or non-positive values are ignored
    pub fn set_duration_secs(&mut self, seconds: f64) {
        if seconds.is_finite() && seconds > 0.0 {
            self.duration_ms = Some((seconds * 1000.0).round() as u64);
        }
    }

    /// Lowercased file extension of the display filename, if any
    pub fn extension(&self) -> Option<String> {
        extension_of(&self.filename)
    }
}

/// Lowercased extension of a filename (`"Song.APE"` -> `"ape"`)
///
/// Returns `None` for names without a dot or ending in a dot.
pub fn extension_of(filename: &str) -> Option<String> {
    let (_, ext) = filename.rsplit_once('.')?;
    if ext.is_empty() || ext.contains('/') || ext.contains('\\') {
        return None;
    }
    Some(ext.to_ascii_lowercase())
}

/// Rule used to pick the next track
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PlaybackMode {
    /// Play the list in order, wrapping at both ends
    #[default]
    Sequential,
    /// Pick a random track
    Shuffle,
    /// Repeat the current track
    RepeatOne,
}

impl fmt::Display for PlaybackMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PlaybackMode::Sequential => write!(f, "sequential"),
            PlaybackMode::Shuffle => write!(f, "shuffle"),
            PlaybackMode::RepeatOne => write!(f, "repeat-one"),
        }
    }
}

impl FromStr for PlaybackMode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "sequential" | "order" => Ok(PlaybackMode::Sequential),
            "shuffle" | "random" => Ok(PlaybackMode::Shuffle),
            "repeat-one" | "single" => Ok(PlaybackMode::RepeatOne),
            other => Err(Error::UnknownMode(other.to_string())),
        }
    }
}
