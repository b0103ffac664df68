//! Event types for the Cadence event system
//!
//! [`PlayerEvent`] is what the playback pipeline publishes to its observers
//! (UI, tray, lyrics display). Internal pipeline traffic (backend signals,
//! transcode progress relays) uses its own types and is converted to
//! `PlayerEvent` before broadcasting.

use crate::track::TrackId;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Which playback backend a sink belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    /// Platform decoding of the original remote stream
    Native,
    /// Playback of a locally re-encoded copy
    Transcoded,
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BackendKind::Native => write!(f, "native"),
            BackendKind::Transcoded => write!(f, "transcoded"),
        }
    }
}

/// Why the pipeline asked for the next track
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AdvanceReason {
    /// Natural end of the current track
    TrackEnded,
    /// Unrecoverable failure (no URL, transcode failed, ...)
    PlaybackFailed,
}

/// Cadence event types
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum PlayerEvent {
    /// A new track session started
    TrackLoaded {
        track_id: TrackId,
        filename: String,
    },

    /// A sink was attached for the current track
    BackendChanged {
        track_id: TrackId,
        backend: BackendKind,
    },

    /// Playback position moved (coalesced, seconds)
    PositionChanged {
        track_id: TrackId,
        position_secs: f64,
    },

    /// Track duration became known (seconds)
    DurationKnown {
        track_id: TrackId,
        duration_secs: f64,
    },

    /// Playing/paused flag changed
    PlayingChanged {
        playing: bool,
    },

    /// Output volume changed (0.0-1.0)
    VolumeChanged {
        volume: f32,
    },

    /// Output muted or unmuted; the volume is kept
    MuteChanged {
        muted: bool,
    },

    /// Playback moved onto another timed lyric line
    ///
    /// `index` is `None` before the first line starts.
    LyricLineChanged {
        track_id: TrackId,
        index: Option<usize>,
        text: Option<String>,
    },

    /// Transcode progress for the current track (0-99)
    TranscodeProgress {
        track_id: TrackId,
        percent: f32,
    },

    /// Current track reached its natural end
    TrackEnded {
        track_id: TrackId,
    },

    /// Current track could not be played
    TrackFailed {
        track_id: TrackId,
        reason: String,
    },

    /// Pipeline will move on to the next track after `delay_ms`
    AdvanceRequested {
        from: TrackId,
        reason: AdvanceReason,
        delay_ms: u64,
    },

    /// Nothing left to play
    Stopped,
}

impl PlayerEvent {
    /// Track the event refers to, if any
    pub fn track_id(&self) -> Option<&TrackId> {
        match self {
            PlayerEvent::TrackLoaded { track_id, .. }
            | PlayerEvent::BackendChanged { track_id, .. }
            | PlayerEvent::PositionChanged { track_id, .. }
            | PlayerEvent::DurationKnown { track_id, .. }
            | PlayerEvent::TranscodeProgress { track_id, .. }
            | PlayerEvent::TrackEnded { track_id }
            | PlayerEvent::TrackFailed { track_id, .. }
            | PlayerEvent::LyricLineChanged { track_id, .. } => Some(track_id),
            PlayerEvent::AdvanceRequested { from, .. } => Some(from),
            PlayerEvent::PlayingChanged { .. }
            | PlayerEvent::VolumeChanged { .. }
            | PlayerEvent::MuteChanged { .. }
            | PlayerEvent::Stopped => None,
        }
    }
}
