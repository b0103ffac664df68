//! Playback backend contract
//!
//! A backend owns one audio sink. The pipeline drives it with synchronous
//! commands and hears back through [`BackendEvent`]s sent on an mpsc channel
//! handed to the backend at construction time.
//!
//! Every load is stamped with a [`SinkTicket`]. Backends echo the ticket of
//! the load an event belongs to, so the controller can drop events from a
//! sink that has since been cleared or reloaded.

pub mod device;

use crate::error::Result;
use crate::pipeline::transcode::LocalResource;
use cadence_common::BackendKind;
use std::fmt;

pub use device::{DeviceBackend, SourceFetcher};

/// Identifies one attachment of a sink
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SinkTicket {
    pub kind: BackendKind,
    /// Strictly increasing across all attachments of one selector
    pub generation: u64,
}

impl fmt::Display for SinkTicket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.kind, self.generation)
    }
}

/// What a sink should play
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourceDescriptor {
    /// Direct remote URL, played by the native backend
    Remote(String),
    /// Transcoded temp file, reachable only through the local resource scheme
    Local(LocalResource),
}

impl SourceDescriptor {
    /// Backend kind that plays this source
    pub fn kind(&self) -> BackendKind {
        match self {
            SourceDescriptor::Remote(_) => BackendKind::Native,
            SourceDescriptor::Local(_) => BackendKind::Transcoded,
        }
    }
}

impl fmt::Display for SourceDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SourceDescriptor::Remote(url) => f.write_str(url),
            SourceDescriptor::Local(resource) => f.write_str(resource.as_str()),
        }
    }
}

/// Media error categories reported by a sink
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaErrorCode {
    /// Source could not be fetched
    Network,
    /// Source fetched but the stream is corrupt or undecodable
    Decode,
    /// Container or codec not supported by this backend
    SrcNotSupported,
}

impl MediaErrorCode {
    /// Errors that a transcoded copy is expected to fix
    pub fn is_format_error(self) -> bool {
        matches!(self, MediaErrorCode::Decode | MediaErrorCode::SrcNotSupported)
    }
}

/// Signals a sink raises about its current load
#[derive(Debug, Clone, PartialEq)]
pub enum BackendSignal {
    /// Enough data is loaded to start playback and to seek
    Ready,
    MetadataLoaded { duration_secs: f64 },
    /// Playback position in seconds
    TimeUpdate(f64),
    /// Sink paused. Emitted once per `pause()` call and once for every pause
    /// the environment forces on the sink (device removed, stream error).
    Paused,
    /// Natural end of the source
    Ended,
    Error(MediaErrorCode),
}

/// A signal tagged with the load it belongs to
#[derive(Debug, Clone, PartialEq)]
pub struct BackendEvent {
    pub ticket: SinkTicket,
    pub signal: BackendSignal,
}

/// One audio sink
///
/// Commands are fire-and-forget; their effects are observed through events.
pub trait AudioBackend: Send {
    /// Replace the current source. Failures that only show up while fetching
    /// or decoding are reported as [`BackendSignal::Error`].
    fn load(&mut self, source: &SourceDescriptor, ticket: SinkTicket) -> Result<()>;

    /// Stop output and forget the current source
    fn clear(&mut self);

    fn play(&mut self);

    fn pause(&mut self);

    /// Jump to `position_secs`
    fn seek(&mut self, position_secs: f64);

    /// Output gain, 0.0-1.0
    fn set_volume(&mut self, volume: f32);

    fn volume(&self) -> f32;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_source_kind() {
        assert_eq!(
            SourceDescriptor::Remote("https://cdn/x.mp3".to_string()).kind(),
            BackendKind::Native
        );
    }

    #[test]
    fn test_format_errors() {
        assert!(MediaErrorCode::SrcNotSupported.is_format_error());
        assert!(MediaErrorCode::Decode.is_format_error());
        assert!(!MediaErrorCode::Network.is_format_error());
    }

    #[test]
    fn test_ticket_display() {
        let ticket = SinkTicket {
            kind: BackendKind::Transcoded,
            generation: 4,
        };
        assert_eq!(ticket.to_string(), "transcoded#4");
    }
}
