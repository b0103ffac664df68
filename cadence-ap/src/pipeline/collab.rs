//! Collaborators the pipeline consumes
//!
//! Everything outside the playback core is reached through these traits: URL
//! resolution, the transcoder process, codec probing, playlist order, lyrics
//! files and the metadata cache. Production implementations live next to the traits (simple
//! ones) or in `pipeline::transcode` (ffmpeg/ffprobe); tests inject fakes.

use crate::error::{Error, Result};
use async_trait::async_trait;
use cadence_common::{PlaybackMode, Track, TrackId};
use std::path::{Path, PathBuf};
use tokio::sync::mpsc;
use tracing::{debug, info};

/// Produces a short-lived playable URL for a track
///
/// Called again for every playback attempt; results are never cached.
#[async_trait]
pub trait RemoteResolver: Send + Sync {
    /// `Ok(None)` when the track has no playable URL
    async fn playable_url(&self, track: &Track) -> Result<Option<String>>;
}

/// Best-effort codec detection, used for diagnostics only
#[async_trait]
pub trait CodecProber: Send + Sync {
    async fn probe(&self, url: &str) -> Option<String>;
}

/// One conversion request handed to the transcoder
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TranscodeRequest {
    pub source_url: String,
    /// Track id the job was started for; echoed on every event
    pub correlation_id: TrackId,
    /// Where the converted file must be written
    pub output_path: PathBuf,
}

/// Event streamed back by a transcoder
#[derive(Debug, Clone, PartialEq)]
pub enum ExecutorEvent {
    Progress {
        correlation_id: TrackId,
        percent: f32,
    },
    /// Exactly one per request: output path on success, reason on failure
    Terminal {
        correlation_id: TrackId,
        outcome: std::result::Result<PathBuf, String>,
    },
}

/// Channel a transcoder reports on
pub type ExecutorEvents = mpsc::UnboundedSender<ExecutorEvent>;

/// Out-of-process converter
pub trait TranscodeExecutor: Send + Sync {
    /// Start a conversion and return immediately.
    ///
    /// `Err` means the job could not be launched at all; no event is sent in
    /// that case. Once `Ok` is returned the executor sends zero or more
    /// progress events followed by exactly one terminal event.
    fn spawn(&self, request: TranscodeRequest, events: ExecutorEvents) -> Result<()>;
}

/// Decides which track comes next
pub trait PlaylistOrder: Send {
    /// Track after `current` under `mode`; first track when `current` is None
    fn next(&mut self, current: Option<&TrackId>, mode: PlaybackMode) -> Option<Track>;

    fn previous(&mut self, current: Option<&TrackId>, mode: PlaybackMode) -> Option<Track>;

    /// Replace the whole list
    fn set_tracks(&mut self, tracks: Vec<Track>);

    /// Called whenever a track session starts
    fn record_played(&mut self, _track: &Track) {}

    /// Called when playback learns how long a listed track is
    fn record_duration(&mut self, _track_id: &TrackId, _seconds: f64) {}
}

/// Supplies the raw LRC text for a track
#[async_trait]
pub trait LyricsSource: Send + Sync {
    /// `Ok(None)` when the track has no lyrics
    async fn lyrics(&self, track: &Track) -> Result<Option<String>>;
}

/// Receives durations learned during playback
pub trait MetadataSink: Send + Sync {
    fn report_duration(&self, track_id: &TrackId, seconds: f64);
}

/// Resolver for tracks whose location already is a URL or a local path
///
/// `http(s)://` and `file://` locations pass through unchanged; an existing
/// local path becomes a `file://` URL; a missing path has no playable URL.
#[derive(Debug, Clone, Default)]
pub struct DirectResolver;

#[async_trait]
impl RemoteResolver for DirectResolver {
    async fn playable_url(&self, track: &Track) -> Result<Option<String>> {
        let location = track.location.trim();
        if location.is_empty() {
            return Ok(None);
        }

        let lower = location.to_ascii_lowercase();
        if lower.starts_with("http://") || lower.starts_with("https://") || lower.starts_with("file://")
        {
            return Ok(Some(location.to_string()));
        }

        match tokio::fs::canonicalize(location).await {
            Ok(path) => Ok(Some(format!("file://{}", path.display()))),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(track_id = %track.id, location, "Local track not found");
                Ok(None)
            }
            Err(e) => Err(Error::Resolve(format!("{}: {}", location, e))),
        }
    }
}

/// Reads `<name>.lrc` next to a local track
///
/// Remote locations have no sibling file and yield no lyrics.
#[derive(Debug, Clone, Default)]
pub struct SiblingLrcSource;

impl SiblingLrcSource {
    fn lrc_path(location: &str) -> Option<PathBuf> {
        let location = location.trim();
        let lower = location.to_ascii_lowercase();
        if lower.starts_with("http://") || lower.starts_with("https://") {
            return None;
        }
        let path = location.strip_prefix("file://").unwrap_or(location);
        if path.is_empty() {
            return None;
        }
        Some(Path::new(path).with_extension("lrc"))
    }
}

#[async_trait]
impl LyricsSource for SiblingLrcSource {
    async fn lyrics(&self, track: &Track) -> Result<Option<String>> {
        let Some(path) = Self::lrc_path(&track.location) else {
            return Ok(None);
        };
        match tokio::fs::read_to_string(&path).await {
            Ok(text) => Ok(Some(text)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(track_id = %track.id, path = %path.display(), "No lyrics file");
                Ok(None)
            }
            Err(e) => Err(e.into()),
        }
    }
}

/// Metadata sink that only logs
#[derive(Debug, Clone, Default)]
pub struct LoggingMetadataSink;

impl MetadataSink for LoggingMetadataSink {
    fn report_duration(&self, track_id: &TrackId, seconds: f64) {
        info!(
            track_id = %track_id,
            duration = %cadence_common::human_time::format_track_time(seconds),
            "Track duration known"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_direct_resolver_passes_urls_through() {
        let track = Track::new("1", "a.mp3", 0, "https://cdn.example/a.mp3?sig=1");
        let url = DirectResolver.playable_url(&track).await.unwrap();
        assert_eq!(url.as_deref(), Some("https://cdn.example/a.mp3?sig=1"));
    }

    #[tokio::test]
    async fn test_direct_resolver_local_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("song.flac");
        std::fs::write(&path, b"fLaC").unwrap();

        let track = Track::new("2", "song.flac", 4, path.to_string_lossy());
        let url = DirectResolver.playable_url(&track).await.unwrap().unwrap();
        assert!(url.starts_with("file://"));
        assert!(url.ends_with("song.flac"));
    }

    #[tokio::test]
    async fn test_sibling_lrc_found() {
        let dir = tempfile::tempdir().unwrap();
        let song = dir.path().join("night.flac");
        std::fs::write(&song, b"fLaC").unwrap();
        std::fs::write(dir.path().join("night.lrc"), "[00:01.00]hello").unwrap();

        let track = Track::new("4", "night.flac", 4, format!("file://{}", song.display()));
        let text = SiblingLrcSource.lyrics(&track).await.unwrap();
        assert_eq!(text.as_deref(), Some("[00:01.00]hello"));
    }

    #[tokio::test]
    async fn test_sibling_lrc_absent() {
        let dir = tempfile::tempdir().unwrap();
        let song = dir.path().join("quiet.mp3");
        let local = Track::new("5", "quiet.mp3", 0, song.to_string_lossy());
        assert_eq!(SiblingLrcSource.lyrics(&local).await.unwrap(), None);

        let remote = Track::new("6", "a.mp3", 0, "https://cdn.example/a.mp3");
        assert_eq!(SiblingLrcSource.lyrics(&remote).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_direct_resolver_missing_path() {
        let track = Track::new("3", "gone.mp3", 0, "/definitely/not/here/gone.mp3");
        assert_eq!(DirectResolver.playable_url(&track).await.unwrap(), None);
    }
}
