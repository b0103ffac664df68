//! Test helpers for cadence-ap pipeline integration tests
//!
//! Fakes for every collaborator of the playback controller plus a
//! [`Harness`] that wires them to a running [`PlayerHandle`].
//!
//! All tests using the harness run on a paused tokio clock; [`settle`] lets
//! the controller and its spawned tasks drain without real time passing.

#![allow(dead_code)]

use async_trait::async_trait;
use cadence_ap::backend::{AudioBackend, BackendEvent, BackendSignal, SinkTicket, SourceDescriptor};
use cadence_ap::config::PipelineConfig;
use cadence_ap::pipeline::transcode::TempFileRegistry;
use cadence_ap::pipeline::{
    Backends, CodecProber, Collaborators, ExecutorEvent, ExecutorEvents, LyricsSource,
    MetadataSink, Playlist, PlaylistOrder, PlayerStatus, RemoteResolver, TranscodeExecutor,
    TranscodeRequest,
};
use cadence_ap::{Error, PlayerHandle, Result};
use cadence_common::{BackendKind, PlaybackMode, PlayerEvent, Track, TrackId};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tokio::sync::{broadcast, mpsc};

/// Let spawned tasks run to quiescence (paused clock)
pub async fn settle() {
    for _ in 0..10 {
        tokio::time::sleep(Duration::from_millis(1)).await;
    }
}

pub fn track(id: &str, filename: &str) -> Track {
    Track::new(id, filename, 1_000_000, format!("library/{}", filename))
}

// ---------------------------------------------------------------------------
// Backends
// ---------------------------------------------------------------------------

/// Command received by a fake backend
#[derive(Debug, Clone, PartialEq)]
pub enum Call {
    Load { source: String, volume: f32 },
    Clear,
    Play,
    Pause,
    Seek(f64),
    SetVolume(f32),
}

/// Which sink holds a source, shared by both fakes
#[derive(Debug, Default)]
pub struct SinkBoard {
    pub sources: HashMap<BackendKind, String>,
    /// Loads that found the other sink still holding a source
    pub violations: Vec<String>,
}

/// Observable state of one fake backend
#[derive(Clone, Default)]
pub struct BackendLog {
    calls: Arc<Mutex<Vec<Call>>>,
    ticket: Arc<Mutex<Option<SinkTicket>>>,
    volume: Arc<Mutex<f32>>,
}

impl BackendLog {
    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().clone()
    }

    pub fn loads(&self) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                Call::Load { source, .. } => Some(source),
                _ => None,
            })
            .collect()
    }

    pub fn seeks(&self) -> Vec<f64> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                Call::Seek(position) => Some(position),
                _ => None,
            })
            .collect()
    }

    pub fn count(&self, wanted: &Call) -> usize {
        self.calls().iter().filter(|call| *call == wanted).count()
    }

    pub fn ticket(&self) -> Option<SinkTicket> {
        *self.ticket.lock()
    }

    pub fn volume(&self) -> f32 {
        *self.volume.lock()
    }
}

pub struct FakeBackend {
    kind: BackendKind,
    log: BackendLog,
    board: Arc<Mutex<SinkBoard>>,
    events: mpsc::UnboundedSender<BackendEvent>,
}

impl FakeBackend {
    pub fn new(
        kind: BackendKind,
        board: Arc<Mutex<SinkBoard>>,
        events: mpsc::UnboundedSender<BackendEvent>,
    ) -> (Self, BackendLog) {
        let log = BackendLog::default();
        *log.volume.lock() = 1.0;
        (
            Self {
                kind,
                log: log.clone(),
                board,
                events,
            },
            log,
        )
    }

    fn record(&self, call: Call) {
        self.log.calls.lock().push(call);
    }
}

impl AudioBackend for FakeBackend {
    fn load(&mut self, source: &SourceDescriptor, ticket: SinkTicket) -> Result<()> {
        let source = source.to_string();
        {
            let mut board = self.board.lock();
            let others: Vec<String> = board
                .sources
                .iter()
                .filter(|(kind, _)| **kind != self.kind)
                .map(|(kind, held)| format!("{} still holds {}", kind, held))
                .collect();
            board.violations.extend(others);
            board.sources.insert(self.kind, source.clone());
        }
        *self.log.ticket.lock() = Some(ticket);
        let volume = self.log.volume();
        self.record(Call::Load { source, volume });
        Ok(())
    }

    fn clear(&mut self) {
        self.board.lock().sources.remove(&self.kind);
        *self.log.ticket.lock() = None;
        self.record(Call::Clear);
    }

    fn play(&mut self) {
        self.record(Call::Play);
    }

    fn pause(&mut self) {
        self.record(Call::Pause);
        if let Some(ticket) = self.log.ticket() {
            let _ = self.events.send(BackendEvent {
                ticket,
                signal: BackendSignal::Paused,
            });
        }
    }

    fn seek(&mut self, position_secs: f64) {
        self.record(Call::Seek(position_secs));
    }

    fn set_volume(&mut self, volume: f32) {
        *self.log.volume.lock() = volume;
        self.record(Call::SetVolume(volume));
    }

    fn volume(&self) -> f32 {
        self.log.volume()
    }
}

// ---------------------------------------------------------------------------
// Collaborators
// ---------------------------------------------------------------------------

/// Resolves `library/<name>` to `https://cdn.test/<name>` unless overridden
#[derive(Clone, Default)]
pub struct FakeResolver {
    overrides: Arc<Mutex<HashMap<TrackId, Option<String>>>>,
    calls: Arc<Mutex<Vec<TrackId>>>,
}

impl FakeResolver {
    pub fn set(&self, id: &str, url: Option<&str>) {
        self.overrides
            .lock()
            .insert(TrackId::new(id), url.map(str::to_string));
    }

    pub fn calls(&self) -> Vec<TrackId> {
        self.calls.lock().clone()
    }
}

#[async_trait]
impl RemoteResolver for FakeResolver {
    async fn playable_url(&self, track: &Track) -> Result<Option<String>> {
        self.calls.lock().push(track.id.clone());
        if let Some(url) = self.overrides.lock().get(&track.id) {
            return Ok(url.clone());
        }
        Ok(Some(format!("https://cdn.test/{}", track.filename)))
    }
}

#[derive(Clone, Default)]
pub struct FakeProber {
    codec: Arc<Mutex<Option<String>>>,
    probed: Arc<Mutex<Vec<String>>>,
}

impl FakeProber {
    pub fn answer(&self, codec: &str) {
        *self.codec.lock() = Some(codec.to_string());
    }

    pub fn probed(&self) -> Vec<String> {
        self.probed.lock().clone()
    }
}

#[async_trait]
impl CodecProber for FakeProber {
    async fn probe(&self, url: &str) -> Option<String> {
        self.probed.lock().push(url.to_string());
        self.codec.lock().clone()
    }
}

/// Transcoder driven by the test
#[derive(Clone, Default)]
pub struct FakeExecutor {
    jobs: Arc<Mutex<Vec<(TranscodeRequest, ExecutorEvents)>>>,
    refuse: Arc<Mutex<bool>>,
}

impl FakeExecutor {
    /// Make every following launch fail
    pub fn refuse_launches(&self) {
        *self.refuse.lock() = true;
    }

    pub fn requests(&self) -> Vec<TranscodeRequest> {
        self.jobs.lock().iter().map(|(request, _)| request.clone()).collect()
    }

    pub fn launched(&self) -> usize {
        self.jobs.lock().len()
    }

    fn job(&self, index: usize) -> (TranscodeRequest, ExecutorEvents) {
        self.jobs.lock()[index].clone()
    }

    pub fn progress(&self, index: usize, percent: f32) {
        let (request, events) = self.job(index);
        let _ = events.send(ExecutorEvent::Progress {
            correlation_id: request.correlation_id,
            percent,
        });
    }

    /// Write the output file and report success
    pub fn complete(&self, index: usize) -> PathBuf {
        let (request, events) = self.job(index);
        std::fs::write(&request.output_path, b"RIFF....WAVE").unwrap();
        let _ = events.send(ExecutorEvent::Terminal {
            correlation_id: request.correlation_id,
            outcome: Ok(request.output_path.clone()),
        });
        request.output_path
    }

    pub fn fail(&self, index: usize, reason: &str) {
        let (request, events) = self.job(index);
        let _ = events.send(ExecutorEvent::Terminal {
            correlation_id: request.correlation_id,
            outcome: Err(reason.to_string()),
        });
    }

    /// Forget a job without a terminal event, as a crashed transcoder would
    pub fn vanish(&self, index: usize) {
        self.jobs.lock().remove(index);
    }
}

impl TranscodeExecutor for FakeExecutor {
    fn spawn(&self, request: TranscodeRequest, events: ExecutorEvents) -> Result<()> {
        if *self.refuse.lock() {
            return Err(Error::Transcode("transcoder not installed".to_string()));
        }
        self.jobs.lock().push((request, events));
        Ok(())
    }
}

#[derive(Clone, Default)]
pub struct RecordingMetadata {
    durations: Arc<Mutex<Vec<(TrackId, f64)>>>,
}

impl RecordingMetadata {
    pub fn durations(&self) -> Vec<(TrackId, f64)> {
        self.durations.lock().clone()
    }
}

impl MetadataSink for RecordingMetadata {
    fn report_duration(&self, track_id: &TrackId, seconds: f64) {
        self.durations.lock().push((track_id.clone(), seconds));
    }
}

/// LRC text per track id; other tracks have no lyrics
#[derive(Clone, Default)]
pub struct FakeLyrics {
    texts: Arc<Mutex<HashMap<TrackId, String>>>,
    requests: Arc<Mutex<Vec<TrackId>>>,
    delay: Arc<Mutex<Duration>>,
}

impl FakeLyrics {
    pub fn set(&self, id: &str, lrc: &str) {
        self.texts.lock().insert(TrackId::new(id), lrc.to_string());
    }

    /// Answer every following request only after `delay`
    pub fn slow(&self, delay: Duration) {
        *self.delay.lock() = delay;
    }

    pub fn requests(&self) -> Vec<TrackId> {
        self.requests.lock().clone()
    }
}

#[async_trait]
impl LyricsSource for FakeLyrics {
    async fn lyrics(&self, track: &Track) -> Result<Option<String>> {
        self.requests.lock().push(track.id.clone());
        let delay = *self.delay.lock();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        Ok(self.texts.lock().get(&track.id).cloned())
    }
}

/// Playlist the test can inspect while the controller owns it
#[derive(Clone, Default)]
pub struct SharedPlaylist(Arc<Mutex<Playlist>>);

impl SharedPlaylist {
    pub fn new(tracks: Vec<Track>) -> Self {
        Self(Arc::new(Mutex::new(Playlist::new(tracks))))
    }

    pub fn tracks(&self) -> Vec<Track> {
        self.0.lock().tracks().to_vec()
    }
}

impl PlaylistOrder for SharedPlaylist {
    fn next(&mut self, current: Option<&TrackId>, mode: PlaybackMode) -> Option<Track> {
        self.0.lock().next(current, mode)
    }

    fn previous(&mut self, current: Option<&TrackId>, mode: PlaybackMode) -> Option<Track> {
        self.0.lock().previous(current, mode)
    }

    fn set_tracks(&mut self, tracks: Vec<Track>) {
        self.0.lock().set_tracks(tracks);
    }

    fn record_played(&mut self, track: &Track) {
        self.0.lock().record_played(track);
    }

    fn record_duration(&mut self, track_id: &TrackId, seconds: f64) {
        self.0.lock().record_duration(track_id, seconds);
    }
}

// ---------------------------------------------------------------------------
// Harness
// ---------------------------------------------------------------------------

pub struct Harness {
    pub player: PlayerHandle,
    pub events: broadcast::Receiver<PlayerEvent>,
    pub native: BackendLog,
    pub transcoded: BackendLog,
    pub board: Arc<Mutex<SinkBoard>>,
    pub resolver: FakeResolver,
    pub prober: FakeProber,
    pub executor: FakeExecutor,
    pub metadata: RecordingMetadata,
    pub lyrics: FakeLyrics,
    pub playlist: SharedPlaylist,
    pub registry: TempFileRegistry,
    backend_tx: mpsc::UnboundedSender<BackendEvent>,
    _temp: TempDir,
}

impl Harness {
    /// Running controller with default timings. Must be called on a runtime.
    pub fn start(tracks: Vec<Track>) -> Self {
        Self::with_config(tracks, PipelineConfig::default())
    }

    pub fn with_config(tracks: Vec<Track>, config: PipelineConfig) -> Self {
        let temp = TempDir::new().unwrap();
        let registry = TempFileRegistry::new(temp.path(), "cadence-test");
        let board = Arc::new(Mutex::new(SinkBoard::default()));

        let (backend_tx, backend_rx) = mpsc::unbounded_channel();
        let (native_backend, native) =
            FakeBackend::new(BackendKind::Native, Arc::clone(&board), backend_tx.clone());
        let (transcoded_backend, transcoded) =
            FakeBackend::new(BackendKind::Transcoded, Arc::clone(&board), backend_tx.clone());

        let resolver = FakeResolver::default();
        let prober = FakeProber::default();
        let executor = FakeExecutor::default();
        let metadata = RecordingMetadata::default();
        let lyrics = FakeLyrics::default();
        let playlist = SharedPlaylist::new(tracks);

        let player = PlayerHandle::spawn(
            config,
            registry.clone(),
            Collaborators {
                resolver: Arc::new(resolver.clone()),
                prober: Arc::new(prober.clone()),
                executor: Arc::new(executor.clone()),
                metadata: Arc::new(metadata.clone()),
                lyrics: Arc::new(lyrics.clone()),
                playlist: Box::new(playlist.clone()),
            },
            Backends {
                native: Box::new(native_backend),
                transcoded: Box::new(transcoded_backend),
                events: backend_rx,
            },
        );
        let events = player.subscribe();

        Self {
            player,
            events,
            native,
            transcoded,
            board,
            resolver,
            prober,
            executor,
            metadata,
            lyrics,
            playlist,
            registry,
            backend_tx,
            _temp: temp,
        }
    }

    pub fn backend_log(&self, kind: BackendKind) -> &BackendLog {
        match kind {
            BackendKind::Native => &self.native,
            BackendKind::Transcoded => &self.transcoded,
        }
    }

    /// Raise a signal on the live load of `kind`
    pub fn emit(&self, kind: BackendKind, signal: BackendSignal) {
        let ticket = self
            .backend_log(kind)
            .ticket()
            .unwrap_or_else(|| panic!("{} backend has nothing loaded", kind));
        self.emit_with(ticket, signal);
    }

    /// Raise a signal under an explicit (possibly stale) ticket
    pub fn emit_with(&self, ticket: SinkTicket, signal: BackendSignal) {
        self.backend_tx
            .send(BackendEvent { ticket, signal })
            .unwrap();
    }

    /// Native load reports metadata then ready
    pub async fn make_ready(&self, kind: BackendKind, duration_secs: f64) {
        self.emit(kind, BackendSignal::MetadataLoaded { duration_secs });
        self.emit(kind, BackendSignal::Ready);
        settle().await;
    }

    pub async fn status(&self) -> PlayerStatus {
        self.player.status().await.unwrap()
    }

    /// Every event published since the last drain
    pub fn drain(&mut self) -> Vec<PlayerEvent> {
        let mut drained = Vec::new();
        while let Ok(event) = self.events.try_recv() {
            drained.push(event);
        }
        drained
    }

    pub fn violations(&self) -> Vec<String> {
        self.board.lock().violations.clone()
    }

    /// Start `track` playing and settle
    pub async fn load(&self, track: Track) {
        self.player.load_track(track).await.unwrap();
        settle().await;
    }
}

pub fn loaded_ids(events: &[PlayerEvent]) -> Vec<String> {
    events
        .iter()
        .filter_map(|event| match event {
            PlayerEvent::TrackLoaded { track_id, .. } => Some(track_id.to_string()),
            _ => None,
        })
        .collect()
}

pub fn positions(events: &[PlayerEvent]) -> Vec<f64> {
    events
        .iter()
        .filter_map(|event| match event {
            PlayerEvent::PositionChanged { position_secs, .. } => Some(*position_secs),
            _ => None,
        })
        .collect()
}
