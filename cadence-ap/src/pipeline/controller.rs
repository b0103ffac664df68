//! Playback controller
//!
//! A single tokio task owns every piece of pipeline state (selector,
//! transport sync, failure policy, transcode coordinator) and handles one
//! message at a time:
//!
//! - commands from [`PlayerHandle`](super::handle::PlayerHandle)s
//! - backend events, tagged with the sink ticket they belong to
//! - internal messages: resolver and lyrics results and timer expiries,
//!   tagged with the session or ticket that started them
//! - events of the current track's transcode job
//!
//! Anything tagged with a session, ticket or job that is no longer current is
//! dropped. That makes a late completion for a skipped track inert without
//! any listener bookkeeping.

use crate::backend::{AudioBackend, BackendEvent, BackendSignal, SinkTicket, SourceDescriptor};
use crate::config::PipelineConfig;
use crate::error::Result;
use crate::pipeline::collab::{
    CodecProber, LyricsSource, MetadataSink, PlaylistOrder, RemoteResolver, TranscodeExecutor,
};
use crate::pipeline::format::FormatClassifier;
use crate::pipeline::lyrics::Lyrics;
use crate::pipeline::policy::{AttemptState, Decision, FailurePolicy};
use crate::pipeline::selector::{BackendSelector, SelectorState};
use crate::pipeline::transcode::{
    JobEvent, JobSubscription, LocalResourceScheme, TempFileRegistry, TranscodeCoordinator,
};
use crate::pipeline::transport::{SyncEffect, TransportSync};
use cadence_common::{AdvanceReason, BackendKind, PlaybackMode, PlayerEvent, Track, TrackId};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, oneshot};
use tracing::{debug, info, trace, warn};

/// Identifies one track selection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct SessionId(u64);

impl SessionId {
    fn next(self) -> Self {
        Self(self.0 + 1)
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "s{}", self.0)
    }
}

/// Requests accepted by the controller
#[derive(Debug)]
pub(crate) enum Command {
    LoadTrack(Track),
    Play,
    Pause,
    Seek(f64),
    SetVolume(f32),
    SetMuted(bool),
    ToggleMute,
    Next,
    Previous,
    SetPlaylist(Vec<Track>),
    SetMode(PlaybackMode),
    Status(oneshot::Sender<PlayerStatus>),
    Shutdown(oneshot::Sender<()>),
}

/// Snapshot of the controller's state
#[derive(Debug, Clone, PartialEq)]
pub struct PlayerStatus {
    pub track_id: Option<TrackId>,
    pub session: SessionId,
    pub selector: SelectorState,
    pub attempt: AttemptState,
    pub mode: PlaybackMode,
    pub position_secs: f64,
    pub duration_secs: Option<f64>,
    pub volume: f32,
    pub muted: bool,
    pub playing: bool,
    /// Whether a transcode subscription is held for the current track
    pub transcoding: bool,
    /// Lyric line showing at the current position
    pub lyric_line: Option<usize>,
}

/// Why a playable URL was requested
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ResolvePurpose {
    /// First attempt of a track session
    Initial,
    /// Native playback failed; the transcoder needs a URL that is still valid
    Fallback,
}

enum Internal {
    Resolved {
        session: SessionId,
        purpose: ResolvePurpose,
        outcome: Result<Option<String>>,
    },
    LyricsLoaded {
        session: SessionId,
        outcome: Result<Option<String>>,
    },
    SeekGuardExpired {
        ticket: SinkTicket,
        token: u64,
    },
    AdvanceDue {
        session: SessionId,
    },
}

/// External collaborators of the controller
pub struct Collaborators {
    pub resolver: Arc<dyn RemoteResolver>,
    pub prober: Arc<dyn CodecProber>,
    pub executor: Arc<dyn TranscodeExecutor>,
    pub metadata: Arc<dyn MetadataSink>,
    pub lyrics: Arc<dyn LyricsSource>,
    pub playlist: Box<dyn PlaylistOrder>,
}

/// Both sinks plus the channel they report on
pub struct Backends {
    pub native: Box<dyn AudioBackend>,
    pub transcoded: Box<dyn AudioBackend>,
    pub events: mpsc::UnboundedReceiver<BackendEvent>,
}

pub(crate) struct PlaybackController {
    config: PipelineConfig,
    classifier: FormatClassifier,
    selector: BackendSelector,
    transport: TransportSync,
    policy: FailurePolicy,
    coordinator: TranscodeCoordinator,
    scheme: LocalResourceScheme,
    resolver: Arc<dyn RemoteResolver>,
    prober: Arc<dyn CodecProber>,
    metadata: Arc<dyn MetadataSink>,
    lyrics_source: Arc<dyn LyricsSource>,
    playlist: Box<dyn PlaylistOrder>,
    mode: PlaybackMode,
    current: Option<Track>,
    /// Playable URL of the current attempt; re-resolved on every selection
    source_url: Option<String>,
    session: SessionId,
    job: Option<JobSubscription>,
    lyrics: Lyrics,
    lyric_line: Option<usize>,
    events: broadcast::Sender<PlayerEvent>,
    commands: mpsc::Receiver<Command>,
    backend_events: mpsc::UnboundedReceiver<BackendEvent>,
    internal_tx: mpsc::UnboundedSender<Internal>,
    internal_rx: mpsc::UnboundedReceiver<Internal>,
}

impl PlaybackController {
    pub(crate) fn new(
        config: PipelineConfig,
        registry: TempFileRegistry,
        collaborators: Collaborators,
        backends: Backends,
        commands: mpsc::Receiver<Command>,
        events: broadcast::Sender<PlayerEvent>,
    ) -> Self {
        let (internal_tx, internal_rx) = mpsc::unbounded_channel();
        Self {
            classifier: FormatClassifier::new(&config.unsupported_extensions),
            selector: BackendSelector::new(backends.native, backends.transcoded),
            transport: TransportSync::new(&config),
            policy: FailurePolicy::new(config.advance_delay),
            coordinator: TranscodeCoordinator::new(collaborators.executor, registry.clone()),
            scheme: LocalResourceScheme::new(registry),
            resolver: collaborators.resolver,
            prober: collaborators.prober,
            metadata: collaborators.metadata,
            lyrics_source: collaborators.lyrics,
            playlist: collaborators.playlist,
            mode: PlaybackMode::default(),
            current: None,
            source_url: None,
            session: SessionId::default(),
            job: None,
            lyrics: Lyrics::default(),
            lyric_line: None,
            events,
            commands,
            backend_events: backends.events,
            internal_tx,
            internal_rx,
            config,
        }
    }

    pub(crate) async fn run(mut self) {
        info!("Playback controller started");
        loop {
            tokio::select! {
                command = self.commands.recv() => {
                    let keep_running = match command {
                        Some(command) => self.handle_command(command),
                        // Every handle dropped
                        None => {
                            self.shutdown();
                            false
                        }
                    };
                    if !keep_running {
                        break;
                    }
                }
                Some(event) = self.backend_events.recv() => self.handle_backend_event(event),
                Some(message) = self.internal_rx.recv() => self.handle_internal(message),
                event = next_job_event(&mut self.job) => self.handle_job_event(event),
            }
        }
        info!("Playback controller stopped");
    }

    fn handle_command(&mut self, command: Command) -> bool {
        match command {
            Command::LoadTrack(track) => self.load_track(track),
            Command::Play => {
                let effects = self.transport.play(self.selector.active_mut());
                self.apply(effects);
            }
            Command::Pause => {
                let effects = self.transport.pause(self.selector.active_mut());
                self.apply(effects);
            }
            Command::Seek(position) => {
                let effects = self.transport.seek(position, self.selector.active_mut());
                self.apply(effects);
            }
            Command::SetVolume(volume) => {
                let effects = self.transport.set_volume(volume, self.selector.active_mut());
                self.apply(effects);
            }
            Command::SetMuted(muted) => {
                let effects = self.transport.set_muted(muted, self.selector.active_mut());
                self.apply(effects);
            }
            Command::ToggleMute => {
                let effects = self.transport.toggle_mute(self.selector.active_mut());
                self.apply(effects);
            }
            Command::Next => {
                let current = self.current_id();
                match self.playlist.next(current.as_ref(), self.mode) {
                    Some(track) => self.load_track(track),
                    None => debug!("Next requested on an empty playlist"),
                }
            }
            Command::Previous => {
                let current = self.current_id();
                match self.playlist.previous(current.as_ref(), self.mode) {
                    Some(track) => self.load_track(track),
                    None => debug!("Previous requested on an empty playlist"),
                }
            }
            Command::SetPlaylist(tracks) => {
                info!(tracks = tracks.len(), "Playlist replaced");
                self.playlist.set_tracks(tracks);
            }
            Command::SetMode(mode) => {
                info!(%mode, "Playback mode changed");
                self.mode = mode;
            }
            Command::Status(reply) => {
                let _ = reply.send(self.status());
            }
            Command::Shutdown(ack) => {
                self.shutdown();
                let _ = ack.send(());
                return false;
            }
        }
        true
    }

    fn status(&self) -> PlayerStatus {
        let session = self.transport.session();
        PlayerStatus {
            track_id: self.current_id(),
            session: self.session,
            selector: self.selector.state(),
            attempt: self.policy.state(),
            mode: self.mode,
            position_secs: session.position,
            duration_secs: session.duration,
            volume: session.volume,
            muted: session.muted,
            playing: session.playing,
            transcoding: self.job.is_some(),
            lyric_line: self.lyric_line,
        }
    }

    fn current_id(&self) -> Option<TrackId> {
        self.current.as_ref().map(|track| track.id.clone())
    }

    /// Start a new session for `track`, superseding whatever was playing
    fn load_track(&mut self, track: Track) {
        self.release_current();
        self.session = self.session.next();

        info!(
            session = %self.session,
            track_id = %track.id,
            filename = %track.filename,
            "Loading track"
        );

        self.playlist.record_played(&track);
        self.publish(PlayerEvent::TrackLoaded {
            track_id: track.id.clone(),
            filename: track.filename.clone(),
        });
        self.current = Some(track.clone());
        let effects = self.transport.reset_for_track();
        self.apply(effects);
        self.policy.begin();

        self.spawn_resolve(ResolvePurpose::Initial);
        self.spawn_lyrics_load(track);
    }

    /// Ask the resolver for a fresh URL of the current track
    fn spawn_resolve(&self, purpose: ResolvePurpose) {
        let Some(track) = self.current.clone() else {
            return;
        };
        let resolver = Arc::clone(&self.resolver);
        let tx = self.internal_tx.clone();
        let session = self.session;
        tokio::spawn(async move {
            let outcome = resolver.playable_url(&track).await;
            let _ = tx.send(Internal::Resolved {
                session,
                purpose,
                outcome,
            });
        });
    }

    fn spawn_lyrics_load(&self, track: Track) {
        let source = Arc::clone(&self.lyrics_source);
        let tx = self.internal_tx.clone();
        let session = self.session;
        tokio::spawn(async move {
            let outcome = source.lyrics(&track).await;
            let _ = tx.send(Internal::LyricsLoaded { session, outcome });
        });
    }

    /// Drop every resource tied to the current track
    fn release_current(&mut self) {
        // Dropping the subscription makes the old job's events inert
        self.job = None;
        if let Some(track) = &self.current {
            self.coordinator.release(&track.id);
        }
        self.selector.detach();
        self.transport.on_detach();
        self.source_url = None;
        self.lyrics = Lyrics::default();
        self.lyric_line = None;
    }

    fn handle_internal(&mut self, message: Internal) {
        match message {
            Internal::Resolved {
                session,
                purpose,
                outcome,
            } => {
                if session != self.session {
                    debug!(%session, current = %self.session, "Discarding stale resolve result");
                    return;
                }
                match purpose {
                    ResolvePurpose::Initial => self.on_initial_resolve(outcome),
                    ResolvePurpose::Fallback => self.on_fallback_resolve(outcome),
                }
            }
            Internal::LyricsLoaded { session, outcome } => {
                if session != self.session {
                    debug!(%session, "Discarding lyrics of a previous track");
                    return;
                }
                self.on_lyrics_loaded(outcome);
            }
            Internal::SeekGuardExpired { ticket, token } => {
                self.transport.on_seek_guard_expired(ticket, token);
            }
            Internal::AdvanceDue { session } => {
                if session != self.session || self.policy.state() != AttemptState::AdvanceScheduled
                {
                    debug!(%session, "Discarding stale advance");
                    return;
                }
                self.advance();
            }
        }
    }

    fn on_initial_resolve(&mut self, outcome: Result<Option<String>>) {
        match outcome {
            Ok(Some(url)) => self.on_resolved(url),
            Ok(None) => {
                let decision = self.policy.on_resolve_failed();
                self.apply_decision(decision, "no playable URL");
            }
            Err(e) => {
                let decision = self.policy.on_resolve_failed();
                self.apply_decision(decision, &e.to_string());
            }
        }
    }

    /// Fresh URL for the transcoder after native playback failed
    fn on_fallback_resolve(&mut self, outcome: Result<Option<String>>) {
        if self.policy.state() != AttemptState::ProbingCodec {
            debug!(attempt = ?self.policy.state(), "Fallback URL no longer needed");
            return;
        }
        let failure = match outcome {
            Ok(Some(url)) => {
                self.source_url = Some(url);
                self.spawn_probe();
                self.start_transcode();
                return;
            }
            Ok(None) => "no playable URL for transcoding".to_string(),
            Err(e) => format!("could not resolve URL for transcoding: {}", e),
        };
        let decision = self.policy.on_transcode_failed();
        self.apply_decision(decision, &failure);
    }

    fn on_lyrics_loaded(&mut self, outcome: Result<Option<String>>) {
        let track_id = self.current_id();
        self.lyrics = match outcome {
            Ok(Some(text)) => Lyrics::parse(&text),
            Ok(None) => Lyrics::default(),
            Err(e) => {
                warn!(track_id = ?track_id, error = %e, "Failed to load lyrics");
                Lyrics::default()
            }
        };
        debug!(track_id = ?track_id, lines = self.lyrics.len(), "Lyrics loaded");
        let position = self.transport.session().position;
        self.update_lyric_line(position);
    }

    /// Publish the lyric line under `position` when it changed
    fn update_lyric_line(&mut self, position: f64) {
        let line = self.lyrics.line_at(position);
        if line == self.lyric_line {
            return;
        }
        self.lyric_line = line;
        let Some(track_id) = self.current_id() else {
            return;
        };
        let text = line
            .and_then(|index| self.lyrics.get(index))
            .map(|lyric| lyric.text.clone());
        self.publish(PlayerEvent::LyricLineChanged {
            track_id,
            index: line,
            text,
        });
    }

    fn on_resolved(&mut self, url: String) {
        let Some(track) = &self.current else {
            return;
        };
        let playability = self.classifier.classify(&track.filename);
        debug!(track_id = %track.id, ?playability, "Classified track");

        self.source_url = Some(url);
        let decision = self.policy.on_resolved(playability);
        self.apply_decision(decision, "");
    }

    fn handle_backend_event(&mut self, event: BackendEvent) {
        if !self.selector.is_current(event.ticket) {
            trace!(ticket = %event.ticket, signal = ?event.signal, "Discarding event from stale sink");
            return;
        }

        let ticket = event.ticket;
        match event.signal {
            BackendSignal::Ready => {
                self.policy.on_ready(ticket.kind);
                let effects = self.transport.on_ready(ticket, self.selector.active_mut());
                self.apply(effects);
            }
            BackendSignal::MetadataLoaded { duration_secs } => {
                let effects = self.transport.on_metadata(duration_secs);
                self.apply(effects);
            }
            BackendSignal::TimeUpdate(position) => {
                let effects = self.transport.on_time_update(position);
                self.apply(effects);
            }
            BackendSignal::Paused => {
                let effects = self.transport.on_paused();
                self.apply(effects);
            }
            BackendSignal::Ended => {
                if let Some(track_id) = self.current_id() {
                    info!(track_id = %track_id, "Track ended");
                    self.publish(PlayerEvent::TrackEnded { track_id });
                }
                let decision = self.policy.on_ended();
                self.apply_decision(decision, "");
            }
            BackendSignal::Error(code) => {
                warn!(%ticket, ?code, "Playback error");
                let decision = self.policy.on_backend_error(ticket.kind, code);
                self.apply_decision(decision, &format!("{} backend reported {:?}", ticket.kind, code));
            }
        }
    }

    fn handle_job_event(&mut self, event: Option<JobEvent>) {
        let Some(event) = event else {
            self.job = None;
            return;
        };
        let Some(track_id) = self.current_id() else {
            return;
        };

        match event {
            JobEvent::Progress(percent) => {
                debug!(track_id = %track_id, percent, "Transcode progress");
                self.publish(PlayerEvent::TranscodeProgress { track_id, percent });
            }
            JobEvent::Completed(path) => {
                self.job = None;
                match self.scheme.expose(&path) {
                    Some(resource) => self.attach(SourceDescriptor::Local(resource)),
                    None => {
                        let decision = self.policy.on_transcode_failed();
                        self.apply_decision(decision, "transcoded file is not accessible");
                    }
                }
            }
            JobEvent::Failed(reason) => {
                self.job = None;
                let decision = self.policy.on_transcode_failed();
                self.apply_decision(decision, &reason);
            }
        }
    }

    fn apply_decision(&mut self, decision: Decision, detail: &str) {
        match decision {
            Decision::AttachNative => {
                if let Some(url) = self.source_url.clone() {
                    self.attach(SourceDescriptor::Remote(url));
                }
            }
            Decision::StartTranscode => self.start_transcode(),
            // The first URL may have expired while native playback ran
            Decision::FallBackToTranscode => self.spawn_resolve(ResolvePurpose::Fallback),
            Decision::Advance { reason, delay } => self.schedule_advance(reason, delay, detail),
            Decision::Ignore => {}
        }
    }

    fn attach(&mut self, source: SourceDescriptor) {
        let kind = source.kind();
        match self.selector.attach(source, self.transport.gain()) {
            Ok(ticket) => {
                if let Some(track_id) = self.current_id() {
                    self.publish(PlayerEvent::BackendChanged {
                        track_id,
                        backend: kind,
                    });
                }
                let effects = self.transport.on_attach(kind, ticket);
                self.apply(effects);
            }
            Err(e) => {
                self.transport.on_detach();
                let decision = self.policy.on_attach_failed();
                self.apply_decision(decision, &e.to_string());
            }
        }
    }

    fn start_transcode(&mut self) {
        let (Some(track), Some(url)) = (&self.current, &self.source_url) else {
            return;
        };
        let subscription = self.coordinator.start_job(track, url);
        self.job = Some(subscription);
        self.policy.on_transcode_started();
    }

    /// Log the real codec behind a native failure; never blocks the fallback
    fn spawn_probe(&self) {
        let (Some(track), Some(url)) = (&self.current, &self.source_url) else {
            return;
        };
        let prober = Arc::clone(&self.prober);
        let classifier = self.classifier.clone();
        let track_id = track.id.clone();
        let url = url.clone();
        tokio::spawn(async move {
            match prober.probe(&url).await {
                Some(codec) => info!(
                    track_id = %track_id,
                    codec = %codec,
                    known_unsupported = classifier.is_unsupported_codec(&codec),
                    "Native playback failed, transcoding"
                ),
                None => info!(track_id = %track_id, "Native playback failed, codec unknown, transcoding"),
            }
        });
    }

    fn schedule_advance(&mut self, reason: AdvanceReason, delay: Duration, detail: &str) {
        let Some(track_id) = self.current_id() else {
            return;
        };

        if reason == AdvanceReason::PlaybackFailed {
            warn!(track_id = %track_id, reason = %detail, "Track failed, skipping");
            self.publish(PlayerEvent::TrackFailed {
                track_id: track_id.clone(),
                reason: detail.to_string(),
            });
            // Nothing may keep sounding from a failed attempt
            self.job = None;
            self.selector.detach();
            self.transport.on_detach();
        }

        self.policy.on_advance_scheduled();
        self.publish(PlayerEvent::AdvanceRequested {
            from: track_id,
            reason,
            delay_ms: delay.as_millis() as u64,
        });

        if delay.is_zero() {
            self.advance();
        } else {
            let tx = self.internal_tx.clone();
            let session = self.session;
            tokio::spawn(async move {
                tokio::time::sleep(delay).await;
                let _ = tx.send(Internal::AdvanceDue { session });
            });
        }
    }

    /// Move on to the next track under the current mode
    fn advance(&mut self) {
        let current = self.current_id();
        match self.playlist.next(current.as_ref(), self.mode) {
            Some(track) => {
                let effects = self.transport.set_playing(true);
                self.apply(effects);
                self.load_track(track);
            }
            None => self.stop(),
        }
    }

    fn stop(&mut self) {
        info!("Nothing left to play");
        self.release_current();
        self.current = None;
        self.policy.stop();
        let effects = self.transport.set_playing(false);
        self.apply(effects);
        self.publish(PlayerEvent::Stopped);
    }

    fn shutdown(&mut self) {
        info!("Shutting down playback pipeline");
        self.release_current();
        self.current = None;
        self.policy.stop();
        let removed = self.coordinator.shutdown();
        debug!(removed, "Temp files removed at shutdown");
        self.publish(PlayerEvent::Stopped);
    }

    fn apply(&mut self, effects: Vec<SyncEffect>) {
        for effect in effects {
            match effect {
                SyncEffect::Position(position_secs) => {
                    if let Some(track_id) = self.current_id() {
                        self.publish(PlayerEvent::PositionChanged {
                            track_id,
                            position_secs,
                        });
                        self.update_lyric_line(position_secs);
                    }
                }
                SyncEffect::Duration(duration_secs) => {
                    if let Some(track_id) = self.current_id() {
                        self.metadata.report_duration(&track_id, duration_secs);
                        self.playlist.record_duration(&track_id, duration_secs);
                        self.publish(PlayerEvent::DurationKnown {
                            track_id,
                            duration_secs,
                        });
                    }
                }
                SyncEffect::Playing(playing) => {
                    self.publish(PlayerEvent::PlayingChanged { playing });
                }
                SyncEffect::Volume(volume) => {
                    self.publish(PlayerEvent::VolumeChanged { volume });
                }
                SyncEffect::Muted(muted) => {
                    self.publish(PlayerEvent::MuteChanged { muted });
                }
                SyncEffect::ArmSeekGuard { ticket, token } => {
                    let tx = self.internal_tx.clone();
                    let delay = self.config.seek_guard;
                    tokio::spawn(async move {
                        tokio::time::sleep(delay).await;
                        let _ = tx.send(Internal::SeekGuardExpired { ticket, token });
                    });
                }
            }
        }
    }

    fn publish(&self, event: PlayerEvent) {
        trace!(?event, "Publishing event");
        // No subscribers is fine
        let _ = self.events.send(event);
    }
}

/// Next event of the current job; pending forever when there is none
async fn next_job_event(job: &mut Option<JobSubscription>) -> Option<JobEvent> {
    match job {
        Some(subscription) => subscription.recv().await,
        None => std::future::pending().await,
    }
}

impl fmt::Debug for PlaybackController {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PlaybackController")
            .field("session", &self.session)
            .field("track", &self.current_id())
            .field("selector", &self.selector.state())
            .field("attempt", &self.policy.state())
            .finish()
    }
}
