//! Transport state sync
//!
//! Keeps one authoritative [`PlaybackSession`] consistent with whichever sink
//! is attached, in both directions:
//!
//! - backend -> session: position reports (coalesced), metadata, pauses the
//!   environment forced on the sink
//! - session -> backend: play/pause, seek, volume and mute
//!
//! Methods take the live backend (if any) and return [`SyncEffect`]s for the
//! controller to publish or schedule. Nothing here touches channels or timers
//! directly.

use crate::backend::{AudioBackend, SinkTicket};
use crate::config::PipelineConfig;
use cadence_common::BackendKind;
use tracing::{debug, info};

/// Seek suppression state of a ready sink
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SeekGuard {
    Idle,
    /// Position reports are ignored until the guard timer with `token` fires
    Guarded { target: f64, token: u64 },
}

/// Lifecycle of the attached sink
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SinkPhase {
    Empty,
    /// Source handed to the backend, not yet playable
    Loading {
        kind: BackendKind,
        ticket: SinkTicket,
        /// Real seek requested before the sink could honour it
        pending_seek: Option<f64>,
    },
    Ready {
        kind: BackendKind,
        ticket: SinkTicket,
        seek: SeekGuard,
        /// Pause commands sent whose `Paused` signal has not come back yet
        expected_pauses: u32,
    },
}

impl SinkPhase {
    pub fn ticket(&self) -> Option<SinkTicket> {
        match self {
            SinkPhase::Empty => None,
            SinkPhase::Loading { ticket, .. } | SinkPhase::Ready { ticket, .. } => Some(*ticket),
        }
    }

    pub fn kind(&self) -> Option<BackendKind> {
        match self {
            SinkPhase::Empty => None,
            SinkPhase::Loading { kind, .. } | SinkPhase::Ready { kind, .. } => Some(*kind),
        }
    }

    pub fn is_ready(&self) -> bool {
        matches!(self, SinkPhase::Ready { .. })
    }
}

/// Live state of what is currently sounding
#[derive(Debug, Clone, PartialEq)]
pub struct PlaybackSession {
    pub phase: SinkPhase,
    /// Last published position, seconds
    pub position: f64,
    /// Last position the backend reported (or was commanded to)
    pub backend_position: f64,
    pub duration: Option<f64>,
    /// User volume; kept while muted so unmuting restores it
    pub volume: f32,
    pub muted: bool,
    pub playing: bool,
}

impl PlaybackSession {
    fn new(volume: f32) -> Self {
        Self {
            phase: SinkPhase::Empty,
            position: 0.0,
            backend_position: 0.0,
            duration: None,
            volume,
            muted: false,
            playing: false,
        }
    }

    /// Level actually applied to a sink
    pub fn gain(&self) -> f32 {
        if self.muted {
            0.0
        } else {
            self.volume
        }
    }
}

/// Something the controller must publish or schedule
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SyncEffect {
    Position(f64),
    Duration(f64),
    Playing(bool),
    Volume(f32),
    Muted(bool),
    /// Clear the seek guard of `ticket` after the configured delay
    ArmSeekGuard { ticket: SinkTicket, token: u64 },
}

/// Reconciles the session with the live sink
pub struct TransportSync {
    session: PlaybackSession,
    coalesce: f64,
    seek_threshold: f64,
    next_token: u64,
}

impl TransportSync {
    pub fn new(config: &PipelineConfig) -> Self {
        Self {
            session: PlaybackSession::new(config.initial_volume),
            coalesce: config.position_coalesce.as_secs_f64(),
            seek_threshold: config.seek_threshold.as_secs_f64(),
            next_token: 0,
        }
    }

    pub fn session(&self) -> &PlaybackSession {
        &self.session
    }

    pub fn volume(&self) -> f32 {
        self.session.volume
    }

    pub fn is_muted(&self) -> bool {
        self.session.muted
    }

    /// Level to hand a freshly attached sink
    pub fn gain(&self) -> f32 {
        self.session.gain()
    }

    pub fn is_playing(&self) -> bool {
        self.session.playing
    }

    /// Forget the previous track. Volume and the playing flag carry over.
    pub fn reset_for_track(&mut self) -> Vec<SyncEffect> {
        self.session.phase = SinkPhase::Empty;
        self.session.duration = None;
        self.session.backend_position = 0.0;
        self.set_position(0.0)
    }

    /// A new sink was attached; playback restarts from zero.
    pub fn on_attach(&mut self, kind: BackendKind, ticket: SinkTicket) -> Vec<SyncEffect> {
        self.session.phase = SinkPhase::Loading {
            kind,
            ticket,
            pending_seek: None,
        };
        self.session.duration = None;
        self.session.backend_position = 0.0;
        self.set_position(0.0)
    }

    pub fn on_detach(&mut self) {
        self.session.phase = SinkPhase::Empty;
    }

    /// Sink can play. Starts playback if the session wants it and applies a
    /// seek deferred during loading.
    pub fn on_ready(
        &mut self,
        ticket: SinkTicket,
        backend: Option<&mut dyn AudioBackend>,
    ) -> Vec<SyncEffect> {
        let (kind, pending_seek) = match self.session.phase {
            SinkPhase::Loading {
                kind,
                ticket: loading,
                pending_seek,
            } if loading == ticket => (kind, pending_seek),
            _ => {
                debug!(%ticket, "Ready for a sink that is not loading");
                return Vec::new();
            }
        };

        let mut effects = Vec::new();
        let mut seek = SeekGuard::Idle;
        if let Some(backend) = backend {
            if let Some(target) = pending_seek {
                let token = self.take_token();
                backend.seek(target);
                self.session.backend_position = target;
                seek = SeekGuard::Guarded { target, token };
                effects.push(SyncEffect::ArmSeekGuard { ticket, token });
            }
            if self.session.playing {
                backend.play();
            }
        }

        self.session.phase = SinkPhase::Ready {
            kind,
            ticket,
            seek,
            expected_pauses: 0,
        };
        info!(%ticket, playing = self.session.playing, "Sink ready");
        effects
    }

    pub fn on_time_update(&mut self, position: f64) -> Vec<SyncEffect> {
        if !position.is_finite() {
            return Vec::new();
        }
        match self.session.phase {
            SinkPhase::Ready {
                seek: SeekGuard::Idle,
                ..
            } => {
                self.session.backend_position = position;
                if (position - self.session.position).abs() > self.coalesce {
                    self.set_position(position)
                } else {
                    Vec::new()
                }
            }
            // Stale position from before the seek landed
            SinkPhase::Ready {
                seek: SeekGuard::Guarded { .. },
                ..
            } => Vec::new(),
            SinkPhase::Loading { .. } | SinkPhase::Empty => Vec::new(),
        }
    }

    pub fn on_metadata(&mut self, duration_secs: f64) -> Vec<SyncEffect> {
        if duration_secs.is_finite() && duration_secs > 0.0 {
            self.session.duration = Some(duration_secs);
            vec![SyncEffect::Duration(duration_secs)]
        } else {
            debug!(duration_secs, "Ignoring unusable duration");
            Vec::new()
        }
    }

    /// The sink reported a pause.
    ///
    /// Matched against pause commands we sent; an unmatched pause while the
    /// session is playing came from the environment and stops the session.
    pub fn on_paused(&mut self) -> Vec<SyncEffect> {
        if let SinkPhase::Ready {
            expected_pauses, ..
        } = &mut self.session.phase
        {
            if *expected_pauses > 0 {
                *expected_pauses -= 1;
                return Vec::new();
            }
        }

        if self.session.playing {
            info!("Output paused by the environment");
            self.session.playing = false;
            vec![SyncEffect::Playing(false)]
        } else {
            Vec::new()
        }
    }

    pub fn on_seek_guard_expired(&mut self, ticket: SinkTicket, token: u64) {
        if let SinkPhase::Ready {
            ticket: live, seek, ..
        } = &mut self.session.phase
        {
            if *live == ticket && matches!(seek, SeekGuard::Guarded { token: t, .. } if *t == token)
            {
                *seek = SeekGuard::Idle;
            }
        }
    }

    pub fn play(&mut self, backend: Option<&mut dyn AudioBackend>) -> Vec<SyncEffect> {
        if self.session.playing {
            return Vec::new();
        }
        self.session.playing = true;
        if self.session.phase.is_ready() {
            if let Some(backend) = backend {
                backend.play();
            }
        }
        vec![SyncEffect::Playing(true)]
    }

    pub fn pause(&mut self, backend: Option<&mut dyn AudioBackend>) -> Vec<SyncEffect> {
        if !self.session.playing {
            return Vec::new();
        }
        self.session.playing = false;
        if let SinkPhase::Ready {
            expected_pauses, ..
        } = &mut self.session.phase
        {
            if let Some(backend) = backend {
                *expected_pauses += 1;
                backend.pause();
            }
        }
        vec![SyncEffect::Playing(false)]
    }

    /// Set the playing flag without commanding a sink (used before a new
    /// track's sink exists)
    pub fn set_playing(&mut self, playing: bool) -> Vec<SyncEffect> {
        if self.session.playing == playing {
            return Vec::new();
        }
        self.session.playing = playing;
        vec![SyncEffect::Playing(playing)]
    }

    /// Request a position.
    ///
    /// Far from the reference position it is a real seek: guarded, sent to
    /// the sink once ready. Close to it the request is coalesced and only the
    /// session position moves.
    pub fn seek(
        &mut self,
        target: f64,
        backend: Option<&mut dyn AudioBackend>,
    ) -> Vec<SyncEffect> {
        if !target.is_finite() {
            return Vec::new();
        }
        let mut target = target.max(0.0);
        if let Some(duration) = self.session.duration {
            target = target.min(duration);
        }

        let threshold = self.seek_threshold;
        let backend_position = self.session.backend_position;
        let mut effects = Vec::new();

        match &mut self.session.phase {
            SinkPhase::Empty => {
                debug!(target, "Seek ignored, no sink attached");
                return effects;
            }
            SinkPhase::Loading { pending_seek, .. } => {
                let reference = pending_seek.unwrap_or(backend_position);
                if (target - reference).abs() > threshold {
                    debug!(target, "Deferring seek until the sink is ready");
                    *pending_seek = Some(target);
                }
            }
            SinkPhase::Ready { ticket, seek, .. } => {
                let reference = match seek {
                    SeekGuard::Guarded { target, .. } => *target,
                    SeekGuard::Idle => backend_position,
                };
                if (target - reference).abs() > threshold {
                    let ticket = *ticket;
                    self.next_token += 1;
                    let token = self.next_token;
                    *seek = SeekGuard::Guarded { target, token };
                    if let Some(backend) = backend {
                        backend.seek(target);
                    }
                    self.session.backend_position = target;
                    effects.push(SyncEffect::ArmSeekGuard { ticket, token });
                } else {
                    debug!(target, reference, "Seek coalesced");
                }
            }
        }

        effects.extend(self.set_position(target));
        effects
    }

    pub fn set_volume(
        &mut self,
        volume: f32,
        backend: Option<&mut dyn AudioBackend>,
    ) -> Vec<SyncEffect> {
        if !volume.is_finite() {
            return Vec::new();
        }
        let volume = volume.clamp(0.0, 1.0);
        if (volume - self.session.volume).abs() < f32::EPSILON {
            return Vec::new();
        }
        self.session.volume = volume;
        if let Some(backend) = backend {
            backend.set_volume(self.session.gain());
        }
        vec![SyncEffect::Volume(volume)]
    }

    /// Silence or restore the sink; the user volume is untouched
    pub fn set_muted(
        &mut self,
        muted: bool,
        backend: Option<&mut dyn AudioBackend>,
    ) -> Vec<SyncEffect> {
        if self.session.muted == muted {
            return Vec::new();
        }
        self.session.muted = muted;
        if let Some(backend) = backend {
            backend.set_volume(self.session.gain());
        }
        debug!(muted, volume = self.session.volume, "Mute changed");
        vec![SyncEffect::Muted(muted)]
    }

    pub fn toggle_mute(&mut self, backend: Option<&mut dyn AudioBackend>) -> Vec<SyncEffect> {
        let muted = !self.session.muted;
        self.set_muted(muted, backend)
    }

    fn take_token(&mut self) -> u64 {
        self.next_token += 1;
        self.next_token
    }

    fn set_position(&mut self, position: f64) -> Vec<SyncEffect> {
        if position == self.session.position {
            return Vec::new();
        }
        self.session.position = position;
        vec![SyncEffect::Position(position)]
    }
}
