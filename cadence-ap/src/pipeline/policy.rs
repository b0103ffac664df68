//! Failure and advance policy
//!
//! Tracks one playback attempt per track and decides what follows each
//! outcome:
//!
//! ```text
//! Resolving -> AttemptingNative | AttemptingTranscode | Failed
//! AttemptingNative -> Playing(native) | ProbingCodec | Failed
//! Playing(native) -> ProbingCodec | Failed
//! ProbingCodec -> AttemptingTranscode
//! AttemptingTranscode -> Playing(transcoded) | Failed
//! Failed -> AdvanceScheduled
//! ```
//!
//! Format errors on the native path fall back to transcoding. Everything
//! else that goes wrong is terminal for the track and advances after a delay.
//! A natural end advances immediately.

use crate::backend::MediaErrorCode;
use crate::pipeline::format::Playability;
use cadence_common::{AdvanceReason, BackendKind};
use std::time::Duration;
use tracing::debug;

/// Where the current attempt stands
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttemptState {
    /// No track selected
    Idle,
    Resolving,
    AttemptingNative,
    /// Native path failed on format; probe running, transcode about to start
    ProbingCodec,
    AttemptingTranscode,
    Playing(BackendKind),
    Failed,
    AdvanceScheduled,
}

/// What the controller should do next
#[derive(Debug, Clone, PartialEq)]
pub enum Decision {
    AttachNative,
    StartTranscode,
    /// Probe the codec for the log and start transcoding
    FallBackToTranscode,
    Advance {
        reason: AdvanceReason,
        delay: Duration,
    },
    /// Nothing to do (late or duplicate signal)
    Ignore,
}

pub struct FailurePolicy {
    state: AttemptState,
    advance_delay: Duration,
}

impl FailurePolicy {
    pub fn new(advance_delay: Duration) -> Self {
        Self {
            state: AttemptState::Idle,
            advance_delay,
        }
    }

    pub fn state(&self) -> AttemptState {
        self.state
    }

    /// A new track was selected
    pub fn begin(&mut self) {
        self.state = AttemptState::Resolving;
    }

    /// Nothing is playing any more
    pub fn stop(&mut self) {
        self.state = AttemptState::Idle;
    }

    pub fn on_resolved(&mut self, playability: Playability) -> Decision {
        if self.state != AttemptState::Resolving {
            return Decision::Ignore;
        }
        match playability {
            Playability::Native => {
                self.state = AttemptState::AttemptingNative;
                Decision::AttachNative
            }
            Playability::Transcode => {
                self.state = AttemptState::AttemptingTranscode;
                Decision::StartTranscode
            }
        }
    }

    /// No playable URL (or the resolver failed): nothing to transcode either
    pub fn on_resolve_failed(&mut self) -> Decision {
        self.fail()
    }

    /// Transcode subscription was handed out after a fallback
    pub fn on_transcode_started(&mut self) {
        if self.state == AttemptState::ProbingCodec {
            self.state = AttemptState::AttemptingTranscode;
        }
    }

    pub fn on_transcode_failed(&mut self) -> Decision {
        match self.state {
            AttemptState::AttemptingTranscode | AttemptState::ProbingCodec => self.fail(),
            _ => Decision::Ignore,
        }
    }

    pub fn on_ready(&mut self, kind: BackendKind) {
        match (self.state, kind) {
            (AttemptState::AttemptingNative, BackendKind::Native)
            | (AttemptState::AttemptingTranscode, BackendKind::Transcoded) => {
                self.state = AttemptState::Playing(kind);
            }
            (state, kind) => debug!(?state, %kind, "Ready outside an attempt"),
        }
    }

    pub fn on_backend_error(&mut self, kind: BackendKind, code: MediaErrorCode) -> Decision {
        match (self.state, kind) {
            (AttemptState::AttemptingNative | AttemptState::Playing(BackendKind::Native), BackendKind::Native)
                if code.is_format_error() =>
            {
                self.state = AttemptState::ProbingCodec;
                Decision::FallBackToTranscode
            }
            (AttemptState::AttemptingNative | AttemptState::Playing(BackendKind::Native), BackendKind::Native)
            | (
                AttemptState::AttemptingTranscode | AttemptState::Playing(BackendKind::Transcoded),
                BackendKind::Transcoded,
            ) => self.fail(),
            _ => Decision::Ignore,
        }
    }

    /// Sink could not even take the source
    pub fn on_attach_failed(&mut self) -> Decision {
        self.fail()
    }

    pub fn on_ended(&mut self) -> Decision {
        match self.state {
            AttemptState::Playing(_) => {
                self.state = AttemptState::AdvanceScheduled;
                Decision::Advance {
                    reason: AdvanceReason::TrackEnded,
                    delay: Duration::ZERO,
                }
            }
            _ => Decision::Ignore,
        }
    }

    /// The controller armed the advance timer (or advanced right away)
    pub fn on_advance_scheduled(&mut self) {
        self.state = AttemptState::AdvanceScheduled;
    }

    fn fail(&mut self) -> Decision {
        if matches!(
            self.state,
            AttemptState::Failed | AttemptState::AdvanceScheduled | AttemptState::Idle
        ) {
            return Decision::Ignore;
        }
        self.state = AttemptState::Failed;
        Decision::Advance {
            reason: AdvanceReason::PlaybackFailed,
            delay: self.advance_delay,
        }
    }
}
