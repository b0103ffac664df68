//! Playback backend selector
//!
//! Routes the single "now playing" sink between the native and the
//! transcoded backend. Only one of them ever holds a source: every attach
//! clears the sink that was live before loading the new one.
//!
//! Transitions:
//!
//! ```text
//! Empty ------------> NativeAttached
//! Empty ------------> TranscodedAttached
//! NativeAttached ---> TranscodedAttached     (fallback)
//! any --------------> Empty                  (detach on track change)
//! ```
//!
//! `TranscodedAttached -> NativeAttached` is refused: once a track has fallen
//! back it stays transcoded until the next detach.

use crate::backend::{AudioBackend, SinkTicket, SourceDescriptor};
use crate::error::{Error, Result};
use cadence_common::BackendKind;
use tracing::{debug, info, warn};

/// Which sink currently holds a source
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SelectorState {
    Empty,
    NativeAttached,
    TranscodedAttached,
}

impl SelectorState {
    pub fn kind(self) -> Option<BackendKind> {
        match self {
            SelectorState::Empty => None,
            SelectorState::NativeAttached => Some(BackendKind::Native),
            SelectorState::TranscodedAttached => Some(BackendKind::Transcoded),
        }
    }

    fn attached(kind: BackendKind) -> Self {
        match kind {
            BackendKind::Native => SelectorState::NativeAttached,
            BackendKind::Transcoded => SelectorState::TranscodedAttached,
        }
    }
}

/// Owner of both backends
pub struct BackendSelector {
    native: Box<dyn AudioBackend>,
    transcoded: Box<dyn AudioBackend>,
    state: SelectorState,
    ticket: Option<SinkTicket>,
    generation: u64,
}

impl BackendSelector {
    pub fn new(native: Box<dyn AudioBackend>, transcoded: Box<dyn AudioBackend>) -> Self {
        Self {
            native,
            transcoded,
            state: SelectorState::Empty,
            ticket: None,
            generation: 0,
        }
    }

    pub fn state(&self) -> SelectorState {
        self.state
    }

    /// Ticket of the live attachment
    pub fn ticket(&self) -> Option<SinkTicket> {
        self.ticket
    }

    /// Whether an event with this ticket belongs to the live attachment
    pub fn is_current(&self, ticket: SinkTicket) -> bool {
        self.ticket == Some(ticket)
    }

    /// Attach a source, applying `volume` to the new sink before it loads.
    ///
    /// Safe to call repeatedly; re-attaching within the same kind reloads the
    /// sink under a new ticket.
    pub fn attach(&mut self, source: SourceDescriptor, volume: f32) -> Result<SinkTicket> {
        let kind = source.kind();

        if self.state == SelectorState::TranscodedAttached && kind == BackendKind::Native {
            warn!("Refusing to switch a transcoded session back to native playback");
            return Err(Error::IllegalTransition {
                from: BackendKind::Transcoded,
                to: BackendKind::Native,
            });
        }

        self.clear_live();

        self.generation += 1;
        let ticket = SinkTicket {
            kind,
            generation: self.generation,
        };

        let backend = self.backend_mut(kind);
        backend.set_volume(volume);
        if let Err(e) = backend.load(&source, ticket) {
            warn!(%ticket, error = %e, "Backend refused source");
            backend.clear();
            return Err(e);
        }

        info!(%ticket, source = %source, "Sink attached");
        self.state = SelectorState::attached(kind);
        self.ticket = Some(ticket);
        Ok(ticket)
    }

    /// Silence and clear the live sink
    pub fn detach(&mut self) {
        if self.state != SelectorState::Empty {
            debug!(ticket = ?self.ticket, "Detaching sink");
        }
        self.clear_live();
    }

    /// Backend holding the live source
    pub fn active_mut(&mut self) -> Option<&mut dyn AudioBackend> {
        let kind = self.state.kind()?;
        Some(self.backend_mut(kind))
    }

    fn backend_mut(&mut self, kind: BackendKind) -> &mut dyn AudioBackend {
        match kind {
            BackendKind::Native => self.native.as_mut(),
            BackendKind::Transcoded => self.transcoded.as_mut(),
        }
    }

    fn clear_live(&mut self) {
        if let Some(kind) = self.state.kind() {
            self.backend_mut(kind).clear();
        }
        self.state = SelectorState::Empty;
        self.ticket = None;
    }
}
