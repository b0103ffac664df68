//! Error types for cadence-ap
//!
//! Defines module-specific error types using thiserror for clear error propagation.
//! Pipeline components never let these cross a component boundary as panics:
//! the controller turns each one into a state transition (fallback or advance).

use cadence_common::BackendKind;
use thiserror::Error;

/// Main error type for cadence-ap
#[derive(Error, Debug)]
pub enum Error {
    /// Configuration loading errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Playable URL could not be obtained for a track
    #[error("Resolve error: {0}")]
    Resolve(String),

    /// Transcode job could not be launched or did not finish
    #[error("Transcode error: {0}")]
    Transcode(String),

    /// Source bytes could not be fetched (remote or local resource)
    #[error("Fetch error: {0}")]
    Fetch(String),

    /// Playback backend refused a command
    #[error("Backend error: {0}")]
    Backend(String),

    /// Audio output device errors
    #[error("Audio output error: {0}")]
    AudioOutput(String),

    /// Audio decoding errors
    #[error("Audio decode error: {0}")]
    Decode(String),

    /// Backend selector was asked for a transition it does not allow
    #[error("Illegal backend transition: {from} -> {to}")]
    IllegalTransition { from: BackendKind, to: BackendKind },

    /// Controller task is gone
    #[error("Channel closed: {0}")]
    ChannelClosed(String),

    /// File I/O errors
    #[error("File I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Errors from the shared library (config file, input parsing)
    #[error(transparent)]
    Common(#[from] cadence_common::Error),
}

/// Convenience Result type using cadence-ap Error
pub type Result<T> = std::result::Result<T, Error>;
