//! # Cadence Common Library
//!
//! Shared code for the Cadence player crates:
//! - Track model and playback modes
//! - Event types (PlayerEvent enum)
//! - Configuration loading (TOML bootstrap file)
//! - Human-readable time formatting for logs

pub mod config;
pub mod error;
pub mod events;
pub mod human_time;
pub mod track;

pub use error::{Error, Result};
pub use events::{AdvanceReason, BackendKind, PlayerEvent};
pub use track::{PlaybackMode, Track, TrackId};
