//! Cadence Audio Player library
//!
//! Adaptive playback: native decoding with a transcode fallback, one shared
//! transport state, and automatic advance through a playlist.

pub mod audio;
pub mod backend;
pub mod config;
pub mod error;
pub mod pipeline;

pub use config::{PipelineConfig, Settings};
pub use error::{Error, Result};
pub use pipeline::PlayerHandle;
