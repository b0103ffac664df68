//! Audio decoding and output
//!
//! Everything here works on interleaved stereo f32 samples:
//! - [`decoder`] turns encoded bytes into PCM (symphonia)
//! - [`resampler`] converts PCM to the device rate (rubato)
//! - [`output`] mixes loaded decks into the device stream (cpal)

pub mod decoder;
pub mod output;
pub mod resampler;

pub use decoder::{DecodeFailure, DecodedAudio, SimpleDecoder};
pub use output::{Deck, OutputControl, OutputDevice, SharedDeck, StreamHealth};
pub use resampler::Resampler;

/// Channel count of every buffer handed between audio modules
pub const CHANNELS: usize = 2;
