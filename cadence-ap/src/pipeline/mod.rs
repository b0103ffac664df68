//! Adaptive playback pipeline
//!
//! Plays a track natively when the decoder can handle it and falls back to a
//! locally transcoded copy when it cannot, while keeping one coherent
//! transport state for observers.

pub mod collab;
pub mod controller;
pub mod format;
pub mod handle;
pub mod lyrics;
pub mod playlist;
pub mod policy;
pub mod selector;
pub mod transcode;
pub mod transport;

pub use collab::{
    CodecProber, DirectResolver, ExecutorEvent, ExecutorEvents, LoggingMetadataSink,
    LyricsSource, MetadataSink, PlaylistOrder, RemoteResolver, SiblingLrcSource,
    TranscodeExecutor, TranscodeRequest,
};
pub use controller::{Backends, Collaborators, PlayerStatus, SessionId};
pub use format::{FormatClassifier, Playability};
pub use handle::PlayerHandle;
pub use lyrics::{LyricLine, Lyrics};
pub use playlist::Playlist;
pub use policy::{AttemptState, Decision, FailurePolicy};
pub use selector::{BackendSelector, SelectorState};
pub use transport::{PlaybackSession, SyncEffect, TransportSync};
