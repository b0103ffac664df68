//! Out-of-process transcoding
//!
//! - `registry`: process-wide set of temp files, swept on shutdown
//! - `scheme`: opaque tokens giving the playback side access to those files
//! - `coordinator`: one job per track, progress relay, cleanup
//! - `ffmpeg`: production executor and codec prober

pub mod coordinator;
pub mod ffmpeg;
pub mod registry;
pub mod scheme;

pub use coordinator::{JobEvent, JobStatus, JobSubscription, TranscodeCoordinator, TranscodeJob};
pub use ffmpeg::{FfmpegExecutor, FfprobeProber};
pub use registry::TempFileRegistry;
pub use scheme::{LocalResource, LocalResourceScheme, LOCAL_SCHEME};
