//! Runtime configuration for the playback pipeline
//!
//! The TOML bootstrap file (see `cadence_common::config`) carries raw numbers;
//! this module turns it into typed settings with `Duration`s and applies
//! command-line overrides on top.

use cadence_common::config::{PipelineSection, TomlConfig, TranscodeSection};
use std::path::PathBuf;
use std::time::Duration;
use tracing::warn;

/// Timing and format policy of the playback pipeline
#[derive(Debug, Clone, PartialEq)]
pub struct PipelineConfig {
    /// Backend position reports closer than this to the last published
    /// position are not republished
    pub position_coalesce: Duration,

    /// A requested position further than this from the reference position is
    /// a real seek; anything closer is coalesced
    pub seek_threshold: Duration,

    /// Position reports are ignored for this long after a real seek
    pub seek_guard: Duration,

    /// Pause between a terminal failure and the automatic advance
    pub advance_delay: Duration,

    /// Extensions routed straight to the transcoder
    pub unsupported_extensions: Vec<String>,

    /// Volume of a freshly started player (0.0-1.0)
    pub initial_volume: f32,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self::from(&PipelineSection::default())
    }
}

impl From<&PipelineSection> for PipelineConfig {
    fn from(section: &PipelineSection) -> Self {
        let initial_volume = if section.initial_volume.is_finite() {
            section.initial_volume.clamp(0.0, 1.0)
        } else {
            warn!(
                "Invalid initial_volume {}, using 0.7",
                section.initial_volume
            );
            0.7
        };

        Self {
            position_coalesce: Duration::from_millis(section.position_coalesce_ms),
            seek_threshold: Duration::from_millis(section.seek_threshold_ms),
            seek_guard: Duration::from_millis(section.seek_guard_ms),
            advance_delay: Duration::from_millis(section.advance_delay_ms),
            unsupported_extensions: section.unsupported_extensions.clone(),
            initial_volume,
        }
    }
}

/// External transcoder settings
#[derive(Debug, Clone, PartialEq)]
pub struct TranscodeSettings {
    pub ffmpeg_path: PathBuf,
    pub ffprobe_path: PathBuf,
    pub sample_rate: u32,
    pub channels: u16,
    pub bitrate_kbps: u32,
    /// Directory holding every transcoded temp file
    pub temp_dir: PathBuf,
    pub file_prefix: String,
    pub probe_timeout: Duration,
}

impl Default for TranscodeSettings {
    fn default() -> Self {
        Self::from(&TranscodeSection::default())
    }
}

impl From<&TranscodeSection> for TranscodeSettings {
    fn from(section: &TranscodeSection) -> Self {
        Self {
            ffmpeg_path: section.ffmpeg_path.clone(),
            ffprobe_path: section.ffprobe_path.clone(),
            sample_rate: section.sample_rate,
            channels: section.channels,
            bitrate_kbps: section.bitrate_kbps,
            temp_dir: section
                .temp_dir
                .clone()
                .unwrap_or_else(std::env::temp_dir),
            file_prefix: section.file_prefix.clone(),
            probe_timeout: Duration::from_millis(section.probe_timeout_ms),
        }
    }
}

/// Values given on the command line, taking priority over the TOML file
#[derive(Debug, Clone, Default)]
pub struct ConfigOverrides {
    pub log_level: Option<String>,
    pub device: Option<String>,
    pub volume: Option<f32>,
}

/// Everything the player binary needs to start
#[derive(Debug, Clone)]
pub struct Settings {
    pub pipeline: PipelineConfig,
    pub transcode: TranscodeSettings,
    pub output_device: Option<String>,
    pub log_level: String,
}

impl Settings {
    /// Merge the bootstrap file with command-line overrides.
    pub fn from_toml(toml: &TomlConfig, overrides: ConfigOverrides) -> Self {
        let mut pipeline = PipelineConfig::from(&toml.pipeline);
        if let Some(volume) = overrides.volume {
            pipeline.initial_volume = volume.clamp(0.0, 1.0);
        }

        Self {
            pipeline,
            transcode: TranscodeSettings::from(&toml.transcode),
            output_device: overrides.device.or_else(|| toml.output.device.clone()),
            log_level: overrides
                .log_level
                .unwrap_or_else(|| toml.logging.level.clone()),
        }
    }
}
