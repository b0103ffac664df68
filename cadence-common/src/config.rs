//! Configuration loading and config file resolution
//!
//! Bootstrap configuration lives in a single TOML file. Resolution order:
//! 1. Explicit path (command-line argument)
//! 2. `CADENCE_CONFIG` environment variable
//! 3. `<platform config dir>/cadence/config.toml`
//! 4. Built-in defaults
//!
//! A missing file is not an error: the player starts with defaults and logs a
//! warning. A file that exists but does not parse is an error.

use crate::{Error, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Environment variable naming an explicit config file
pub const CONFIG_ENV_VAR: &str = "CADENCE_CONFIG";

/// Complete bootstrap configuration
#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
#[serde(default)]
pub struct TomlConfig {
    pub pipeline: PipelineSection,
    pub transcode: TranscodeSection,
    pub output: OutputSection,
    pub logging: LoggingConfig,
}

/// Playback pipeline timing and format policy
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct PipelineSection {
    /// Minimum position change before a position update is published
    pub position_coalesce_ms: u64,

    /// Position jumps larger than this are treated as seeks
    pub seek_threshold_ms: u64,

    /// How long position reports are suppressed after a seek
    pub seek_guard_ms: u64,

    /// Delay before advancing after an unrecoverable failure
    pub advance_delay_ms: u64,

    /// Extensions the native decoder is known not to handle
    pub unsupported_extensions: Vec<String>,

    /// Initial output volume (0.0-1.0)
    pub initial_volume: f32,
}

impl Default for PipelineSection {
    fn default() -> Self {
        Self {
            position_coalesce_ms: 500,
            seek_threshold_ms: 1000,
            seek_guard_ms: 300,
            advance_delay_ms: 3000,
            unsupported_extensions: default_unsupported_extensions(),
            initial_volume: 0.7,
        }
    }
}

/// Lossless formats the native decoding stack cannot play
pub fn default_unsupported_extensions() -> Vec<String> {
    ["ape", "alac", "wv", "tta", "tak", "dsf", "dff"]
        .iter()
        .map(|ext| ext.to_string())
        .collect()
}

/// External transcoder settings
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct TranscodeSection {
    /// ffmpeg binary (looked up on PATH when not absolute)
    pub ffmpeg_path: PathBuf,

    /// ffprobe binary (looked up on PATH when not absolute)
    pub ffprobe_path: PathBuf,

    /// Output sample rate in Hz
    pub sample_rate: u32,

    /// Output channel count
    pub channels: u16,

    /// Output bitrate ceiling in kbit/s
    pub bitrate_kbps: u32,

    /// Directory for transcoded files (system temp dir when unset)
    pub temp_dir: Option<PathBuf>,

    /// Prefix of every transcoded file name
    pub file_prefix: String,

    /// Upper bound for a diagnostic codec probe
    pub probe_timeout_ms: u64,
}

impl Default for TranscodeSection {
    fn default() -> Self {
        Self {
            ffmpeg_path: PathBuf::from("ffmpeg"),
            ffprobe_path: PathBuf::from("ffprobe"),
            sample_rate: 44100,
            channels: 2,
            bitrate_kbps: 192,
            temp_dir: None,
            file_prefix: "cadence-transcode".to_string(),
            probe_timeout_ms: 10_000,
        }
    }
}

/// Audio output device settings
#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
#[serde(default)]
pub struct OutputSection {
    /// Output device name (default device when unset)
    pub device: Option<String>,
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level or filter directive (trace, debug, info, warn, error)
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

impl TomlConfig {
    /// Parse configuration from TOML text.
    pub fn from_toml_str(content: &str) -> Result<Self> {
        toml::from_str(content).map_err(|e| Error::Config(format!("Failed to parse TOML: {}", e)))
    }

    /// Load configuration from a specific file.
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|source| Error::ConfigRead {
            path: path.to_path_buf(),
            source,
        })?;
        let config = Self::from_toml_str(&content)?;
        info!("Loaded configuration from {}", path.display());
        Ok(config)
    }

    /// Resolve and load configuration, falling back to defaults.
    ///
    /// Only a file that exists but cannot be read or parsed is an error.
    pub fn load_or_default(cli_path: Option<&Path>) -> Result<Self> {
        match resolve_config_path(cli_path) {
            Some(path) if path.exists() => Self::load_from(&path),
            Some(path) => {
                warn!(
                    "Config file {} not found, using built-in defaults",
                    path.display()
                );
                Ok(Self::default())
            }
            None => {
                warn!("No config file location available, using built-in defaults");
                Ok(Self::default())
            }
        }
    }
}

/// Config file location following the documented priority order.
///
/// Returns `None` only when no explicit path is given and the platform has no
/// config directory.
pub fn resolve_config_path(cli_path: Option<&Path>) -> Option<PathBuf> {
    // Priority 1: Command-line argument
    if let Some(path) = cli_path {
        return Some(path.to_path_buf());
    }

    // Priority 2: Environment variable
    if let Ok(path) = std::env::var(CONFIG_ENV_VAR) {
        if !path.trim().is_empty() {
            return Some(PathBuf::from(path));
        }
    }

    // Priority 3: Platform config directory
    default_config_path()
}

/// `<platform config dir>/cadence/config.toml`
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("cadence").join("config.toml"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = TomlConfig::default();
        assert_eq!(config.pipeline.position_coalesce_ms, 500);
        assert_eq!(config.pipeline.seek_threshold_ms, 1000);
        assert_eq!(config.pipeline.advance_delay_ms, 3000);
        assert_eq!(config.transcode.sample_rate, 44100);
        assert_eq!(config.transcode.channels, 2);
        assert_eq!(config.logging.level, "info");
        assert!(config.pipeline.unsupported_extensions.contains(&"ape".to_string()));
    }

    #[test]
    fn test_partial_file_keeps_defaults() {
        let config = TomlConfig::from_toml_str(
            r#"
            [pipeline]
            advance_delay_ms = 5000

            [transcode]
            ffmpeg_path = "/opt/ffmpeg/bin/ffmpeg"
            "#,
        )
        .unwrap();

        assert_eq!(config.pipeline.advance_delay_ms, 5000);
        assert_eq!(config.pipeline.seek_guard_ms, 300);
        assert_eq!(config.transcode.ffmpeg_path, PathBuf::from("/opt/ffmpeg/bin/ffmpeg"));
        assert_eq!(config.transcode.ffprobe_path, PathBuf::from("ffprobe"));
    }

    #[test]
    fn test_invalid_toml_is_config_error() {
        let result = TomlConfig::from_toml_str("[pipeline\nadvance_delay_ms = ");
        assert!(matches!(result, Err(Error::Config(_))));
    }

    #[test]
    fn test_cli_path_wins() {
        let path = PathBuf::from("/tmp/explicit-cadence.toml");
        assert_eq!(resolve_config_path(Some(&path)), Some(path));
    }
}
