//! Unit tests for configuration resolution and graceful degradation
//!
//! Tests the behavior of:
//! - Missing TOML files do not prevent startup
//! - Priority order for config file resolution (CLI > env > platform default)
//! - Existing but malformed files are reported as errors
//!
//! Note: Uses serial_test crate to prevent ENV variable race conditions.
//! Tests that manipulate CADENCE_CONFIG are marked with #[serial].

use cadence_common::config::{
    default_config_path, resolve_config_path, TomlConfig, CONFIG_ENV_VAR,
};
use cadence_common::Error;
use serial_test::serial;
use std::env;
use std::fs;
use std::path::PathBuf;
use tempfile::TempDir;

#[test]
#[serial]
fn test_env_var_used_when_no_cli_path() {
    env::set_var(CONFIG_ENV_VAR, "/tmp/cadence-env-config.toml");

    let resolved = resolve_config_path(None);
    assert_eq!(resolved, Some(PathBuf::from("/tmp/cadence-env-config.toml")));

    env::remove_var(CONFIG_ENV_VAR);
}

#[test]
#[serial]
fn test_cli_path_beats_env_var() {
    env::set_var(CONFIG_ENV_VAR, "/tmp/cadence-env-config.toml");

    let cli = PathBuf::from("/tmp/cadence-cli-config.toml");
    let resolved = resolve_config_path(Some(&cli));
    assert_eq!(resolved, Some(cli));

    env::remove_var(CONFIG_ENV_VAR);
}

#[test]
#[serial]
fn test_platform_default_when_nothing_set() {
    env::remove_var(CONFIG_ENV_VAR);

    assert_eq!(resolve_config_path(None), default_config_path());
}

#[test]
#[serial]
fn test_missing_file_falls_back_to_defaults() {
    let dir = TempDir::new().unwrap();
    let missing = dir.path().join("does-not-exist.toml");

    let config = TomlConfig::load_or_default(Some(&missing)).unwrap();
    assert_eq!(config, TomlConfig::default());
}

#[test]
#[serial]
fn test_existing_file_is_loaded() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("config.toml");
    fs::write(
        &path,
        r#"
        [pipeline]
        seek_guard_ms = 450
        unsupported_extensions = ["ape", "wv"]

        [output]
        device = "USB DAC"

        [logging]
        level = "debug"
        "#,
    )
    .unwrap();

    let config = TomlConfig::load_or_default(Some(&path)).unwrap();
    assert_eq!(config.pipeline.seek_guard_ms, 450);
    assert_eq!(config.pipeline.unsupported_extensions, vec!["ape", "wv"]);
    assert_eq!(config.output.device.as_deref(), Some("USB DAC"));
    assert_eq!(config.logging.level, "debug");
    // Untouched sections keep defaults
    assert_eq!(config.transcode.bitrate_kbps, 192);
}

#[test]
#[serial]
fn test_malformed_file_is_error() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("config.toml");
    fs::write(&path, "[transcode]\nsample_rate = \"fast\"\n").unwrap();

    let result = TomlConfig::load_or_default(Some(&path));
    assert!(matches!(result, Err(Error::Config(_))));
}
