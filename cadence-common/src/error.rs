//! Errors raised while loading configuration and parsing shared types

use std::path::PathBuf;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    /// Config file exists but could not be read
    #[error("Failed to read config file {}: {source}", path.display())]
    ConfigRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Config text is not valid TOML or a value has the wrong type
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Unknown playback mode '{0}' (expected sequential, shuffle or repeat-one)")]
    UnknownMode(String),
}
