//! Common error types for sndpool

use std::path::PathBuf;
use thiserror::Error;

/// Common result type for sndpool operations
pub type Result<T> = std::result::Result<T, Error>;

/// Common error types across the sndpool crates
#[derive(Error, Debug)]
pub enum Error {
    /// I/O operation error (wraps std::io::Error)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// TOML file exists but could not be parsed
    #[error("Failed to parse {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    /// Configuration loading or validation error
    #[error("Configuration error: {0}")]
    Config(String),
}
