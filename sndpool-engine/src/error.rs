//! Error types for sndpool-engine
//!
//! Every failure is reported to the caller as a value; nothing crosses the
//! engine boundary as a panic.

use crate::hardware::HardwareError;
use thiserror::Error;

/// Main error type for the engine
#[derive(Error, Debug)]
pub enum Error {
    /// Source failed header validation, or has no sample data
    #[error("Invalid format: {0}")]
    InvalidFormat(String),

    /// Hardware memory pool could not satisfy a buffer request
    #[error("Sound memory allocation of {bytes} bytes failed")]
    AllocationFailure { bytes: usize },

    /// Sample data does not fit the fixed staging buffer
    #[error("Sample of {bytes} bytes exceeds staging capacity of {capacity} bytes")]
    OversizedSample { bytes: usize, capacity: usize },

    /// A slot table was configured with no usable capacity
    #[error("Capacity configuration error: {0}")]
    CapacityConfiguration(String),

    /// Argument outside the range the asset allows
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// Coprocessor rejected a command
    #[error("Hardware error: {0}")]
    Hardware(#[from] HardwareError),

    /// File I/O errors
    #[error("File I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration file loading or validation errors
    #[error("Configuration error: {0}")]
    Config(String),
}

impl From<sndpool_common::Error> for Error {
    fn from(e: sndpool_common::Error) -> Self {
        Error::Config(e.to_string())
    }
}

/// Convenience Result type using the engine Error
pub type Result<T> = std::result::Result<T, Error>;
