//! # sndpool common library
//!
//! Shared code for the sndpool workspace:
//! - Error type used by configuration loading
//! - Bootstrap TOML configuration lookup and parsing
//! - Tracing subscriber initialisation

pub mod config;
pub mod error;
pub mod logging;

pub use config::{load_toml_or_default, resolve_config_path, LoggingConfig};
pub use error::{Error, Result};
pub use logging::init_tracing;
