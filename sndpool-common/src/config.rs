//! Bootstrap configuration lookup and loading
//!
//! Configuration file resolution follows a fixed priority order:
//! 1. Command-line argument (highest priority)
//! 2. Environment variable
//! 3. Per-user config directory (`<config_dir>/<app>/config.toml`)
//! 4. System-wide `/etc/<app>/config.toml` (Unix only)
//!
//! A missing configuration file is never fatal: callers get built-in defaults
//! and a warning. A file that exists but cannot be parsed is an error.

use crate::{Error, Result};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Logging section shared by every sndpool binary
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default filter directive (trace, debug, info, warn, error, or a full
    /// `EnvFilter` directive such as `sndpool_engine=debug`).
    ///
    /// `RUST_LOG` takes precedence when set.
    pub level: String,

    /// Include the module target in each log line
    pub with_target: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            with_target: true,
        }
    }
}

/// Find the configuration file for `app_name`.
///
/// Returns `None` when no candidate exists; an explicit CLI path or
/// environment path is returned even if it does not exist so that the
/// loader can report it.
pub fn resolve_config_path(
    cli_arg: Option<&Path>,
    env_var_name: &str,
    app_name: &str,
) -> Option<PathBuf> {
    // Priority 1: Command-line argument
    if let Some(path) = cli_arg {
        return Some(path.to_path_buf());
    }

    // Priority 2: Environment variable
    if let Ok(path) = std::env::var(env_var_name) {
        if !path.is_empty() {
            return Some(PathBuf::from(path));
        }
    }

    // Priority 3: per-user config directory
    if let Some(user_config) = dirs::config_dir().map(|d| d.join(app_name).join("config.toml")) {
        if user_config.exists() {
            return Some(user_config);
        }
    }

    // Priority 4: system-wide config
    if cfg!(unix) {
        let system_config = PathBuf::from("/etc").join(app_name).join("config.toml");
        if system_config.exists() {
            return Some(system_config);
        }
    }

    None
}

/// Load a TOML file into `T`, falling back to `T::default()` when the file
/// is absent.
pub fn load_toml_or_default<T>(path: Option<&Path>) -> Result<T>
where
    T: DeserializeOwned + Default,
{
    let Some(path) = path else {
        info!("No configuration file found, using built-in defaults");
        return Ok(T::default());
    };

    let content = match std::fs::read_to_string(path) {
        Ok(content) => content,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            warn!(
                "Configuration file {} not found, using built-in defaults",
                path.display()
            );
            return Ok(T::default());
        }
        Err(e) => return Err(Error::Io(e)),
    };

    let parsed = toml::from_str::<T>(&content).map_err(|source| Error::Parse {
        path: path.to_path_buf(),
        source,
    })?;

    info!("Loaded configuration from {}", path.display());
    Ok(parsed)
}
