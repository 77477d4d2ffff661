//! Engine configuration
//!
//! Bootstrap settings loaded once from TOML (all optional, built-in defaults
//! otherwise). Table capacities are fixed for the lifetime of the engine:
//! slots are created once at startup and reused forever.

use crate::error::{Error, Result};
use crate::hardware::{simulated, MAX_VOICE_SAMPLES, POSITION_MODULUS};
use serde::{Deserialize, Serialize};
use sndpool_common::LoggingConfig;
use std::path::Path;
use std::time::Duration;

/// Environment variable naming the configuration file
pub const CONFIG_ENV_VAR: &str = "SNDPOOL_CONFIG";

/// Slot table and timing parameters
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Stream slots; each reserves two hardware channels
    pub stream_capacity: usize,

    /// Resident effect slots
    pub sfx_capacity: usize,

    /// Voices provided by the coprocessor
    pub hardware_channels: usize,

    /// Assets longer than this many samples are streamed
    pub single_shot_max_samples: u32,

    /// Samples per half of a stream's double buffer
    pub stream_half_samples: u32,

    /// Fixed staging buffer for resident effect uploads
    pub sfx_staging_bytes: usize,

    /// Poller cadence
    pub poll_interval_ms: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            stream_capacity: 8,
            sfx_capacity: 512,
            hardware_channels: simulated::DEFAULT_CHANNELS,
            single_shot_max_samples: MAX_VOICE_SAMPLES,
            stream_half_samples: 8_192,
            sfx_staging_bytes: MAX_VOICE_SAMPLES as usize * 2,
            poll_interval_ms: 50,
        }
    }
}

impl EngineConfig {
    /// Channels left for resident effects after streams take theirs
    pub fn mux_channels(&self) -> usize {
        self.hardware_channels
            .saturating_sub(self.stream_capacity * 2)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    /// Reject configurations the engine cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.stream_capacity == 0 {
            return Err(Error::CapacityConfiguration(
                "stream_capacity must be at least 1".to_string(),
            ));
        }
        if self.sfx_capacity == 0 {
            return Err(Error::CapacityConfiguration(
                "sfx_capacity must be at least 1".to_string(),
            ));
        }
        if self.mux_channels() == 0 {
            return Err(Error::CapacityConfiguration(format!(
                "{} hardware channels leave none for effects after {} streams",
                self.hardware_channels, self.stream_capacity
            )));
        }
        if self.stream_half_samples == 0 || self.stream_half_samples % 2 != 0 {
            return Err(Error::Config(format!(
                "stream_half_samples must be even and non-zero, got {}",
                self.stream_half_samples
            )));
        }
        if self.stream_half_samples as u64 * 2 >= POSITION_MODULUS as u64 {
            return Err(Error::Config(format!(
                "double buffer of {} samples does not fit the position register",
                self.stream_half_samples as u64 * 2
            )));
        }
        if self.single_shot_max_samples == 0 || self.single_shot_max_samples > MAX_VOICE_SAMPLES {
            return Err(Error::Config(format!(
                "single_shot_max_samples must be within 1..={}",
                MAX_VOICE_SAMPLES
            )));
        }
        if self.poll_interval_ms == 0 {
            return Err(Error::Config("poll_interval_ms must be non-zero".to_string()));
        }
        Ok(())
    }
}

/// Simulated coprocessor parameters (used by the `sndpool` binary)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulatorConfig {
    /// Sound memory size in bytes
    pub pool_bytes: usize,
}

impl Default for SimulatorConfig {
    fn default() -> Self {
        Self {
            pool_bytes: simulated::DEFAULT_POOL_BYTES,
        }
    }
}

/// Bootstrap configuration file
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TomlConfig {
    pub logging: LoggingConfig,
    pub engine: EngineConfig,
    pub simulator: SimulatorConfig,
}

impl TomlConfig {
    /// Resolve and load the configuration file; missing files yield defaults
    pub fn load(cli_path: Option<&Path>) -> Result<Self> {
        let path = sndpool_common::resolve_config_path(cli_path, CONFIG_ENV_VAR, "sndpool");
        let config: TomlConfig = sndpool_common::load_toml_or_default(path.as_deref())?;
        Ok(config)
    }
}
