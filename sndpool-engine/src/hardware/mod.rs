//! Sound coprocessor interface
//!
//! The engine talks to the coprocessor through [`SoundHardware`]: a pool of
//! sound memory, a fixed set of playback voices ("channels") and one wrapping
//! 16-bit sample-position register per voice. The hardware raises no
//! completion signal; the poller infers progress from the position register.

pub mod simulated;

pub use simulated::{HwEvent, SimulatedHardware};

use crate::audio::SampleFormat;
use serde::Serialize;
use thiserror::Error;

/// Hardware voice index
pub type ChannelId = usize;

/// Longest sample run a single start command can express
pub const MAX_VOICE_SAMPLES: u32 = 65_534;

/// Position registers wrap at this value
pub const POSITION_MODULUS: u32 = 0x1_0000;

/// Address inside sound memory
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct SpuAddr(pub u32);

impl SpuAddr {
    pub fn offset(self, bytes: usize) -> SpuAddr {
        SpuAddr(self.0 + bytes as u32)
    }
}

impl std::fmt::Display for SpuAddr {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:#08x}", self.0)
    }
}

/// Everything needed to start one voice
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct StartCommand {
    pub channel: ChannelId,
    pub address: SpuAddr,
    pub length_samples: u32,
    pub format: SampleFormat,
    /// Loop the whole `[address, address + length)` range
    pub looping: bool,
    pub volume: u8,
    pub pan: u8,
    pub sample_rate: u32,
}

/// Coprocessor command failures
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum HardwareError {
    #[error("channel {0} does not exist")]
    InvalidChannel(ChannelId),

    #[error("start length {length} exceeds voice limit {limit}")]
    LengthTooLarge { length: u32, limit: u32 },

    #[error("sound memory access {addr}+{len} out of bounds")]
    OutOfBounds { addr: SpuAddr, len: usize },

    #[error("bus error: {0}")]
    Bus(String),
}

/// Coprocessor access used by the engine.
///
/// All calls are made with the engine lock held, so implementations never see
/// concurrent calls from the engine.
pub trait SoundHardware: Send + 'static {
    /// Total number of playback voices
    fn channel_count(&self) -> usize;

    /// Claim `bytes` of sound memory
    fn alloc(&mut self, bytes: usize) -> Option<SpuAddr>;

    /// Release memory returned by [`SoundHardware::alloc`]
    fn free(&mut self, addr: SpuAddr);

    /// Copy `data` into sound memory
    fn upload(&mut self, addr: SpuAddr, data: &[u8]) -> Result<(), HardwareError>;

    /// Start a voice. Lengths above [`MAX_VOICE_SAMPLES`] are rejected.
    fn start(&mut self, cmd: &StartCommand) -> Result<(), HardwareError>;

    /// Stop a voice. Stopping an idle voice is harmless.
    fn stop(&mut self, channel: ChannelId);

    /// Update volume and pan of a live voice
    fn set_volume_pan(&mut self, channel: ChannelId, volume: u8, pan: u8);

    /// Read the voice's wrapping sample-position register
    fn position(&mut self, channel: ChannelId) -> Result<u16, HardwareError>;
}

/// Pan value for centre
pub const PAN_CENTER: u8 = 128;
