//! # sndpool engine library
//!
//! Audio resource manager and streaming engine for a sound coprocessor with
//! a fixed set of voices and a small sound memory.
//!
//! **Architecture:**
//! - Resource cache: fixed stream and effect tables with name dedup and LRU
//!   eviction
//! - Channel multiplexer: effect voices shared by LRU, loop-by-restart for
//!   loop points the hardware cannot express
//! - Streaming engine: double-buffered refill of assets too large for one
//!   voice, loop by reseek
//! - Poller: one background thread that drives every time-based transition
//!
//! The coprocessor sits behind [`hardware::SoundHardware`];
//! [`hardware::SimulatedHardware`] is an in-process model of it.

pub mod audio;
pub mod config;
pub mod error;
pub mod hardware;
pub mod playback;

pub use config::{EngineConfig, TomlConfig};
pub use error::{Error, Result};
pub use playback::{AudioEngine, Handle, PlaybackInfo};
