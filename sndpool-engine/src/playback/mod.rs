//! Playback core: resource cache, channel multiplexer, streaming engine and
//! the poller that drives them

pub mod cache;
pub mod channels;
pub mod engine;
pub mod poller;
pub mod streaming;
pub mod types;

pub use cache::{AssetName, MAX_NAME_BYTES};
pub use channels::LoopState;
pub use engine::AudioEngine;
pub use types::{AssetKind, EngineStats, Handle, PlaybackInfo};
