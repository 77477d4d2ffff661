//! Playback types shared across modules

use crate::audio::SampleFormat;
use crate::hardware::ChannelId;
use serde::Serialize;

/// Opaque asset handle returned by `load`.
///
/// Values below the stream capacity address the stream table; everything
/// above addresses the effect table, offset by the stream capacity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct Handle(usize);

impl Handle {
    /// Wrap a raw handle value (e.g. one handed across an FFI or script boundary)
    pub fn from_raw(raw: usize) -> Self {
        Handle(raw)
    }

    pub fn raw(self) -> usize {
        self.0
    }

    pub(crate) fn stream(index: usize) -> Self {
        Handle(index)
    }

    pub(crate) fn sfx(index: usize, stream_capacity: usize) -> Self {
        Handle(stream_capacity + index)
    }

    /// Decode into a table index
    pub(crate) fn slot(self, stream_capacity: usize) -> SlotRef {
        if self.0 < stream_capacity {
            SlotRef::Stream(self.0)
        } else {
            SlotRef::Sfx(self.0 - stream_capacity)
        }
    }
}

impl std::fmt::Display for Handle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Table index a handle resolves to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum SlotRef {
    Stream(usize),
    Sfx(usize),
}

/// Which table an asset lives in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AssetKind {
    /// Double-buffered from its source
    Stream,
    /// Fully resident in sound memory
    Sfx,
}

/// Snapshot returned by `query_info`
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PlaybackInfo {
    pub kind: AssetKind,
    pub playing: bool,
    /// Samples per channel in the asset
    pub total_samples: u64,
    /// Samples played in the current pass
    pub played_samples: u64,
    pub format: SampleFormat,
    /// Hardware channel in use (left channel for streams)
    pub channel: Option<ChannelId>,
}

/// Table occupancy snapshot
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EngineStats {
    pub streams_bound: usize,
    pub streams_playing: usize,
    pub free_stream_slots: usize,
    pub sfx_bound: usize,
    pub free_sfx_slots: usize,
    pub busy_channels: usize,
    pub mux_channels: usize,
    pub clock: u64,
}
