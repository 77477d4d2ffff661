//! Resource cache
//!
//! Two fixed tables of slots, one for streamed assets and one for resident
//! effects. Slots are created once when the engine starts and are bound and
//! unbound for the rest of its life; nothing is ever added or removed.
//!
//! Slot selection for a new asset name:
//! 1. A bound slot with the same name (dedup, returned untouched)
//! 2. The first free slot
//! 3. The bound slot with the smallest recency tick (first one wins ties)

use super::channels::{ChannelMux, LoopState};
use crate::audio::{SampleFormat, SampleSource};
use crate::hardware::{ChannelId, SoundHardware, SpuAddr, PAN_CENTER};
use tracing::debug;

/// Longest stored asset name in bytes; longer names are truncated
pub const MAX_NAME_BYTES: usize = 127;

/// Asset identity, truncated to [`MAX_NAME_BYTES`].
///
/// Two names that share the first 127 bytes compare equal.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct AssetName(String);

impl AssetName {
    pub fn new(name: &str) -> Self {
        let mut end = name.len().min(MAX_NAME_BYTES);
        while !name.is_char_boundary(end) {
            end -= 1;
        }
        AssetName(name[..end].to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for AssetName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Streamed asset slot
#[derive(Debug)]
pub struct StreamSlot {
    pub name: Option<AssetName>,
    pub source: Option<SampleSource>,
    /// Double buffers for the left (or only) and right channel
    pub buffers: [Option<SpuAddr>; 2],
    /// Hardware channels reserved for this slot
    pub channels: [ChannelId; 2],
    pub format: SampleFormat,
    pub stereo: bool,
    pub sample_rate: u32,
    pub total_samples: u64,
    /// Sample the asset starts from after a rewind
    pub seek_origin: u64,
    /// Sample the current pass started from
    pub pass_origin: u64,
    /// Samples played in the current pass
    pub played_samples: u64,
    pub looping: bool,
    pub loop_offset: u64,
    /// Interleaved source bytes for the next half
    pub staging: Vec<u8>,
    pub staged_ready: bool,
    pub next_is_upper: bool,
    pub first_refill: bool,
    pub playing: bool,
    /// Set once the slot has been started; the next play rewinds
    pub has_played: bool,
    pub volume: u8,
    /// Pan for the left and right voice
    pub pan: [u8; 2],
    pub last_used: u64,
}

impl StreamSlot {
    pub fn new(channels: [ChannelId; 2]) -> Self {
        Self {
            name: None,
            source: None,
            buffers: [None, None],
            channels,
            format: SampleFormat::Pcm16,
            stereo: false,
            sample_rate: 0,
            total_samples: 0,
            seek_origin: 0,
            pass_origin: 0,
            played_samples: 0,
            looping: false,
            loop_offset: 0,
            staging: Vec::new(),
            staged_ready: false,
            next_is_upper: true,
            first_refill: true,
            playing: false,
            has_played: false,
            volume: 0,
            pan: [PAN_CENTER; 2],
            last_used: 0,
        }
    }

    pub fn is_bound(&self) -> bool {
        self.name.is_some()
    }

    /// Voices used by this slot
    pub fn active_channels(&self) -> &[ChannelId] {
        if self.stereo {
            &self.channels
        } else {
            &self.channels[..1]
        }
    }
}

/// Resident effect slot
#[derive(Debug, Clone)]
pub struct SfxSlot {
    pub name: Option<AssetName>,
    pub buffer: Option<SpuAddr>,
    pub format: SampleFormat,
    pub sample_rate: u32,
    pub total_samples: u32,
    pub looping: bool,
    pub loop_offset: u32,
    pub loop_state: LoopState,
    /// Position register has been observed away from zero since the last start
    pub seen_nonzero: bool,
    /// Channel multiplexer slot currently playing this effect
    pub channel: Option<usize>,
    pub volume: u8,
    pub pan: u8,
    pub last_used: u64,
}

impl Default for SfxSlot {
    fn default() -> Self {
        Self {
            name: None,
            buffer: None,
            format: SampleFormat::Pcm16,
            sample_rate: 0,
            total_samples: 0,
            looping: false,
            loop_offset: 0,
            loop_state: LoopState::NotLooping,
            seen_nonzero: false,
            channel: None,
            volume: 0,
            pan: PAN_CENTER,
            last_used: 0,
        }
    }
}

impl SfxSlot {
    pub fn is_bound(&self) -> bool {
        self.name.is_some()
    }
}

/// Where a new asset will go
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotChoice {
    /// Already cached under the same name
    Existing(usize),
    /// Unbound slot
    Free(usize),
    /// Least recently used bound slot, to be released first
    Evict(usize),
}

trait CacheSlot {
    fn bound_name(&self) -> Option<&AssetName>;
    fn recency(&self) -> u64;
}

impl CacheSlot for StreamSlot {
    fn bound_name(&self) -> Option<&AssetName> {
        self.name.as_ref()
    }
    fn recency(&self) -> u64 {
        self.last_used
    }
}

impl CacheSlot for SfxSlot {
    fn bound_name(&self) -> Option<&AssetName> {
        self.name.as_ref()
    }
    fn recency(&self) -> u64 {
        self.last_used
    }
}

fn choose<S: CacheSlot>(slots: &[S], name: &AssetName) -> Option<SlotChoice> {
    if let Some(i) = slots.iter().position(|s| s.bound_name() == Some(name)) {
        return Some(SlotChoice::Existing(i));
    }
    if let Some(i) = slots.iter().position(|s| s.bound_name().is_none()) {
        return Some(SlotChoice::Free(i));
    }
    let mut victim: Option<(usize, u64)> = None;
    for (i, slot) in slots.iter().enumerate() {
        match victim {
            Some((_, tick)) if slot.recency() >= tick => {}
            _ => victim = Some((i, slot.recency())),
        }
    }
    victim.map(|(i, _)| SlotChoice::Evict(i))
}

/// Stream and effect tables
#[derive(Debug)]
pub struct ResourceCache {
    pub streams: Vec<StreamSlot>,
    pub sfx: Vec<SfxSlot>,
}

impl ResourceCache {
    /// Build the tables. Stream `i` owns hardware channels
    /// `first_stream_channel + 2i` and `first_stream_channel + 2i + 1`.
    pub fn new(stream_capacity: usize, sfx_capacity: usize, first_stream_channel: ChannelId) -> Self {
        let streams = (0..stream_capacity)
            .map(|i| {
                let left = first_stream_channel + 2 * i;
                StreamSlot::new([left, left + 1])
            })
            .collect();
        Self {
            streams,
            sfx: vec![SfxSlot::default(); sfx_capacity],
        }
    }

    pub fn choose_stream(&self, name: &AssetName) -> Option<SlotChoice> {
        choose(&self.streams, name)
    }

    pub fn choose_sfx(&self, name: &AssetName) -> Option<SlotChoice> {
        choose(&self.sfx, name)
    }

    pub fn free_stream_slots(&self) -> usize {
        self.streams.iter().filter(|s| !s.is_bound()).count()
    }

    pub fn free_sfx_slots(&self) -> usize {
        self.sfx.iter().filter(|s| !s.is_bound()).count()
    }

    /// Stop, free and unbind a stream slot. Unbound slots are left alone.
    pub fn release_stream<H: SoundHardware>(&mut self, index: usize, hw: &mut H) {
        for addr in self.reclaim_stream(index, hw).into_iter().flatten() {
            hw.free(addr);
        }
    }

    /// Stop and unbind a stream slot, handing its buffers to the caller
    /// instead of freeing them. Unbound slots yield no buffers.
    pub fn reclaim_stream<H: SoundHardware>(&mut self, index: usize, hw: &mut H) -> [Option<SpuAddr>; 2] {
        let Some(slot) = self.streams.get_mut(index) else {
            return [None, None];
        };
        let Some(name) = slot.name.take() else {
            return [None, None];
        };
        if slot.playing {
            for &ch in slot.active_channels() {
                hw.stop(ch);
            }
        }
        let buffers = [slot.buffers[0].take(), slot.buffers[1].take()];
        debug!("Released stream slot {} ({})", index, name);
        *slot = StreamSlot::new(slot.channels);
        buffers
    }

    /// Stop, unbind from its channel, free and unbind an effect slot.
    /// Unbound slots are left alone.
    pub fn release_sfx<H: SoundHardware>(&mut self, index: usize, hw: &mut H, mux: &mut ChannelMux) {
        let Some(slot) = self.sfx.get(index) else {
            return;
        };
        if !slot.is_bound() {
            return;
        }
        mux.stop_sfx(index, &mut self.sfx, hw);

        let slot = &mut self.sfx[index];
        if let Some(addr) = slot.buffer.take() {
            hw.free(addr);
        }
        if let Some(name) = slot.name.take() {
            debug!("Released effect slot {} ({})", index, name);
        }
        *slot = SfxSlot::default();
    }
}
