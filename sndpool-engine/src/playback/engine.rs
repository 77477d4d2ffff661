//! Audio engine
//!
//! Front door for the calling audio subsystem. Foreground calls and the
//! poller share one lock over the stream table, the effect table, the
//! channel multiplexer and the recency clock. The poller is the only writer
//! of the clock, and it advances the clock while still holding the lock, so
//! every recency stamp written during an iteration sees the same value.

use super::cache::{AssetName, ResourceCache, SfxSlot, SlotChoice, StreamSlot};
use super::channels::ChannelMux;
use super::poller::Poller;
use super::streaming::{self, StreamGeometry, StreamScratch};
use super::types::{AssetKind, EngineStats, Handle, PlaybackInfo, SlotRef};
use crate::audio::{transform, AssetSource, SampleSource, WaveInfo};
use crate::config::EngineConfig;
use crate::error::{Error, Result};
use crate::hardware::{SoundHardware, SpuAddr};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::{debug, info, warn};

/// Single pan value for a mono voice
fn mono_pan(pan_left: u8, pan_right: u8) -> u8 {
    ((pan_left as u16 + pan_right as u16) / 2) as u8
}

/// Everything guarded by the engine lock
struct EngineState<H: SoundHardware> {
    hw: H,
    config: EngineConfig,
    geometry: StreamGeometry,
    cache: ResourceCache,
    mux: ChannelMux,
    /// Fixed upload buffer for resident effects
    sfx_staging: Vec<u8>,
    scratch: StreamScratch,
    /// Recency clock, advanced once per poll iteration
    clock: u64,
}

type SharedState<H> = Arc<Mutex<EngineState<H>>>;

fn lock<H: SoundHardware>(shared: &SharedState<H>) -> MutexGuard<'_, EngineState<H>> {
    // Every state transition completes before the lock is released, so a
    // poisoned lock still guards consistent tables
    shared.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Streaming and resident-effect playback over a [`SoundHardware`]
pub struct AudioEngine<H: SoundHardware> {
    shared: SharedState<H>,
    poller: Mutex<Option<Poller>>,
}

impl<H: SoundHardware> AudioEngine<H> {
    /// Build the slot tables. The poller is not started.
    pub fn new(config: EngineConfig, hw: H) -> Result<Self> {
        config.validate()?;
        if hw.channel_count() < config.hardware_channels {
            return Err(Error::CapacityConfiguration(format!(
                "configured for {} channels, hardware has {}",
                config.hardware_channels,
                hw.channel_count()
            )));
        }

        let mux = ChannelMux::new(config.mux_channels());
        let cache = ResourceCache::new(config.stream_capacity, config.sfx_capacity, mux.len());
        info!(
            "Audio engine ready: {} stream slots, {} effect slots, {} effect channels",
            config.stream_capacity,
            config.sfx_capacity,
            mux.len()
        );

        let state = EngineState {
            geometry: StreamGeometry {
                half_samples: config.stream_half_samples,
            },
            sfx_staging: vec![0; config.sfx_staging_bytes],
            scratch: StreamScratch::default(),
            clock: 0,
            hw,
            config,
            cache,
            mux,
        };

        Ok(Self {
            shared: Arc::new(Mutex::new(state)),
            poller: Mutex::new(None),
        })
    }

    fn state(&self) -> MutexGuard<'_, EngineState<H>> {
        lock(&self.shared)
    }

    /// Load an asset under `name`.
    ///
    /// Assets longer than the single-shot ceiling are streamed and start
    /// from `seek_samples`; shorter ones become resident effects and ignore
    /// it. A name already in the cache returns its existing handle.
    pub fn load(&self, name: &str, source: AssetSource, seek_samples: u32) -> Result<Handle> {
        let (source, info) = match source.open() {
            Ok(opened) => opened,
            Err(e) => {
                warn!("Rejected load of '{}': {}", name, e);
                return Err(e);
            }
        };
        let name = AssetName::new(name);

        let mut state = self.state();
        let result = if info.total_samples() > state.config.single_shot_max_samples as u64 {
            state.load_stream(name.clone(), source, info, seek_samples)
        } else {
            state.load_sfx(name.clone(), source, info)
        };
        if let Err(e) = &result {
            warn!("Load of '{}' failed: {}", name, e);
        }
        result
    }

    /// Start playback. Unknown or unbound handles are ignored.
    ///
    /// A stream that is already playing is left alone; a stream that has
    /// played before rewinds to its load position. An effect that is
    /// already playing restarts on its own channel.
    pub fn play(
        &self,
        handle: Handle,
        volume: u8,
        pan_left: u8,
        pan_right: u8,
        looping: bool,
        loop_offset: u32,
    ) -> Result<()> {
        let mut state = self.state();
        match handle.slot(state.cache.streams.len()) {
            SlotRef::Stream(i) => {
                state.play_stream(i, volume, pan_left, pan_right, looping, loop_offset)
            }
            SlotRef::Sfx(i) => state.play_sfx(i, volume, pan_left, pan_right, looping, loop_offset),
        }
    }

    /// Stop playback. Idempotent.
    pub fn stop(&self, handle: Handle) {
        let mut state = self.state();
        let state = &mut *state;
        match handle.slot(state.cache.streams.len()) {
            SlotRef::Stream(i) => {
                if let Some(slot) = state.cache.streams.get_mut(i) {
                    if slot.playing {
                        streaming::stop_voices(slot, &mut state.hw);
                        slot.playing = false;
                        debug!("Stopped stream {}", i);
                    }
                }
            }
            SlotRef::Sfx(i) => {
                if i < state.cache.sfx.len()
                    && state.mux.stop_sfx(i, &mut state.cache.sfx, &mut state.hw)
                {
                    debug!("Stopped effect {}", i);
                }
            }
        }
    }

    /// Stop playback and release the slot and its sound memory. Idempotent.
    pub fn unload(&self, handle: Handle) {
        let mut state = self.state();
        let state = &mut *state;
        match handle.slot(state.cache.streams.len()) {
            SlotRef::Stream(i) => state.cache.release_stream(i, &mut state.hw),
            SlotRef::Sfx(i) => state.cache.release_sfx(i, &mut state.hw, &mut state.mux),
        }
    }

    /// Playback snapshot, or `None` for an unknown or unbound handle
    pub fn query_info(&self, handle: Handle) -> Option<PlaybackInfo> {
        let mut state = self.state();
        let state = &mut *state;
        match handle.slot(state.cache.streams.len()) {
            SlotRef::Stream(i) => {
                let slot = state.cache.streams.get(i).filter(|s| s.is_bound())?;
                Some(PlaybackInfo {
                    kind: AssetKind::Stream,
                    playing: slot.playing,
                    total_samples: slot.total_samples,
                    played_samples: slot.played_samples,
                    format: slot.format,
                    channel: Some(slot.channels[0]),
                })
            }
            SlotRef::Sfx(i) => {
                let slot = state.cache.sfx.get(i).filter(|s| s.is_bound())?;
                let channel = slot.channel.map(ChannelMux::hw_channel);
                let played = match channel {
                    Some(ch) => state
                        .hw
                        .position(ch)
                        .map(|pos| (pos as u64).min(slot.total_samples as u64))
                        .unwrap_or(0),
                    None => 0,
                };
                Some(PlaybackInfo {
                    kind: AssetKind::Sfx,
                    playing: channel.is_some(),
                    total_samples: slot.total_samples as u64,
                    played_samples: played,
                    format: slot.format,
                    channel,
                })
            }
        }
    }

    /// Change volume and pan, including on live voices
    pub fn set_volume_pan(&self, handle: Handle, volume: u8, pan_left: u8, pan_right: u8) {
        let mut state = self.state();
        let state = &mut *state;
        match handle.slot(state.cache.streams.len()) {
            SlotRef::Stream(i) => {
                let Some(slot) = state.cache.streams.get_mut(i).filter(|s| s.is_bound()) else {
                    return;
                };
                slot.volume = volume;
                slot.pan = stream_pans(slot, pan_left, pan_right);
                if slot.playing {
                    for (n, &ch) in slot.active_channels().iter().enumerate() {
                        state.hw.set_volume_pan(ch, volume, slot.pan[n]);
                    }
                }
            }
            SlotRef::Sfx(i) => {
                let Some(slot) = state.cache.sfx.get_mut(i).filter(|s| s.is_bound()) else {
                    return;
                };
                slot.volume = volume;
                slot.pan = mono_pan(pan_left, pan_right);
                state.mux.set_volume_pan(slot, &mut state.hw);
            }
        }
    }

    /// Table occupancy
    pub fn stats(&self) -> EngineStats {
        let state = self.state();
        EngineStats {
            streams_bound: state.cache.streams.iter().filter(|s| s.is_bound()).count(),
            streams_playing: state.cache.streams.iter().filter(|s| s.playing).count(),
            free_stream_slots: state.cache.free_stream_slots(),
            sfx_bound: state.cache.sfx.iter().filter(|s| s.is_bound()).count(),
            free_sfx_slots: state.cache.free_sfx_slots(),
            busy_channels: state.mux.busy(),
            mux_channels: state.mux.len(),
            clock: state.clock,
        }
    }

    /// Run one poller iteration on the calling thread
    pub fn poll(&self) {
        self.state().poll_once();
    }

    /// Start the background poller. Does nothing if it is already running.
    pub fn start_poller(&self) -> Result<()> {
        let mut poller = self.poller.lock().unwrap_or_else(PoisonError::into_inner);
        if poller.is_some() {
            return Ok(());
        }
        let interval = self.state().config.poll_interval();
        let shared = Arc::clone(&self.shared);
        *poller = Some(Poller::spawn(interval, move || lock(&shared).poll_once())?);
        Ok(())
    }

    pub fn is_polling(&self) -> bool {
        self.poller
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .is_some_and(Poller::is_running)
    }

    /// Stop the poller and silence every voice. Loaded assets stay cached.
    pub fn shutdown(&self) {
        let poller = self
            .poller
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(poller) = poller {
            poller.shutdown();
        }

        let mut state = self.state();
        let state = &mut *state;
        for slot in state.cache.streams.iter_mut().filter(|s| s.playing) {
            streaming::stop_voices(slot, &mut state.hw);
            slot.playing = false;
        }
        state.mux.stop_all(&mut state.cache.sfx, &mut state.hw);
        info!("Audio engine shut down");
    }
}

fn stream_pans(slot: &StreamSlot, pan_left: u8, pan_right: u8) -> [u8; 2] {
    if slot.stereo {
        [pan_left, pan_right]
    } else {
        let pan = mono_pan(pan_left, pan_right);
        [pan, pan]
    }
}

/// Allocate `count` buffers of `bytes` each, or none at all
fn alloc_buffers<H: SoundHardware>(hw: &mut H, bytes: usize, count: usize) -> Option<Vec<SpuAddr>> {
    let mut buffers = Vec::with_capacity(count);
    for _ in 0..count {
        match hw.alloc(bytes) {
            Some(addr) => buffers.push(addr),
            None => {
                for addr in buffers {
                    hw.free(addr);
                }
                return None;
            }
        }
    }
    Some(buffers)
}

impl<H: SoundHardware> EngineState<H> {
    fn load_sfx(&mut self, name: AssetName, mut source: SampleSource, info: WaveInfo) -> Result<Handle> {
        let stream_capacity = self.cache.streams.len();
        let data_len = info.data_len as usize;
        if data_len > self.sfx_staging.len() {
            return Err(Error::OversizedSample {
                bytes: data_len,
                capacity: self.sfx_staging.len(),
            });
        }

        let choice = self
            .cache
            .choose_sfx(&name)
            .ok_or_else(|| Error::CapacityConfiguration("effect table is empty".to_string()))?;
        let index = match choice {
            SlotChoice::Existing(i) => {
                debug!("Effect '{}' already cached in slot {}", name, i);
                self.cache.sfx[i].last_used = self.clock;
                return Ok(Handle::sfx(i, stream_capacity));
            }
            SlotChoice::Free(i) | SlotChoice::Evict(i) => i,
        };

        // Stage and convert before touching the slot
        let total = info.total_samples() as u32;
        let bytes = info.format.bytes_for_samples(total);
        let staging = &mut self.sfx_staging[..data_len];
        source.read_padded(staging)?;
        let mono_len = if info.channels == 2 {
            transform::keep_left_in_place(info.format, staging)
        } else {
            data_len
        };
        if mono_len < bytes {
            staging[mono_len..bytes].fill(0);
        }
        transform::to_hardware(info.format, &mut staging[..bytes]);

        let addr = match (self.hw.alloc(bytes), choice) {
            (Some(addr), _) => addr,
            (None, SlotChoice::Evict(i)) => {
                debug!("Sound memory full, evicting effect slot {} for '{}' first", i, name);
                self.cache.release_sfx(i, &mut self.hw, &mut self.mux);
                self.hw
                    .alloc(bytes)
                    .ok_or(Error::AllocationFailure { bytes })?
            }
            (None, _) => return Err(Error::AllocationFailure { bytes }),
        };
        if let Err(e) = self.hw.upload(addr, &self.sfx_staging[..bytes]) {
            self.hw.free(addr);
            return Err(e.into());
        }

        if let SlotChoice::Evict(i) = choice {
            debug!("Evicting effect slot {} for '{}'", i, name);
            self.cache.release_sfx(i, &mut self.hw, &mut self.mux);
        }

        debug!(
            "Effect '{}' -> slot {}: {} samples {} {} Hz at {}",
            name, index, total, info.format, info.sample_rate, addr
        );
        self.cache.sfx[index] = SfxSlot {
            name: Some(name),
            buffer: Some(addr),
            format: info.format,
            sample_rate: info.sample_rate,
            total_samples: total,
            last_used: self.clock,
            ..SfxSlot::default()
        };
        Ok(Handle::sfx(index, stream_capacity))
    }

    fn load_stream(
        &mut self,
        name: AssetName,
        mut source: SampleSource,
        info: WaveInfo,
        seek_samples: u32,
    ) -> Result<Handle> {
        let total = info.total_samples();
        let seek = info.format.align_samples_down(seek_samples) as u64;
        if seek >= total {
            return Err(Error::InvalidArgument(format!(
                "seek offset {} is past the end of a {} sample asset",
                seek, total
            )));
        }

        let choice = self
            .cache
            .choose_stream(&name)
            .ok_or_else(|| Error::CapacityConfiguration("stream table is empty".to_string()))?;
        let index = match choice {
            SlotChoice::Existing(i) => {
                debug!("Stream '{}' already cached in slot {}", name, i);
                self.cache.streams[i].last_used = self.clock;
                return Ok(Handle::stream(i));
            }
            SlotChoice::Free(i) | SlotChoice::Evict(i) => i,
        };

        let stereo = info.channels == 2;
        let seek_bytes = info.format.bytes_for_samples(seek as u32) as u64 * info.channels as u64;
        source.seek_data(seek_bytes)?;

        // A victim with buffers of the same size hands them over; only the
        // shortfall is allocated
        let bytes = self.geometry.buffer_bytes(info.format);
        let wanted = if stereo { 2 } else { 1 };
        let reusable = match choice {
            SlotChoice::Evict(i) => {
                let victim = &self.cache.streams[i];
                if self.geometry.buffer_bytes(victim.format) == bytes {
                    victim.buffers.iter().flatten().count().min(wanted)
                } else {
                    0
                }
            }
            _ => 0,
        };
        let mut buffers = match (alloc_buffers(&mut self.hw, bytes, wanted - reusable), choice) {
            (Some(fresh), _) => fresh,
            (None, SlotChoice::Evict(i)) => {
                debug!("Sound memory full, evicting stream slot {} for '{}' first", i, name);
                self.cache.release_stream(i, &mut self.hw);
                alloc_buffers(&mut self.hw, bytes, wanted)
                    .ok_or(Error::AllocationFailure { bytes })?
            }
            (None, _) => return Err(Error::AllocationFailure { bytes }),
        };

        if let SlotChoice::Evict(i) = choice {
            debug!("Evicting stream slot {} for '{}'", i, name);
            for addr in self.cache.reclaim_stream(i, &mut self.hw).into_iter().flatten() {
                if buffers.len() < wanted {
                    buffers.push(addr);
                } else {
                    self.hw.free(addr);
                }
            }
        }
        let left = buffers.first().copied();
        let right = if stereo { buffers.get(1).copied() } else { None };

        debug!(
            "Stream '{}' -> slot {}: {} samples {} {} ch {} Hz from sample {}",
            name, index, total, info.format, info.channels, info.sample_rate, seek
        );
        let slot = &mut self.cache.streams[index];
        *slot = StreamSlot {
            name: Some(name),
            source: Some(source),
            buffers: [left, right],
            format: info.format,
            stereo,
            sample_rate: info.sample_rate,
            total_samples: total,
            seek_origin: seek,
            pass_origin: seek,
            last_used: self.clock,
            ..StreamSlot::new(slot.channels)
        };

        if let Err(e) = streaming::bootstrap(slot, &mut self.hw, self.geometry, &mut self.scratch) {
            self.cache.release_stream(index, &mut self.hw);
            return Err(e);
        }
        Ok(Handle::stream(index))
    }

    fn play_stream(
        &mut self,
        index: usize,
        volume: u8,
        pan_left: u8,
        pan_right: u8,
        looping: bool,
        loop_offset: u32,
    ) -> Result<()> {
        let Some(slot) = self.cache.streams.get_mut(index).filter(|s| s.is_bound()) else {
            return Ok(());
        };
        if slot.playing {
            return Ok(());
        }

        let loop_offset = slot.format.align_samples_down(loop_offset) as u64;
        slot.looping = looping && loop_offset < slot.total_samples;
        if looping && !slot.looping {
            warn!(
                "Stream {} loop offset {} is past its {} samples, playing once",
                index, loop_offset, slot.total_samples
            );
        }
        slot.loop_offset = if slot.looping { loop_offset } else { 0 };
        slot.volume = volume;
        slot.pan = stream_pans(slot, pan_left, pan_right);
        slot.last_used = self.clock;

        if slot.has_played {
            let origin = slot.seek_origin;
            streaming::rewind(slot, &mut self.hw, self.geometry, &mut self.scratch, origin)?;
        }
        if let Err(e) = streaming::start_voices(slot, &mut self.hw, self.geometry) {
            streaming::stop_voices(slot, &mut self.hw);
            return Err(e.into());
        }
        slot.playing = true;
        slot.has_played = true;
        debug!("Playing stream {} (loop {})", index, slot.looping);
        Ok(())
    }

    fn play_sfx(
        &mut self,
        index: usize,
        volume: u8,
        pan_left: u8,
        pan_right: u8,
        looping: bool,
        loop_offset: u32,
    ) -> Result<()> {
        let clock = self.clock;
        let Some(slot) = self.cache.sfx.get_mut(index).filter(|s| s.is_bound()) else {
            return Ok(());
        };

        let loop_offset = slot.format.align_samples_down(loop_offset);
        slot.looping = looping && loop_offset < slot.total_samples;
        if looping && !slot.looping {
            warn!(
                "Effect {} loop offset {} is past its {} samples, playing once",
                index, loop_offset, slot.total_samples
            );
        }
        slot.loop_offset = if slot.looping { loop_offset } else { 0 };
        slot.volume = volume;
        slot.pan = mono_pan(pan_left, pan_right);
        slot.last_used = clock;

        let channel = self
            .mux
            .play_sfx(index, &mut self.cache.sfx, &mut self.hw, clock)?;
        debug!("Playing effect {} on channel {}", index, channel);
        Ok(())
    }

    fn poll_once(&mut self) {
        self.mux.poll(&mut self.cache.sfx, &mut self.hw);
        for (i, slot) in self.cache.streams.iter_mut().enumerate() {
            streaming::poll(i, slot, &mut self.hw, self.geometry, &mut self.scratch);
        }
        self.clock += 1;
    }
}
