//! In-process coprocessor model
//!
//! Behaves like the real part from the engine's point of view:
//! - First-fit sound memory pool with 32-byte alignment
//! - Voices with a wrapping position register; a non-looping voice falls
//!   back to position 0 when it runs off the end of its sample
//! - Every command is appended to a bounded event log for inspection
//!
//! Time only moves when [`SimulatedHardware::advance`] or
//! [`SimulatedHardware::advance_for`] is called, which keeps tests
//! deterministic. The handle is cheap to clone; clones share one device.

use super::{
    ChannelId, HardwareError, SoundHardware, SpuAddr, StartCommand, MAX_VOICE_SAMPLES,
    POSITION_MODULUS,
};
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tracing::{trace, warn};

const ALIGNMENT: usize = 32;

/// Oldest half of the command log is dropped once it reaches this length
pub const LOG_LIMIT: usize = 16_384;

/// Default sound memory size (2 MiB)
pub const DEFAULT_POOL_BYTES: usize = 2 * 1024 * 1024;

/// Default number of voices
pub const DEFAULT_CHANNELS: usize = 64;

/// Command log entry
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HwEvent {
    Alloc { addr: SpuAddr, bytes: usize },
    Free { addr: SpuAddr },
    Upload { addr: SpuAddr, len: usize },
    Start(StartCommand),
    Stop(ChannelId),
    VolumePan { channel: ChannelId, volume: u8, pan: u8 },
}

#[derive(Debug, Default, Clone)]
struct Voice {
    cmd: Option<StartCommand>,
    active: bool,
    position: u32,
    /// Fractional samples carried between `advance_for` calls
    carry: f64,
    /// Next position read fails once
    fault: bool,
}

#[derive(Debug)]
struct SimInner {
    ram: Vec<u8>,
    /// Free extents: start -> length
    free: BTreeMap<usize, usize>,
    /// Live allocations: start -> length
    allocated: BTreeMap<usize, usize>,
    voices: Vec<Voice>,
    log: Vec<HwEvent>,
}

impl SimInner {
    fn record(&mut self, event: HwEvent) {
        if self.log.len() >= LOG_LIMIT {
            self.log.drain(..LOG_LIMIT / 2);
        }
        self.log.push(event);
    }
}

/// Simulated sound coprocessor
#[derive(Debug, Clone)]
pub struct SimulatedHardware {
    inner: Arc<Mutex<SimInner>>,
}

impl Default for SimulatedHardware {
    fn default() -> Self {
        Self::new(DEFAULT_CHANNELS, DEFAULT_POOL_BYTES)
    }
}

impl SimulatedHardware {
    /// Create a device with `channels` voices and `pool_bytes` of sound memory
    pub fn new(channels: usize, pool_bytes: usize) -> Self {
        let mut free = BTreeMap::new();
        if pool_bytes > 0 {
            free.insert(0, pool_bytes);
        }
        Self {
            inner: Arc::new(Mutex::new(SimInner {
                ram: vec![0; pool_bytes],
                free,
                allocated: BTreeMap::new(),
                voices: vec![Voice::default(); channels],
                log: Vec::new(),
            })),
        }
    }

    fn lock(&self) -> MutexGuard<'_, SimInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Move every active voice forward by `samples`
    pub fn advance(&self, samples: u32) {
        let mut inner = self.lock();
        for voice in inner.voices.iter_mut() {
            Self::advance_voice(voice, samples);
        }
    }

    /// Move every active voice forward by `elapsed` at its own sample rate
    pub fn advance_for(&self, elapsed: Duration) {
        let mut inner = self.lock();
        for voice in inner.voices.iter_mut() {
            let Some(cmd) = voice.cmd else { continue };
            if !voice.active {
                continue;
            }
            let exact = cmd.sample_rate as f64 * elapsed.as_secs_f64() + voice.carry;
            // Epsilon absorbs binary rounding of the duration
            let whole = (exact + 1e-9).floor();
            voice.carry = exact - whole;
            Self::advance_voice(voice, whole as u32);
        }
    }

    fn advance_voice(voice: &mut Voice, samples: u32) {
        let Some(cmd) = voice.cmd else { return };
        if !voice.active || cmd.length_samples == 0 {
            return;
        }
        let pos = voice.position + samples;
        if cmd.looping {
            voice.position = pos % cmd.length_samples;
        } else if pos >= cmd.length_samples {
            voice.active = false;
            voice.position = 0;
        } else {
            voice.position = pos;
        }
    }

    /// Force a voice's position register
    pub fn set_position(&self, channel: ChannelId, position: u32) {
        let mut inner = self.lock();
        if let Some(voice) = inner.voices.get_mut(channel) {
            voice.position = position;
        }
    }

    /// Make the next position read on `channel` fail
    pub fn inject_position_fault(&self, channel: ChannelId) {
        let mut inner = self.lock();
        if let Some(voice) = inner.voices.get_mut(channel) {
            voice.fault = true;
        }
    }

    /// Whether the voice is currently producing sound
    pub fn is_active(&self, channel: ChannelId) -> bool {
        self.lock().voices.get(channel).is_some_and(|v| v.active)
    }

    /// Last start command issued to the voice
    pub fn last_start(&self, channel: ChannelId) -> Option<StartCommand> {
        self.lock().voices.get(channel).and_then(|v| v.cmd)
    }

    /// Copy of the command log
    pub fn events(&self) -> Vec<HwEvent> {
        self.lock().log.clone()
    }

    /// Drain the command log
    pub fn take_events(&self) -> Vec<HwEvent> {
        std::mem::take(&mut self.lock().log)
    }

    /// Read back sound memory
    pub fn read_memory(&self, addr: SpuAddr, len: usize) -> Vec<u8> {
        let inner = self.lock();
        let start = addr.0 as usize;
        inner
            .ram
            .get(start..start + len)
            .map(|s| s.to_vec())
            .unwrap_or_default()
    }

    /// Number of live allocations
    pub fn allocation_count(&self) -> usize {
        self.lock().allocated.len()
    }

    /// Bytes currently allocated (after alignment)
    pub fn allocated_bytes(&self) -> usize {
        self.lock().allocated.values().sum()
    }
}

impl SoundHardware for SimulatedHardware {
    fn channel_count(&self) -> usize {
        self.lock().voices.len()
    }

    fn alloc(&mut self, bytes: usize) -> Option<SpuAddr> {
        if bytes == 0 {
            return None;
        }
        let size = bytes.div_ceil(ALIGNMENT) * ALIGNMENT;
        let mut inner = self.lock();

        let (&start, &len) = inner.free.iter().find(|(_, &len)| len >= size)?;
        inner.free.remove(&start);
        if len > size {
            inner.free.insert(start + size, len - size);
        }
        inner.allocated.insert(start, size);

        let addr = SpuAddr(start as u32);
        inner.record(HwEvent::Alloc { addr, bytes });
        trace!("sim alloc {} bytes at {}", bytes, addr);
        Some(addr)
    }

    fn free(&mut self, addr: SpuAddr) {
        let mut inner = self.lock();
        let start = addr.0 as usize;
        let Some(mut size) = inner.allocated.remove(&start) else {
            warn!("sim free of unknown address {}", addr);
            return;
        };
        let mut start_merged = start;

        // Coalesce with the following extent
        if let Some(next_len) = inner.free.remove(&(start + size)) {
            size += next_len;
        }
        // Coalesce with the preceding extent
        let preceding = inner.free.range(..start).next_back().map(|(&p, &l)| (p, l));
        if let Some((prev, prev_len)) = preceding {
            if prev + prev_len == start {
                inner.free.remove(&prev);
                start_merged = prev;
                size += prev_len;
            }
        }
        inner.free.insert(start_merged, size);
        inner.record(HwEvent::Free { addr });
    }

    fn upload(&mut self, addr: SpuAddr, data: &[u8]) -> Result<(), HardwareError> {
        let mut inner = self.lock();
        let start = addr.0 as usize;
        let dst = inner
            .ram
            .get_mut(start..start + data.len())
            .ok_or(HardwareError::OutOfBounds {
                addr,
                len: data.len(),
            })?;
        dst.copy_from_slice(data);
        inner.record(HwEvent::Upload {
            addr,
            len: data.len(),
        });
        Ok(())
    }

    fn start(&mut self, cmd: &StartCommand) -> Result<(), HardwareError> {
        if cmd.length_samples > MAX_VOICE_SAMPLES {
            return Err(HardwareError::LengthTooLarge {
                length: cmd.length_samples,
                limit: MAX_VOICE_SAMPLES,
            });
        }
        let mut inner = self.lock();
        let voice = inner
            .voices
            .get_mut(cmd.channel)
            .ok_or(HardwareError::InvalidChannel(cmd.channel))?;
        *voice = Voice {
            cmd: Some(*cmd),
            active: true,
            ..Voice::default()
        };
        inner.record(HwEvent::Start(*cmd));
        Ok(())
    }

    fn stop(&mut self, channel: ChannelId) {
        let mut inner = self.lock();
        if let Some(voice) = inner.voices.get_mut(channel) {
            voice.active = false;
            voice.position = 0;
            voice.carry = 0.0;
        }
        inner.record(HwEvent::Stop(channel));
    }

    fn set_volume_pan(&mut self, channel: ChannelId, volume: u8, pan: u8) {
        let mut inner = self.lock();
        if let Some(cmd) = inner.voices.get_mut(channel).and_then(|v| v.cmd.as_mut()) {
            cmd.volume = volume;
            cmd.pan = pan;
        }
        inner.record(HwEvent::VolumePan {
            channel,
            volume,
            pan,
        });
    }

    fn position(&mut self, channel: ChannelId) -> Result<u16, HardwareError> {
        let mut inner = self.lock();
        let voice = inner
            .voices
            .get_mut(channel)
            .ok_or(HardwareError::InvalidChannel(channel))?;
        if voice.fault {
            voice.fault = false;
            return Err(HardwareError::Bus(format!("position read on channel {} timed out", channel)));
        }
        Ok((voice.position % POSITION_MODULUS) as u16)
    }
}
