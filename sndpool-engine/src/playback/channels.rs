//! Channel multiplexer
//!
//! Time-shares the voices not reserved for streams across the effect table.
//! Mux slot `i` drives hardware channel `i`. Binding is two-way: a mux slot
//! names its effect and the effect names its mux slot.
//!
//! Looping effects with a non-zero loop start are played with loop-by-restart:
//! the voice plays the whole sample once, then the poller stops it and starts
//! a hardware-looped voice over `[loop_offset, total)`.

use super::cache::SfxSlot;
use crate::hardware::{ChannelId, HardwareError, SoundHardware, StartCommand};
use serde::Serialize;
use tracing::{debug, trace, warn};

/// Loop-by-restart progress of one effect
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LoopState {
    /// Plays once; finished when the position returns to zero
    NotLooping,
    /// Playing the whole sample once before the restart
    AwaitingLoopPoint,
    /// Hardware loops the body; nothing left for the poller to do
    LoopingBody,
}

/// One multiplexed voice
#[derive(Debug, Clone, Default)]
pub struct ChannelSlot {
    /// Bound effect slot
    pub sfx: Option<usize>,
    pub last_used: u64,
}

/// Effect voice pool
#[derive(Debug)]
pub struct ChannelMux {
    slots: Vec<ChannelSlot>,
}

impl ChannelMux {
    pub fn new(count: usize) -> Self {
        Self {
            slots: vec![ChannelSlot::default(); count],
        }
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn busy(&self) -> usize {
        self.slots.iter().filter(|s| s.sfx.is_some()).count()
    }

    pub fn slot(&self, index: usize) -> Option<&ChannelSlot> {
        self.slots.get(index)
    }

    /// Hardware channel behind a mux slot
    pub fn hw_channel(index: usize) -> ChannelId {
        index
    }

    /// Take a free voice, or evict the least recently used one
    fn acquire<H: SoundHardware>(&mut self, sfx: &mut [SfxSlot], hw: &mut H) -> usize {
        if let Some(i) = self.slots.iter().position(|s| s.sfx.is_none()) {
            return i;
        }

        let mut victim = 0;
        for (i, slot) in self.slots.iter().enumerate() {
            if slot.last_used < self.slots[victim].last_used {
                victim = i;
            }
        }
        debug!(
            "Evicting effect {:?} from channel {}",
            self.slots[victim].sfx, victim
        );
        self.unbind(victim, sfx, hw);
        victim
    }

    /// Stop a voice and clear both sides of its binding
    fn unbind<H: SoundHardware>(&mut self, index: usize, sfx: &mut [SfxSlot], hw: &mut H) {
        let Some(bound) = self.slots[index].sfx.take() else {
            return;
        };
        hw.stop(Self::hw_channel(index));
        if let Some(slot) = sfx.get_mut(bound) {
            slot.channel = None;
            slot.seen_nonzero = false;
            slot.loop_state = LoopState::NotLooping;
        }
    }

    /// Stop an effect if it holds a voice. Returns whether anything stopped.
    pub fn stop_sfx<H: SoundHardware>(&mut self, index: usize, sfx: &mut [SfxSlot], hw: &mut H) -> bool {
        match sfx.get(index).and_then(|s| s.channel) {
            Some(ch) => {
                self.unbind(ch, sfx, hw);
                true
            }
            None => false,
        }
    }

    /// Start an effect. A bound effect restarts on its own voice.
    ///
    /// Volume, pan and loop parameters must already be stored in the slot.
    pub fn play_sfx<H: SoundHardware>(
        &mut self,
        index: usize,
        sfx: &mut [SfxSlot],
        hw: &mut H,
        clock: u64,
    ) -> Result<ChannelId, HardwareError> {
        let ch = match sfx[index].channel {
            Some(ch) => {
                hw.stop(Self::hw_channel(ch));
                ch
            }
            None => {
                let ch = self.acquire(sfx, hw);
                self.slots[ch].sfx = Some(index);
                sfx[index].channel = Some(ch);
                ch
            }
        };
        self.slots[ch].last_used = clock;

        let slot = &mut sfx[index];
        slot.seen_nonzero = false;
        slot.loop_state = if !slot.looping {
            LoopState::NotLooping
        } else if slot.loop_offset == 0 {
            LoopState::LoopingBody
        } else {
            LoopState::AwaitingLoopPoint
        };

        let Some(address) = slot.buffer else {
            self.unbind(ch, sfx, hw);
            return Err(HardwareError::Bus(format!("effect slot {} has no buffer", index)));
        };
        let cmd = StartCommand {
            channel: Self::hw_channel(ch),
            address,
            length_samples: slot.total_samples,
            format: slot.format,
            looping: slot.loop_state == LoopState::LoopingBody,
            volume: slot.volume,
            pan: slot.pan,
            sample_rate: slot.sample_rate,
        };
        if let Err(e) = hw.start(&cmd) {
            self.unbind(ch, sfx, hw);
            return Err(e);
        }
        Ok(cmd.channel)
    }

    /// One poller pass over every bound voice
    pub fn poll<H: SoundHardware>(&mut self, sfx: &mut [SfxSlot], hw: &mut H) {
        for ch in 0..self.slots.len() {
            let Some(index) = self.slots[ch].sfx else {
                continue;
            };
            let pos = match hw.position(Self::hw_channel(ch)) {
                Ok(pos) => pos as u32,
                Err(e) => {
                    warn!("Position read failed on channel {}: {}", ch, e);
                    continue;
                }
            };
            trace!("Channel {} effect {} pos {}", ch, index, pos);

            let slot = &mut sfx[index];
            match slot.loop_state {
                LoopState::NotLooping => {
                    if slot.seen_nonzero && pos == 0 {
                        debug!("Effect {} finished on channel {}", index, ch);
                        self.unbind(ch, sfx, hw);
                    } else if pos > 0 {
                        slot.seen_nonzero = true;
                    }
                }
                LoopState::AwaitingLoopPoint => {
                    if pos > 0 {
                        slot.seen_nonzero = true;
                    }
                    if pos >= slot.total_samples || (slot.seen_nonzero && pos == 0) {
                        self.restart_loop_body(ch, index, sfx, hw);
                    }
                }
                LoopState::LoopingBody => {}
            }
        }
    }

    /// Reissue the effect as a hardware loop over `[loop_offset, total)`
    fn restart_loop_body<H: SoundHardware>(
        &mut self,
        ch: usize,
        index: usize,
        sfx: &mut [SfxSlot],
        hw: &mut H,
    ) {
        let slot = &mut sfx[index];
        let Some(buffer) = slot.buffer else {
            return;
        };
        debug!(
            "Effect {} reached loop point, looping [{}, {})",
            index, slot.loop_offset, slot.total_samples
        );
        slot.loop_state = LoopState::LoopingBody;

        let cmd = StartCommand {
            channel: Self::hw_channel(ch),
            address: buffer.offset(slot.format.bytes_for_samples(slot.loop_offset)),
            length_samples: slot.total_samples - slot.loop_offset,
            format: slot.format,
            looping: true,
            volume: slot.volume,
            pan: slot.pan,
            sample_rate: slot.sample_rate,
        };
        hw.stop(cmd.channel);
        if let Err(e) = hw.start(&cmd) {
            warn!("Loop restart failed on channel {}: {}", ch, e);
            self.unbind(ch, sfx, hw);
        }
    }

    /// Push new volume and pan to the effect's voice, if it has one
    pub fn set_volume_pan<H: SoundHardware>(&self, slot: &SfxSlot, hw: &mut H) {
        if let Some(ch) = slot.channel {
            hw.set_volume_pan(Self::hw_channel(ch), slot.volume, slot.pan);
        }
    }

    /// Stop every bound voice
    pub fn stop_all<H: SoundHardware>(&mut self, sfx: &mut [SfxSlot], hw: &mut H) {
        for ch in 0..self.slots.len() {
            self.unbind(ch, sfx, hw);
        }
    }
}
