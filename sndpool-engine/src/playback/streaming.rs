//! Double-buffered streaming
//!
//! Each stream voice loops over a buffer of two halves of `H` samples. Data
//! moves through three stages: the half the voice is playing, the half that
//! was uploaded last, and the chunk being read from the source into the
//! slot's staging buffer.
//!
//! Each poll reads the left voice's position register. When the voice has
//! crossed into a half that was not the most recently fed one, the staged
//! chunk is uploaded into the idle half and the next chunk is read, if the
//! source has any data left. `played_samples` grows by one half per crossing,
//! except for the first upload after a bootstrap, which fills the upper half
//! before the voice ever reaches it.

use super::cache::StreamSlot;
use crate::audio::{transform, SampleFormat};
use crate::error::{Error, Result};
use crate::hardware::{HardwareError, SoundHardware, StartCommand};
use tracing::{debug, trace, warn};

/// Double-buffer dimensions shared by all streams
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamGeometry {
    /// Samples per half
    pub half_samples: u32,
}

impl StreamGeometry {
    /// Whole double buffer in samples (the voice loop length)
    pub fn buffer_samples(&self) -> u32 {
        self.half_samples * 2
    }

    /// Bytes of one half for one channel
    pub fn half_bytes(&self, format: SampleFormat) -> usize {
        format.bytes_for_samples(self.half_samples)
    }

    /// Bytes of the double buffer for one channel
    pub fn buffer_bytes(&self, format: SampleFormat) -> usize {
        format.bytes_for_samples(self.buffer_samples())
    }

    /// Source bytes consumed per half
    pub fn chunk_bytes(&self, format: SampleFormat, stereo: bool) -> usize {
        self.half_bytes(format) * if stereo { 2 } else { 1 }
    }
}

/// Per-engine scratch space for de-interleaved halves
#[derive(Debug, Default)]
pub struct StreamScratch {
    left: Vec<u8>,
    right: Vec<u8>,
}

/// Byte offset into a stream's source for a sample offset
pub fn source_offset(slot: &StreamSlot, samples: u64) -> u64 {
    let frames = slot.format.bytes_for_samples(samples as u32) as u64;
    if slot.stereo {
        frames * 2
    } else {
        frames
    }
}

/// Read the next chunk into staging if the source has data left
fn stage_next(slot: &mut StreamSlot) -> std::io::Result<()> {
    slot.staged_ready = false;
    let Some(source) = slot.source.as_mut() else {
        return Ok(());
    };
    if source.remaining() == 0 {
        return Ok(());
    }
    source.read_padded(&mut slot.staging)?;
    slot.staged_ready = true;
    Ok(())
}

/// Upload the staged chunk, or silence when nothing is staged, into one half
fn upload_half<H: SoundHardware>(
    slot: &mut StreamSlot,
    hw: &mut H,
    geometry: StreamGeometry,
    scratch: &mut StreamScratch,
    upper: bool,
) -> std::result::Result<(), HardwareError> {
    let half_bytes = geometry.half_bytes(slot.format);
    scratch.left.resize(half_bytes, 0);
    scratch.right.resize(half_bytes, 0);

    if !slot.staged_ready {
        scratch.left.fill(0);
        scratch.right.fill(0);
    } else if slot.stereo {
        transform::split_stereo(
            slot.format,
            &slot.staging[..half_bytes * 2],
            &mut scratch.left,
            &mut scratch.right,
        );
        transform::to_hardware(slot.format, &mut scratch.left);
        transform::to_hardware(slot.format, &mut scratch.right);
    } else {
        scratch.left.copy_from_slice(&slot.staging[..half_bytes]);
        transform::to_hardware(slot.format, &mut scratch.left);
    }
    slot.staged_ready = false;

    let offset = if upper { half_bytes } else { 0 };
    if let Some(addr) = slot.buffers[0] {
        hw.upload(addr.offset(offset), &scratch.left)?;
    }
    if slot.stereo {
        if let Some(addr) = slot.buffers[1] {
            hw.upload(addr.offset(offset), &scratch.right)?;
        }
    }
    Ok(())
}

/// Upload the first chunk into the lower half and stage the second.
///
/// The source must already be positioned at the start of the pass.
pub fn bootstrap<H: SoundHardware>(
    slot: &mut StreamSlot,
    hw: &mut H,
    geometry: StreamGeometry,
    scratch: &mut StreamScratch,
) -> Result<()> {
    slot.staging.resize(geometry.chunk_bytes(slot.format, slot.stereo), 0);
    stage_next(slot)?;
    upload_half(slot, hw, geometry, scratch, false)?;
    stage_next(slot)?;
    slot.next_is_upper = true;
    slot.first_refill = true;
    slot.played_samples = 0;
    Ok(())
}

/// Move the source to `origin` samples and bootstrap a new pass
pub fn rewind<H: SoundHardware>(
    slot: &mut StreamSlot,
    hw: &mut H,
    geometry: StreamGeometry,
    scratch: &mut StreamScratch,
    origin: u64,
) -> Result<()> {
    let offset = source_offset(slot, origin);
    if let Some(source) = slot.source.as_mut() {
        source.seek_data(offset)?;
    }
    slot.pass_origin = origin;
    bootstrap(slot, hw, geometry, scratch)
}

/// Start the voices over the whole double buffer
pub fn start_voices<H: SoundHardware>(
    slot: &StreamSlot,
    hw: &mut H,
    geometry: StreamGeometry,
) -> std::result::Result<(), HardwareError> {
    for (i, &channel) in slot.active_channels().iter().enumerate() {
        let Some(address) = slot.buffers[i] else {
            continue;
        };
        hw.start(&StartCommand {
            channel,
            address,
            length_samples: geometry.buffer_samples(),
            format: slot.format,
            looping: true,
            volume: slot.volume,
            pan: slot.pan[i],
            sample_rate: slot.sample_rate,
        })?;
    }
    Ok(())
}

pub fn stop_voices<H: SoundHardware>(slot: &StreamSlot, hw: &mut H) {
    for &channel in slot.active_channels() {
        hw.stop(channel);
    }
}

fn refill<H: SoundHardware>(
    index: usize,
    slot: &mut StreamSlot,
    hw: &mut H,
    geometry: StreamGeometry,
    scratch: &mut StreamScratch,
    upper: bool,
) {
    trace!(
        "Stream {} refilling {} half",
        index,
        if upper { "upper" } else { "lower" }
    );
    if let Err(e) = upload_half(slot, hw, geometry, scratch, upper) {
        warn!("Stream {} upload failed: {}", index, e);
    }
    if let Err(e) = stage_next(slot) {
        warn!("Stream {} source read failed: {}", index, e);
    }
}

/// One poller pass over a stream slot
pub fn poll<H: SoundHardware>(
    index: usize,
    slot: &mut StreamSlot,
    hw: &mut H,
    geometry: StreamGeometry,
    scratch: &mut StreamScratch,
) {
    if !slot.playing {
        return;
    }
    let pos = match hw.position(slot.channels[0]) {
        Ok(pos) => pos as u32,
        Err(e) => {
            warn!("Position read failed on stream {}: {}", index, e);
            return;
        }
    };
    let half = geometry.half_samples;
    let logical = if pos >= half { pos - half } else { pos };

    if pos >= half && !slot.next_is_upper {
        slot.next_is_upper = true;
        refill(index, slot, hw, geometry, scratch, false);
        slot.played_samples += half as u64;
    } else if pos < half && slot.next_is_upper {
        slot.next_is_upper = false;
        refill(index, slot, hw, geometry, scratch, true);
        if slot.first_refill {
            slot.first_refill = false;
        } else {
            slot.played_samples += half as u64;
        }
    }
    trace!(
        "Stream {} pos {} logical {} played {}",
        index,
        pos,
        logical,
        slot.played_samples
    );

    let pass_len = slot.total_samples - slot.pass_origin;
    if slot.played_samples + logical as u64 <= pass_len {
        return;
    }

    if !slot.looping {
        debug!("Stream {} finished after {} samples", index, pass_len);
        stop_voices(slot, hw);
        slot.playing = false;
        slot.played_samples = slot.played_samples.min(pass_len);
        return;
    }

    let loop_offset = slot.loop_offset;
    debug!("Stream {} looping back to sample {}", index, loop_offset);
    stop_voices(slot, hw);
    let restarted = rewind(slot, hw, geometry, scratch, loop_offset)
        .and_then(|()| start_voices(slot, hw, geometry).map_err(Error::from));
    if let Err(e) = restarted {
        warn!("Stream {} loop restart failed: {}", index, e);
        stop_voices(slot, hw);
        slot.playing = false;
        slot.played_samples = 0;
    }
}
