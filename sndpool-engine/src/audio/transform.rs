//! Pure sample transforms applied while data moves into sound memory
//!
//! - 8-bit WAV PCM is unsigned, the coprocessor expects signed
//! - Stereo sources are interleaved, each hardware voice plays one channel
//! - ADPCM is copied verbatim apart from de-interleaving

use super::format::SampleFormat;

/// Convert unsigned 8-bit samples (0..=255) to signed (-128..=127) in place
pub fn pcm8_to_signed(buf: &mut [u8]) {
    for b in buf.iter_mut() {
        *b ^= 0x80;
    }
}

/// Apply the per-format conversion for mono data about to be uploaded
pub fn to_hardware(format: SampleFormat, buf: &mut [u8]) {
    if format == SampleFormat::Pcm8 {
        pcm8_to_signed(buf);
    }
}

/// Split interleaved stereo `src` into separate `left` and `right` buffers.
///
/// `left` and `right` must each hold `src.len() / 2` bytes. Layouts:
/// - PCM16: `[L lo, L hi, R lo, R hi]` frames
/// - PCM8: `[L, R]` frames
/// - ADPCM: one frame per byte, low nibble left, high nibble right; the
///   output packs two consecutive samples per byte, first sample in the low
///   nibble
pub fn split_stereo(format: SampleFormat, src: &[u8], left: &mut [u8], right: &mut [u8]) {
    let mono_len = src.len() / 2;
    debug_assert!(left.len() >= mono_len && right.len() >= mono_len);

    match format {
        SampleFormat::Pcm16 => {
            for (i, frame) in src.chunks_exact(4).enumerate() {
                left[i * 2] = frame[0];
                left[i * 2 + 1] = frame[1];
                right[i * 2] = frame[2];
                right[i * 2 + 1] = frame[3];
            }
        }
        SampleFormat::Pcm8 => {
            for (i, frame) in src.chunks_exact(2).enumerate() {
                left[i] = frame[0];
                right[i] = frame[1];
            }
        }
        SampleFormat::Adpcm => {
            for (i, pair) in src.chunks_exact(2).enumerate() {
                left[i] = (pair[0] & 0x0f) | ((pair[1] & 0x0f) << 4);
                right[i] = (pair[0] >> 4) | (pair[1] & 0xf0);
            }
        }
    }
}

/// Keep only the left channel of interleaved stereo data, compacting it to
/// the front of `buf`. Returns the mono byte length.
pub fn keep_left_in_place(format: SampleFormat, buf: &mut [u8]) -> usize {
    let mono_len = buf.len() / 2;
    match format {
        SampleFormat::Pcm16 => {
            for i in 0..mono_len / 2 {
                buf[i * 2] = buf[i * 4];
                buf[i * 2 + 1] = buf[i * 4 + 1];
            }
        }
        SampleFormat::Pcm8 => {
            for i in 0..mono_len {
                buf[i] = buf[i * 2];
            }
        }
        SampleFormat::Adpcm => {
            for i in 0..mono_len {
                buf[i] = (buf[i * 2] & 0x0f) | ((buf[i * 2 + 1] & 0x0f) << 4);
            }
        }
    }
    mono_len
}
