//! Sample formats understood by the coprocessor

use serde::{Deserialize, Serialize};

/// Hardware sample encoding.
///
/// Sample counts are always per channel (frames).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SampleFormat {
    /// Signed 16-bit little-endian PCM
    Pcm16,
    /// Signed 8-bit PCM (WAV sources are unsigned and converted on upload)
    Pcm8,
    /// 4-bit Yamaha ADPCM, two samples per byte
    Adpcm,
}

impl SampleFormat {
    /// Map a WAV `bitsPerSample` value to a hardware format
    pub fn from_bits_per_sample(bits: u16) -> Option<Self> {
        match bits {
            16 => Some(SampleFormat::Pcm16),
            8 => Some(SampleFormat::Pcm8),
            4 => Some(SampleFormat::Adpcm),
            _ => None,
        }
    }

    /// Bytes occupied by `samples` samples of one channel.
    ///
    /// ADPCM rounds up to a whole byte.
    pub fn bytes_for_samples(self, samples: u32) -> usize {
        let samples = samples as usize;
        match self {
            SampleFormat::Pcm16 => samples * 2,
            SampleFormat::Pcm8 => samples,
            SampleFormat::Adpcm => samples.div_ceil(2),
        }
    }

    /// Number of whole samples of one channel held in `bytes` bytes
    pub fn samples_in_bytes(self, bytes: u64) -> u64 {
        match self {
            SampleFormat::Pcm16 => bytes / 2,
            SampleFormat::Pcm8 => bytes,
            SampleFormat::Adpcm => bytes * 2,
        }
    }

    /// Round a sample offset down to something addressable in bytes
    pub fn align_samples_down(self, samples: u32) -> u32 {
        match self {
            SampleFormat::Adpcm => samples & !1,
            _ => samples,
        }
    }
}

impl std::fmt::Display for SampleFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SampleFormat::Pcm16 => write!(f, "pcm16"),
            SampleFormat::Pcm8 => write!(f, "pcm8"),
            SampleFormat::Adpcm => write!(f, "adpcm"),
        }
    }
}
