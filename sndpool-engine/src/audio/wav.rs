//! RIFF/WAVE header validation
//!
//! Only the header is interpreted here. Sample data stays in the source and
//! is pulled on demand by the cache (resident effects) or the streaming
//! engine (large assets).

use super::format::SampleFormat;
use crate::error::{Error, Result};
use std::io::{Read, Seek, SeekFrom};

/// Chunks walked before giving up on finding `fmt ` and `data`
const MAX_CHUNKS: usize = 64;

/// Parsed WAV header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WaveInfo {
    pub format: SampleFormat,
    pub channels: u16,
    pub sample_rate: u32,
    /// Absolute byte offset of the first sample
    pub data_offset: u64,
    /// Byte length of sample data actually present in the source
    pub data_len: u64,
}

impl WaveInfo {
    /// Samples per channel
    pub fn total_samples(&self) -> u64 {
        self.format.samples_in_bytes(self.data_len) / self.channels as u64
    }
}

fn read_array<const N: usize, R: Read>(r: &mut R) -> Result<[u8; N]> {
    let mut buf = [0u8; N];
    r.read_exact(&mut buf).map_err(|e| match e.kind() {
        std::io::ErrorKind::UnexpectedEof => {
            Error::InvalidFormat("truncated WAV header".to_string())
        }
        _ => Error::Io(e),
    })?;
    Ok(buf)
}

/// Validate a WAV header and locate the sample data.
///
/// Leaves the reader positioned at the first data byte.
pub fn parse_header<R: Read + Seek>(reader: &mut R) -> Result<WaveInfo> {
    let stream_len = reader.seek(SeekFrom::End(0))?;
    reader.seek(SeekFrom::Start(0))?;

    if stream_len == 0 {
        return Err(Error::InvalidFormat("empty source".to_string()));
    }

    let riff: [u8; 12] = read_array(reader)?;
    if &riff[0..4] != b"RIFF" || &riff[8..12] != b"WAVE" {
        return Err(Error::InvalidFormat("missing RIFF/WAVE magic".to_string()));
    }

    let mut fmt: Option<(SampleFormat, u16, u32)> = None;
    let mut pos = 12u64;

    for _ in 0..MAX_CHUNKS {
        if pos + 8 > stream_len {
            break;
        }
        let header: [u8; 8] = read_array(reader)?;
        let id = &header[0..4];
        let size = u32::from_le_bytes([header[4], header[5], header[6], header[7]]) as u64;
        let body = pos + 8;

        match id {
            b"fmt " => {
                if size < 16 {
                    return Err(Error::InvalidFormat(format!("fmt chunk too small: {}", size)));
                }
                let body_bytes: [u8; 16] = read_array(reader)?;
                let channels = u16::from_le_bytes([body_bytes[2], body_bytes[3]]);
                let sample_rate = u32::from_le_bytes([
                    body_bytes[4],
                    body_bytes[5],
                    body_bytes[6],
                    body_bytes[7],
                ]);
                let bits = u16::from_le_bytes([body_bytes[14], body_bytes[15]]);

                let format = SampleFormat::from_bits_per_sample(bits).ok_or_else(|| {
                    Error::InvalidFormat(format!("unsupported bits per sample: {}", bits))
                })?;
                if !(1..=2).contains(&channels) {
                    return Err(Error::InvalidFormat(format!(
                        "unsupported channel count: {}",
                        channels
                    )));
                }
                if sample_rate == 0 {
                    return Err(Error::InvalidFormat("sample rate is zero".to_string()));
                }
                fmt = Some((format, channels, sample_rate));
            }
            b"data" => {
                let (format, channels, sample_rate) = fmt.ok_or_else(|| {
                    Error::InvalidFormat("data chunk before fmt chunk".to_string())
                })?;
                let data_len = size.min(stream_len.saturating_sub(body));
                if data_len == 0 {
                    return Err(Error::InvalidFormat("data chunk is empty".to_string()));
                }
                reader.seek(SeekFrom::Start(body))?;
                let info = WaveInfo {
                    format,
                    channels,
                    sample_rate,
                    data_offset: body,
                    data_len,
                };
                if info.total_samples() == 0 {
                    return Err(Error::InvalidFormat("data chunk holds no whole sample".to_string()));
                }
                return Ok(info);
            }
            _ => {}
        }

        // Chunks are word aligned
        pos = body + size + (size & 1);
        reader.seek(SeekFrom::Start(pos))?;
    }

    Err(Error::InvalidFormat("no data chunk found".to_string()))
}
