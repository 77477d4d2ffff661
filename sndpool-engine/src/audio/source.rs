//! Asset sources
//!
//! A source is either a seekable byte stream (file or any `Read + Seek`) or an
//! in-memory byte range. The engine only needs two things from it: read with
//! zero padding on a short read, and seek to a byte offset inside the sample
//! data. Reads never run past the end of the sample data.

use super::format::SampleFormat;
use super::wav::{self, WaveInfo};
use crate::error::{Error, Result};
use std::fmt;
use std::fs::File;
use std::io::{BufReader, Cursor, Read, Seek, SeekFrom};
use std::path::PathBuf;
use std::sync::Arc;

/// Object-safe `Read + Seek` bound for boxed reader sources
pub trait ReadSeek: Read + Seek + Send {}

impl<T: Read + Seek + Send> ReadSeek for T {}

/// Already-decoded sample bytes plus their layout
#[derive(Clone)]
pub struct RawSamples {
    /// Sample bytes, interleaved when stereo
    pub data: Arc<[u8]>,
    pub format: SampleFormat,
    pub channels: u16,
    pub sample_rate: u32,
}

/// Where an asset's bytes come from
pub enum AssetSource {
    /// WAV file on disk
    File(PathBuf),
    /// WAV image behind any seekable reader
    Reader(Box<dyn ReadSeek>),
    /// WAV image held in memory
    WavBytes(Arc<[u8]>),
    /// Header-less sample data with caller-supplied layout
    Raw(RawSamples),
}

impl fmt::Debug for AssetSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AssetSource::File(path) => write!(f, "File({})", path.display()),
            AssetSource::Reader(_) => write!(f, "Reader(..)"),
            AssetSource::WavBytes(bytes) => write!(f, "WavBytes({} bytes)", bytes.len()),
            AssetSource::Raw(raw) => write!(
                f,
                "Raw({} bytes, {}, {} ch, {} Hz)",
                raw.data.len(),
                raw.format,
                raw.channels,
                raw.sample_rate
            ),
        }
    }
}

enum SourceKind {
    Reader(Box<dyn ReadSeek>),
    Memory(Arc<[u8]>),
}

/// Open source positioned inside its sample data
pub struct SampleSource {
    kind: SourceKind,
    /// Absolute offset of the first sample byte
    data_offset: u64,
    /// Sample data length in bytes
    data_len: u64,
    /// Read cursor relative to `data_offset`
    cursor: u64,
}

impl fmt::Debug for SampleSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = match self.kind {
            SourceKind::Reader(_) => "reader",
            SourceKind::Memory(_) => "memory",
        };
        f.debug_struct("SampleSource")
            .field("kind", &kind)
            .field("data_offset", &self.data_offset)
            .field("data_len", &self.data_len)
            .field("cursor", &self.cursor)
            .finish()
    }
}

impl SampleSource {
    /// Fill `buf` from the cursor, zero-padding past the end of the data.
    ///
    /// Returns the number of real (non-padding) bytes.
    pub fn read_padded(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        let remaining = self.remaining();
        let want = (buf.len() as u64).min(remaining) as usize;

        let got = match &mut self.kind {
            SourceKind::Memory(bytes) => {
                let start = (self.data_offset + self.cursor) as usize;
                buf[..want].copy_from_slice(&bytes[start..start + want]);
                want
            }
            SourceKind::Reader(reader) => {
                let mut filled = 0;
                while filled < want {
                    match reader.read(&mut buf[filled..want]) {
                        Ok(0) => break,
                        Ok(n) => filled += n,
                        Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
                        Err(e) => return Err(e),
                    }
                }
                filled
            }
        };

        buf[got..].fill(0);
        self.cursor += got as u64;
        Ok(got)
    }

    /// Move the cursor to `offset` bytes into the sample data
    pub fn seek_data(&mut self, offset: u64) -> std::io::Result<()> {
        let offset = offset.min(self.data_len);
        if let SourceKind::Reader(reader) = &mut self.kind {
            reader.seek(SeekFrom::Start(self.data_offset + offset))?;
        }
        self.cursor = offset;
        Ok(())
    }

    /// Bytes left before the end of the sample data
    pub fn remaining(&self) -> u64 {
        self.data_len.saturating_sub(self.cursor)
    }
}

impl AssetSource {
    /// Validate the source and position it at the first sample.
    ///
    /// Zero-length or malformed sources fail with `InvalidFormat`.
    pub fn open(self) -> Result<(SampleSource, WaveInfo)> {
        match self {
            AssetSource::File(path) => {
                let file = File::open(&path)?;
                Self::open_reader(Box::new(BufReader::new(file)))
            }
            AssetSource::Reader(reader) => Self::open_reader(reader),
            AssetSource::WavBytes(bytes) => {
                let info = wav::parse_header(&mut Cursor::new(&bytes[..]))?;
                let source = SampleSource {
                    kind: SourceKind::Memory(bytes),
                    data_offset: info.data_offset,
                    data_len: info.data_len,
                    cursor: 0,
                };
                Ok((source, info))
            }
            AssetSource::Raw(raw) => {
                if raw.data.is_empty() {
                    return Err(Error::InvalidFormat("raw sample data is empty".to_string()));
                }
                if !(1..=2).contains(&raw.channels) {
                    return Err(Error::InvalidFormat(format!(
                        "unsupported channel count: {}",
                        raw.channels
                    )));
                }
                if raw.sample_rate == 0 {
                    return Err(Error::InvalidFormat("sample rate is zero".to_string()));
                }
                let info = WaveInfo {
                    format: raw.format,
                    channels: raw.channels,
                    sample_rate: raw.sample_rate,
                    data_offset: 0,
                    data_len: raw.data.len() as u64,
                };
                if info.total_samples() == 0 {
                    return Err(Error::InvalidFormat("raw data holds no whole sample".to_string()));
                }
                let source = SampleSource {
                    kind: SourceKind::Memory(raw.data),
                    data_offset: 0,
                    data_len: info.data_len,
                    cursor: 0,
                };
                Ok((source, info))
            }
        }
    }

    fn open_reader(mut reader: Box<dyn ReadSeek>) -> Result<(SampleSource, WaveInfo)> {
        let info = wav::parse_header(&mut reader)?;
        let source = SampleSource {
            kind: SourceKind::Reader(reader),
            data_offset: info.data_offset,
            data_len: info.data_len,
            cursor: 0,
        };
        Ok((source, info))
    }
}
