//! Audio data plumbing: formats, sources, WAV headers and sample transforms

pub mod format;
pub mod source;
pub mod transform;
pub mod wav;

pub use format::SampleFormat;
pub use source::{AssetSource, RawSamples, ReadSeek, SampleSource};
pub use wav::WaveInfo;
