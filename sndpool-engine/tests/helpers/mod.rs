//! Shared builders for sndpool-engine integration tests
//!
//! - Raw in-memory sources with deterministic sample patterns
//! - WAV files on disk via hound
//! - Engine + simulator pairs with small, test-friendly configurations
//! - Command log filters

#![allow(dead_code)]

use hound::{WavSpec, WavWriter};
use sndpool_engine::audio::{AssetSource, RawSamples, SampleFormat};
use sndpool_engine::hardware::{HwEvent, SimulatedHardware, StartCommand};
use sndpool_engine::{AudioEngine, EngineConfig};
use std::path::Path;

pub const TEST_SAMPLE_RATE: u32 = 22_050;

/// Engine over a fresh simulator sharing the same device
pub fn engine_with(config: EngineConfig, pool_bytes: usize) -> (AudioEngine<SimulatedHardware>, SimulatedHardware) {
    let hw = SimulatedHardware::new(config.hardware_channels, pool_bytes);
    let engine = AudioEngine::new(config, hw.clone()).expect("engine config should be valid");
    (engine, hw)
}

/// Default engine with a 2 MiB pool
pub fn default_engine() -> (AudioEngine<SimulatedHardware>, SimulatedHardware) {
    engine_with(EngineConfig::default(), 2 * 1024 * 1024)
}

/// Configuration where assets above `single_shot_max` samples stream with
/// `half` sample halves
pub fn streaming_config(single_shot_max: u32, half: u32) -> EngineConfig {
    EngineConfig {
        single_shot_max_samples: single_shot_max,
        stream_half_samples: half,
        ..EngineConfig::default()
    }
}

/// Header-less PCM16 source of `frames` frames. Left channel samples count
/// up from zero, right channel samples count down from -1.
pub fn pcm16(frames: usize, channels: u16) -> AssetSource {
    let mut data = Vec::with_capacity(frames * 2 * channels as usize);
    for i in 0..frames {
        data.extend_from_slice(&(i as i16).to_le_bytes());
        if channels == 2 {
            data.extend_from_slice(&(!(i as i16)).to_le_bytes());
        }
    }
    raw(data, SampleFormat::Pcm16, channels)
}

pub fn raw(data: Vec<u8>, format: SampleFormat, channels: u16) -> AssetSource {
    AssetSource::Raw(RawSamples {
        data: data.into(),
        format,
        channels,
        sample_rate: TEST_SAMPLE_RATE,
    })
}

/// Zero-filled PCM16 mono effect of `frames` frames
pub fn blip(frames: usize) -> AssetSource {
    raw(vec![0u8; frames * 2], SampleFormat::Pcm16, 1)
}

/// Write a 16-bit WAV file; left channel ramps up, right ramps down
pub fn write_pcm16_wav(path: &Path, frames: u32, channels: u16) -> Result<(), hound::Error> {
    let spec = WavSpec {
        channels,
        sample_rate: TEST_SAMPLE_RATE,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };
    let mut writer = WavWriter::create(path, spec)?;
    for i in 0..frames {
        writer.write_sample(i as i16)?;
        if channels == 2 {
            writer.write_sample(!(i as i16))?;
        }
    }
    writer.finalize()
}

/// Write an 8-bit mono WAV file holding `samples`
pub fn write_pcm8_wav(path: &Path, samples: &[i8]) -> Result<(), hound::Error> {
    let spec = WavSpec {
        channels: 1,
        sample_rate: TEST_SAMPLE_RATE,
        bits_per_sample: 8,
        sample_format: hound::SampleFormat::Int,
    };
    let mut writer = WavWriter::create(path, spec)?;
    for &s in samples {
        writer.write_sample(s)?;
    }
    writer.finalize()
}

/// Every start command in the log
pub fn starts(hw: &SimulatedHardware) -> Vec<StartCommand> {
    hw.events()
        .into_iter()
        .filter_map(|e| match e {
            HwEvent::Start(cmd) => Some(cmd),
            _ => None,
        })
        .collect()
}

/// Channels stopped, in order
pub fn stops(hw: &SimulatedHardware) -> Vec<usize> {
    hw.events()
        .into_iter()
        .filter_map(|e| match e {
            HwEvent::Stop(ch) => Some(ch),
            _ => None,
        })
        .collect()
}

pub fn alloc_count(hw: &SimulatedHardware) -> usize {
    hw.events()
        .iter()
        .filter(|e| matches!(e, HwEvent::Alloc { .. }))
        .count()
}
