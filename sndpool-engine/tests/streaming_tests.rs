//! Streaming engine: half-buffer refills, completion, loop reset, rewind

mod helpers;

use helpers::*;
use sndpool_engine::audio::{AssetSource, SampleFormat};
use sndpool_engine::hardware::{HwEvent, SimulatedHardware, SpuAddr};
use sndpool_engine::{AudioEngine, Error, Handle};
use std::io::{Cursor, Read, Seek, SeekFrom};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

fn played(engine: &AudioEngine<SimulatedHardware>, h: Handle) -> u64 {
    engine.query_info(h).unwrap().played_samples
}

fn playing(engine: &AudioEngine<SimulatedHardware>, h: Handle) -> bool {
    engine.query_info(h).unwrap().playing
}

fn pcm16_bytes(range: std::ops::Range<usize>) -> Vec<u8> {
    range.flat_map(|i| (i as i16).to_le_bytes()).collect()
}

/// Buffer addresses from the last start command on each stream voice
fn stream_buffers(hw: &SimulatedHardware, left: usize) -> (SpuAddr, SpuAddr) {
    let l = hw.last_start(left).unwrap().address;
    let r = hw.last_start(left + 1).map(|c| c.address).unwrap_or(SpuAddr(0));
    (l, r)
}

#[test]
fn test_stereo_stream_plays_to_completion() {
    let (engine, hw) = engine_with(streaming_config(20_000, 10_000), 1 << 20);

    let h = engine.load("music", pcm16(40_000, 2), 0).unwrap();
    engine.play(h, 255, 0, 255, false, 0).unwrap();
    let left = engine.query_info(h).unwrap().channel.unwrap();

    // Bootstrap tick fills the upper half without counting it
    engine.poll();
    assert_eq!(played(&engine, h), 0);

    hw.advance(10_050);
    engine.poll();
    assert_eq!(played(&engine, h), 10_000);

    hw.advance(10_000);
    engine.poll();
    assert_eq!(played(&engine, h), 20_000);

    hw.advance(10_000);
    engine.poll();
    assert_eq!(played(&engine, h), 30_000);
    assert!(playing(&engine, h));

    // Position 50 into the last half puts the total past 40000
    hw.advance(10_000);
    engine.poll();
    let info = engine.query_info(h).unwrap();
    assert!(!info.playing);
    assert_eq!(info.played_samples, 40_000);
    assert_eq!(info.total_samples, 40_000);

    let stopped = stops(&hw);
    assert!(stopped.contains(&left));
    assert!(stopped.contains(&(left + 1)));
    assert!(!hw.is_active(left));

    // Finished streams stay idle
    hw.advance(10_000);
    engine.poll();
    assert_eq!(played(&engine, h), 40_000);
}

#[test]
fn test_stereo_halves_are_deinterleaved() {
    let (engine, hw) = engine_with(streaming_config(1_000, 1_000), 1 << 20);

    let h = engine.load("music", pcm16(5_000, 2), 0).unwrap();
    engine.play(h, 255, 0, 255, false, 0).unwrap();
    let left = engine.query_info(h).unwrap().channel.unwrap();
    let (l_buf, r_buf) = stream_buffers(&hw, left);

    assert_eq!(hw.read_memory(l_buf, 2_000), pcm16_bytes(0..1_000));
    let right: Vec<u8> = (0..1_000usize).flat_map(|i| (!(i as i16)).to_le_bytes()).collect();
    assert_eq!(hw.read_memory(r_buf, 2_000), right);

    engine.poll();
    assert_eq!(hw.read_memory(l_buf.offset(2_000), 2_000), pcm16_bytes(1_000..2_000));

    let cmds = starts(&hw);
    assert_eq!(cmds.len(), 2);
    assert_eq!(cmds[0].pan, 0);
    assert_eq!(cmds[1].pan, 255);
    assert!(cmds.iter().all(|c| c.looping && c.length_samples == 2_000));
}

#[test]
fn test_adpcm_stereo_split_by_nibble() {
    let (engine, hw) = engine_with(streaming_config(1_000, 1_000), 1 << 20);

    // One byte per frame: left nibble 0x1, right nibble 0xA
    let h = engine
        .load("adpcm", raw(vec![0xA1; 3_000], SampleFormat::Adpcm, 2), 0)
        .unwrap();
    assert_eq!(engine.query_info(h).unwrap().total_samples, 3_000);
    engine.play(h, 255, 0, 255, false, 0).unwrap();
    let left = engine.query_info(h).unwrap().channel.unwrap();
    let (l_buf, r_buf) = stream_buffers(&hw, left);

    assert_eq!(hw.read_memory(l_buf, 500), vec![0x11; 500]);
    assert_eq!(hw.read_memory(r_buf, 500), vec![0xAA; 500]);
}

#[test]
fn test_pcm8_stream_converted_to_signed() {
    let (engine, hw) = engine_with(streaming_config(1_000, 1_000), 1 << 20);

    let data: Vec<u8> = (0..4_000usize).map(|i| (i % 256) as u8).collect();
    let h = engine.load("pcm8", raw(data.clone(), SampleFormat::Pcm8, 1), 0).unwrap();
    engine.play(h, 255, 128, 128, false, 0).unwrap();
    let left = engine.query_info(h).unwrap().channel.unwrap();
    let (l_buf, _) = stream_buffers(&hw, left);

    let expected: Vec<u8> = data[..1_000].iter().map(|b| b ^ 0x80).collect();
    assert_eq!(hw.read_memory(l_buf, 1_000), expected);
}

#[test]
fn test_looping_stream_resets_at_loop_point() {
    let (engine, hw) = engine_with(streaming_config(1_000, 1_000), 1 << 20);

    let h = engine.load("loop", pcm16(3_000, 1), 0).unwrap();
    engine.play(h, 255, 128, 128, true, 500).unwrap();
    let left = engine.query_info(h).unwrap().channel.unwrap();
    let (l_buf, _) = stream_buffers(&hw, left);

    engine.poll();
    let mut last = 0;
    for _ in 0..3 {
        hw.advance(1_000);
        engine.poll();
        let p = played(&engine, h);
        assert!(p <= 3_000);
        assert!(p >= last);
        last = p;
    }
    assert_eq!(last, 3_000);

    hw.advance(10);
    engine.poll();
    let info = engine.query_info(h).unwrap();
    assert!(info.playing);
    assert_eq!(info.played_samples, 0);

    // Voice restarted and the lower half holds the loop body
    assert_eq!(starts(&hw).len(), 2);
    assert_eq!(hw.read_memory(l_buf, 2_000), pcm16_bytes(500..1_500));

    // Second pass covers 2500 samples
    engine.poll();
    for _ in 0..3 {
        hw.advance(1_000);
        engine.poll();
        assert!(played(&engine, h) <= 3_000);
    }
    assert!(playing(&engine, h));
    assert_eq!(starts(&hw).len(), 3);
}

#[test]
fn test_short_stream_pads_with_silence() {
    let (engine, hw) = engine_with(streaming_config(1_000, 8_192), 1 << 20);

    let h = engine.load("short", pcm16(5_000, 1), 0).unwrap();
    engine.play(h, 255, 128, 128, false, 0).unwrap();
    let left = engine.query_info(h).unwrap().channel.unwrap();
    let (l_buf, _) = stream_buffers(&hw, left);

    let lower = hw.read_memory(l_buf, 16_384);
    assert_eq!(&lower[..10_000], &pcm16_bytes(0..5_000)[..]);
    assert!(lower[10_000..].iter().all(|&b| b == 0));

    // Nothing staged, so the upper half is silence
    engine.poll();
    assert!(hw.read_memory(l_buf.offset(16_384), 16_384).iter().all(|&b| b == 0));

    hw.advance(5_001);
    engine.poll();
    assert!(!playing(&engine, h));
}

struct CountingReader {
    inner: Cursor<Vec<u8>>,
    reads: Arc<AtomicUsize>,
}

impl Read for CountingReader {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        self.inner.read(buf)
    }
}

impl Seek for CountingReader {
    fn seek(&mut self, pos: SeekFrom) -> std::io::Result<u64> {
        self.inner.seek(pos)
    }
}

fn wav_in_memory(frames: u32) -> Vec<u8> {
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate: TEST_SAMPLE_RATE,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };
    let mut cursor = Cursor::new(Vec::new());
    {
        let mut writer = hound::WavWriter::new(&mut cursor, spec).unwrap();
        for i in 0..frames {
            writer.write_sample(i as i16).unwrap();
        }
        writer.finalize().unwrap();
    }
    cursor.into_inner()
}

#[test]
fn test_no_prefetch_past_end_of_source() {
    let (engine, hw) = engine_with(streaming_config(1_000, 8_192), 1 << 20);

    let reads = Arc::new(AtomicUsize::new(0));
    let reader = CountingReader {
        inner: Cursor::new(wav_in_memory(5_000)),
        reads: Arc::clone(&reads),
    };
    let h = engine
        .load("short", AssetSource::Reader(Box::new(reader)), 0)
        .unwrap();
    engine.play(h, 255, 128, 128, false, 0).unwrap();

    let after_bootstrap = reads.load(Ordering::SeqCst);
    engine.poll();
    hw.advance(4_000);
    engine.poll();
    assert_eq!(reads.load(Ordering::SeqCst), after_bootstrap);
}

#[test]
fn test_play_after_finish_rewinds_to_seek_origin() {
    let (engine, hw) = engine_with(streaming_config(1_000, 1_000), 1 << 20);

    let h = engine.load("music", pcm16(3_000, 1), 600).unwrap();
    engine.play(h, 255, 128, 128, false, 0).unwrap();
    let left = engine.query_info(h).unwrap().channel.unwrap();
    let (l_buf, _) = stream_buffers(&hw, left);
    assert_eq!(hw.read_memory(l_buf, 2_000), pcm16_bytes(600..1_600));

    // Play while playing changes nothing
    engine.play(h, 10, 0, 0, true, 0).unwrap();
    assert_eq!(starts(&hw).len(), 1);

    engine.poll();
    hw.advance(1_000);
    engine.poll();
    hw.advance(1_000);
    engine.poll();
    hw.advance(500);
    engine.poll();
    assert!(!playing(&engine, h));

    engine.play(h, 255, 128, 128, false, 0).unwrap();
    let info = engine.query_info(h).unwrap();
    assert!(info.playing);
    assert_eq!(info.played_samples, 0);
    assert_eq!(starts(&hw).len(), 2);
    assert_eq!(hw.read_memory(l_buf, 2_000), pcm16_bytes(600..1_600));
}

#[test]
fn test_seek_past_end_rejected() {
    let (engine, hw) = engine_with(streaming_config(1_000, 1_000), 1 << 20);

    let result = engine.load("music", pcm16(3_000, 1), 3_000);
    assert!(matches!(result, Err(Error::InvalidArgument(_))));
    assert_eq!(engine.stats().streams_bound, 0);
    assert!(hw.events().is_empty());
}

#[test]
fn test_stop_is_idempotent() {
    let (engine, hw) = engine_with(streaming_config(1_000, 1_000), 1 << 20);

    let h = engine.load("music", pcm16(3_000, 2), 0).unwrap();
    engine.play(h, 255, 128, 128, false, 0).unwrap();

    engine.stop(h);
    let events = hw.events().len();
    let info = engine.query_info(h).unwrap();

    engine.stop(h);
    assert_eq!(hw.events().len(), events);
    assert_eq!(engine.query_info(h).unwrap(), info);
    assert!(!info.playing);
}

#[test]
fn test_volume_pan_reaches_both_voices() {
    let (engine, hw) = engine_with(streaming_config(1_000, 1_000), 1 << 20);

    let stereo = engine.load("stereo", pcm16(3_000, 2), 0).unwrap();
    let mono = engine.load("mono", pcm16(3_000, 1), 0).unwrap();
    engine.play(stereo, 255, 0, 255, false, 0).unwrap();
    engine.play(mono, 255, 0, 200, false, 0).unwrap();
    hw.take_events();

    engine.set_volume_pan(stereo, 100, 10, 240);
    engine.set_volume_pan(mono, 90, 100, 200);

    let left = engine.query_info(stereo).unwrap().channel.unwrap();
    let mono_ch = engine.query_info(mono).unwrap().channel.unwrap();
    assert_eq!(
        hw.events(),
        vec![
            HwEvent::VolumePan { channel: left, volume: 100, pan: 10 },
            HwEvent::VolumePan { channel: left + 1, volume: 100, pan: 240 },
            HwEvent::VolumePan { channel: mono_ch, volume: 90, pan: 150 },
        ]
    );
    assert_eq!(hw.last_start(mono_ch).unwrap().volume, 90);
}

#[test]
fn test_position_fault_is_skipped() {
    let (engine, hw) = engine_with(streaming_config(1_000, 1_000), 1 << 20);

    let h = engine.load("music", pcm16(5_000, 1), 0).unwrap();
    engine.play(h, 255, 128, 128, false, 0).unwrap();
    let left = engine.query_info(h).unwrap().channel.unwrap();

    hw.inject_position_fault(left);
    engine.poll();
    assert_eq!(played(&engine, h), 0);
    assert!(playing(&engine, h));

    // The tick after the fault proceeds normally
    engine.poll();
    hw.advance(1_000);
    engine.poll();
    assert_eq!(played(&engine, h), 1_000);
}
