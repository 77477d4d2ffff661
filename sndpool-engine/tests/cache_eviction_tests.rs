//! Resource cache: dedup, free-slot reuse, LRU eviction and load rejection

mod helpers;

use helpers::*;
use sndpool_engine::audio::{AssetSource, SampleFormat};
use sndpool_engine::hardware::{HwEvent, SimulatedHardware, SpuAddr};
use sndpool_engine::{AudioEngine, EngineConfig, Error};

fn small_sfx_config(capacity: usize) -> EngineConfig {
    EngineConfig {
        sfx_capacity: capacity,
        ..EngineConfig::default()
    }
}

fn alloc_addr(events: &[HwEvent], nth: usize) -> SpuAddr {
    events
        .iter()
        .filter_map(|e| match e {
            HwEvent::Alloc { addr, .. } => Some(*addr),
            _ => None,
        })
        .nth(nth)
        .expect("allocation should have happened")
}

#[test]
fn test_fifth_load_evicts_least_recent_effect() {
    let (engine, hw) = engine_with(small_sfx_config(4), 1 << 20);

    let mut handles = Vec::new();
    for i in 0..5 {
        // Recency ticks 1..=5
        engine.poll();
        let handle = engine.load(&format!("fx{}", i), blip(256), 0).unwrap();
        handles.push(handle);
    }

    // Slot of the tick-1 asset is reused
    assert_eq!(handles[4], handles[0]);
    let distinct: std::collections::HashSet<_> = handles[..4].iter().collect();
    assert_eq!(distinct.len(), 4);

    let events = hw.events();
    let first_buffer = alloc_addr(&events, 0);
    assert!(events.contains(&HwEvent::Free { addr: first_buffer }));

    // The evicted name is gone; reloading it needs a new slot and evicts fx1
    let stats = engine.stats();
    assert_eq!(stats.sfx_bound, 4);
    engine.poll();
    let reloaded = engine.load("fx0", blip(256), 0).unwrap();
    assert_eq!(reloaded, handles[1]);
}

#[test]
fn test_eviction_stops_active_channel_before_reuse() {
    let (engine, hw) = engine_with(small_sfx_config(2), 1 << 20);

    engine.poll();
    let a = engine.load("a", blip(4_000), 0).unwrap();
    engine.play(a, 255, 128, 128, false, 0).unwrap();
    let channel = engine.query_info(a).unwrap().channel.unwrap();

    engine.poll();
    engine.load("b", blip(4_000), 0).unwrap();
    engine.poll();
    let c = engine.load("c", blip(4_000), 0).unwrap();
    assert_eq!(c, a);

    let events = hw.events();
    let a_buffer = alloc_addr(&events, 0);
    let stop_at = events
        .iter()
        .position(|e| *e == HwEvent::Stop(channel))
        .expect("channel should be stopped");
    let free_at = events
        .iter()
        .position(|e| *e == HwEvent::Free { addr: a_buffer })
        .expect("buffer should be freed");
    assert!(stop_at < free_at);

    let info = engine.query_info(c).unwrap();
    assert!(!info.playing);
    assert_eq!(engine.stats().busy_channels, 0);
}

#[test]
fn test_repeat_load_returns_same_handle_without_allocating() {
    let (engine, hw) = default_engine();

    let first = engine.load("door", blip(1_000), 0).unwrap();
    let second = engine.load("door", blip(1_000), 0).unwrap();

    assert_eq!(first, second);
    assert_eq!(alloc_count(&hw), 1);
    assert_eq!(engine.stats().sfx_bound, 1);
}

#[test]
fn test_repeat_load_does_not_reset_playing_effect() {
    let (engine, _hw) = default_engine();

    let h = engine.load("loop", blip(1_000), 0).unwrap();
    engine.play(h, 255, 128, 128, true, 0).unwrap();
    let again = engine.load("loop", blip(1_000), 0).unwrap();

    assert_eq!(h, again);
    assert!(engine.query_info(h).unwrap().playing);
}

#[test]
fn test_zero_length_source_touches_nothing() {
    let (engine, hw) = default_engine();
    let before = engine.stats();

    let empty_raw = engine.load("empty", raw(Vec::new(), SampleFormat::Pcm16, 1), 0);
    assert!(matches!(empty_raw, Err(Error::InvalidFormat(_))));

    let empty_wav = engine.load("empty", AssetSource::WavBytes(Vec::<u8>::new().into()), 0);
    assert!(matches!(empty_wav, Err(Error::InvalidFormat(_))));

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("empty.wav");
    std::fs::write(&path, b"").unwrap();
    let empty_file = engine.load("empty", AssetSource::File(path), 0);
    assert!(matches!(empty_file, Err(Error::InvalidFormat(_))));

    assert_eq!(engine.stats(), before);
    assert!(hw.events().is_empty());
}

fn frees(hw: &SimulatedHardware) -> usize {
    hw.events()
        .iter()
        .filter(|e| matches!(e, HwEvent::Free { .. }))
        .count()
}

#[test]
fn test_full_pool_evicts_least_recent_effect() {
    let (engine, hw) = engine_with(small_sfx_config(2), 4_096);

    engine.poll();
    let a = engine.load("a", blip(1_000), 0).unwrap();
    engine.poll();
    let b = engine.load("b", blip(1_000), 0).unwrap();
    assert_eq!(hw.allocated_bytes(), 4_032);

    // Only 64 bytes left until `a` gives its memory back
    engine.poll();
    let c = engine.load("c", blip(1_000), 0).unwrap();
    assert_eq!(c, a);

    let events = hw.events();
    let a_buffer = alloc_addr(&events, 0);
    assert!(events.contains(&HwEvent::Free { addr: a_buffer }));
    assert_eq!(alloc_addr(&events, 2), a_buffer);
    assert_eq!(hw.allocation_count(), 2);
    assert_eq!(hw.allocated_bytes(), 4_032);

    assert_eq!(engine.query_info(b).unwrap().total_samples, 1_000);
    assert_eq!(engine.query_info(c).unwrap().total_samples, 1_000);
    assert_eq!(engine.stats().sfx_bound, 2);
}

#[test]
fn test_allocation_failure_into_free_slot_leaves_slots_intact() {
    let (engine, hw) = engine_with(small_sfx_config(4), 4_096);

    let a = engine.load("a", blip(1_000), 0).unwrap();
    let b = engine.load("b", blip(1_000), 0).unwrap();

    // Needs 3000 bytes, only 64 left, and a free slot means nothing is evicted
    let result = engine.load("c", blip(1_500), 0);
    assert!(matches!(result, Err(Error::AllocationFailure { bytes: 3_000 })));

    assert!(engine.query_info(a).is_some());
    assert!(engine.query_info(b).is_some());
    assert_eq!(hw.allocation_count(), 2);
    assert_eq!(frees(&hw), 0);
}

#[test]
fn test_effect_too_big_even_after_eviction_fails_cleanly() {
    let (engine, hw) = engine_with(small_sfx_config(2), 4_096);

    engine.poll();
    let a = engine.load("a", blip(1_000), 0).unwrap();
    engine.poll();
    let b = engine.load("b", blip(1_000), 0).unwrap();

    engine.poll();
    let result = engine.load("c", blip(3_000), 0);
    assert!(matches!(result, Err(Error::AllocationFailure { bytes: 6_000 })));

    // The victim is gone, its slot unbound, the other effect untouched
    assert!(engine.query_info(a).is_none());
    assert!(engine.query_info(b).is_some());
    assert_eq!(engine.stats().sfx_bound, 1);
    assert_eq!(hw.allocation_count(), 1);
}

fn single_stream_config() -> EngineConfig {
    EngineConfig {
        stream_capacity: 1,
        ..streaming_config(1_000, 1_000)
    }
}

#[test]
fn test_stream_eviction_reuses_same_size_buffers() {
    // Room for exactly one stereo PCM16 stream
    let (engine, hw) = engine_with(single_stream_config(), 8_000);

    let s0 = engine.load("s0", pcm16(5_000, 2), 0).unwrap();
    engine.play(s0, 255, 0, 255, false, 0).unwrap();
    let left = engine.query_info(s0).unwrap().channel.unwrap();
    assert_eq!(hw.allocated_bytes(), 8_000);

    engine.poll();
    let s1 = engine.load("s1", pcm16(6_000, 2), 100).unwrap();
    assert_eq!(s1, s0);

    let info = engine.query_info(s1).unwrap();
    assert_eq!(info.total_samples, 6_000);
    assert!(!info.playing);
    assert_eq!(alloc_count(&hw), 2);
    assert_eq!(frees(&hw), 0);
    assert_eq!(hw.allocation_count(), 2);

    let stopped = stops(&hw);
    assert!(stopped.contains(&left));
    assert!(stopped.contains(&(left + 1)));

    // The handed-over left buffer now holds s1 from its seek point
    let l_buf = alloc_addr(&hw.events(), 0);
    let expected: Vec<u8> = (100..1_100usize).flat_map(|i| (i as i16).to_le_bytes()).collect();
    assert_eq!(hw.read_memory(l_buf, 2_000), expected);
}

#[test]
fn test_stream_eviction_frees_buffers_of_other_size() {
    let (engine, hw) = engine_with(single_stream_config(), 8_000);

    // PCM8 stereo halves need 2000-byte buffers, 2016 after alignment
    let s0 = engine.load("s0", raw(vec![0u8; 10_000], SampleFormat::Pcm8, 2), 0).unwrap();
    assert_eq!(engine.query_info(s0).unwrap().total_samples, 5_000);
    assert_eq!(hw.allocated_bytes(), 4_032);

    // 3968 bytes left cannot hold a 4000-byte PCM16 buffer
    engine.poll();
    let s1 = engine.load("s1", pcm16(5_000, 2), 0).unwrap();
    assert_eq!(s1, s0);
    assert_eq!(engine.query_info(s1).unwrap().format, SampleFormat::Pcm16);
    assert_eq!(frees(&hw), 2);
    assert_eq!(hw.allocation_count(), 2);
    assert_eq!(hw.allocated_bytes(), 8_000);
}

#[test]
fn test_stereo_stream_right_buffer_failure_frees_left() {
    // One 4000-byte buffer fits, the right channel's does not
    let (engine, hw) = engine_with(streaming_config(1_000, 1_000), 4_000);

    let result = engine.load("music", pcm16(5_000, 2), 0);
    assert!(matches!(result, Err(Error::AllocationFailure { bytes: 4_000 })));

    assert_eq!(alloc_count(&hw), 1);
    assert_eq!(frees(&hw), 1);
    assert_eq!(hw.allocation_count(), 0);
    assert_eq!(engine.stats().streams_bound, 0);
}

#[test]
fn test_oversized_effect_rejected_not_truncated() {
    let (engine, hw) = default_engine();

    // 40000 stereo frames fit the voice limit but not the staging buffer
    let result = engine.load("huge", pcm16(40_000, 2), 0);
    match result {
        Err(Error::OversizedSample { bytes, capacity }) => {
            assert_eq!(bytes, 160_000);
            assert_eq!(capacity, 131_068);
        }
        other => panic!("expected OversizedSample, got {:?}", other),
    }
    assert_eq!(alloc_count(&hw), 0);
    assert_eq!(engine.stats().sfx_bound, 0);
}

#[test]
fn test_zero_capacity_rejected_at_startup() {
    let hw = sndpool_engine::hardware::SimulatedHardware::default();
    let result = AudioEngine::new(small_sfx_config(0), hw);
    assert!(matches!(result, Err(Error::CapacityConfiguration(_))));
}

#[test]
fn test_stream_table_evicts_least_recent_stream() {
    let config = EngineConfig {
        stream_capacity: 2,
        ..streaming_config(1_000, 1_000)
    };
    let (engine, hw) = engine_with(config, 1 << 20);

    engine.poll();
    let s0 = engine.load("s0", pcm16(5_000, 2), 0).unwrap();
    engine.play(s0, 255, 0, 255, false, 0).unwrap();
    engine.poll();
    let s1 = engine.load("s1", pcm16(5_000, 1), 0).unwrap();
    assert_ne!(s0, s1);
    assert!(s0.raw() < 2 && s1.raw() < 2);

    engine.poll();
    let s2 = engine.load("s2", pcm16(5_000, 1), 0).unwrap();
    assert_eq!(s2, s0);

    // Both voices of the evicted stereo stream were silenced
    let stopped = stops(&hw);
    let info = engine.query_info(s2).unwrap();
    let left = info.channel.unwrap();
    assert!(stopped.contains(&left));
    assert!(stopped.contains(&(left + 1)));
    assert!(!info.playing);
    assert_eq!(engine.stats().streams_bound, 2);
}

#[test]
fn test_unload_is_idempotent_and_frees_memory() {
    let (engine, hw) = default_engine();

    let fx = engine.load("fx", blip(500), 0).unwrap();
    let stream = engine.load("music", pcm16(70_000, 2), 0).unwrap();
    assert_eq!(hw.allocation_count(), 3);

    engine.unload(fx);
    engine.unload(stream);
    assert_eq!(hw.allocation_count(), 0);
    let events_after_first = hw.events().len();

    engine.unload(fx);
    engine.unload(stream);
    assert_eq!(hw.events().len(), events_after_first);
    assert!(engine.query_info(fx).is_none());
    assert!(engine.query_info(stream).is_none());
}

#[test]
fn test_long_names_sharing_prefix_dedup() {
    let (engine, hw) = default_engine();
    let prefix = "p".repeat(200);

    let a = engine.load(&format!("{}/a.wav", prefix), blip(100), 0).unwrap();
    let b = engine.load(&format!("{}/b.wav", prefix), blip(100), 0).unwrap();

    assert_eq!(a, b);
    assert_eq!(alloc_count(&hw), 1);
}
