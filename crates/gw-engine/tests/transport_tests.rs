//! Transport and clock integration tests
//!
//! Drives the processor the way a sound driver would: repeated
//! `audio_out` calls over a fixed buffer size.

use gw_core::AudioBuffer;
use gw_engine::{Engine, EngineConfig, EngineProcessor, create_engine};

const SAMPLE_RATE: f64 = 48000.0;
const BUFFER_SIZE: usize = 512;

fn setup() -> (Engine, EngineProcessor) {
    let _ = env_logger::builder().is_test(true).try_init();
    create_engine(EngineConfig::default()).expect("engine setup")
}

fn run_buffers(processor: &mut EngineProcessor, buffers: usize) {
    let mut buffer = AudioBuffer::new(BUFFER_SIZE, 2, SAMPLE_RATE as u32);
    for _ in 0..buffers {
        processor.audio_out(&mut buffer);
    }
}

#[test]
fn test_basic_transport() {
    // BPM 120, SR 48000, buffer 512: 100 buffers ≈ 2.133 beats
    let (engine, mut processor) = setup();

    let result = engine.execute_command("add MultiSampler s1");
    assert!(result.success, "{}", result.message);
    engine.execute_command("play");
    run_buffers(&mut processor, 100);

    let state = engine.get_state();
    assert!(state.transport.is_playing);
    let expected = 100.0 * BUFFER_SIZE as f64 * 120.0 / (60.0 * SAMPLE_RATE);
    assert!(
        (state.transport.current_beat - expected).abs() < 1e-9,
        "beat {} != {expected}",
        state.transport.current_beat
    );
    assert!(state.modules.contains_key("s1"));
}

#[test]
fn test_bpm_command_applies_next_buffer() {
    let (engine, mut processor) = setup();
    engine.execute_command("play");
    engine.execute_command("bpm 60");
    run_buffers(&mut processor, 10);

    let state = engine.get_state();
    assert_eq!(state.transport.bpm, 60.0);
    let expected = 10.0 * BUFFER_SIZE as f64 * 60.0 / (60.0 * SAMPLE_RATE);
    assert!((state.transport.current_beat - expected).abs() < 1e-9);
}

#[test]
fn test_pause_keeps_position_stop_does_too() {
    let (engine, mut processor) = setup();
    engine.execute_command("play");
    run_buffers(&mut processor, 50);
    let before = engine.beat_position();
    assert!(before > 0.0);

    engine.execute_command("pause");
    run_buffers(&mut processor, 20);
    assert_eq!(engine.beat_position(), before);
    assert!(!engine.is_playing());

    engine.execute_command("reset");
    run_buffers(&mut processor, 1);
    assert_eq!(engine.beat_position(), 0.0);
}

#[test]
fn test_transport_listener_fires_on_drain() {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    let (engine, mut processor) = setup();
    let transitions = Arc::new(AtomicUsize::new(0));
    let seen = Arc::clone(&transitions);
    engine.add_transport_listener(move |_| {
        seen.fetch_add(1, Ordering::Relaxed);
    });

    engine.execute_command("play");
    // Listener fires during the drain, within the audio buffer
    run_buffers(&mut processor, 1);
    assert_eq!(transitions.load(Ordering::Relaxed), 1);

    engine.execute_command("stop");
    run_buffers(&mut processor, 1);
    assert_eq!(transitions.load(Ordering::Relaxed), 2);
}

#[test]
fn test_invalid_bpm_rejected() {
    let (engine, mut processor) = setup();
    let result = engine.execute_command("bpm -10");
    // Executes on drain; the failure surfaces as a logged warning and
    // the tempo is unchanged
    run_buffers(&mut processor, 1);
    let _ = result;
    assert_eq!(engine.bpm(), 120.0);
}
