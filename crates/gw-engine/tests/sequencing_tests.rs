//! Sequencer-to-sampler flow through the full engine
//!
//! Covers auto-discovery wiring, trigger dispatch into voices, audio
//! reaching the master sink, rename propagation through parameter
//! paths, and indexed parameter routing.

use gw_core::AudioBuffer;
use gw_engine::{Engine, EngineConfig, EngineProcessor, create_engine};
use gw_module::PortKind;
use gw_pattern::Step;
use gw_state::TypeSpecificState;

const SAMPLE_RATE: f64 = 48000.0;
const BUFFER_SIZE: usize = 512;

fn setup() -> (Engine, EngineProcessor) {
    let _ = env_logger::builder().is_test(true).try_init();
    create_engine(EngineConfig::default()).expect("engine setup")
}

fn run_buffers(processor: &mut EngineProcessor, buffers: usize) -> f32 {
    let mut buffer = AudioBuffer::new(BUFFER_SIZE, 2, SAMPLE_RATE as u32);
    let mut peak = 0.0f32;
    for _ in 0..buffers {
        processor.audio_out(&mut buffer);
        peak = peak.max(buffer.peak());
    }
    peak
}

/// Put a triggering step into the sequencer's bound pattern
fn set_trigger_step(engine: &Engine, sequencer: &str, step: usize, note: i32) -> String {
    let patterns = engine.patterns();
    let mut runtime = patterns.write();
    let pattern = runtime
        .binding(sequencer)
        .and_then(|b| b.pattern_name.clone())
        .expect("sequencer is bound");
    runtime.with_pattern_mut(&pattern, |p| p.set_step(step, Step::trigger(note)));
    pattern
}

#[test]
fn test_discovery_wires_sequencer_to_sampler() {
    let (engine, mut processor) = setup();
    engine.execute_command("add MultiSampler s1");
    engine.execute_command("add StepSequencer t1");
    run_buffers(&mut processor, 1);

    let state = engine.get_state();
    assert!(
        state
            .connections
            .iter()
            .any(|c| c.kind == PortKind::Event && c.source == "t1" && c.target == "s1"),
        "expected trigger subscription t1 -> s1"
    );
    assert!(
        state
            .connections
            .iter()
            .any(|c| c.kind == PortKind::Audio
                && c.source == "s1"
                && c.target == "masterAudioOut"),
        "expected audio edge s1 -> master"
    );
}

#[test]
fn test_triggers_reach_voices_and_master() {
    let (engine, mut processor) = setup();
    engine.execute_command("add MultiSampler s1");
    engine.execute_command("add StepSequencer t1");
    run_buffers(&mut processor, 1);

    set_trigger_step(&engine, "t1", 0, 3);
    engine.execute_command("play");

    // 16-step default pattern at 4 steps/beat, 120 BPM: first step
    // fires after 6000 samples
    let peak = run_buffers(&mut processor, 16);
    assert!(peak > 0.0, "audio should reach the master sink");

    let state = engine.get_state();
    match &state.modules["s1"].type_specific {
        TypeSpecificState::Sampler(sampler) => {
            assert!(sampler.active_voices > 0, "trigger should allocate a voice");
        }
        other => panic!("expected sampler state, got {other:?}"),
    }
}

#[test]
fn test_sequencer_state_in_snapshot() {
    let (engine, mut processor) = setup();
    engine.execute_command("add StepSequencer t1");
    run_buffers(&mut processor, 1);
    engine.execute_command("play");
    run_buffers(&mut processor, 20);

    let state = engine.get_state();
    match &state.modules["t1"].type_specific {
        TypeSpecificState::Sequencer(seq) => {
            assert!(seq.is_playing);
            assert!(seq.bound_pattern.is_some());
            assert!(seq.playback_step >= 0);
        }
        other => panic!("expected sequencer state, got {other:?}"),
    }
}

#[test]
fn test_rename_rewrites_parameter_paths() {
    let (engine, mut processor) = setup();
    engine.execute_command("add MultiSampler pool1");
    engine.execute_command("add StepSequencer t1");
    run_buffers(&mut processor, 1);

    engine.execute_command("route pool1.position t1.position[0] param");
    run_buffers(&mut processor, 1);

    engine.execute_command("rename pool1 poolA");
    run_buffers(&mut processor, 1);

    let state = engine.get_state();
    assert!(state.modules.contains_key("poolA"));
    assert!(!state.modules.contains_key("pool1"));
    let link = state
        .connections
        .iter()
        .find(|c| c.kind == PortKind::Parameter)
        .expect("parameter link survives the rename");
    assert_eq!(link.source_path, "poolA.position");
    assert_eq!(link.target_path, "t1.position[0]");

    // Routing still functions after the rename
    engine.execute_command("set poolA position 0.7");
    run_buffers(&mut processor, 1);

    let patterns = engine.patterns();
    let runtime = patterns.read();
    let pattern = runtime
        .binding("t1")
        .and_then(|b| b.pattern_name.clone())
        .unwrap();
    let routed = runtime
        .pattern(&pattern)
        .unwrap()
        .step_value(0, "position")
        .unwrap();
    assert_eq!(routed, 0.7);
}

#[test]
fn test_remove_module_prunes_connections_and_binding() {
    let (engine, mut processor) = setup();
    engine.execute_command("add MultiSampler s1");
    engine.execute_command("add StepSequencer t1");
    run_buffers(&mut processor, 1);

    engine.execute_command("remove t1");
    run_buffers(&mut processor, 1);

    let state = engine.get_state();
    assert!(!state.modules.contains_key("t1"));
    assert!(
        state.connections.iter().all(|c| c.source != "t1" && c.target != "t1"),
        "no edge may reference a removed module"
    );
    assert!(engine.patterns().read().binding("t1").is_none());
}

#[test]
fn test_unroute_takes_effect_next_buffer() {
    let (engine, mut processor) = setup();
    engine.execute_command("add MultiSampler s1");
    engine.execute_command("add StepSequencer t1");
    run_buffers(&mut processor, 1);

    set_trigger_step(&engine, "t1", 0, 3);
    engine.execute_command("play");
    let peak = run_buffers(&mut processor, 16);
    assert!(peak > 0.0);

    // Cutting the only path to the master sink silences the output;
    // the processor's graph caches must follow the edge change
    engine.execute_command("unroute s1 masterAudioOut audio");
    run_buffers(&mut processor, 1);
    let peak = run_buffers(&mut processor, 16);
    assert_eq!(peak, 0.0);
}

#[test]
fn test_video_graph_composites_opacity() {
    let (engine, mut processor) = setup();
    engine.execute_command("add VideoMixer v1");
    run_buffers(&mut processor, 1);

    // v1 auto-routes to the master video sink
    let state = engine.get_state();
    assert!(
        state
            .connections
            .iter()
            .any(|c| c.kind == PortKind::Video
                && c.source == "v1"
                && c.target == "masterVideoOut")
    );

    engine.execute_command("set v1 opacity 0.5");
    run_buffers(&mut processor, 1);
    engine.update();

    let frame = engine.render_video(1920, 1080);
    assert_eq!(frame.width, 1920);
    assert_eq!(frame.opacity, 0.5);
}

#[test]
fn test_degraded_module_is_silenced() {
    let (engine, mut processor) = setup();
    engine.execute_command("add MultiSampler s1");
    run_buffers(&mut processor, 1);

    // Disabled sampler renders silence but the graph keeps running
    engine.execute_command("set s1 volume 0");
    engine.execute_command("play");
    let peak = run_buffers(&mut processor, 16);
    assert_eq!(peak, 0.0);
}
