//! Session save/load round trips

use gw_core::AudioBuffer;
use gw_engine::{
    Engine, EngineConfig, EngineProcessor, create_engine, load_session, save_session,
    session_from_json, session_to_json,
};
use gw_pattern::Step;

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

fn populate(engine: &Engine, processor: &mut EngineProcessor) {
    engine.execute_command("add MultiSampler s1");
    engine.execute_command("add StepSequencer t1");
    engine.execute_command("bpm 140");
    run_buffers(processor, 1);
    engine.execute_command("set s1 volume 0.33");
    run_buffers(processor, 1);

    let patterns = engine.patterns();
    let mut runtime = patterns.write();
    let bound = runtime
        .binding("t1")
        .and_then(|b| b.pattern_name.clone())
        .unwrap();
    runtime.with_pattern_mut(&bound, |p| p.set_step(0, Step::trigger(2)));
    runtime.add_chain("verse");
    runtime.chain_mut("verse").unwrap().add_entry(&bound);
    runtime.bind_sequencer_chain("t1", "verse");
}

#[test]
fn test_session_tree_has_schema_keys() {
    let (engine, mut processor) = setup();
    populate(&engine, &mut processor);

    let doc = session_to_json(&engine);
    for key in [
        "transport",
        "modules",
        "connections",
        "patterns",
        "chains",
        "sequencerBindings",
        "layouts",
    ] {
        assert!(doc.get(key).is_some(), "missing session key '{key}'");
    }
}

#[test]
fn test_round_trip_restores_modules_and_bindings() {
    let (engine, mut processor) = setup();
    populate(&engine, &mut processor);
    let doc = session_to_json(&engine);

    let (restored, mut restored_processor) = setup();
    session_from_json(&restored, &doc).expect("session load");
    run_buffers(&mut restored_processor, 1);

    let state = restored.get_state();
    assert_eq!(state.transport.bpm, 140.0);
    assert_eq!(state.modules["s1"].parameters["volume"], 0.33);
    assert_eq!(state.modules["t1"].type_name, "StepSequencer");

    let patterns = restored.patterns();
    let runtime = patterns.read();
    let binding = runtime.binding("t1").expect("binding restored");
    let bound = binding.pattern_name.clone().unwrap();
    assert_eq!(binding.chain_name.as_deref(), Some("verse"));
    assert_eq!(
        runtime.pattern(&bound).unwrap().step(0).unwrap().index,
        2,
        "step content survives the round trip"
    );
}

#[test]
fn test_round_trip_keeps_connections_skips_orphans() {
    let (engine, mut processor) = setup();
    populate(&engine, &mut processor);

    let mut doc = session_to_json(&engine);
    // Corrupt one connection record so it references a ghost module
    if let Some(records) = doc
        .get_mut("connections")
        .and_then(serde_json::Value::as_array_mut)
    {
        records.push(serde_json::json!({
            "source": "ghost",
            "target": "masterAudioOut",
            "kind": "Audio",
        }));
    }

    let (restored, _processor) = setup();
    session_from_json(&restored, &doc).expect("session load");

    let state = restored.get_state();
    assert!(
        state.connections.iter().all(|c| c.source != "ghost"),
        "orphan records are skipped"
    );
    // Healthy edges survived
    assert!(
        state
            .connections
            .iter()
            .any(|c| c.source == "s1" && c.target == "masterAudioOut")
    );
}

#[test]
fn test_save_and_load_from_disk() {
    let (engine, mut processor) = setup();
    populate(&engine, &mut processor);

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("session.json");
    save_session(&engine, &path).expect("save");

    let (restored, _processor) = setup();
    load_session(&restored, &path).expect("load");
    assert_eq!(restored.bpm(), 140.0);
    assert!(restored.get_state().modules.contains_key("s1"));
}

#[test]
fn test_playback_works_after_restore() {
    let (engine, mut processor) = setup();
    populate(&engine, &mut processor);
    let doc = session_to_json(&engine);

    let (restored, mut restored_processor) = setup();
    session_from_json(&restored, &doc).expect("session load");

    restored.execute_command("play");
    let mut buffer = AudioBuffer::new(BUFFER_SIZE, 2, SAMPLE_RATE as u32);
    let mut peak = 0.0f32;
    for _ in 0..20 {
        restored_processor.audio_out(&mut buffer);
        peak = peak.max(buffer.peak());
    }
    assert!(peak > 0.0, "restored graph should still make sound");
}
