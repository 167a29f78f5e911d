//! Session persistence
//!
//! The whole engine serializes to one JSON tree with top-level keys
//! `{transport, modules, connections, patterns, chains,
//! sequencerBindings, layouts}`. The serializer itself is opaque;
//! what matters is load order: modules first, then connections (records
//! with missing endpoints are skipped), then patterns and chains, then
//! bindings — with a repair pass fixing dangling cross-references.
//!
//! Loading is a setup-time operation: call it before the audio stream
//! runs, or with the processor quiesced.

use serde_json::{Value, json};
use std::path::Path;

use gw_core::{GwError, GwResult};
use gw_pattern::RuntimeSnapshot;

use crate::engine::{Engine, EngineCtx};

/// Serialize the full engine state to a session tree
pub fn session_to_json(engine: &Engine) -> Value {
    let shared = engine.shared();

    let transport = json!({
        "bpm": shared.clock.bpm(),
        "isPlaying": shared.clock.is_playing(),
        "beatPosition": shared.clock.beat_position(),
    });

    let mut modules = Vec::new();
    shared.registry.read().for_each(|uuid, name, handle| {
        let module = handle.lock();
        modules.push(json!({
            "name": name,
            "uuid": uuid.to_string(),
            "type": module.type_name(),
            "enabled": module.is_enabled(),
            "state": module.to_json(),
        }));
    });

    let connections = shared.connections.read().to_json();
    let runtime = shared.patterns.read().export();

    json!({
        "transport": transport,
        "modules": modules,
        "connections": connections,
        "patterns": serde_json::to_value(&runtime.patterns).unwrap_or(Value::Null),
        "chains": serde_json::to_value(&runtime.chains).unwrap_or(Value::Null),
        "sequencerBindings": serde_json::to_value(&runtime.sequencer_bindings)
            .unwrap_or(Value::Null),
        "layouts": shared.layouts.read().clone(),
    })
}

/// Rebuild the engine from a session tree
pub fn session_from_json(engine: &Engine, doc: &Value) -> GwResult<()> {
    let shared = engine.shared();
    let master_audio = shared.config.master_audio_out_name.clone();
    let master_video = shared.config.master_video_out_name.clone();

    // Tear down everything but the system modules
    {
        let names = shared.registry.read().names();
        let mut ctx = EngineCtx::new(shared);
        for name in names {
            if name != master_audio && name != master_video {
                if let Err(err) = ctx.remove_module(&name) {
                    log::warn!("session: could not remove '{name}': {err}");
                }
            }
        }
        shared.connections.write().clear();
    }

    // 1. Modules
    if let Some(records) = doc.get("modules").and_then(Value::as_array) {
        let mut ctx = EngineCtx::new(shared);
        for record in records {
            let Some(name) = record.get("name").and_then(Value::as_str) else {
                log::warn!("session: module record without a name, skipping");
                continue;
            };
            let Some(type_name) = record.get("type").and_then(Value::as_str) else {
                log::warn!("session: module '{name}' without a type, skipping");
                continue;
            };
            let enabled = record.get("enabled").and_then(Value::as_bool).unwrap_or(true);
            let state = record.get("state").cloned().unwrap_or(Value::Null);

            if name != master_audio && name != master_video {
                if let Err(err) = ctx.add_module_impl(type_name, Some(name), true) {
                    log::warn!("session: could not restore module '{name}': {err}");
                    continue;
                }
            }
            if let Some(handle) = shared.registry.read().get(name) {
                let mut module = handle.lock();
                module.from_json(&state);
                module.set_enabled(enabled);
            }
        }
    }

    // 2. Connections (orphans skipped inside)
    if let Some(records) = doc.get("connections") {
        let registry = shared.registry.read();
        shared.connections.write().from_json(&registry, records)?;
    }

    // 3. Patterns and chains, 4. bindings — the runtime import runs
    // its own repair pass in that order
    let snapshot = RuntimeSnapshot {
        patterns: doc
            .get("patterns")
            .cloned()
            .and_then(|v| serde_json::from_value(v).ok())
            .unwrap_or_default(),
        chains: doc
            .get("chains")
            .cloned()
            .and_then(|v| serde_json::from_value(v).ok())
            .unwrap_or_default(),
        sequencer_bindings: doc
            .get("sequencerBindings")
            .cloned()
            .and_then(|v| serde_json::from_value(v).ok())
            .unwrap_or_default(),
    };
    shared.patterns.write().import(snapshot);

    // Transport
    if let Some(bpm) = doc
        .get("transport")
        .and_then(|t| t.get("bpm"))
        .and_then(Value::as_f64)
    {
        shared.clock.set_bpm(bpm as f32);
    }

    // Layouts stay opaque for the GUI collaborator
    *shared.layouts.write() = doc.get("layouts").cloned().unwrap_or(Value::Null);

    // Connections were rewritten directly; the processor must rebuild
    // its graph caches
    shared
        .graph_version
        .fetch_add(1, std::sync::atomic::Ordering::Relaxed);

    Ok(())
}

/// Save the session tree to disk
pub fn save_session(engine: &Engine, path: &Path) -> GwResult<()> {
    let doc = session_to_json(engine);
    let text = serde_json::to_string_pretty(&doc)
        .map_err(|err| GwError::Serialization(err.to_string()))?;
    std::fs::write(path, text)?;
    Ok(())
}

/// Load a session tree from disk
pub fn load_session(engine: &Engine, path: &Path) -> GwResult<()> {
    let text = std::fs::read_to_string(path)?;
    let doc: Value =
        serde_json::from_str(&text).map_err(|err| GwError::Serialization(err.to_string()))?;
    session_from_json(engine, &doc)
}
