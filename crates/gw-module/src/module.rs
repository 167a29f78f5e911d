//! Module trait and shared base state
//!
//! Modules are the nodes of the graph. The engine talks to them only
//! through this trait; routing code dispatches on capabilities and
//! ports. `audio_out` runs on the audio thread and must not allocate;
//! `update` runs at UI rate and may.

use parking_lot::RwLock;
use serde_json::{Value, json};
use std::sync::Arc;

use gw_core::{AudioBuffer, GwError, GwResult, ModuleUuid, ParamDescriptor, VideoFrame};
use gw_pattern::{PatternRuntime, TriggerEvent};

use crate::capability::{Capability, CapabilitySet};
use crate::port::{PortDescriptor, PortKind};

/// Shared handle to the pattern runtime
///
/// Modules that drive patterns (sequencers) keep a clone from
/// `InitContext` and lock briefly per operation; the lock is never held
/// across module calls.
pub type SharedPatterns = Arc<RwLock<PatternRuntime>>;

/// Static description of a module type
#[derive(Debug, Clone, Default)]
pub struct ModuleMetadata {
    pub type_name: &'static str,
    /// Events this module emits (event-connection sources)
    pub event_names: Vec<&'static str>,
    /// Handler slots this module exposes (event-connection targets)
    pub handler_names: Vec<&'static str>,
    pub parameter_names: Vec<String>,
    pub display_names: Vec<String>,
}

/// Dependencies injected at module initialization
pub struct InitContext<'a> {
    pub sample_rate: f64,
    pub instance_name: &'a str,
    pub patterns: &'a SharedPatterns,
    /// True when the module is being rebuilt from a session
    pub restored: bool,
}

/// Per-buffer timing handed to `audio_out`
#[derive(Debug, Clone, Copy)]
pub struct AudioContext {
    pub sample_rate: f64,
    pub bpm: f32,
    pub beat_position: f64,
    pub is_playing: bool,
}

/// Uniform polymorphic interface for all graph nodes
///
/// The buffer handed to `audio_out` arrives pre-filled with the summed
/// output of every upstream audio connection; the module writes its own
/// output over it in place. Sources ignore the input, effects transform
/// it, sinks consume it.
pub trait Module: Send {
    fn type_name(&self) -> &'static str;

    fn uuid(&self) -> ModuleUuid;

    fn instance_name(&self) -> &str;

    /// Called by the registry on add and rename; modules never pick
    /// their own instance name
    fn set_instance_name(&mut self, name: &str);

    fn is_enabled(&self) -> bool;

    fn set_enabled(&mut self, enabled: bool);

    /// Dependency injection after registration
    fn initialize(&mut self, _ctx: &mut InitContext<'_>) {}

    /// Audio-thread hook; real-time safe, no allocation
    fn audio_out(&mut self, _buffer: &mut AudioBuffer, _ctx: &AudioContext) {}

    /// Video-path hook; the engine routes frames, compositing is the
    /// renderer's business
    fn video_out(&mut self, _frame: &mut VideoFrame) {}

    /// UI-rate hook; may allocate
    fn update(&mut self) {}

    fn set_parameter(&mut self, name: &str, value: f32, notify: bool) -> GwResult<()>;

    fn parameter(&self, name: &str) -> GwResult<f32>;

    fn parameters(&self) -> Vec<ParamDescriptor>;

    fn metadata(&self) -> ModuleMetadata;

    fn input_ports(&self) -> Vec<PortDescriptor>;

    fn output_ports(&self) -> Vec<PortDescriptor>;

    fn capabilities(&self) -> CapabilitySet;

    fn has_capability(&self, cap: Capability) -> bool {
        self.capabilities().contains(cap)
    }

    /// Type-specific state as a JSON value, parsed by the snapshot
    /// builder into a tagged union
    fn state_snapshot(&self) -> Value {
        json!({})
    }

    /// Persisted form (session tree)
    fn to_json(&self) -> Value;

    fn from_json(&mut self, value: &Value);

    /// Event handler slot dispatch; `handler` names a slot from
    /// `metadata().handler_names`
    fn handle_event(&mut self, _handler: &str, _event: &TriggerEvent) {}

    /// Indexed parameter access for `module.param[i]` paths
    fn indexed_parameter(&self, name: &str, _index: usize) -> GwResult<f32> {
        Err(GwError::Unsupported(format!(
            "{}: no indexed parameter '{name}'",
            self.instance_name()
        )))
    }

    fn set_indexed_parameter(
        &mut self,
        name: &str,
        _index: usize,
        _value: f32,
        _notify: bool,
    ) -> GwResult<()> {
        Err(GwError::Unsupported(format!(
            "{}: no indexed parameter '{name}'",
            self.instance_name()
        )))
    }

    /// `incoming` is true when this module is the edge's target
    fn on_connection_established(&mut self, _other: &str, _kind: PortKind, _incoming: bool) {}

    fn on_connection_broken(&mut self, _other: &str, _kind: PortKind, _incoming: bool) {}
}

// ═══════════════════════════════════════════════════════════════════════════════
// MODULE BASE
// ═══════════════════════════════════════════════════════════════════════════════

/// Common state every module embeds: identity, enable flag, and the
/// declared parameter table with current values
#[derive(Debug)]
pub struct ModuleBase {
    uuid: ModuleUuid,
    name: String,
    enabled: bool,
    descriptors: Vec<ParamDescriptor>,
    values: Vec<f32>,
}

impl ModuleBase {
    pub fn new(descriptors: Vec<ParamDescriptor>) -> Self {
        let values = descriptors.iter().map(|d| d.default).collect();
        Self {
            uuid: ModuleUuid::generate(),
            name: String::new(),
            enabled: true,
            descriptors,
            values,
        }
    }

    pub fn uuid(&self) -> ModuleUuid {
        self.uuid
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn set_name(&mut self, name: &str) {
        self.name = name.to_string();
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn set_enabled(&mut self, enabled: bool) {
        self.enabled = enabled;
    }

    pub fn descriptors(&self) -> &[ParamDescriptor] {
        &self.descriptors
    }

    fn index_of(&self, name: &str) -> Option<usize> {
        self.descriptors.iter().position(|d| d.name == name)
    }

    /// Set a parameter, clamped to its declared range
    pub fn set(&mut self, name: &str, value: f32) -> GwResult<f32> {
        let index = self
            .index_of(name)
            .ok_or_else(|| GwError::NotFound(format!("parameter '{name}'")))?;
        let clamped = self.descriptors[index].clamp(value);
        self.values[index] = clamped;
        Ok(clamped)
    }

    pub fn get(&self, name: &str) -> GwResult<f32> {
        let index = self
            .index_of(name)
            .ok_or_else(|| GwError::NotFound(format!("parameter '{name}'")))?;
        Ok(self.values[index])
    }

    /// Fast-path read by descriptor position (audio thread)
    #[inline]
    pub fn value(&self, index: usize) -> f32 {
        self.values[index]
    }

    /// Parameters as a JSON object (persistence default)
    pub fn params_to_json(&self) -> Value {
        let map: serde_json::Map<String, Value> = self
            .descriptors
            .iter()
            .zip(&self.values)
            .map(|(d, v)| (d.name.clone(), json!(v)))
            .collect();
        json!({ "parameters": map })
    }

    /// Restore parameter values from a JSON object, ignoring unknowns
    pub fn params_from_json(&mut self, value: &Value) {
        let Some(map) = value.get("parameters").and_then(Value::as_object) else {
            return;
        };
        for (name, raw) in map {
            if let Some(v) = raw.as_f64() {
                if self.set(name, v as f32).is_err() {
                    log::warn!("ignoring unknown persisted parameter '{name}'");
                }
            }
        }
    }
}
