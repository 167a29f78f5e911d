//! Step sequencer module
//!
//! The sequencer itself holds almost no state: patterns, chains, and
//! the binding live in the pattern runtime, keyed by this module's
//! instance name. The module is the graph-facing front: it declares the
//! trigger-emitting capability, exposes per-step values as indexed
//! parameters, and reports playback state in snapshots.

use serde_json::{Value, json};

use gw_core::{GwError, GwResult, ModuleUuid, ParamDescriptor};
use gw_module::{
    Capability, CapabilitySet, InitContext, Module, ModuleBase, ModuleMetadata, PortDescriptor,
    PortKind, SharedPatterns,
};
use gw_pattern::{ColumnSpec, DEFAULT_STEP_COUNT, Step};

const CAPS: CapabilitySet = CapabilitySet::new(&[Capability::EmitsTriggers]);

/// Per-step parameter columns every sequencer pattern starts with
fn default_columns() -> Vec<ColumnSpec> {
    vec![
        ColumnSpec::new("position", 0.0, 1.0, 0.0),
        ColumnSpec::new("volume", 0.0, 1.0, 1.0),
        ColumnSpec::new("speed", -4.0, 4.0, 1.0),
    ]
}

pub struct StepSequencer {
    base: ModuleBase,
    patterns: Option<SharedPatterns>,
}

impl StepSequencer {
    pub fn new() -> Self {
        Self {
            base: ModuleBase::new(Vec::new()),
            patterns: None,
        }
    }

    fn runtime(&self) -> GwResult<&SharedPatterns> {
        self.patterns
            .as_ref()
            .ok_or_else(|| GwError::Transient("sequencer not initialized".into()))
    }

    /// Name of the bound pattern, if any
    fn bound_pattern(&self) -> Option<String> {
        let runtime = self.patterns.as_ref()?;
        runtime
            .read()
            .binding(self.base.name())
            .and_then(|b| b.pattern_name.clone())
    }

    /// Step fields addressable as indexed parameters, besides columns
    fn write_step_field(step: &mut Step, name: &str, value: f32) -> bool {
        match name {
            "note" | "index" => step.index = value as i32,
            "length" => step.length = (value as u32).clamp(1, 64),
            "chance" => step.chance = (value as u8).min(100),
            "ratio_a" => step.ratio_a = (value as u8).clamp(1, 16),
            "ratio_b" => step.ratio_b = (value as u8).clamp(1, 16),
            _ => return false,
        }
        true
    }

    fn read_step_field(step: &Step, name: &str) -> Option<f32> {
        match name {
            "note" | "index" => Some(step.index as f32),
            "length" => Some(step.length as f32),
            "chance" => Some(step.chance as f32),
            "ratio_a" => Some(step.ratio_a as f32),
            "ratio_b" => Some(step.ratio_b as f32),
            _ => None,
        }
    }
}

impl Default for StepSequencer {
    fn default() -> Self {
        Self::new()
    }
}

impl Module for StepSequencer {
    fn type_name(&self) -> &'static str {
        "StepSequencer"
    }

    fn uuid(&self) -> ModuleUuid {
        self.base.uuid()
    }

    fn instance_name(&self) -> &str {
        self.base.name()
    }

    fn set_instance_name(&mut self, name: &str) {
        self.base.set_name(name);
    }

    fn is_enabled(&self) -> bool {
        self.base.is_enabled()
    }

    fn set_enabled(&mut self, enabled: bool) {
        self.base.set_enabled(enabled);
    }

    fn initialize(&mut self, ctx: &mut InitContext<'_>) {
        self.patterns = Some(ctx.patterns.clone());

        // Fresh sequencers self-configure a default pattern; restored
        // ones get their bindings back from the session loader
        if !ctx.restored {
            let mut runtime = ctx.patterns.write();
            if let Some(name) = runtime.add_pattern(None, DEFAULT_STEP_COUNT) {
                runtime.with_pattern_mut(&name, |p| {
                    p.set_columns(default_columns());
                    true
                });
                runtime.bind_sequencer_pattern(ctx.instance_name, &name);
            }
        }
    }

    fn set_parameter(&mut self, name: &str, _value: f32, _notify: bool) -> GwResult<()> {
        Err(GwError::NotFound(format!("parameter '{name}'")))
    }

    fn parameter(&self, name: &str) -> GwResult<f32> {
        Err(GwError::NotFound(format!("parameter '{name}'")))
    }

    fn parameters(&self) -> Vec<ParamDescriptor> {
        Vec::new()
    }

    fn metadata(&self) -> ModuleMetadata {
        ModuleMetadata {
            type_name: "StepSequencer",
            event_names: vec!["trigger"],
            handler_names: Vec::new(),
            parameter_names: vec![
                "note".into(),
                "length".into(),
                "chance".into(),
                "position".into(),
                "volume".into(),
                "speed".into(),
            ],
            display_names: vec![
                "Note".into(),
                "Length".into(),
                "Chance".into(),
                "Position".into(),
                "Volume".into(),
                "Speed".into(),
            ],
        }
    }

    fn input_ports(&self) -> Vec<PortDescriptor> {
        Vec::new()
    }

    fn output_ports(&self) -> Vec<PortDescriptor> {
        vec![PortDescriptor::output("trigger_out", PortKind::Event)]
    }

    fn capabilities(&self) -> CapabilitySet {
        CAPS
    }

    fn state_snapshot(&self) -> Value {
        let Some(runtime) = self.patterns.as_ref() else {
            return json!({});
        };
        let runtime = runtime.read();
        let binding = runtime.binding(self.base.name());
        let pattern = binding.and_then(|b| b.pattern_name.clone());
        let playback = pattern.as_deref().and_then(|p| runtime.playback_state(p));
        json!({
            "bound_pattern": pattern,
            "bound_chain": binding.and_then(|b| b.chain_name.clone()),
            "chain_enabled": binding.map(|b| b.chain_enabled).unwrap_or(false),
            "is_playing": playback.map(|s| s.is_playing).unwrap_or(false),
            "playback_step": playback.map(|s| s.playback_step).unwrap_or(-1),
            "current_playing_step": playback.map(|s| s.current_playing_step).unwrap_or(-1),
            "pattern_cycle_count": playback.map(|s| s.pattern_cycle_count).unwrap_or(0),
        })
    }

    fn to_json(&self) -> Value {
        // Patterns and bindings persist with the runtime, not here
        self.base.params_to_json()
    }

    fn from_json(&mut self, value: &Value) {
        self.base.params_from_json(value);
    }

    fn indexed_parameter(&self, name: &str, index: usize) -> GwResult<f32> {
        let pattern = self
            .bound_pattern()
            .ok_or_else(|| GwError::NotFound("no bound pattern".into()))?;
        let runtime = self.runtime()?.read();
        let p = runtime
            .pattern(&pattern)
            .ok_or_else(|| GwError::NotFound(format!("pattern '{pattern}'")))?;

        if let Some(step) = p.step(index) {
            if let Some(value) = Self::read_step_field(step, name) {
                return Ok(value);
            }
        }
        p.step_value(index, name)
            .ok_or_else(|| GwError::NotFound(format!("step parameter '{name}[{index}]'")))
    }

    fn set_indexed_parameter(
        &mut self,
        name: &str,
        index: usize,
        value: f32,
        _notify: bool,
    ) -> GwResult<()> {
        let pattern = self
            .bound_pattern()
            .ok_or_else(|| GwError::NotFound("no bound pattern".into()))?;
        let mut runtime = self.runtime()?.write();

        let changed = runtime.with_pattern_mut(&pattern, |p| {
            if index >= p.step_count() {
                return false;
            }
            if p.column_index(name).is_some() {
                return p.set_step_value(index, name, value);
            }
            let mut step = match p.step(index) {
                Some(step) => step.clone(),
                None => return false,
            };
            if !Self::write_step_field(&mut step, name, value) {
                return false;
            }
            p.set_step(index, step)
        });
        if changed {
            Ok(())
        } else {
            Err(GwError::InvalidParam(format!(
                "step parameter '{name}[{index}]'"
            )))
        }
    }
}
