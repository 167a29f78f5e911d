//! Audio mixer module

use serde_json::{Value, json};

use gw_core::{AudioBuffer, GwResult, ModuleUuid, ParamDescriptor};
use gw_module::{
    AudioContext, Capability, CapabilitySet, Module, ModuleBase, ModuleMetadata, PortDescriptor,
    PortKind,
};

const CAPS: CapabilitySet =
    CapabilitySet::new(&[Capability::ConsumesAudio, Capability::ProducesAudio]);

/// Sums its inputs (the engine pre-mixes them into the buffer) and
/// applies the master volume
pub struct AudioMixer {
    base: ModuleBase,
    input_count: usize,
}

impl AudioMixer {
    pub fn new() -> Self {
        Self {
            base: ModuleBase::new(vec![ParamDescriptor::float("volume", 0.0, 2.0, 1.0)]),
            input_count: 0,
        }
    }
}

impl Default for AudioMixer {
    fn default() -> Self {
        Self::new()
    }
}

impl Module for AudioMixer {
    fn type_name(&self) -> &'static str {
        "AudioMixer"
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

    fn audio_out(&mut self, buffer: &mut AudioBuffer, _ctx: &AudioContext) {
        if !self.base.is_enabled() {
            buffer.clear();
            return;
        }
        let volume = self.base.value(0);
        if volume != 1.0 {
            for sample in buffer.samples_mut() {
                *sample *= volume;
            }
        }
    }

    fn set_parameter(&mut self, name: &str, value: f32, _notify: bool) -> GwResult<()> {
        self.base.set(name, value).map(|_| ())
    }

    fn parameter(&self, name: &str) -> GwResult<f32> {
        self.base.get(name)
    }

    fn parameters(&self) -> Vec<ParamDescriptor> {
        self.base.descriptors().to_vec()
    }

    fn metadata(&self) -> ModuleMetadata {
        ModuleMetadata {
            type_name: "AudioMixer",
            parameter_names: vec!["volume".into()],
            display_names: vec!["Volume".into()],
            ..ModuleMetadata::default()
        }
    }

    fn input_ports(&self) -> Vec<PortDescriptor> {
        (0..self.input_count.max(1))
            .map(|i| PortDescriptor::input(&format!("audio_in_{i}"), PortKind::Audio).with_endpoint(i))
            .collect()
    }

    fn output_ports(&self) -> Vec<PortDescriptor> {
        vec![PortDescriptor::output("audio_out", PortKind::Audio)]
    }

    fn capabilities(&self) -> CapabilitySet {
        CAPS
    }

    fn state_snapshot(&self) -> Value {
        json!({
            "input_count": self.input_count,
            "master_volume": self.base.value(0),
        })
    }

    fn to_json(&self) -> Value {
        self.base.params_to_json()
    }

    fn from_json(&mut self, value: &Value) {
        self.base.params_from_json(value);
    }

    fn on_connection_established(&mut self, _other: &str, kind: PortKind, incoming: bool) {
        if kind == PortKind::Audio && incoming {
            self.input_count += 1;
        }
    }

    fn on_connection_broken(&mut self, _other: &str, kind: PortKind, incoming: bool) {
        if kind == PortKind::Audio && incoming {
            self.input_count = self.input_count.saturating_sub(1);
        }
    }
}
