//! Master audio sink
//!
//! Terminal node of the audio graph; every producing chain ultimately
//! lands here. Applies the master volume before the engine hands the
//! buffer back to the driver.

use serde_json::Value;

use gw_core::{AudioBuffer, GwResult, ModuleUuid, ParamDescriptor};
use gw_module::{
    AudioContext, Capability, CapabilitySet, Module, ModuleBase, ModuleMetadata, PortDescriptor,
    PortKind,
};

const CAPS: CapabilitySet = CapabilitySet::new(&[Capability::ConsumesAudio]);

pub struct AudioOutput {
    base: ModuleBase,
}

impl AudioOutput {
    pub fn new() -> Self {
        Self {
            base: ModuleBase::new(vec![ParamDescriptor::float("volume", 0.0, 1.0, 1.0)]),
        }
    }
}

impl Default for AudioOutput {
    fn default() -> Self {
        Self::new()
    }
}

impl Module for AudioOutput {
    fn type_name(&self) -> &'static str {
        "AudioOutput"
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
            type_name: "AudioOutput",
            parameter_names: vec!["volume".into()],
            display_names: vec!["Volume".into()],
            ..ModuleMetadata::default()
        }
    }

    fn input_ports(&self) -> Vec<PortDescriptor> {
        vec![PortDescriptor::input("audio_in", PortKind::Audio)]
    }

    fn output_ports(&self) -> Vec<PortDescriptor> {
        Vec::new()
    }

    fn capabilities(&self) -> CapabilitySet {
        CAPS
    }

    fn to_json(&self) -> Value {
        self.base.params_to_json()
    }

    fn from_json(&mut self, value: &Value) {
        self.base.params_from_json(value);
    }
}
