//! Video mixer module

use serde_json::{Value, json};

use gw_core::{GwResult, ModuleUuid, ParamDescriptor, VideoFrame};
use gw_module::{
    Capability, CapabilitySet, Module, ModuleBase, ModuleMetadata, PortDescriptor, PortKind,
};

const CAPS: CapabilitySet =
    CapabilitySet::new(&[Capability::ConsumesVideo, Capability::ProducesVideo]);

/// Weights composited layers by the master opacity; the actual
/// compositing belongs to the renderer
pub struct VideoMixer {
    base: ModuleBase,
    input_count: usize,
}

impl VideoMixer {
    pub fn new() -> Self {
        Self {
            base: ModuleBase::new(vec![ParamDescriptor::float("opacity", 0.0, 1.0, 1.0)]),
            input_count: 0,
        }
    }
}

impl Default for VideoMixer {
    fn default() -> Self {
        Self::new()
    }
}

impl Module for VideoMixer {
    fn type_name(&self) -> &'static str {
        "VideoMixer"
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

    fn video_out(&mut self, frame: &mut VideoFrame) {
        frame.opacity *= self.base.value(0);
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
            type_name: "VideoMixer",
            parameter_names: vec!["opacity".into()],
            display_names: vec!["Opacity".into()],
            ..ModuleMetadata::default()
        }
    }

    fn input_ports(&self) -> Vec<PortDescriptor> {
        (0..self.input_count.max(1))
            .map(|i| PortDescriptor::input(&format!("video_in_{i}"), PortKind::Video).with_endpoint(i))
            .collect()
    }

    fn output_ports(&self) -> Vec<PortDescriptor> {
        vec![PortDescriptor::output("video_out", PortKind::Video)]
    }

    fn capabilities(&self) -> CapabilitySet {
        CAPS
    }

    fn state_snapshot(&self) -> Value {
        json!({
            "input_count": self.input_count,
            "master_opacity": self.base.value(0),
        })
    }

    fn to_json(&self) -> Value {
        self.base.params_to_json()
    }

    fn from_json(&mut self, value: &Value) {
        self.base.params_from_json(value);
    }

    fn on_connection_established(&mut self, _other: &str, kind: PortKind, incoming: bool) {
        if kind == PortKind::Video && incoming {
            self.input_count += 1;
        }
    }

    fn on_connection_broken(&mut self, _other: &str, kind: PortKind, incoming: bool) {
        if kind == PortKind::Video && incoming {
            self.input_count = self.input_count.saturating_sub(1);
        }
    }
}
