//! Master video sink

use serde_json::Value;

use gw_core::{GwResult, ModuleUuid, ParamDescriptor, VideoFrame};
use gw_module::{
    Capability, CapabilitySet, Module, ModuleBase, ModuleMetadata, PortDescriptor, PortKind,
};

const CAPS: CapabilitySet = CapabilitySet::new(&[Capability::ConsumesVideo]);

pub struct VideoOutput {
    base: ModuleBase,
    last_frame: VideoFrame,
}

impl VideoOutput {
    pub fn new() -> Self {
        Self {
            base: ModuleBase::new(Vec::new()),
            last_frame: VideoFrame::default(),
        }
    }

    /// Most recent frame descriptor that reached the sink
    pub fn last_frame(&self) -> VideoFrame {
        self.last_frame
    }
}

impl Default for VideoOutput {
    fn default() -> Self {
        Self::new()
    }
}

impl Module for VideoOutput {
    fn type_name(&self) -> &'static str {
        "VideoOutput"
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
        self.last_frame = *frame;
    }

    fn set_parameter(&mut self, name: &str, _value: f32, _notify: bool) -> GwResult<()> {
        Err(gw_core::GwError::NotFound(format!("parameter '{name}'")))
    }

    fn parameter(&self, name: &str) -> GwResult<f32> {
        Err(gw_core::GwError::NotFound(format!("parameter '{name}'")))
    }

    fn parameters(&self) -> Vec<ParamDescriptor> {
        Vec::new()
    }

    fn metadata(&self) -> ModuleMetadata {
        ModuleMetadata {
            type_name: "VideoOutput",
            ..ModuleMetadata::default()
        }
    }

    fn input_ports(&self) -> Vec<PortDescriptor> {
        vec![PortDescriptor::input("video_in", PortKind::Video)]
    }

    fn output_ports(&self) -> Vec<PortDescriptor> {
        Vec::new()
    }

    fn capabilities(&self) -> CapabilitySet {
        CAPS
    }

    fn to_json(&self) -> Value {
        Value::Null
    }

    fn from_json(&mut self, _value: &Value) {}
}
