//! Polyphonic sampler module
//!
//! Voice lifecycle and trigger handling are the real content here; the
//! rendered audio is a plain sine per voice, enough to watch signal
//! flow through the graph.

use serde_json::{Value, json};

use gw_core::{AudioBuffer, GwResult, ModuleUuid, ParamDescriptor, now_secs};
use gw_module::{
    AudioContext, Capability, CapabilitySet, InitContext, Module, ModuleBase, ModuleMetadata,
    PolyphonyMode, PortDescriptor, PortKind, Voice, VoicePool, VoiceState,
};
use gw_pattern::TriggerEvent;

const CAPS: CapabilitySet = CapabilitySet::new(&[
    Capability::AcceptsTriggers,
    Capability::ProducesAudio,
    Capability::AcceptsFileDrop,
]);

const MAX_VOICES: usize = 16;

#[derive(Default)]
struct SamplerVoice {
    state: VoiceState,
    start_time: f64,
    remaining_frames: u64,
    note: i32,
    gain: f32,
    phase: f32,
    phase_inc: f32,
}

impl Voice for SamplerVoice {
    fn state(&self) -> VoiceState {
        self.state
    }

    fn start_time(&self) -> f64 {
        self.start_time
    }
}

pub struct MultiSampler {
    base: ModuleBase,
    pool: VoicePool<SamplerVoice, MAX_VOICES>,
    sample_rate: f64,
}

impl MultiSampler {
    pub fn new() -> Self {
        Self {
            base: ModuleBase::new(vec![
                ParamDescriptor::float("position", 0.0, 1.0, 0.0),
                ParamDescriptor::float("volume", 0.0, 2.0, 1.0),
                ParamDescriptor::float("speed", -4.0, 4.0, 1.0),
                ParamDescriptor::bool("polyphonic", true),
            ]),
            pool: VoicePool::new(),
            sample_rate: 48000.0,
        }
    }
}

impl Default for MultiSampler {
    fn default() -> Self {
        Self::new()
    }
}

impl Module for MultiSampler {
    fn type_name(&self) -> &'static str {
        "MultiSampler"
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
        self.sample_rate = ctx.sample_rate;
    }

    fn audio_out(&mut self, buffer: &mut AudioBuffer, _ctx: &AudioContext) {
        // Source module: input is ignored, the buffer is ours
        buffer.clear();
        if !self.base.is_enabled() {
            return;
        }

        let frames = buffer.num_frames();
        let channels = buffer.num_channels();
        for voice in self.pool.active_voices_mut() {
            if voice.state != VoiceState::Playing {
                voice.state = VoiceState::Free;
                continue;
            }
            let render = frames.min(voice.remaining_frames as usize);
            for frame in 0..render {
                let sample = (voice.phase * std::f32::consts::TAU).sin() * voice.gain * 0.1;
                voice.phase = (voice.phase + voice.phase_inc).fract();
                for channel in 0..channels {
                    let value = buffer.sample(frame, channel) + sample;
                    buffer.set_sample(frame, channel, value);
                }
            }
            voice.remaining_frames = voice.remaining_frames.saturating_sub(frames as u64);
            if voice.remaining_frames == 0 {
                voice.state = VoiceState::Free;
            }
        }
    }

    fn set_parameter(&mut self, name: &str, value: f32, _notify: bool) -> GwResult<()> {
        let applied = self.base.set(name, value)?;
        if name == "polyphonic" {
            self.pool.set_polyphony_mode(if applied >= 0.5 {
                PolyphonyMode::Polyphonic
            } else {
                PolyphonyMode::Monophonic
            });
        }
        Ok(())
    }

    fn parameter(&self, name: &str) -> GwResult<f32> {
        self.base.get(name)
    }

    fn parameters(&self) -> Vec<ParamDescriptor> {
        self.base.descriptors().to_vec()
    }

    fn metadata(&self) -> ModuleMetadata {
        ModuleMetadata {
            type_name: "MultiSampler",
            event_names: Vec::new(),
            handler_names: vec!["on_trigger"],
            parameter_names: self
                .base
                .descriptors()
                .iter()
                .map(|d| d.name.clone())
                .collect(),
            display_names: self
                .base
                .descriptors()
                .iter()
                .map(|d| d.display_name.clone())
                .collect(),
        }
    }

    fn input_ports(&self) -> Vec<PortDescriptor> {
        vec![PortDescriptor::input("trigger_in", PortKind::Event)]
    }

    fn output_ports(&self) -> Vec<PortDescriptor> {
        vec![PortDescriptor::output("audio_out", PortKind::Audio)]
    }

    fn capabilities(&self) -> CapabilitySet {
        CAPS
    }

    fn state_snapshot(&self) -> Value {
        json!({
            "active_voices": self.pool.active_count(),
            "polyphonic": self.pool.polyphony_mode() == PolyphonyMode::Polyphonic,
        })
    }

    fn to_json(&self) -> Value {
        self.base.params_to_json()
    }

    fn from_json(&mut self, value: &Value) {
        self.base.params_from_json(value);
    }

    fn handle_event(&mut self, handler: &str, event: &TriggerEvent) {
        if handler != "on_trigger" || !self.base.is_enabled() {
            return;
        }
        // Rests carry note -1 and never reach voices
        if event.note < 0 {
            return;
        }

        if self.pool.polyphony_mode() == PolyphonyMode::Monophonic {
            for voice in self.pool.voices_mut() {
                voice.state = VoiceState::Free;
            }
        }

        let volume = self.base.get("volume").unwrap_or(1.0);
        let gain = volume * event.value("volume").unwrap_or(1.0);
        let rate = event.value("speed").unwrap_or(1.0).abs().max(0.01);
        let frequency = 220.0 * (event.note as f32 / 12.0).exp2() * rate;
        let phase_inc = frequency / self.sample_rate as f32;
        let remaining = (event.duration_secs * self.sample_rate).max(1.0) as u64;

        if let Some(voice) = self.pool.allocate() {
            voice.state = VoiceState::Playing;
            voice.start_time = now_secs();
            voice.remaining_frames = remaining;
            voice.note = event.note;
            voice.gain = gain;
            voice.phase = 0.0;
            voice.phase_inc = phase_inc;
        }
    }
}
