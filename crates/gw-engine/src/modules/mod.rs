//! Built-in module types
//!
//! The contracts-only module set: a sequencer that drives the pattern
//! runtime, a polyphonic sampler stub, audio/video mixers, and the
//! master output sinks. Concrete DSP stays deliberately trivial — the
//! interesting part is how signals and triggers route between them.

mod audio_mixer;
mod audio_output;
mod sampler;
mod sequencer;
mod video_mixer;
mod video_output;

pub use audio_mixer::AudioMixer;
pub use audio_output::AudioOutput;
pub use sampler::MultiSampler;
pub use sequencer::StepSequencer;
pub use video_mixer::VideoMixer;
pub use video_output::VideoOutput;

use gw_module::ModuleFactory;

/// Register every built-in type with the factory (engine setup)
pub fn register_builtin_types(factory: &mut ModuleFactory) {
    factory.register_type("StepSequencer", || Box::new(StepSequencer::new()));
    factory.register_type("MultiSampler", || Box::new(MultiSampler::new()));
    factory.register_type("AudioMixer", || Box::new(AudioMixer::new()));
    factory.register_type("VideoMixer", || Box::new(VideoMixer::new()));
    factory.register_type("AudioOutput", || Box::new(AudioOutput::new()));
    factory.register_type("VideoOutput", || Box::new(VideoOutput::new()));
}
