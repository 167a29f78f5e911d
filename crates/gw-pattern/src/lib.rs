//! gw-pattern: Pattern data model and runtime for GridWave
//!
//! Holds every pattern, chain, and sequencer binding; evaluates playing
//! patterns on each audio buffer with sample accuracy and emits trigger
//! events. Mutation happens only between buffers (via the engine's
//! command drain), evaluation only on the audio thread.

mod chain;
mod events;
mod pattern;
mod playback;
mod runtime;
mod step;
mod trigger;

pub use chain::*;
pub use events::*;
pub use pattern::*;
pub use playback::*;
pub use runtime::*;
pub use step::*;
pub use trigger::*;
