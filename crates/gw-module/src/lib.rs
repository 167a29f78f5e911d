//! gw-module: Module model for GridWave
//!
//! Everything a node in the graph needs to be routable:
//! - `Module` trait: the uniform polymorphic surface
//! - Capability sets and typed ports (routing dispatches on these, not
//!   on concrete types)
//! - `ModuleRegistry`: UUID ↔ name ↔ object lookup in insertion order
//! - `ModuleFactory`: type-name → constructor registration
//! - `VoicePool`: fixed-capacity polyphony management

mod capability;
mod factory;
mod module;
mod port;
mod registry;
mod voice;

pub use capability::*;
pub use factory::*;
pub use module::*;
pub use port::*;
pub use registry::*;
pub use voice::*;
