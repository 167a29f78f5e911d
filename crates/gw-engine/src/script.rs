//! Scripting surface
//!
//! A scoped registry owned by the engine (never a process-wide global)
//! exposes a limited API to the binding layer: create and inspect
//! modules, set parameters, connect, subscribe to state changes.
//! Everything goes through the same command queue as textual commands;
//! scripts never touch internals.

use parking_lot::Mutex;
use std::sync::{Arc, Weak};

use gw_module::PortKind;
use gw_state::EngineState;

use crate::commands::{
    AddModuleCommand, CommandResult, ConnectCommand, SetParameterCommand,
};
use crate::engine::{Engine, EngineShared};

/// Holds the engine reference handed to the binding layer
///
/// Lifecycle: `install` at engine setup, `teardown` before the engine
/// drops. The slot is weak, so a forgotten teardown never keeps the
/// engine alive.
pub struct ScriptRegistry {
    slot: Mutex<Option<Weak<EngineShared>>>,
}

impl ScriptRegistry {
    pub(crate) fn new() -> Self {
        Self {
            slot: Mutex::new(None),
        }
    }

    pub(crate) fn install(&self, shared: &Arc<EngineShared>) {
        *self.slot.lock() = Some(Arc::downgrade(shared));
    }

    /// Drop the binding-layer reference
    pub fn teardown(&self) {
        *self.slot.lock() = None;
    }

    /// Bindings for the current engine, if still alive
    pub fn bindings(&self) -> Option<ScriptBindings> {
        let shared = self.slot.lock().as_ref()?.upgrade()?;
        Some(ScriptBindings {
            engine: Engine::from_shared(shared),
        })
    }
}

/// The limited API scripts see
pub struct ScriptBindings {
    engine: Engine,
}

impl ScriptBindings {
    /// Create a module; runs the engine's command pipeline
    pub fn create_module(&self, type_name: &str, name: Option<&str>) -> CommandResult {
        self.run(Box::new(AddModuleCommand::new(type_name, name)))
    }

    pub fn set_parameter(&self, module: &str, param: &str, value: f32) -> CommandResult {
        self.run(Box::new(SetParameterCommand::new(module, param, value)))
    }

    pub fn connect(&self, source: &str, target: &str, kind: Option<PortKind>) -> CommandResult {
        self.run(Box::new(ConnectCommand::new(source, target, kind)))
    }

    /// Run any textual command line
    pub fn eval(&self, line: &str) -> CommandResult {
        self.engine.execute_command(line)
    }

    pub fn state(&self) -> EngineState {
        self.engine.get_state()
    }

    pub fn subscribe<F>(&self, observer: F) -> u64
    where
        F: Fn(&EngineState) + Send + Sync + 'static,
    {
        self.engine.subscribe(observer)
    }

    pub fn unsubscribe(&self, id: u64) {
        self.engine.unsubscribe(id);
    }

    fn run(&self, command: Box<dyn crate::commands::EngineCommand>) -> CommandResult {
        match self.engine.enqueue_with_reply(command) {
            Some(rx) => match rx.recv_timeout(std::time::Duration::from_millis(100)) {
                Ok(result) => result,
                Err(_) => CommandResult::ok("queued"),
            },
            None => CommandResult::failure("command queue full"),
        }
    }
}
