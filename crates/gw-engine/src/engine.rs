//! Engine core
//!
//! `create_engine` builds the whole subsystem graph and returns the two
//! halves:
//! - `Engine`: clone-able control surface; safe from any thread
//! - `EngineProcessor`: owned by the audio callback
//!
//! ## Audio callback order
//!
//! 1. Drain up to `command_drain_cap` queued commands (all mutation
//!    happens here, before time advances)
//! 2. Advance the clock and fire the per-buffer time event
//! 3. Evaluate playing patterns, emitting sample-tagged triggers
//! 4. Dispatch triggers inline to subscribed handler slots
//! 5. Process the audio graph into the master sink, then the driver
//!    buffer
//!
//! ## Locking
//!
//! Control threads only take read locks (snapshots) and the producer
//! mutex; every write lock is taken on the audio thread during the
//! drain. Lock order is module → patterns; patterns and connections are
//! never held across module calls.

use parking_lot::{Mutex, RwLock};
use rtrb::Consumer;
use serde_json::Value;
use smallvec::SmallVec;
use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::sync::atomic::{AtomicU8, AtomicU64, Ordering};
use std::time::Duration;

use gw_core::{AudioBuffer, GwError, GwResult};
use gw_module::{
    AudioContext, InitContext, ModuleFactory, ModuleRegistry, PortKind, SharedModule,
    SharedPatterns,
};
use gw_pattern::{PatternRuntime, TriggerEvent};
use gw_route::{ConnectionManager, TRIGGER_EVENT, TRIGGER_HANDLER};
use gw_state::{EngineState, ModuleState, ObserverBus, TransportState, TypeSpecificState};

use crate::clock::Clock;
use crate::commands::{CommandResult, EngineCommand};
use crate::modules::register_builtin_types;
use crate::parser::{ParsedAction, Query, parse_command};
use crate::queue::{
    COMMAND_DRAIN_CAP, COMMAND_QUEUE_CAPACITY, CommandSender, QueuedCommand, QueuedItem,
};
use crate::script::ScriptRegistry;
use crate::undo::UndoManager;

// ═══════════════════════════════════════════════════════════════════════════════
// CONFIG & LIFECYCLE
// ═══════════════════════════════════════════════════════════════════════════════

/// Engine construction parameters
#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub sample_rate: f64,
    pub buffer_size: usize,
    pub channels: usize,
    pub bpm: f32,
    pub master_audio_out_name: String,
    pub master_video_out_name: String,
    pub command_drain_cap: usize,
    pub command_queue_capacity: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            sample_rate: gw_core::SampleRate::default().as_f64(),
            buffer_size: gw_core::BufferSize::default().as_usize(),
            channels: 2,
            bpm: Clock::DEFAULT_BPM,
            master_audio_out_name: "masterAudioOut".to_string(),
            master_video_out_name: "masterVideoOut".to_string(),
            command_drain_cap: COMMAND_DRAIN_CAP,
            command_queue_capacity: COMMAND_QUEUE_CAPACITY,
        }
    }
}

/// Engine lifecycle; transitions are one-way except teardown
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Lifecycle {
    Uninitialized = 0,
    Configured = 1,
    Running = 2,
}

// ═══════════════════════════════════════════════════════════════════════════════
// SHARED STATE
// ═══════════════════════════════════════════════════════════════════════════════

pub(crate) struct EngineShared {
    pub(crate) config: EngineConfig,
    pub(crate) clock: Clock,
    pub(crate) registry: RwLock<ModuleRegistry>,
    pub(crate) connections: RwLock<ConnectionManager>,
    pub(crate) patterns: SharedPatterns,
    pub(crate) factory: RwLock<ModuleFactory>,
    pub(crate) commands: CommandSender,
    pub(crate) observers: Mutex<ObserverBus>,
    pub(crate) state_version: AtomicU64,
    /// Bumped on every module/edge topology change; the processor
    /// rebuilds its graph caches only when this moves
    pub(crate) graph_version: AtomicU64,
    pub(crate) layouts: RwLock<Value>,
    pub(crate) scripts: ScriptRegistry,
    pub(crate) lifecycle: AtomicU8,
}

// ═══════════════════════════════════════════════════════════════════════════════
// COMMAND CONTEXT
// ═══════════════════════════════════════════════════════════════════════════════

/// Mutation surface handed to commands during the drain
///
/// Methods lock what they need, briefly; no lock is held while another
/// module call might re-enter.
pub struct EngineCtx<'a> {
    shared: &'a EngineShared,
}

impl<'a> EngineCtx<'a> {
    pub(crate) fn new(shared: &'a EngineShared) -> Self {
        Self { shared }
    }

    /// Mark the module/edge topology as changed
    fn bump_graph_version(&self) {
        self.shared.graph_version.fetch_add(1, Ordering::Relaxed);
    }

    pub fn clock(&self) -> &Clock {
        &self.shared.clock
    }

    pub fn master_audio_out_name(&self) -> &str {
        &self.shared.config.master_audio_out_name
    }

    pub fn master_video_out_name(&self) -> &str {
        &self.shared.config.master_video_out_name
    }

    /// Create, register, initialize, and auto-route a module
    pub fn add_module(&mut self, type_name: &str, name_hint: Option<&str>) -> GwResult<String> {
        self.add_module_impl(type_name, name_hint, false)
    }

    pub(crate) fn add_module_impl(
        &mut self,
        type_name: &str,
        name_hint: Option<&str>,
        restored: bool,
    ) -> GwResult<String> {
        let (resolved, module) = {
            let factory = self.shared.factory.read();
            let resolved = factory
                .resolve_type(type_name)
                .ok_or_else(|| GwError::NotFound(format!("module type '{type_name}'")))?
                .to_string();
            let module = factory.create(&resolved)?;
            (resolved, module)
        };

        let name = self.shared.registry.write().add(module, name_hint)?;

        let handle = self
            .shared
            .registry
            .read()
            .get(&name)
            .expect("module registered above");
        {
            let mut init = InitContext {
                sample_rate: self.shared.config.sample_rate,
                instance_name: &name,
                patterns: &self.shared.patterns,
                restored,
            };
            handle.lock().initialize(&mut init);
        }

        if !restored {
            let registry = self.shared.registry.read();
            let mut connections = self.shared.connections.write();
            let created = connections.discover_connections_for_module(
                &registry,
                &name,
                &self.shared.config.master_audio_out_name,
                &self.shared.config.master_video_out_name,
            );
            log::debug!("auto-routed {created} connection(s) for '{name}' ({resolved})");
        }
        self.bump_graph_version();
        Ok(name)
    }

    /// Disconnect everything, drop bindings, and deregister
    pub fn remove_module(&mut self, name: &str) -> GwResult<()> {
        if name == self.shared.config.master_audio_out_name
            || name == self.shared.config.master_video_out_name
        {
            return Err(GwError::Constraint(format!(
                "'{name}' is a system module"
            )));
        }
        {
            let registry = self.shared.registry.read();
            if !registry.contains(name) {
                return Err(GwError::NotFound(format!("module '{name}'")));
            }
            self.shared.connections.write().disconnect_all(&registry, name);
        }
        self.shared.patterns.write().remove_sequencer(name);
        let handle = self.shared.registry.write().remove(name)?;
        // Destroyed once the audio thread drops its cached reference
        drop(handle);
        self.bump_graph_version();
        Ok(())
    }

    /// Atomic rename: registry first, then every path that carries the
    /// old name
    pub fn rename_module(&mut self, old: &str, new: &str) -> GwResult<()> {
        self.shared.registry.write().rename(old, new)?;
        self.shared.connections.write().rename_module(old, new);
        self.shared.patterns.write().rename_sequencer(old, new);
        self.bump_graph_version();
        Ok(())
    }

    /// Set a module parameter; returns the previous value
    pub fn set_parameter(&mut self, module: &str, param: &str, value: f32) -> GwResult<f32> {
        let handle = self
            .shared
            .registry
            .read()
            .get(module)
            .ok_or_else(|| GwError::NotFound(format!("module '{module}'")))?;
        let old = handle.lock().parameter(param)?;
        handle.lock().set_parameter(param, value, true)?;

        let registry = self.shared.registry.read();
        self.shared
            .connections
            .read()
            .propagate_parameter(&registry, module, param, None, value);
        Ok(old)
    }

    /// Set an indexed module parameter; returns the previous value
    pub fn set_indexed_parameter(
        &mut self,
        module: &str,
        param: &str,
        index: usize,
        value: f32,
    ) -> GwResult<f32> {
        let handle = self
            .shared
            .registry
            .read()
            .get(module)
            .ok_or_else(|| GwError::NotFound(format!("module '{module}'")))?;
        let old = handle.lock().indexed_parameter(param, index)?;
        handle.lock().set_indexed_parameter(param, index, value, true)?;

        let registry = self.shared.registry.read();
        self.shared
            .connections
            .read()
            .propagate_parameter(&registry, module, param, Some(index), value);
        Ok(old)
    }

    /// Connect two modules; `None` auto-detects the signal kind
    pub fn connect(
        &mut self,
        source: &str,
        target: &str,
        kind: Option<PortKind>,
    ) -> GwResult<PortKind> {
        let registry = self.shared.registry.read();
        let mut connections = self.shared.connections.write();
        let connected = match kind {
            None => connections.connect(&registry, source, target),
            Some(PortKind::Audio) => connections
                .connect_audio(&registry, source, target)
                .map(|()| PortKind::Audio),
            Some(PortKind::Video) => connections
                .connect_video(&registry, source, target)
                .map(|()| PortKind::Video),
            Some(PortKind::Event) => connections
                .subscribe_event(&registry, source, TRIGGER_EVENT, target, TRIGGER_HANDLER)
                .map(|()| PortKind::Event),
            Some(PortKind::Parameter) => Err(GwError::Constraint(
                "parameter links need dotted paths; use connect_parameter".into(),
            )),
        };
        if connected.is_ok() {
            self.bump_graph_version();
        }
        connected
    }

    /// Bind a source parameter path to a target parameter path
    pub fn connect_parameter(&mut self, source_path: &str, target_path: &str) -> GwResult<()> {
        let registry = self.shared.registry.read();
        self.shared
            .connections
            .write()
            .connect_parameter(&registry, source_path, target_path, None)?;
        self.bump_graph_version();
        Ok(())
    }

    /// Remove edges from `source`; returns edges removed
    pub fn disconnect(
        &mut self,
        source: &str,
        target: Option<&str>,
        kind: Option<PortKind>,
    ) -> usize {
        let registry = self.shared.registry.read();
        let removed = self
            .shared
            .connections
            .write()
            .disconnect(&registry, source, target, kind);
        if removed > 0 {
            self.bump_graph_version();
        }
        removed
    }

    pub fn add_pattern(&mut self, name: Option<&str>, step_count: usize) -> GwResult<String> {
        self.shared
            .patterns
            .write()
            .add_pattern(name, step_count)
            .ok_or_else(|| GwError::Constraint("pattern name already taken".into()))
    }

    pub fn remove_pattern(&mut self, name: &str) -> GwResult<()> {
        if self.shared.patterns.write().remove_pattern(name) {
            Ok(())
        } else {
            Err(GwError::NotFound(format!("pattern '{name}'")))
        }
    }

    pub fn bind_sequencer_pattern(&mut self, sequencer: &str, pattern: &str) -> GwResult<()> {
        if !self.shared.registry.read().contains(sequencer) {
            return Err(GwError::NotFound(format!("module '{sequencer}'")));
        }
        if self
            .shared
            .patterns
            .write()
            .bind_sequencer_pattern(sequencer, pattern)
        {
            Ok(())
        } else {
            Err(GwError::NotFound(format!("pattern '{pattern}'")))
        }
    }

    pub fn bind_sequencer_chain(&mut self, sequencer: &str, chain: &str) -> GwResult<()> {
        if !self.shared.registry.read().contains(sequencer) {
            return Err(GwError::NotFound(format!("module '{sequencer}'")));
        }
        if self
            .shared
            .patterns
            .write()
            .bind_sequencer_chain(sequencer, chain)
        {
            Ok(())
        } else {
            Err(GwError::NotFound(format!("chain '{chain}'")))
        }
    }

    pub fn transport_start(&mut self) {
        self.shared.clock.start();
        self.shared.patterns.write().on_transport_start();
    }

    pub fn transport_stop(&mut self) {
        self.shared.clock.stop();
        self.shared.patterns.write().on_transport_stop();
    }

    pub fn transport_pause(&mut self) {
        self.shared.clock.pause();
        self.shared.patterns.write().on_transport_pause();
    }

    pub fn transport_reset(&mut self) {
        self.shared.clock.reset();
        self.shared.patterns.write().on_transport_reset();
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// ENGINE HANDLE (control threads)
// ═══════════════════════════════════════════════════════════════════════════════

/// Thread-safe engine control surface
#[derive(Clone)]
pub struct Engine {
    shared: Arc<EngineShared>,
}

impl Engine {
    pub fn config(&self) -> &EngineConfig {
        &self.shared.config
    }

    pub fn lifecycle(&self) -> Lifecycle {
        match self.shared.lifecycle.load(Ordering::Relaxed) {
            2 => Lifecycle::Running,
            1 => Lifecycle::Configured,
            _ => Lifecycle::Uninitialized,
        }
    }

    pub fn bpm(&self) -> f32 {
        self.shared.clock.bpm()
    }

    pub fn is_playing(&self) -> bool {
        self.shared.clock.is_playing()
    }

    pub fn beat_position(&self) -> f64 {
        self.shared.clock.beat_position()
    }

    /// Shared pattern runtime handle (edit layer, tests)
    pub fn patterns(&self) -> SharedPatterns {
        Arc::clone(&self.shared.patterns)
    }

    /// Register a transport listener on the clock
    pub fn add_transport_listener<F>(&self, listener: F) -> u64
    where
        F: Fn(bool) + Send + Sync + 'static,
    {
        self.shared.clock.add_transport_listener(listener)
    }

    pub fn remove_transport_listener(&self, id: u64) {
        self.shared.clock.remove_transport_listener(id);
    }

    /// Enqueue a command; executes at the next buffer boundary
    ///
    /// Returns false when the queue is full (the command is dropped).
    pub fn enqueue(&self, command: Box<dyn EngineCommand>) -> bool {
        self.shared.commands.push(QueuedItem::Command(command), None)
    }

    /// Enqueue and receive the result once the audio thread drains it
    pub fn enqueue_with_reply(
        &self,
        command: Box<dyn EngineCommand>,
    ) -> Option<crossbeam_channel::Receiver<CommandResult>> {
        let (tx, rx) = crossbeam_channel::bounded(1);
        self.shared
            .commands
            .push(QueuedItem::Command(command), Some(tx))
            .then_some(rx)
    }

    /// Parse and run a textual command line
    ///
    /// Mutations are enqueued and awaited for at most one buffer
    /// period; a command that misses the window still executes on a
    /// later buffer and is reported as queued. Failures come back as a
    /// single `error:`-prefixed line.
    pub fn execute_command(&self, line: &str) -> CommandResult {
        let actions = match parse_command(line) {
            Ok(actions) => actions,
            Err(err) => return CommandResult::failure(format!("error: {err}")),
        };
        if actions.is_empty() {
            return CommandResult::ok("");
        }

        let mut outputs = Vec::new();
        for action in actions {
            let item = match action {
                ParsedAction::Query(query) => {
                    outputs.push(self.answer_query(query));
                    continue;
                }
                ParsedAction::Command(command) => QueuedItem::Command(command),
                ParsedAction::Undo => QueuedItem::Undo,
                ParsedAction::Redo => QueuedItem::Redo,
            };

            let (tx, rx) = crossbeam_channel::bounded(1);
            if !self.shared.commands.push(item, Some(tx)) {
                return CommandResult::failure("error: command queue full");
            }
            match rx.recv_timeout(self.buffer_period()) {
                Ok(result) if result.success => outputs.push(result.message),
                Ok(result) => {
                    let mut failure =
                        CommandResult::failure(format!("error: {}", result.message));
                    failure.detail = result.detail;
                    return failure;
                }
                // Drain missed this buffer window; execution is
                // delayed, not lost
                Err(_) => outputs.push("queued".to_string()),
            }
        }
        CommandResult::ok(outputs.join("\n"))
    }

    fn buffer_period(&self) -> Duration {
        let secs = self.shared.config.buffer_size as f64 / self.shared.config.sample_rate;
        Duration::from_secs_f64(secs)
    }

    fn answer_query(&self, query: Query) -> String {
        match query {
            Query::ListModules => {
                let mut lines = Vec::new();
                self.shared.registry.read().for_each(|uuid, name, module| {
                    lines.push(format!("{name} [{}] {uuid}", module.lock().type_name()));
                });
                lines.join("\n")
            }
            Query::ListConnections => {
                let connections = self.shared.connections.read().connections();
                connections
                    .iter()
                    .map(|c| match c.kind {
                        PortKind::Parameter => {
                            format!("{} -> {} (parameter)", c.source_path, c.target_path)
                        }
                        kind => format!("{} -> {} ({})", c.source, c.target, kind.as_str()),
                    })
                    .collect::<Vec<_>>()
                    .join("\n")
            }
            Query::ListPatterns => {
                let patterns = self.shared.patterns.read();
                patterns
                    .pattern_names()
                    .iter()
                    .map(|name| {
                        let p = patterns.pattern(name).expect("listed name exists");
                        format!("{name}: {} steps @ {}", p.step_count(), p.steps_per_beat())
                    })
                    .collect::<Vec<_>>()
                    .join("\n")
            }
        }
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // SNAPSHOTS & OBSERVERS
    // ═══════════════════════════════════════════════════════════════════════════

    /// Build a value-typed snapshot of the whole engine
    pub fn get_state(&self) -> EngineState {
        build_state_snapshot(&self.shared)
    }

    pub fn module_state(&self, name: &str) -> Option<ModuleState> {
        self.get_state().modules.get(name).cloned()
    }

    /// Subscribe to state snapshots; returns an unsubscribe handle
    pub fn subscribe<F>(&self, observer: F) -> u64
    where
        F: Fn(&EngineState) + Send + Sync + 'static,
    {
        self.shared.observers.lock().subscribe(observer)
    }

    pub fn unsubscribe(&self, id: u64) {
        self.shared.observers.lock().unsubscribe(id);
    }

    /// Build one snapshot and deliver it to every observer
    pub fn notify_state_change(&self) {
        let state = build_state_snapshot(&self.shared);
        self.shared.observers.lock().notify(&state);
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // UI-RATE HOOKS
    // ═══════════════════════════════════════════════════════════════════════════

    /// UI-rate tick: runs every module's `update` hook
    ///
    /// A panicking module is logged and skipped; the tick continues.
    pub fn update(&self) {
        let handles = self.shared.registry.read().handles();
        for (name, handle) in handles {
            let result = catch_unwind(AssertUnwindSafe(|| {
                handle.lock().update();
            }));
            if result.is_err() {
                log::error!("module '{name}' panicked in update");
            }
        }
    }

    /// UI-rate video pass
    ///
    /// Pushes a frame descriptor through the video graph in dependency
    /// order, ending at the master video sink; returns the composited
    /// frame descriptor.
    pub fn render_video(&self, width: u32, height: u32) -> gw_core::VideoFrame {
        let handles = self.shared.registry.read().handles();
        let edges: Vec<(String, String)> = self
            .shared
            .connections
            .read()
            .connections()
            .into_iter()
            .filter(|c| c.kind == PortKind::Video && c.active)
            .map(|c| (c.source, c.target))
            .collect();

        let order = topological_order(&handles, &edges);
        let mut frame = gw_core::VideoFrame {
            width,
            height,
            opacity: 1.0,
        };
        for index in order {
            let (_, handle) = &handles[index];
            handle.lock().video_out(&mut frame);
        }
        frame
    }

    /// Scoped engine registry for the scripting collaborator
    pub fn scripts(&self) -> &ScriptRegistry {
        &self.shared.scripts
    }

    pub(crate) fn shared(&self) -> &Arc<EngineShared> {
        &self.shared
    }

    pub(crate) fn from_shared(shared: Arc<EngineShared>) -> Self {
        Self { shared }
    }
}

/// Snapshot build: read locks only, never two subsystem locks at once
fn build_state_snapshot(shared: &EngineShared) -> EngineState {
    let version = shared.state_version.fetch_add(1, Ordering::Relaxed) + 1;
    let transport = TransportState {
        is_playing: shared.clock.is_playing(),
        bpm: shared.clock.bpm(),
        current_beat: shared.clock.beat_position(),
    };

    let handles = shared.registry.read().handles();
    let mut modules = BTreeMap::new();
    for (name, handle) in handles {
        let module = handle.lock();
        let mut parameters = BTreeMap::new();
        for descriptor in module.parameters() {
            let value = module.parameter(&descriptor.name).unwrap_or_else(|err| {
                log::warn!("snapshot: parameter '{}' on '{name}': {err}", descriptor.name);
                descriptor.default
            });
            parameters.insert(descriptor.name, value);
        }
        let type_name = module.type_name().to_string();
        let type_specific = TypeSpecificState::parse(&type_name, &module.state_snapshot());
        modules.insert(
            name.clone(),
            ModuleState {
                name,
                type_name,
                enabled: module.is_enabled(),
                parameters,
                type_specific,
            },
        );
    }

    let connections = shared.connections.read().connections();
    EngineState {
        version,
        transport,
        modules,
        connections,
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// ENGINE PROCESSOR (audio thread)
// ═══════════════════════════════════════════════════════════════════════════════

/// Audio-thread half of the engine; NOT thread-safe by design
///
/// The graph caches below are rebuilt only when a command changed the
/// topology (tracked by `graph_version`); steady-state buffers run
/// entirely on pre-allocated storage.
pub struct EngineProcessor {
    shared: Arc<EngineShared>,
    command_rx: Consumer<QueuedCommand>,
    undo: UndoManager,
    triggers: Vec<TriggerEvent>,
    /// Topology generation the caches below were built from
    cached_graph_version: u64,
    module_cache: Vec<(String, SharedModule)>,
    /// Audio edges resolved to `module_cache` indices
    audio_edges: Vec<(usize, usize)>,
    process_order: Vec<usize>,
    /// Per-module output buffers, parallel to `module_cache`
    scratch: Vec<AudioBuffer>,
    /// Staging buffer for each module's summed upstream input
    mix_buffer: AudioBuffer,
    master_index: Option<usize>,
    degraded: Vec<bool>,
}

impl EngineProcessor {
    /// One driver callback: drain, advance, evaluate, dispatch, render
    pub fn audio_out(&mut self, buffer: &mut AudioBuffer) {
        self.shared
            .lifecycle
            .store(Lifecycle::Running as u8, Ordering::Relaxed);
        let frames = buffer.num_frames();

        // 1. Commands, strictly before clock advancement
        let executed = self.drain_commands();
        if executed > 0 {
            let state = build_state_snapshot(&self.shared);
            self.shared.observers.lock().notify(&state);
        }

        // New-module visibility for this buffer; a no-op unless a
        // drained command changed the topology
        self.refresh_caches(frames, buffer.num_channels());

        // 2. Clock
        let time = self.shared.clock.audio_out(frames);

        // 3. Pattern evaluation
        self.triggers.clear();
        let mut dispatches: SmallVec<[(String, usize); 16]> = SmallVec::new();
        {
            let mut patterns = self.shared.patterns.write();
            patterns.evaluate_patterns(frames, time.bpm, &mut self.triggers);
            for (index, trigger) in self.triggers.iter().enumerate() {
                for sequencer in patterns.sequencers_for_pattern(&trigger.pattern) {
                    dispatches.push((sequencer, index));
                }
            }
        }

        // 4. Trigger dispatch, inline on this thread at the trigger's
        //    sample offset ordering
        if !dispatches.is_empty() {
            let connections = self.shared.connections.read();
            for (sequencer, index) in &dispatches {
                for (target, handler) in connections.event_targets(sequencer) {
                    let Some(handle) = self.cached_module(target) else {
                        continue;
                    };
                    let trigger = &self.triggers[*index];
                    let result = catch_unwind(AssertUnwindSafe(|| {
                        handle.lock().handle_event(handler, trigger);
                    }));
                    if result.is_err() {
                        log::error!("handler '{handler}' on '{target}' panicked");
                    }
                }
            }
        }

        // 5. Audio graph
        self.process_graph(buffer, time.bpm, time.beat_position);
    }

    /// Commands drained this buffer, capped so audio is never starved
    fn drain_commands(&mut self) -> usize {
        let cap = self.shared.config.command_drain_cap;
        let mut executed = 0usize;
        while executed < cap {
            let Ok(queued) = self.command_rx.pop() else {
                break;
            };
            let mut ctx = EngineCtx::new(&self.shared);
            let result = match queued.item {
                QueuedItem::Command(mut command) => {
                    let outcome =
                        catch_unwind(AssertUnwindSafe(|| command.execute(&mut ctx)));
                    match outcome {
                        Ok(result) => {
                            if result.success {
                                self.undo.record(command);
                            } else {
                                log::warn!(
                                    "command '{}' failed: {}",
                                    command.describe(),
                                    result.message
                                );
                            }
                            result
                        }
                        Err(_) => {
                            log::error!("command '{}' panicked", command.describe());
                            CommandResult::failure_with(
                                "command failed",
                                format!("'{}' panicked during execute", command.describe()),
                            )
                        }
                    }
                }
                QueuedItem::Undo => self.undo.undo(&mut ctx),
                QueuedItem::Redo => self.undo.redo(&mut ctx),
            };
            if let Some(reply) = queued.reply {
                let _ = reply.send(result);
            }
            executed += 1;
        }
        executed
    }

    /// Refresh the graph caches at the buffer boundary
    ///
    /// Cheap generation check per buffer; the full rebuild (which does
    /// allocate) runs only after a command actually changed the module
    /// set or the edge set.
    fn refresh_caches(&mut self, frames: usize, channels: usize) {
        let version = self.shared.graph_version.load(Ordering::Relaxed);
        if version != self.cached_graph_version {
            self.rebuild_caches(frames, channels);
            self.cached_graph_version = version;
        } else if self.mix_buffer.num_frames() != frames
            || self.mix_buffer.num_channels() != channels
        {
            // Driver buffer geometry changed under us
            self.resize_buffers(frames, channels);
        }
    }

    /// Full cache rebuild after a topology change
    ///
    /// Locks are uncontended except for brief control-thread snapshot
    /// reads; the mutation that got us here ran on this thread.
    fn rebuild_caches(&mut self, frames: usize, channels: usize) {
        self.module_cache = self.shared.registry.read().handles();
        let name_edges: Vec<(String, String)> = self
            .shared
            .connections
            .read()
            .connections()
            .into_iter()
            .filter(|c| c.kind == PortKind::Audio && c.active)
            .map(|c| (c.source, c.target))
            .collect();

        self.process_order = topological_order(&self.module_cache, &name_edges);

        let cache = &self.module_cache;
        let index_of = |name: &str| cache.iter().position(|(n, _)| n == name);
        self.audio_edges = name_edges
            .iter()
            .filter_map(|(source, target)| Some((index_of(source)?, index_of(target)?)))
            .collect();
        self.master_index = index_of(&self.shared.config.master_audio_out_name);

        self.degraded.clear();
        self.degraded.resize(self.module_cache.len(), false);
        self.resize_buffers(frames, channels);
    }

    /// (Re)allocate the per-module scratch and mix buffers
    fn resize_buffers(&mut self, frames: usize, channels: usize) {
        let sample_rate = self.shared.config.sample_rate as u32;
        self.mix_buffer = AudioBuffer::new(frames, channels, sample_rate);
        self.scratch = (0..self.module_cache.len())
            .map(|_| AudioBuffer::new(frames, channels, sample_rate))
            .collect();
    }

    fn cached_module(&self, name: &str) -> Option<&SharedModule> {
        self.module_cache
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, handle)| handle)
    }

    /// Render the audio graph: upstream outputs are pre-mixed into each
    /// module's buffer, the master sink lands in the driver buffer
    ///
    /// Steady state touches only the pre-allocated scratch buffers.
    fn process_graph(&mut self, buffer: &mut AudioBuffer, bpm: f32, beat_position: f64) {
        let ctx = AudioContext {
            sample_rate: self.shared.config.sample_rate,
            bpm,
            beat_position,
            is_playing: self.shared.clock.is_playing(),
        };

        for &index in &self.process_order {
            // Pre-mix upstream outputs into the staging buffer
            self.mix_buffer.clear();
            for &(source, target) in &self.audio_edges {
                if target == index {
                    self.mix_buffer.mix_from(&self.scratch[source], 1.0);
                }
            }

            let chunk = &mut self.scratch[index];
            chunk.copy_from(&self.mix_buffer);

            let (name, handle) = &self.module_cache[index];
            let panicked = catch_unwind(AssertUnwindSafe(|| {
                handle.lock().audio_out(chunk, &ctx);
            }))
            .is_err();
            if panicked {
                // Degraded for the rest of the buffer: silence
                chunk.clear();
                if !self.degraded[index] {
                    self.degraded[index] = true;
                    log::error!("module '{name}' panicked in audio_out; silencing");
                }
            } else {
                self.degraded[index] = false;
            }
        }

        match self.master_index {
            Some(index) => buffer.copy_from(&self.scratch[index]),
            None => buffer.clear(),
        }
    }

    pub fn can_undo(&self) -> bool {
        self.undo.can_undo()
    }

    pub fn can_redo(&self) -> bool {
        self.undo.can_redo()
    }
}

/// Kahn's algorithm over named modules; cycles fall back to insertion
/// order for the remainder
fn topological_order(nodes: &[(String, SharedModule)], edges: &[(String, String)]) -> Vec<usize> {
    let index_of: HashMap<&str, usize> = nodes
        .iter()
        .enumerate()
        .map(|(i, (name, _))| (name.as_str(), i))
        .collect();

    let n = nodes.len();
    let mut in_degree = vec![0usize; n];
    let mut outgoing: Vec<Vec<usize>> = vec![Vec::new(); n];
    for (source, target) in edges {
        if let (Some(&s), Some(&t)) = (index_of.get(source.as_str()), index_of.get(target.as_str()))
        {
            outgoing[s].push(t);
            in_degree[t] += 1;
        }
    }

    let mut order = Vec::with_capacity(n);
    let mut ready: VecDeque<usize> = (0..n).filter(|&i| in_degree[i] == 0).collect();
    while let Some(node) = ready.pop_front() {
        order.push(node);
        for &next in &outgoing[node] {
            in_degree[next] -= 1;
            if in_degree[next] == 0 {
                ready.push_back(next);
            }
        }
    }
    if order.len() < n {
        log::warn!("module graph contains a cycle");
        let seen: HashSet<usize> = order.iter().copied().collect();
        order.extend((0..n).filter(|i| !seen.contains(i)));
    }
    order
}

// ═══════════════════════════════════════════════════════════════════════════════
// CONSTRUCTION
// ═══════════════════════════════════════════════════════════════════════════════

/// Build the engine pair
///
/// Creates the clock, pattern runtime, registry, factory, connection
/// manager, and the master sink modules. Failure to create the master
/// sinks is fatal: the engine refuses to enter Running.
pub fn create_engine(config: EngineConfig) -> GwResult<(Engine, EngineProcessor)> {
    let (commands, command_rx) = CommandSender::new(config.command_queue_capacity);

    let mut factory = ModuleFactory::new();
    register_builtin_types(&mut factory);

    let clock = Clock::new(config.sample_rate);
    clock.set_bpm(config.bpm);

    let shared = Arc::new(EngineShared {
        clock,
        registry: RwLock::new(ModuleRegistry::new()),
        connections: RwLock::new(ConnectionManager::new()),
        patterns: Arc::new(RwLock::new(PatternRuntime::new(config.sample_rate))),
        factory: RwLock::new(factory),
        commands,
        observers: Mutex::new(ObserverBus::new()),
        state_version: AtomicU64::new(0),
        graph_version: AtomicU64::new(0),
        layouts: RwLock::new(Value::Null),
        scripts: ScriptRegistry::new(),
        lifecycle: AtomicU8::new(Lifecycle::Uninitialized as u8),
        config,
    });

    {
        let mut ctx = EngineCtx::new(&shared);
        let master_audio = shared.config.master_audio_out_name.clone();
        let master_video = shared.config.master_video_out_name.clone();
        ctx.add_module("AudioOutput", Some(&master_audio))
            .map_err(|err| GwError::Setup(format!("master audio sink: {err}")))?;
        ctx.add_module("VideoOutput", Some(&master_video))
            .map_err(|err| GwError::Setup(format!("master video sink: {err}")))?;
    }
    shared
        .lifecycle
        .store(Lifecycle::Configured as u8, Ordering::Relaxed);
    shared.scripts.install(&shared);

    let engine = Engine {
        shared: Arc::clone(&shared),
    };
    let sample_rate = engine.config().sample_rate as u32;
    let processor = EngineProcessor {
        shared,
        command_rx,
        undo: UndoManager::default(),
        triggers: Vec::with_capacity(64),
        // Stale generation forces a cache build on the first buffer
        cached_graph_version: u64::MAX,
        module_cache: Vec::new(),
        audio_edges: Vec::new(),
        process_order: Vec::new(),
        scratch: Vec::new(),
        mix_buffer: AudioBuffer::new(0, 0, sample_rate),
        master_index: None,
        degraded: Vec::new(),
    };
    Ok((engine, processor))
}
