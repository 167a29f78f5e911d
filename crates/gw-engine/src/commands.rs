//! Engine commands
//!
//! Every state mutation is a command object: enqueued from any control
//! thread, executed on the audio thread at the next buffer boundary,
//! in enqueue order. Commands capture the pre-state they need for undo
//! inside `execute` on first invocation — pre-state captured at
//! construction could be stale by the time the drain runs.

use gw_module::PortKind;

use crate::engine::EngineCtx;

/// Outcome surfaced to command callers
#[derive(Debug, Clone)]
pub struct CommandResult {
    pub success: bool,
    pub message: String,
    pub detail: Option<String>,
}

impl CommandResult {
    pub fn ok(message: impl Into<String>) -> Self {
        Self {
            success: true,
            message: message.into(),
            detail: None,
        }
    }

    pub fn failure(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: message.into(),
            detail: None,
        }
    }

    pub fn failure_with(message: impl Into<String>, detail: impl Into<String>) -> Self {
        Self {
            success: false,
            message: message.into(),
            detail: Some(detail.into()),
        }
    }

    fn from_gw(result: gw_core::GwResult<String>) -> Self {
        match result {
            Ok(message) => Self::ok(message),
            Err(err) => Self::failure(err.to_string()),
        }
    }
}

/// Atomic, ordered, undoable mutation
pub trait EngineCommand: Send {
    fn execute(&mut self, ctx: &mut EngineCtx<'_>) -> CommandResult;

    /// Reverse the command using state captured during `execute`
    fn undo(&mut self, _ctx: &mut EngineCtx<'_>) -> CommandResult {
        CommandResult::failure(format!("'{}' cannot be undone", self.describe()))
    }

    fn is_undoable(&self) -> bool {
        false
    }

    fn describe(&self) -> String;
}

// ═══════════════════════════════════════════════════════════════════════════════
// PARAMETERS
// ═══════════════════════════════════════════════════════════════════════════════

/// Set a module parameter
pub struct SetParameterCommand {
    module: String,
    param: String,
    value: f32,
    old_value: Option<f32>,
}

impl SetParameterCommand {
    pub fn new(module: &str, param: &str, value: f32) -> Self {
        Self {
            module: module.to_string(),
            param: param.to_string(),
            value,
            old_value: None,
        }
    }
}

impl EngineCommand for SetParameterCommand {
    fn execute(&mut self, ctx: &mut EngineCtx<'_>) -> CommandResult {
        match ctx.set_parameter(&self.module, &self.param, self.value) {
            Ok(old) => {
                // First execution captures the undo state; redo keeps it
                if self.old_value.is_none() {
                    self.old_value = Some(old);
                }
                CommandResult::ok(format!(
                    "{}.{} = {}",
                    self.module, self.param, self.value
                ))
            }
            Err(err) => CommandResult::failure(err.to_string()),
        }
    }

    fn undo(&mut self, ctx: &mut EngineCtx<'_>) -> CommandResult {
        let Some(old) = self.old_value else {
            return CommandResult::failure("undo before execute");
        };
        CommandResult::from_gw(
            ctx.set_parameter(&self.module, &self.param, old)
                .map(|_| format!("{}.{} = {}", self.module, self.param, old)),
        )
    }

    fn is_undoable(&self) -> bool {
        true
    }

    fn describe(&self) -> String {
        format!("set {} {} {}", self.module, self.param, self.value)
    }
}

/// Set an indexed module parameter (`module.param[i]`)
pub struct SetIndexedParameterCommand {
    module: String,
    param: String,
    index: usize,
    value: f32,
    old_value: Option<f32>,
}

impl SetIndexedParameterCommand {
    pub fn new(module: &str, param: &str, index: usize, value: f32) -> Self {
        Self {
            module: module.to_string(),
            param: param.to_string(),
            index,
            value,
            old_value: None,
        }
    }
}

impl EngineCommand for SetIndexedParameterCommand {
    fn execute(&mut self, ctx: &mut EngineCtx<'_>) -> CommandResult {
        match ctx.set_indexed_parameter(&self.module, &self.param, self.index, self.value) {
            Ok(old) => {
                if self.old_value.is_none() {
                    self.old_value = Some(old);
                }
                CommandResult::ok(format!(
                    "{}.{}[{}] = {}",
                    self.module, self.param, self.index, self.value
                ))
            }
            Err(err) => CommandResult::failure(err.to_string()),
        }
    }

    fn undo(&mut self, ctx: &mut EngineCtx<'_>) -> CommandResult {
        let Some(old) = self.old_value else {
            return CommandResult::failure("undo before execute");
        };
        CommandResult::from_gw(
            ctx.set_indexed_parameter(&self.module, &self.param, self.index, old)
                .map(|_| "restored".to_string()),
        )
    }

    fn is_undoable(&self) -> bool {
        true
    }

    fn describe(&self) -> String {
        format!(
            "set {}.{}[{}] {}",
            self.module, self.param, self.index, self.value
        )
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// TEMPO
// ═══════════════════════════════════════════════════════════════════════════════

/// Set the global BPM
pub struct SetBpmCommand {
    bpm: f32,
    old_bpm: Option<f32>,
}

impl SetBpmCommand {
    pub fn new(bpm: f32) -> Self {
        Self { bpm, old_bpm: None }
    }
}

impl EngineCommand for SetBpmCommand {
    fn execute(&mut self, ctx: &mut EngineCtx<'_>) -> CommandResult {
        if self.bpm <= 0.0 || !self.bpm.is_finite() {
            return CommandResult::failure(format!("BPM must be positive, got {}", self.bpm));
        }
        let old = ctx.clock().bpm();
        if self.old_bpm.is_none() {
            self.old_bpm = Some(old);
        }
        ctx.clock().set_bpm(self.bpm);
        CommandResult::ok(format!("BPM {} -> {}", old, self.bpm))
    }

    fn undo(&mut self, ctx: &mut EngineCtx<'_>) -> CommandResult {
        let Some(old) = self.old_bpm else {
            return CommandResult::failure("undo before execute");
        };
        ctx.clock().set_bpm(old);
        CommandResult::ok(format!("BPM restored to {old}"))
    }

    fn is_undoable(&self) -> bool {
        true
    }

    fn describe(&self) -> String {
        format!("bpm {}", self.bpm)
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// MODULE LIFECYCLE
// ═══════════════════════════════════════════════════════════════════════════════

/// Create and register a module
pub struct AddModuleCommand {
    type_name: String,
    name_hint: Option<String>,
    created: Option<String>,
}

impl AddModuleCommand {
    pub fn new(type_name: &str, name_hint: Option<&str>) -> Self {
        Self {
            type_name: type_name.to_string(),
            name_hint: name_hint.map(str::to_string),
            created: None,
        }
    }

    pub fn created_name(&self) -> Option<&str> {
        self.created.as_deref()
    }
}

impl EngineCommand for AddModuleCommand {
    fn execute(&mut self, ctx: &mut EngineCtx<'_>) -> CommandResult {
        match ctx.add_module(&self.type_name, self.name_hint.as_deref()) {
            Ok(name) => {
                self.created = Some(name.clone());
                CommandResult::ok(format!("added {} '{}'", self.type_name, name))
            }
            Err(err) => CommandResult::failure(err.to_string()),
        }
    }

    fn undo(&mut self, ctx: &mut EngineCtx<'_>) -> CommandResult {
        let Some(name) = self.created.take() else {
            return CommandResult::failure("undo before execute");
        };
        CommandResult::from_gw(ctx.remove_module(&name).map(|()| format!("removed '{name}'")))
    }

    fn is_undoable(&self) -> bool {
        true
    }

    fn describe(&self) -> String {
        match &self.name_hint {
            Some(hint) => format!("add {} {}", self.type_name, hint),
            None => format!("add {}", self.type_name),
        }
    }
}

/// Destroy a module
///
/// Not undoable: the module's full state and its edges are gone once
/// removed.
pub struct RemoveModuleCommand {
    name: String,
}

impl RemoveModuleCommand {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
        }
    }
}

impl EngineCommand for RemoveModuleCommand {
    fn execute(&mut self, ctx: &mut EngineCtx<'_>) -> CommandResult {
        CommandResult::from_gw(
            ctx.remove_module(&self.name)
                .map(|()| format!("removed '{}'", self.name)),
        )
    }

    fn describe(&self) -> String {
        format!("remove {}", self.name)
    }
}

/// Rename a module, rewriting connection paths
pub struct RenameModuleCommand {
    old: String,
    new: String,
}

impl RenameModuleCommand {
    pub fn new(old: &str, new: &str) -> Self {
        Self {
            old: old.to_string(),
            new: new.to_string(),
        }
    }
}

impl EngineCommand for RenameModuleCommand {
    fn execute(&mut self, ctx: &mut EngineCtx<'_>) -> CommandResult {
        CommandResult::from_gw(
            ctx.rename_module(&self.old, &self.new)
                .map(|()| format!("renamed '{}' to '{}'", self.old, self.new)),
        )
    }

    fn undo(&mut self, ctx: &mut EngineCtx<'_>) -> CommandResult {
        CommandResult::from_gw(
            ctx.rename_module(&self.new, &self.old)
                .map(|()| format!("renamed '{}' back to '{}'", self.new, self.old)),
        )
    }

    fn is_undoable(&self) -> bool {
        true
    }

    fn describe(&self) -> String {
        format!("rename {} {}", self.old, self.new)
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// CONNECTIONS
// ═══════════════════════════════════════════════════════════════════════════════

/// Connect two modules
pub struct ConnectCommand {
    source: String,
    target: String,
    kind: Option<PortKind>,
    connected: Option<PortKind>,
}

impl ConnectCommand {
    pub fn new(source: &str, target: &str, kind: Option<PortKind>) -> Self {
        Self {
            source: source.to_string(),
            target: target.to_string(),
            kind,
            connected: None,
        }
    }
}

impl EngineCommand for ConnectCommand {
    fn execute(&mut self, ctx: &mut EngineCtx<'_>) -> CommandResult {
        match ctx.connect(&self.source, &self.target, self.kind) {
            Ok(kind) => {
                self.connected = Some(kind);
                CommandResult::ok(format!(
                    "routed {} -> {} ({})",
                    self.source,
                    self.target,
                    kind.as_str()
                ))
            }
            Err(err) => CommandResult::failure(err.to_string()),
        }
    }

    fn undo(&mut self, ctx: &mut EngineCtx<'_>) -> CommandResult {
        let Some(kind) = self.connected else {
            return CommandResult::failure("undo before execute");
        };
        let removed = ctx.disconnect(&self.source, Some(&self.target), Some(kind));
        if removed > 0 {
            CommandResult::ok(format!("unrouted {} -> {}", self.source, self.target))
        } else {
            CommandResult::failure("connection already gone")
        }
    }

    fn is_undoable(&self) -> bool {
        true
    }

    fn describe(&self) -> String {
        format!("route {} {}", self.source, self.target)
    }
}

/// Bind a source parameter path to a target parameter path
pub struct ConnectParameterCommand {
    source_path: String,
    target_path: String,
}

impl ConnectParameterCommand {
    pub fn new(source_path: &str, target_path: &str) -> Self {
        Self {
            source_path: source_path.to_string(),
            target_path: target_path.to_string(),
        }
    }
}

impl EngineCommand for ConnectParameterCommand {
    fn execute(&mut self, ctx: &mut EngineCtx<'_>) -> CommandResult {
        CommandResult::from_gw(
            ctx.connect_parameter(&self.source_path, &self.target_path)
                .map(|()| format!("linked {} -> {}", self.source_path, self.target_path)),
        )
    }

    fn describe(&self) -> String {
        format!("route {} {} param", self.source_path, self.target_path)
    }
}

/// Disconnect modules
///
/// Not undoable: a broad disconnect (all targets, all kinds) loses
/// which edges existed.
pub struct DisconnectCommand {
    source: String,
    target: Option<String>,
    kind: Option<PortKind>,
}

impl DisconnectCommand {
    pub fn new(source: &str, target: Option<&str>, kind: Option<PortKind>) -> Self {
        Self {
            source: source.to_string(),
            target: target.map(str::to_string),
            kind,
        }
    }
}

impl EngineCommand for DisconnectCommand {
    fn execute(&mut self, ctx: &mut EngineCtx<'_>) -> CommandResult {
        let removed = ctx.disconnect(&self.source, self.target.as_deref(), self.kind);
        CommandResult::ok(format!("removed {removed} connection(s)"))
    }

    fn describe(&self) -> String {
        match &self.target {
            Some(target) => format!("unroute {} {}", self.source, target),
            None => format!("unroute {}", self.source),
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// TRANSPORT
// ═══════════════════════════════════════════════════════════════════════════════

/// Start the transport
pub struct StartTransportCommand {
    was_playing: Option<bool>,
}

impl StartTransportCommand {
    pub fn new() -> Self {
        Self { was_playing: None }
    }
}

impl Default for StartTransportCommand {
    fn default() -> Self {
        Self::new()
    }
}

impl EngineCommand for StartTransportCommand {
    fn execute(&mut self, ctx: &mut EngineCtx<'_>) -> CommandResult {
        if self.was_playing.is_none() {
            self.was_playing = Some(ctx.clock().is_playing());
        }
        ctx.transport_start();
        CommandResult::ok("transport started")
    }

    fn undo(&mut self, ctx: &mut EngineCtx<'_>) -> CommandResult {
        if self.was_playing == Some(false) {
            ctx.transport_stop();
        }
        CommandResult::ok("transport restored")
    }

    fn is_undoable(&self) -> bool {
        true
    }

    fn describe(&self) -> String {
        "play".to_string()
    }
}

/// Stop the transport (position resets on the pattern side)
pub struct StopTransportCommand {
    was_playing: Option<bool>,
}

impl StopTransportCommand {
    pub fn new() -> Self {
        Self { was_playing: None }
    }
}

impl Default for StopTransportCommand {
    fn default() -> Self {
        Self::new()
    }
}

impl EngineCommand for StopTransportCommand {
    fn execute(&mut self, ctx: &mut EngineCtx<'_>) -> CommandResult {
        if self.was_playing.is_none() {
            self.was_playing = Some(ctx.clock().is_playing());
        }
        ctx.transport_stop();
        CommandResult::ok("transport stopped")
    }

    fn undo(&mut self, ctx: &mut EngineCtx<'_>) -> CommandResult {
        if self.was_playing == Some(true) {
            ctx.transport_start();
        }
        CommandResult::ok("transport restored")
    }

    fn is_undoable(&self) -> bool {
        true
    }

    fn describe(&self) -> String {
        "stop".to_string()
    }
}

/// Pause the transport, keeping positions for resume
pub struct PauseTransportCommand {
    was_playing: Option<bool>,
}

impl PauseTransportCommand {
    pub fn new() -> Self {
        Self { was_playing: None }
    }
}

impl Default for PauseTransportCommand {
    fn default() -> Self {
        Self::new()
    }
}

impl EngineCommand for PauseTransportCommand {
    fn execute(&mut self, ctx: &mut EngineCtx<'_>) -> CommandResult {
        if self.was_playing.is_none() {
            self.was_playing = Some(ctx.clock().is_playing());
        }
        ctx.transport_pause();
        CommandResult::ok("transport paused")
    }

    fn undo(&mut self, ctx: &mut EngineCtx<'_>) -> CommandResult {
        if self.was_playing == Some(true) {
            ctx.transport_start();
        }
        CommandResult::ok("transport restored")
    }

    fn is_undoable(&self) -> bool {
        true
    }

    fn describe(&self) -> String {
        "pause".to_string()
    }
}

/// Reset the transport to beat zero
pub struct ResetTransportCommand {
    previous: Option<(f64, u64)>,
}

impl ResetTransportCommand {
    pub fn new() -> Self {
        Self { previous: None }
    }
}

impl Default for ResetTransportCommand {
    fn default() -> Self {
        Self::new()
    }
}

impl EngineCommand for ResetTransportCommand {
    fn execute(&mut self, ctx: &mut EngineCtx<'_>) -> CommandResult {
        if self.previous.is_none() {
            self.previous = Some((ctx.clock().beat_position(), ctx.clock().sample_counter()));
        }
        ctx.transport_reset();
        CommandResult::ok("transport reset")
    }

    fn undo(&mut self, ctx: &mut EngineCtx<'_>) -> CommandResult {
        let Some((beat, samples)) = self.previous else {
            return CommandResult::failure("undo before execute");
        };
        ctx.clock().restore_position(beat, samples);
        CommandResult::ok("transport position restored")
    }

    fn is_undoable(&self) -> bool {
        true
    }

    fn describe(&self) -> String {
        "reset".to_string()
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// PATTERNS & BINDINGS
// ═══════════════════════════════════════════════════════════════════════════════

/// Declare a pattern
pub struct AddPatternCommand {
    name: Option<String>,
    step_count: usize,
    created: Option<String>,
}

impl AddPatternCommand {
    pub fn new(name: Option<&str>, step_count: usize) -> Self {
        Self {
            name: name.map(str::to_string),
            step_count,
            created: None,
        }
    }
}

impl EngineCommand for AddPatternCommand {
    fn execute(&mut self, ctx: &mut EngineCtx<'_>) -> CommandResult {
        match ctx.add_pattern(self.name.as_deref(), self.step_count) {
            Ok(name) => {
                self.created = Some(name.clone());
                CommandResult::ok(format!("pattern '{}' ({} steps)", name, self.step_count))
            }
            Err(err) => CommandResult::failure(err.to_string()),
        }
    }

    fn undo(&mut self, ctx: &mut EngineCtx<'_>) -> CommandResult {
        let Some(name) = self.created.take() else {
            return CommandResult::failure("undo before execute");
        };
        CommandResult::from_gw(
            ctx.remove_pattern(&name)
                .map(|()| format!("pattern '{name}' removed")),
        )
    }

    fn is_undoable(&self) -> bool {
        true
    }

    fn describe(&self) -> String {
        match &self.name {
            Some(name) => format!("pattern {} {}", name, self.step_count),
            None => format!("pattern <auto> {}", self.step_count),
        }
    }
}

/// Bind a sequencer to a pattern
pub struct BindSequencerPatternCommand {
    sequencer: String,
    pattern: String,
}

impl BindSequencerPatternCommand {
    pub fn new(sequencer: &str, pattern: &str) -> Self {
        Self {
            sequencer: sequencer.to_string(),
            pattern: pattern.to_string(),
        }
    }
}

impl EngineCommand for BindSequencerPatternCommand {
    fn execute(&mut self, ctx: &mut EngineCtx<'_>) -> CommandResult {
        CommandResult::from_gw(
            ctx.bind_sequencer_pattern(&self.sequencer, &self.pattern)
                .map(|()| format!("'{}' bound to '{}'", self.sequencer, self.pattern)),
        )
    }

    fn describe(&self) -> String {
        format!("bind {} {}", self.sequencer, self.pattern)
    }
}

/// Attach a chain to a sequencer
pub struct BindSequencerChainCommand {
    sequencer: String,
    chain: String,
}

impl BindSequencerChainCommand {
    pub fn new(sequencer: &str, chain: &str) -> Self {
        Self {
            sequencer: sequencer.to_string(),
            chain: chain.to_string(),
        }
    }
}

impl EngineCommand for BindSequencerChainCommand {
    fn execute(&mut self, ctx: &mut EngineCtx<'_>) -> CommandResult {
        CommandResult::from_gw(
            ctx.bind_sequencer_chain(&self.sequencer, &self.chain)
                .map(|()| format!("'{}' chained to '{}'", self.sequencer, self.chain)),
        )
    }

    fn describe(&self) -> String {
        format!("chain {} {}", self.sequencer, self.chain)
    }
}
