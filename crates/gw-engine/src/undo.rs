//! Undo/redo history over engine commands
//!
//! Commands capture their pre-state during `execute` on the audio
//! thread, so the history holds exactly what each undo needs. Commands
//! that declare themselves not undoable (remove-module, disconnect) are
//! recorded for bookkeeping but refuse to run backwards.

use std::collections::VecDeque;

use crate::commands::{CommandResult, EngineCommand};
use crate::engine::EngineCtx;

/// Default history depth
pub const MAX_UNDO_HISTORY: usize = 256;

/// Bounded undo/redo stacks
pub struct UndoManager {
    undo_stack: VecDeque<Box<dyn EngineCommand>>,
    redo_stack: Vec<Box<dyn EngineCommand>>,
    max_history: usize,
}

impl Default for UndoManager {
    fn default() -> Self {
        Self::new(MAX_UNDO_HISTORY)
    }
}

impl UndoManager {
    pub fn new(max_history: usize) -> Self {
        Self {
            undo_stack: VecDeque::with_capacity(max_history),
            redo_stack: Vec::new(),
            max_history,
        }
    }

    /// Record a successfully executed command
    ///
    /// New work clears the redo stack.
    pub fn record(&mut self, command: Box<dyn EngineCommand>) {
        while self.undo_stack.len() >= self.max_history {
            self.undo_stack.pop_front();
        }
        self.undo_stack.push_back(command);
        self.redo_stack.clear();
    }

    /// Undo the most recent command
    pub fn undo(&mut self, ctx: &mut EngineCtx<'_>) -> CommandResult {
        let Some(mut command) = self.undo_stack.pop_back() else {
            return CommandResult::failure("nothing to undo");
        };
        if !command.is_undoable() {
            log::warn!("'{}' cannot be undone", command.describe());
            return CommandResult::failure(format!(
                "'{}' cannot be undone",
                command.describe()
            ));
        }
        let result = command.undo(ctx);
        if result.success {
            self.redo_stack.push(command);
        }
        result
    }

    /// Re-execute the most recently undone command
    pub fn redo(&mut self, ctx: &mut EngineCtx<'_>) -> CommandResult {
        let Some(mut command) = self.redo_stack.pop() else {
            return CommandResult::failure("nothing to redo");
        };
        let result = command.execute(ctx);
        if result.success {
            self.undo_stack.push_back(command);
        }
        result
    }

    pub fn can_undo(&self) -> bool {
        !self.undo_stack.is_empty()
    }

    pub fn can_redo(&self) -> bool {
        !self.redo_stack.is_empty()
    }

    pub fn undo_count(&self) -> usize {
        self.undo_stack.len()
    }

    pub fn clear(&mut self) {
        self.undo_stack.clear();
        self.redo_stack.clear();
    }
}
