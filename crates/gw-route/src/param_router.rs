//! Parameter router
//!
//! Binds source parameters to target parameters across modules. A
//! propagated change cascades through chained bindings; every
//! connection carries a `syncing` flag that suppresses re-entrant
//! propagation, so binding cycles settle instead of looping.

use std::sync::atomic::{AtomicBool, Ordering};

use gw_core::{GwError, GwResult};
use gw_module::ModuleRegistry;

use crate::path::ParamPath;

/// Poll-gate for a binding; `false` pauses sync without removing it
pub type Condition = Box<dyn Fn() -> bool + Send + Sync>;

struct ParamBinding {
    source: ParamPath,
    target: ParamPath,
    condition: Option<Condition>,
    syncing: AtomicBool,
}

/// Routes parameter values along registered bindings
#[derive(Default)]
pub struct ParameterRouter {
    bindings: Vec<ParamBinding>,
}

impl ParameterRouter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind `source_path` to `target_path`
    ///
    /// Duplicate (source, target) pairs coalesce. Conditions are
    /// runtime-only and never serialized.
    pub fn connect(
        &mut self,
        registry: &ModuleRegistry,
        source_path: &str,
        target_path: &str,
        condition: Option<Condition>,
    ) -> GwResult<()> {
        let source = ParamPath::parse(source_path)?;
        let target = ParamPath::parse(target_path)?;

        if !registry.contains(&source.module) {
            return Err(GwError::NotFound(format!("module '{}'", source.module)));
        }
        if !registry.contains(&target.module) {
            return Err(GwError::NotFound(format!("module '{}'", target.module)));
        }

        if let Some(existing) = self
            .bindings
            .iter_mut()
            .find(|b| b.source == source && b.target == target)
        {
            existing.condition = condition;
            return Ok(());
        }

        self.bindings.push(ParamBinding {
            source,
            target,
            condition,
            syncing: AtomicBool::new(false),
        });
        Ok(())
    }

    /// Remove every binding originating at `source_path`
    pub fn disconnect(&mut self, source_path: &str) -> GwResult<usize> {
        let source = ParamPath::parse(source_path)?;
        let before = self.bindings.len();
        self.bindings.retain(|b| b.source != source);
        Ok(before - self.bindings.len())
    }

    /// Remove every binding touching `module`
    pub fn disconnect_module(&mut self, module: &str) -> usize {
        let before = self.bindings.len();
        self.bindings
            .retain(|b| b.source.module != module && b.target.module != module);
        before - self.bindings.len()
    }

    pub fn clear(&mut self) {
        self.bindings.clear();
    }

    /// Rewrite module names inside every path after a rename
    pub fn rename_module(&mut self, old: &str, new: &str) {
        for binding in &mut self.bindings {
            if binding.source.module == old {
                binding.source.module = new.to_string();
            }
            if binding.target.module == old {
                binding.target.module = new.to_string();
            }
        }
    }

    /// All bindings as (source, target) path strings
    pub fn connections(&self) -> Vec<(String, String)> {
        self.bindings
            .iter()
            .map(|b| (b.source.to_string(), b.target.to_string()))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.bindings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bindings.is_empty()
    }

    /// Propagate a changed parameter to every bound target
    ///
    /// Cascades through chained bindings; the per-binding `syncing`
    /// guard stops cycles.
    pub fn propagate(
        &self,
        registry: &ModuleRegistry,
        module: &str,
        param: &str,
        index: Option<usize>,
        value: f32,
    ) {
        for (slot, binding) in self.bindings.iter().enumerate() {
            if binding.source.module != module
                || binding.source.param != param
                || binding.source.index != index
            {
                continue;
            }
            if let Some(condition) = &binding.condition {
                if !condition() {
                    continue;
                }
            }
            if binding.syncing.swap(true, Ordering::Acquire) {
                // Already propagating through this edge; feedback loop
                continue;
            }

            let applied = apply_to_target(registry, &binding.target, value);
            if applied {
                // Chained bindings: the target's change flows onward
                self.propagate(
                    registry,
                    &self.bindings[slot].target.module.clone(),
                    &self.bindings[slot].target.param.clone(),
                    self.bindings[slot].target.index,
                    value,
                );
            }

            binding.syncing.store(false, Ordering::Release);
        }
    }
}

fn apply_to_target(registry: &ModuleRegistry, target: &ParamPath, value: f32) -> bool {
    let Some(module) = registry.get(&target.module) else {
        log::warn!("parameter route to missing module '{}'", target.module);
        return false;
    };
    let mut module = module.lock();
    let result = match target.index {
        Some(index) => module.set_indexed_parameter(&target.param, index, value, false),
        None => module.set_parameter(&target.param, value, false),
    };
    if let Err(err) = result {
        log::warn!("parameter route to '{target}' failed: {err}");
        return false;
    }
    true
}
