//! Module factory
//!
//! Maps type names to constructors. Built-in module types register at
//! engine setup; the factory is owned by the engine, never a process
//! global.

use std::collections::BTreeMap;

use gw_core::{GwError, GwResult};

use crate::module::Module;

/// Constructor for one module type
pub type FactoryFn = fn() -> Box<dyn Module>;

/// Type-name → constructor table
#[derive(Default)]
pub struct ModuleFactory {
    types: BTreeMap<String, FactoryFn>,
}

impl ModuleFactory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a module type; re-registration replaces with a warning
    pub fn register_type(&mut self, type_name: &str, factory: FactoryFn) {
        if self.types.insert(type_name.to_string(), factory).is_some() {
            log::warn!("module type '{type_name}' registered twice");
        }
    }

    pub fn has_type(&self, type_name: &str) -> bool {
        self.types.contains_key(type_name)
    }

    /// Case-insensitive type lookup (textual commands)
    pub fn resolve_type(&self, type_name: &str) -> Option<&str> {
        self.types
            .keys()
            .find(|k| k.eq_ignore_ascii_case(type_name))
            .map(String::as_str)
    }

    pub fn create(&self, type_name: &str) -> GwResult<Box<dyn Module>> {
        let factory = self
            .types
            .get(type_name)
            .ok_or_else(|| GwError::NotFound(format!("module type '{type_name}'")))?;
        Ok(factory())
    }

    pub fn type_names(&self) -> Vec<&str> {
        self.types.keys().map(String::as_str).collect()
    }
}
