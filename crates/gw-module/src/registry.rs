//! Module registry
//!
//! Owns the live set of modules and the UUID ↔ name ↔ object mapping.
//! Iteration follows insertion order. The registry itself is dumb
//! storage; add/remove/rename orchestration (connection cleanup,
//! discovery, observer notification) belongs to the engine.

use parking_lot::Mutex;
use std::sync::Arc;

use gw_core::{GwError, GwResult, ModuleUuid, unique_instance_name};

use crate::module::Module;

/// Shared handle to a live module
///
/// The audio thread caches these per buffer; control threads lock
/// briefly for snapshots and commands.
pub type SharedModule = Arc<Mutex<Box<dyn Module>>>;

struct RegistryEntry {
    uuid: ModuleUuid,
    name: String,
    module: SharedModule,
}

/// Live module set with stable iteration order
#[derive(Default)]
pub struct ModuleRegistry {
    entries: Vec<RegistryEntry>,
}

impl ModuleRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a module under a unique instance name
    ///
    /// `name_hint` requests a specific name (rejected when taken); with
    /// no hint the name derives from the type name, lowercased, with a
    /// numeric suffix on collision. Returns the assigned name.
    pub fn add(&mut self, module: Box<dyn Module>, name_hint: Option<&str>) -> GwResult<String> {
        let name = match name_hint {
            Some(hint) if hint.is_empty() => {
                return Err(GwError::Constraint("module name must not be empty".into()));
            }
            Some(hint) => {
                if self.contains(hint) {
                    return Err(GwError::Constraint(format!(
                        "module name '{hint}' is already taken"
                    )));
                }
                hint.to_string()
            }
            None => unique_instance_name(module.type_name(), |n| self.contains(n)),
        };

        let uuid = module.uuid();
        let module: SharedModule = Arc::new(Mutex::new(module));
        module.lock().set_instance_name(&name);

        self.entries.push(RegistryEntry {
            uuid,
            name: name.clone(),
            module,
        });
        log::debug!("registered module '{name}' ({uuid})");
        Ok(name)
    }

    /// Remove a module, returning its handle for final teardown
    pub fn remove(&mut self, name: &str) -> GwResult<SharedModule> {
        let index = self
            .index_of(name)
            .ok_or_else(|| GwError::NotFound(format!("module '{name}'")))?;
        let entry = self.entries.remove(index);
        log::debug!("deregistered module '{name}'");
        Ok(entry.module)
    }

    /// Atomically rename a module
    ///
    /// Rejects empty or taken names. The UUID is untouched.
    pub fn rename(&mut self, old: &str, new: &str) -> GwResult<()> {
        if new.is_empty() {
            return Err(GwError::Constraint("module name must not be empty".into()));
        }
        if old == new {
            return Ok(());
        }
        if self.contains(new) {
            return Err(GwError::Constraint(format!(
                "module name '{new}' is already taken"
            )));
        }
        let index = self
            .index_of(old)
            .ok_or_else(|| GwError::NotFound(format!("module '{old}'")))?;
        self.entries[index].name = new.to_string();
        self.entries[index].module.lock().set_instance_name(new);
        Ok(())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.index_of(name).is_some()
    }

    pub fn get(&self, name: &str) -> Option<SharedModule> {
        self.index_of(name)
            .map(|i| Arc::clone(&self.entries[i].module))
    }

    pub fn get_by_uuid(&self, uuid: ModuleUuid) -> Option<SharedModule> {
        self.entries
            .iter()
            .find(|e| e.uuid == uuid)
            .map(|e| Arc::clone(&e.module))
    }

    pub fn name_of(&self, uuid: ModuleUuid) -> Option<&str> {
        self.entries
            .iter()
            .find(|e| e.uuid == uuid)
            .map(|e| e.name.as_str())
    }

    pub fn uuid_of(&self, name: &str) -> Option<ModuleUuid> {
        self.index_of(name).map(|i| self.entries[i].uuid)
    }

    /// Visit every module in insertion order
    ///
    /// Callbacks must not add or remove modules.
    pub fn for_each<F>(&self, mut visit: F)
    where
        F: FnMut(ModuleUuid, &str, &SharedModule),
    {
        for entry in &self.entries {
            visit(entry.uuid, &entry.name, &entry.module);
        }
    }

    pub fn names(&self) -> Vec<String> {
        self.entries.iter().map(|e| e.name.clone()).collect()
    }

    /// Snapshot of the module handles for audio-thread caching
    pub fn handles(&self) -> Vec<(String, SharedModule)> {
        self.entries
            .iter()
            .map(|e| (e.name.clone(), Arc::clone(&e.module)))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn index_of(&self, name: &str) -> Option<usize> {
        self.entries.iter().position(|e| e.name == name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capability::CapabilitySet;
    use crate::module::{ModuleBase, ModuleMetadata};
    use crate::port::PortDescriptor;
    use gw_core::ParamDescriptor;
    use serde_json::Value;

    struct Stub {
        base: ModuleBase,
    }

    impl Stub {
        fn boxed() -> Box<dyn Module> {
            Box::new(Self {
                base: ModuleBase::new(vec![ParamDescriptor::float("gain", 0.0, 1.0, 1.0)]),
            })
        }
    }

    impl Module for Stub {
        fn type_name(&self) -> &'static str {
            "Stub"
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
        fn set_parameter(&mut self, name: &str, value: f32, _notify: bool) -> GwResult<()> {
            self.base.set(name, value).map(|_| ())
        }
        fn parameter(&self, name: &str) -> GwResult<f32> {
            self.base.get(name)
        }
        fn parameters(&self) -> Vec<ParamDescriptor> {
            self.base.descriptors().to_vec()
        }
        fn metadata(&self) -> ModuleMetadata {
            ModuleMetadata {
                type_name: "Stub",
                ..ModuleMetadata::default()
            }
        }
        fn input_ports(&self) -> Vec<PortDescriptor> {
            Vec::new()
        }
        fn output_ports(&self) -> Vec<PortDescriptor> {
            Vec::new()
        }
        fn capabilities(&self) -> CapabilitySet {
            CapabilitySet::EMPTY
        }
        fn to_json(&self) -> Value {
            self.base.params_to_json()
        }
        fn from_json(&mut self, value: &Value) {
            self.base.params_from_json(value);
        }
    }

    #[test]
    fn test_add_assigns_unique_names() {
        let mut reg = ModuleRegistry::new();
        assert_eq!(reg.add(Stub::boxed(), None).unwrap(), "stub");
        assert_eq!(reg.add(Stub::boxed(), None).unwrap(), "stub1");
        assert_eq!(reg.add(Stub::boxed(), None).unwrap(), "stub2");
        assert_eq!(reg.len(), 3);
    }

    #[test]
    fn test_add_rejects_taken_hint() {
        let mut reg = ModuleRegistry::new();
        reg.add(Stub::boxed(), Some("s1")).unwrap();
        assert!(reg.add(Stub::boxed(), Some("s1")).is_err());
        assert!(reg.add(Stub::boxed(), Some("")).is_err());
    }

    #[test]
    fn test_rename_keeps_uuid() {
        let mut reg = ModuleRegistry::new();
        reg.add(Stub::boxed(), Some("old")).unwrap();
        let uuid = reg.uuid_of("old").unwrap();

        reg.rename("old", "new").unwrap();
        assert!(!reg.contains("old"));
        assert_eq!(reg.uuid_of("new"), Some(uuid));
        assert_eq!(reg.get("new").unwrap().lock().instance_name(), "new");
    }

    #[test]
    fn test_rename_rejects_collision() {
        let mut reg = ModuleRegistry::new();
        reg.add(Stub::boxed(), Some("a")).unwrap();
        reg.add(Stub::boxed(), Some("b")).unwrap();
        assert!(reg.rename("a", "b").is_err());
        assert!(reg.rename("a", "").is_err());
        assert!(reg.rename("missing", "c").is_err());
    }

    #[test]
    fn test_iteration_order() {
        let mut reg = ModuleRegistry::new();
        reg.add(Stub::boxed(), Some("first")).unwrap();
        reg.add(Stub::boxed(), Some("second")).unwrap();
        reg.add(Stub::boxed(), Some("third")).unwrap();
        reg.remove("second").unwrap();

        let mut seen = Vec::new();
        reg.for_each(|_, name, _| seen.push(name.to_string()));
        assert_eq!(seen, vec!["first", "third"]);
    }
}
