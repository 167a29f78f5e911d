//! Module identity
//!
//! Every module instance carries two identifiers:
//! - a stable opaque UUID, assigned at construction and never reused
//! - a human-readable instance name, unique within the registry and
//!   renamable
//!
//! Windows and persisted references address modules by UUID; user-facing
//! commands address by name.

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Stable opaque module identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ModuleUuid(Uuid);

impl ModuleUuid {
    /// Generate a fresh UUID
    pub fn generate() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl fmt::Display for ModuleUuid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Derive a unique instance name from a type name
///
/// The base is the lowercased type name; a numeric suffix is appended
/// while the candidate collides with `is_taken`.
pub fn unique_instance_name<F>(type_name: &str, is_taken: F) -> String
where
    F: Fn(&str) -> bool,
{
    let base = type_name.to_lowercase();
    if !is_taken(&base) {
        return base;
    }
    let mut suffix = 1usize;
    loop {
        let candidate = format!("{base}{suffix}");
        if !is_taken(&candidate) {
            return candidate;
        }
        suffix += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_uuid_uniqueness() {
        let a = ModuleUuid::generate();
        let b = ModuleUuid::generate();
        assert_ne!(a, b);
    }

    #[test]
    fn test_unique_instance_name() {
        let mut taken: HashSet<String> = HashSet::new();
        let name = unique_instance_name("MultiSampler", |n| taken.contains(n));
        assert_eq!(name, "multisampler");
        taken.insert(name);

        let name = unique_instance_name("MultiSampler", |n| taken.contains(n));
        assert_eq!(name, "multisampler1");
        taken.insert(name);

        let name = unique_instance_name("MultiSampler", |n| taken.contains(n));
        assert_eq!(name, "multisampler2");
    }
}
