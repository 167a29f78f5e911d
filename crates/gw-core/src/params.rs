//! Parameter descriptors and atomic parameter storage

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU32, Ordering};

/// Parameter value kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ParamKind {
    Float,
    Int,
    Bool,
    Enum,
}

/// Describes one module parameter
///
/// Values travel the engine as `f32` regardless of kind; `kind` tells the
/// edit layer how to present and quantize them.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParamDescriptor {
    pub name: String,
    pub kind: ParamKind,
    pub min: f32,
    pub max: f32,
    pub default: f32,
    pub display_name: String,
}

impl ParamDescriptor {
    pub fn float(name: &str, min: f32, max: f32, default: f32) -> Self {
        Self {
            name: name.to_string(),
            kind: ParamKind::Float,
            min,
            max,
            default,
            display_name: name.to_string(),
        }
    }

    pub fn int(name: &str, min: i32, max: i32, default: i32) -> Self {
        Self {
            name: name.to_string(),
            kind: ParamKind::Int,
            min: min as f32,
            max: max as f32,
            default: default as f32,
            display_name: name.to_string(),
        }
    }

    pub fn bool(name: &str, default: bool) -> Self {
        Self {
            name: name.to_string(),
            kind: ParamKind::Bool,
            min: 0.0,
            max: 1.0,
            default: if default { 1.0 } else { 0.0 },
            display_name: name.to_string(),
        }
    }

    pub fn with_display_name(mut self, display: &str) -> Self {
        self.display_name = display.to_string();
        self
    }

    /// Clamp a raw value into this parameter's range
    #[inline]
    pub fn clamp(&self, value: f32) -> f32 {
        value.clamp(self.min, self.max)
    }
}

/// Lock-free f32 parameter cell
///
/// Written from command execution, read from the audio path.
pub struct AtomicF32 {
    bits: AtomicU32,
}

impl AtomicF32 {
    pub fn new(value: f32) -> Self {
        Self {
            bits: AtomicU32::new(value.to_bits()),
        }
    }

    #[inline]
    pub fn get(&self) -> f32 {
        f32::from_bits(self.bits.load(Ordering::Relaxed))
    }

    #[inline]
    pub fn set(&self, value: f32) {
        self.bits.store(value.to_bits(), Ordering::Relaxed);
    }
}

impl Default for AtomicF32 {
    fn default() -> Self {
        Self::new(0.0)
    }
}

impl std::fmt::Debug for AtomicF32 {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("AtomicF32").field(&self.get()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_descriptor_clamp() {
        let desc = ParamDescriptor::float("volume", 0.0, 1.0, 0.8);
        assert_eq!(desc.clamp(2.0), 1.0);
        assert_eq!(desc.clamp(-1.0), 0.0);
        assert_eq!(desc.clamp(0.5), 0.5);
    }

    #[test]
    fn test_atomic_f32() {
        let p = AtomicF32::new(0.25);
        assert_eq!(p.get(), 0.25);
        p.set(-3.5);
        assert_eq!(p.get(), -3.5);
    }
}
