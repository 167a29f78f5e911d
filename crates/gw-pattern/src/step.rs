//! Step cell type

use serde::{Deserialize, Serialize};
use smallvec::SmallVec;

/// Sentinel for a rest step (no trigger)
pub const REST: i32 = -1;

/// Maximum step length in steps
pub const MAX_STEP_LENGTH: u32 = 64;

/// One cell in a pattern's sequence
///
/// `index` is the slot the step triggers (−1 = rest). `ratio_a:ratio_b`
/// encodes "fire on cycle A of every B" for polymetric patterns.
/// `values` holds the per-step parameter values, ordered by the owning
/// pattern's column configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Step {
    pub index: i32,
    pub length: u32,
    pub chance: u8,
    pub ratio_a: u8,
    pub ratio_b: u8,
    pub values: SmallVec<[f32; 8]>,
}

impl Default for Step {
    fn default() -> Self {
        Self {
            index: REST,
            length: 1,
            chance: 100,
            ratio_a: 1,
            ratio_b: 1,
            values: SmallVec::new(),
        }
    }
}

impl Step {
    /// A rest step with default gates
    pub fn rest() -> Self {
        Self::default()
    }

    /// A triggering step for slot `index`
    pub fn trigger(index: i32) -> Self {
        Self {
            index,
            ..Self::default()
        }
    }

    pub fn with_length(mut self, length: u32) -> Self {
        self.length = length.clamp(1, MAX_STEP_LENGTH);
        self
    }

    pub fn with_chance(mut self, chance: u8) -> Self {
        self.chance = chance.min(100);
        self
    }

    pub fn with_ratio(mut self, a: u8, b: u8) -> Self {
        self.ratio_a = a.clamp(1, 16);
        self.ratio_b = b.clamp(1, 16);
        self
    }

    /// Whether this step is a rest (never triggers)
    #[inline]
    pub fn is_rest(&self) -> bool {
        self.index < 0
    }

    /// Clamp all fields into their valid ranges
    pub fn sanitize(&mut self) {
        self.length = self.length.clamp(1, MAX_STEP_LENGTH);
        self.chance = self.chance.min(100);
        self.ratio_a = self.ratio_a.clamp(1, 16);
        self.ratio_b = self.ratio_b.clamp(1, 16);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_rest() {
        let step = Step::default();
        assert!(step.is_rest());
        assert_eq!(step.chance, 100);
        assert_eq!((step.ratio_a, step.ratio_b), (1, 1));
    }

    #[test]
    fn test_builder_clamps() {
        let step = Step::trigger(3).with_length(1000).with_ratio(0, 99);
        assert_eq!(step.length, MAX_STEP_LENGTH);
        assert_eq!((step.ratio_a, step.ratio_b), (1, 16));
        assert!(!step.is_rest());
    }
}
