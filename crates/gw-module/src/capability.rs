//! Module capabilities
//!
//! A capability is a tag a module declares about the signals it
//! produces or consumes. Routing code dispatches on capabilities, never
//! on concrete module types.

use serde::{Deserialize, Serialize};

/// What a module can do, signal-wise
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u16)]
pub enum Capability {
    EmitsTriggers = 1 << 0,
    AcceptsTriggers = 1 << 1,
    ProducesAudio = 1 << 2,
    ConsumesAudio = 1 << 3,
    ProducesVideo = 1 << 4,
    ConsumesVideo = 1 << 5,
    AcceptsFileDrop = 1 << 6,
}

/// Bit set of capabilities, cheap to copy and test on the audio thread
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct CapabilitySet(u16);

impl CapabilitySet {
    pub const EMPTY: Self = Self(0);

    pub const fn new(caps: &[Capability]) -> Self {
        let mut bits = 0u16;
        let mut i = 0;
        while i < caps.len() {
            bits |= caps[i] as u16;
            i += 1;
        }
        Self(bits)
    }

    #[inline]
    pub const fn contains(&self, cap: Capability) -> bool {
        self.0 & (cap as u16) != 0
    }

    pub fn insert(&mut self, cap: Capability) {
        self.0 |= cap as u16;
    }

    pub fn remove(&mut self, cap: Capability) {
        self.0 &= !(cap as u16);
    }

    pub fn is_empty(&self) -> bool {
        self.0 == 0
    }

    /// Enumerate set capabilities
    pub fn iter(&self) -> impl Iterator<Item = Capability> + '_ {
        const ALL: [Capability; 7] = [
            Capability::EmitsTriggers,
            Capability::AcceptsTriggers,
            Capability::ProducesAudio,
            Capability::ConsumesAudio,
            Capability::ProducesVideo,
            Capability::ConsumesVideo,
            Capability::AcceptsFileDrop,
        ];
        ALL.into_iter().filter(|c| self.contains(*c))
    }
}

impl FromIterator<Capability> for CapabilitySet {
    fn from_iter<T: IntoIterator<Item = Capability>>(iter: T) -> Self {
        let mut set = Self::EMPTY;
        for cap in iter {
            set.insert(cap);
        }
        set
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_set_ops() {
        let set = CapabilitySet::new(&[Capability::ProducesAudio, Capability::AcceptsTriggers]);
        assert!(set.contains(Capability::ProducesAudio));
        assert!(set.contains(Capability::AcceptsTriggers));
        assert!(!set.contains(Capability::ProducesVideo));
        assert_eq!(set.iter().count(), 2);
    }

    #[test]
    fn test_insert_remove() {
        let mut set = CapabilitySet::EMPTY;
        assert!(set.is_empty());
        set.insert(Capability::ConsumesAudio);
        assert!(set.contains(Capability::ConsumesAudio));
        set.remove(Capability::ConsumesAudio);
        assert!(set.is_empty());
    }
}
