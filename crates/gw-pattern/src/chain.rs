//! Pattern chain: an ordered playback plan over patterns
//!
//! A chain advances through its entries in order, skipping disabled
//! entries; each entry plays `repeat_count` times before the chain moves
//! on. Entries reference patterns by name; the runtime prunes entries
//! when a pattern is deleted.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// Ordered playback plan over patterns
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Chain {
    entries: Vec<String>,
    repeat_counts: BTreeMap<usize, u32>,
    disabled: BTreeSet<usize>,
    current_index: usize,
    current_repeat: u32,
    enabled: bool,
}

impl Chain {
    pub fn new() -> Self {
        Self {
            enabled: true,
            ..Self::default()
        }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    #[inline]
    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn set_enabled(&mut self, enabled: bool) {
        self.enabled = enabled;
    }

    #[inline]
    pub fn current_index(&self) -> usize {
        self.current_index
    }

    #[inline]
    pub fn current_repeat(&self) -> u32 {
        self.current_repeat
    }

    pub fn set_current_index(&mut self, index: usize) {
        if index < self.entries.len() {
            self.current_index = index;
            self.current_repeat = 0;
        }
    }

    pub fn entries(&self) -> &[String] {
        &self.entries
    }

    pub fn entry(&self, index: usize) -> Option<&str> {
        self.entries.get(index).map(String::as_str)
    }

    /// Pattern name at the current chain position
    pub fn current_entry(&self) -> Option<&str> {
        self.entry(self.current_index)
    }

    pub fn add_entry(&mut self, pattern: &str) {
        self.entries.push(pattern.to_string());
    }

    pub fn remove_entry(&mut self, index: usize) -> bool {
        if index >= self.entries.len() {
            return false;
        }
        self.entries.remove(index);
        self.remap_after_removal(index);
        true
    }

    /// Remove every entry referencing `pattern`, keeping the playhead in
    /// range
    pub fn remove_entries_for(&mut self, pattern: &str) -> usize {
        let mut removed = 0;
        let mut index = 0;
        while index < self.entries.len() {
            if self.entries[index] == pattern {
                self.entries.remove(index);
                self.remap_after_removal(index);
                removed += 1;
            } else {
                index += 1;
            }
        }
        removed
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.repeat_counts.clear();
        self.disabled.clear();
        self.current_index = 0;
        self.current_repeat = 0;
    }

    pub fn repeat_count(&self, index: usize) -> u32 {
        self.repeat_counts.get(&index).copied().unwrap_or(1).max(1)
    }

    pub fn set_repeat_count(&mut self, index: usize, count: u32) -> bool {
        if index >= self.entries.len() {
            return false;
        }
        self.repeat_counts.insert(index, count.max(1));
        true
    }

    pub fn is_entry_disabled(&self, index: usize) -> bool {
        self.disabled.contains(&index)
    }

    pub fn set_entry_disabled(&mut self, index: usize, disabled: bool) -> bool {
        if index >= self.entries.len() {
            return false;
        }
        if disabled {
            self.disabled.insert(index);
        } else {
            self.disabled.remove(&index);
        }
        true
    }

    /// Advance on a pattern wrap
    ///
    /// Bumps the repeat counter for the current entry; when it reaches
    /// the entry's repeat count, moves to the next enabled entry
    /// (wrapping). Returns the pattern name the caller should now be
    /// bound to, or `None` when the chain is disabled, empty, or fully
    /// disabled.
    pub fn advance_on_pattern_finish(&mut self) -> Option<&str> {
        if !self.enabled || self.entries.is_empty() {
            return None;
        }
        if self.current_index >= self.entries.len() {
            self.current_index = 0;
            self.current_repeat = 0;
        }

        self.current_repeat += 1;
        if self.current_repeat >= self.repeat_count(self.current_index) {
            self.current_repeat = 0;
            let next = self.next_enabled_index(self.current_index)?;
            self.current_index = next;
        }
        self.entry(self.current_index)
    }

    /// Reset the playhead to the first enabled entry
    pub fn reset(&mut self) {
        self.current_index = self
            .next_enabled_index(self.entries.len().saturating_sub(1))
            .unwrap_or(0);
        self.current_repeat = 0;
    }

    /// First enabled entry strictly after `from`, wrapping
    fn next_enabled_index(&self, from: usize) -> Option<usize> {
        if self.entries.is_empty() {
            return None;
        }
        let len = self.entries.len();
        for offset in 1..=len {
            let candidate = (from + offset) % len;
            if !self.disabled.contains(&candidate) {
                return Some(candidate);
            }
        }
        None
    }

    /// Shift repeat counts and disabled flags after removing `index`
    fn remap_after_removal(&mut self, index: usize) {
        self.repeat_counts = self
            .repeat_counts
            .iter()
            .filter_map(|(&i, &count)| match i.cmp(&index) {
                std::cmp::Ordering::Less => Some((i, count)),
                std::cmp::Ordering::Equal => None,
                std::cmp::Ordering::Greater => Some((i - 1, count)),
            })
            .collect();
        self.disabled = self
            .disabled
            .iter()
            .filter_map(|&i| match i.cmp(&index) {
                std::cmp::Ordering::Less => Some(i),
                std::cmp::Ordering::Equal => None,
                std::cmp::Ordering::Greater => Some(i - 1),
            })
            .collect();

        if self.current_index > index {
            self.current_index -= 1;
        }
        if self.current_index >= self.entries.len() {
            self.current_index = 0;
            self.current_repeat = 0;
        }
    }

    /// Drop references to unknown patterns (post-deserialization repair)
    pub fn repair<F>(&mut self, pattern_exists: F)
    where
        F: Fn(&str) -> bool,
    {
        let mut index = 0;
        while index < self.entries.len() {
            if pattern_exists(&self.entries[index]) {
                index += 1;
            } else {
                self.entries.remove(index);
                self.remap_after_removal(index);
            }
        }
        if self.current_index >= self.entries.len() {
            self.current_index = 0;
            self.current_repeat = 0;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chain(entries: &[&str]) -> Chain {
        let mut c = Chain::new();
        for e in entries {
            c.add_entry(e);
        }
        c
    }

    #[test]
    fn test_advance_with_repeats() {
        // [p1 x2, p2 x1, p3 x1]: bound sequence over 4 wraps is
        // p1, p2, p3, p1
        let mut c = chain(&["p1", "p2", "p3"]);
        c.set_repeat_count(0, 2);

        assert_eq!(c.advance_on_pattern_finish(), Some("p1"));
        assert_eq!(c.advance_on_pattern_finish(), Some("p2"));
        assert_eq!(c.advance_on_pattern_finish(), Some("p3"));
        assert_eq!(c.advance_on_pattern_finish(), Some("p1"));
    }

    #[test]
    fn test_disabled_entries_skipped() {
        let mut c = chain(&["p1", "p2", "p3"]);
        c.set_entry_disabled(1, true);

        assert_eq!(c.advance_on_pattern_finish(), Some("p3"));
        assert_eq!(c.advance_on_pattern_finish(), Some("p1"));
    }

    #[test]
    fn test_disabled_chain_returns_none() {
        let mut c = chain(&["p1"]);
        c.set_enabled(false);
        assert_eq!(c.advance_on_pattern_finish(), None);
    }

    #[test]
    fn test_remove_entries_for_pattern() {
        let mut c = chain(&["p1", "p2", "p1", "p3"]);
        c.set_repeat_count(3, 4);
        c.set_current_index(3);

        assert_eq!(c.remove_entries_for("p1"), 2);
        assert_eq!(c.entries(), &["p2".to_string(), "p3".to_string()]);
        // playhead followed its entry, repeat count remapped with it
        assert_eq!(c.current_index(), 1);
        assert_eq!(c.repeat_count(1), 4);
    }

    #[test]
    fn test_remove_keeps_index_in_range() {
        let mut c = chain(&["p1", "p2"]);
        c.set_current_index(1);
        c.remove_entry(1);
        assert_eq!(c.current_index(), 0);
    }
}
