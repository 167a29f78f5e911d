//! Pattern type: an ordered step sequence with its own timing and
//! parameter-column schema

use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::step::Step;

/// Maximum steps per pattern
pub const MAX_STEPS: usize = 64;

/// Maximum steps-per-beat magnitude
pub const MAX_STEPS_PER_BEAT: f32 = 96.0;

/// Describes one per-step parameter column
///
/// Columns give the step grid its schema: runtime evaluation reads step
/// values by column index, the edit layer addresses them by name.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnSpec {
    pub name: String,
    pub min: f32,
    pub max: f32,
    pub default: f32,
}

impl ColumnSpec {
    pub fn new(name: &str, min: f32, max: f32, default: f32) -> Self {
        Self {
            name: name.to_string(),
            min,
            max,
            default,
        }
    }
}

/// An ordered sequence of steps with per-pattern timing
///
/// Invariants: `steps.len() == step_count` and `steps_per_beat != 0`.
/// The sign of `steps_per_beat` gives the playback direction.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Pattern {
    step_count: usize,
    steps_per_beat: f32,
    steps: Vec<Step>,
    columns: Arc<Vec<ColumnSpec>>,
}

impl Pattern {
    /// Create a pattern of `step_count` rest steps at 4 steps per beat
    pub fn new(step_count: usize) -> Self {
        let step_count = step_count.clamp(1, MAX_STEPS);
        Self {
            step_count,
            steps_per_beat: 4.0,
            steps: vec![Step::default(); step_count],
            columns: Arc::new(Vec::new()),
        }
    }

    pub fn with_columns(mut self, columns: Vec<ColumnSpec>) -> Self {
        self.set_columns(columns);
        self
    }

    #[inline]
    pub fn step_count(&self) -> usize {
        self.step_count
    }

    #[inline]
    pub fn steps_per_beat(&self) -> f32 {
        self.steps_per_beat
    }

    /// Playback direction: `true` when steps advance forward
    #[inline]
    pub fn is_forward(&self) -> bool {
        self.steps_per_beat >= 0.0
    }

    /// Set the subdivision; zero is rejected, magnitude is clamped
    pub fn set_steps_per_beat(&mut self, spb: f32) -> bool {
        if spb == 0.0 || !spb.is_finite() {
            return false;
        }
        self.steps_per_beat = spb.clamp(-MAX_STEPS_PER_BEAT, MAX_STEPS_PER_BEAT);
        true
    }

    /// Resize the pattern, preserving existing steps
    pub fn set_step_count(&mut self, step_count: usize) {
        let step_count = step_count.clamp(1, MAX_STEPS);
        self.steps.resize(step_count, Step::default());
        let columns = Arc::clone(&self.columns);
        for step in &mut self.steps {
            conform_values(step, &columns);
        }
        self.step_count = step_count;
    }

    #[inline]
    pub fn step(&self, index: usize) -> Option<&Step> {
        self.steps.get(index)
    }

    pub fn set_step(&mut self, index: usize, mut step: Step) -> bool {
        if index >= self.step_count {
            return false;
        }
        step.sanitize();
        conform_values(&mut step, &self.columns);
        self.steps[index] = step;
        true
    }

    /// Reset one step to a rest
    pub fn clear_step(&mut self, index: usize) -> bool {
        if index >= self.step_count {
            return false;
        }
        let mut step = Step::default();
        step.values
            .extend(self.columns.iter().map(|c| c.default));
        self.steps[index] = step;
        true
    }

    /// Reset every step to a rest
    pub fn clear(&mut self) {
        for i in 0..self.step_count {
            self.clear_step(i);
        }
    }

    pub fn steps(&self) -> &[Step] {
        &self.steps[..self.step_count]
    }

    #[inline]
    pub fn columns(&self) -> &Arc<Vec<ColumnSpec>> {
        &self.columns
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c.name == name)
    }

    /// Replace the column schema, resizing every step's value list
    pub fn set_columns(&mut self, columns: Vec<ColumnSpec>) {
        let defaults: Vec<f32> = columns.iter().map(|c| c.default).collect();
        self.columns = Arc::new(columns);
        for step in &mut self.steps {
            step.values.clear();
            step.values.extend(defaults.iter().copied());
        }
    }

    /// Set a step's value in a named column
    pub fn set_step_value(&mut self, step: usize, column: &str, value: f32) -> bool {
        let Some(col) = self.column_index(column) else {
            return false;
        };
        if step >= self.step_count {
            return false;
        }
        let column = &self.columns[col];
        let value = value.clamp(column.min, column.max);
        self.steps[step].values[col] = value;
        true
    }

    pub fn step_value(&self, step: usize, column: &str) -> Option<f32> {
        let col = self.column_index(column)?;
        self.steps.get(step)?.values.get(col).copied()
    }

    /// Seconds one step occupies at the given tempo
    #[inline]
    pub fn step_duration_secs(&self, bpm: f32) -> f64 {
        60.0 / (bpm as f64 * self.steps_per_beat.abs() as f64)
    }

    /// Validate structural invariants (used after deserialization)
    pub fn is_valid(&self) -> bool {
        self.step_count >= 1
            && self.step_count <= MAX_STEPS
            && self.steps.len() >= self.step_count
            && self.steps_per_beat != 0.0
    }

    /// Clamp fields back into range after deserialization
    pub fn repair(&mut self) {
        self.step_count = self.step_count.clamp(1, MAX_STEPS);
        if self.steps_per_beat == 0.0 || !self.steps_per_beat.is_finite() {
            self.steps_per_beat = 4.0;
        }
        self.steps.resize(self.step_count, Step::default());
        let columns = Arc::clone(&self.columns);
        for step in &mut self.steps {
            step.sanitize();
            conform_values(step, &columns);
        }
    }
}

/// Pad or trim a step's value list to the column schema, filling new
/// slots with column defaults
fn conform_values(step: &mut Step, columns: &[ColumnSpec]) {
    if step.values.len() > columns.len() {
        step.values.truncate(columns.len());
    }
    while step.values.len() < columns.len() {
        let column = &columns[step.values.len()];
        step.values.push(column.default);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_pattern_is_rests() {
        let p = Pattern::new(8);
        assert_eq!(p.step_count(), 8);
        assert!(p.steps().iter().all(|s| s.is_rest()));
        assert!(p.is_valid());
    }

    #[test]
    fn test_zero_spb_rejected() {
        let mut p = Pattern::new(4);
        assert!(!p.set_steps_per_beat(0.0));
        assert!(p.set_steps_per_beat(-8.0));
        assert!(!p.is_forward());
        assert_eq!(p.steps_per_beat(), -8.0);
    }

    #[test]
    fn test_resize_preserves_steps() {
        let mut p = Pattern::new(4);
        p.set_step(2, Step::trigger(7));
        p.set_step_count(8);
        assert_eq!(p.step(2).unwrap().index, 7);
        p.set_step_count(2);
        assert_eq!(p.step_count(), 2);
    }

    #[test]
    fn test_columns_resize_values() {
        let mut p = Pattern::new(2);
        p.set_columns(vec![
            ColumnSpec::new("position", 0.0, 1.0, 0.0),
            ColumnSpec::new("volume", 0.0, 1.0, 1.0),
        ]);
        assert_eq!(p.step(0).unwrap().values.len(), 2);
        assert!(p.set_step_value(0, "volume", 2.5));
        assert_eq!(p.step_value(0, "volume"), Some(1.0));
        assert!(!p.set_step_value(0, "missing", 0.5));
    }

    #[test]
    fn test_step_duration() {
        let p = Pattern::new(4); // 4 steps per beat
        let dur = p.step_duration_secs(120.0);
        assert!((dur - 0.125).abs() < 1e-9);
    }
}
