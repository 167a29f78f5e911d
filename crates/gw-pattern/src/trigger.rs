//! Trigger event envelope

use smallvec::SmallVec;
use std::sync::Arc;

use crate::pattern::ColumnSpec;

/// "Something happened at time T for duration D with these values"
///
/// Emitted by the pattern runtime when a non-rest step fires and all of
/// its gates pass. `sample_offset` locates the trigger inside the buffer
/// it was emitted from. `values` is ordered by the pattern's column
/// schema; `columns` is shared with the pattern, so no per-trigger
/// string allocation happens on the audio thread.
#[derive(Debug, Clone)]
pub struct TriggerEvent {
    pub pattern: Arc<str>,
    pub step: usize,
    pub sample_offset: usize,
    pub duration_secs: f64,
    /// Slot index the step fired (the step's `index` field)
    pub note: i32,
    pub columns: Arc<Vec<ColumnSpec>>,
    pub values: SmallVec<[f32; 8]>,
}

impl TriggerEvent {
    /// Look up a value by column name
    pub fn value(&self, column: &str) -> Option<f32> {
        let index = self.columns.iter().position(|c| c.name == column)?;
        self.values.get(index).copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use smallvec::smallvec;

    #[test]
    fn test_value_lookup() {
        let columns = Arc::new(vec![
            ColumnSpec::new("position", 0.0, 1.0, 0.0),
            ColumnSpec::new("volume", 0.0, 1.0, 1.0),
        ]);
        let event = TriggerEvent {
            pattern: Arc::from("P0"),
            step: 0,
            sample_offset: 0,
            duration_secs: 0.125,
            note: 3,
            columns,
            values: smallvec![0.25, 0.9],
        };
        assert_eq!(event.value("volume"), Some(0.9));
        assert_eq!(event.value("missing"), None);
    }
}
