//! Per-pattern playback state

use serde::{Deserialize, Serialize};

/// Sentinel for "no step has started yet"
pub const STEP_UNSTARTED: i32 = -1;

/// Runtime playback state for one pattern
///
/// `sample_accumulator` carries the fractional step remainder across
/// buffer boundaries so step timing never drifts. `current_playing_step`
/// is −1 while no note is sounding.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlaybackState {
    pub is_playing: bool,
    /// Playhead position; −1 until the first step advance after (re)start
    pub playback_step: i32,
    pub current_playing_step: i32,
    pub step_start_time: f64,
    pub step_end_time: f64,
    pub sample_accumulator: f64,
    pub pattern_cycle_count: u64,
}

impl Default for PlaybackState {
    fn default() -> Self {
        Self {
            is_playing: false,
            playback_step: STEP_UNSTARTED,
            current_playing_step: -1,
            step_start_time: 0.0,
            step_end_time: 0.0,
            sample_accumulator: 0.0,
            pattern_cycle_count: 0,
        }
    }
}

impl PlaybackState {
    /// Begin playback from a fresh playhead
    pub fn start(&mut self) {
        self.is_playing = true;
        self.playback_step = STEP_UNSTARTED;
        self.sample_accumulator = 0.0;
        self.clear_playing_step();
    }

    /// Pause in place; playhead and accumulator survive for resume
    pub fn pause(&mut self) {
        self.is_playing = false;
        self.clear_playing_step();
    }

    /// Stop and reset all position state
    pub fn stop(&mut self) {
        self.is_playing = false;
        self.reset();
    }

    /// Reset playhead, accumulator, and cycle counter
    pub fn reset(&mut self) {
        self.playback_step = STEP_UNSTARTED;
        self.sample_accumulator = 0.0;
        self.pattern_cycle_count = 0;
        self.clear_playing_step();
    }

    /// Forget the sounding note
    pub fn clear_playing_step(&mut self) {
        self.current_playing_step = -1;
        self.step_start_time = 0.0;
        self.step_end_time = 0.0;
    }

    /// Whether a note is sounding right now
    #[inline]
    pub fn has_playing_step(&self) -> bool {
        self.current_playing_step >= 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_start_resets_position() {
        let mut state = PlaybackState::default();
        state.playback_step = 5;
        state.sample_accumulator = 12.5;
        state.current_playing_step = 2;
        state.start();
        assert!(state.is_playing);
        assert_eq!(state.playback_step, STEP_UNSTARTED);
        assert_eq!(state.sample_accumulator, 0.0);
        assert!(!state.has_playing_step());
    }

    #[test]
    fn test_pause_keeps_playhead() {
        let mut state = PlaybackState::default();
        state.start();
        state.playback_step = 3;
        state.pattern_cycle_count = 2;
        state.pause();
        assert_eq!(state.playback_step, 3);
        assert_eq!(state.pattern_cycle_count, 2);
        state.stop();
        assert_eq!(state.playback_step, STEP_UNSTARTED);
        assert_eq!(state.pattern_cycle_count, 0);
    }
}
