//! Time types
//!
//! The engine keeps two notions of time: musical beats (driven by the
//! clock, advanced per audio buffer) and monotonic wall-clock millis
//! (command timestamps, step end times).

use std::sync::OnceLock;
use std::time::Instant;

/// Per-buffer timing event fired by the clock
///
/// Exactly one is emitted per audio buffer while the transport runs.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TimeEvent {
    pub bpm: f32,
    pub beat_position: f64,
    pub frames: usize,
}

fn epoch() -> Instant {
    static EPOCH: OnceLock<Instant> = OnceLock::new();
    *EPOCH.get_or_init(Instant::now)
}

/// Monotonic milliseconds since process start
///
/// Used for command timestamps; never compared across processes.
pub fn now_millis() -> u64 {
    epoch().elapsed().as_millis() as u64
}

/// Monotonic seconds since process start
pub fn now_secs() -> f64 {
    epoch().elapsed().as_secs_f64()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_monotonic_millis() {
        let a = now_millis();
        let b = now_millis();
        assert!(b >= a);
    }
}
