//! Sample-accurate transport clock
//!
//! Produces the musical timeline every other subsystem follows. While
//! playing, `beat_position` advances exactly
//! `frames * bpm / (60 * sample_rate)` per buffer, independent of
//! wall-clock. BPM writes are atomic and take effect at the next
//! buffer; transport transitions notify listeners inline, which puts
//! them on the audio thread because transport commands execute during
//! the buffer-boundary drain.

use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use gw_core::{AtomicF32, TimeEvent};

/// Transport listener: receives the new playing state
type TransportListener = Box<dyn Fn(bool) + Send + Sync>;

/// Audio-rate listener: receives the per-buffer time event. Callers
/// guarantee the callable is real-time safe.
type AudioListener = Box<dyn FnMut(&TimeEvent) + Send>;

/// Musical transport clock
pub struct Clock {
    sample_rate: f64,
    bpm: AtomicF32,
    playing: AtomicBool,
    beat_position_bits: AtomicU64,
    sample_counter: AtomicU64,
    transport_listeners: Mutex<Vec<(u64, TransportListener)>>,
    audio_listeners: Mutex<Vec<AudioListener>>,
    next_listener_id: AtomicU64,
}

impl Clock {
    pub const DEFAULT_BPM: f32 = 120.0;

    pub fn new(sample_rate: f64) -> Self {
        Self {
            sample_rate,
            bpm: AtomicF32::new(Self::DEFAULT_BPM),
            playing: AtomicBool::new(false),
            beat_position_bits: AtomicU64::new(0f64.to_bits()),
            sample_counter: AtomicU64::new(0),
            transport_listeners: Mutex::new(Vec::new()),
            audio_listeners: Mutex::new(Vec::new()),
            next_listener_id: AtomicU64::new(0),
        }
    }

    pub fn sample_rate(&self) -> f64 {
        self.sample_rate
    }

    pub fn bpm(&self) -> f32 {
        self.bpm.get()
    }

    /// Store a new tempo; effective at the next audio buffer
    pub fn set_bpm(&self, bpm: f32) {
        if bpm <= 0.0 || !bpm.is_finite() {
            log::warn!("ignoring non-positive BPM {bpm}");
            return;
        }
        self.bpm.set(bpm);
    }

    pub fn is_playing(&self) -> bool {
        self.playing.load(Ordering::Relaxed)
    }

    pub fn beat_position(&self) -> f64 {
        f64::from_bits(self.beat_position_bits.load(Ordering::Relaxed))
    }

    pub fn sample_counter(&self) -> u64 {
        self.sample_counter.load(Ordering::Relaxed)
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // TRANSPORT
    // ═══════════════════════════════════════════════════════════════════════════

    pub fn start(&self) {
        if !self.playing.swap(true, Ordering::Relaxed) {
            self.notify_transport(true);
        }
    }

    /// Halt playback; position is retained (use `reset` to rewind)
    pub fn stop(&self) {
        if self.playing.swap(false, Ordering::Relaxed) {
            self.notify_transport(false);
        }
    }

    pub fn pause(&self) {
        if self.playing.swap(false, Ordering::Relaxed) {
            self.notify_transport(false);
        }
    }

    /// Rewind to beat zero
    pub fn reset(&self) {
        self.beat_position_bits.store(0f64.to_bits(), Ordering::Relaxed);
        self.sample_counter.store(0, Ordering::Relaxed);
    }

    /// Restore a transport position (undo of reset)
    pub fn restore_position(&self, beat_position: f64, sample_counter: u64) {
        self.beat_position_bits
            .store(beat_position.to_bits(), Ordering::Relaxed);
        self.sample_counter.store(sample_counter, Ordering::Relaxed);
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // LISTENERS
    // ═══════════════════════════════════════════════════════════════════════════

    /// Register a transport listener; returns a removal handle
    pub fn add_transport_listener<F>(&self, listener: F) -> u64
    where
        F: Fn(bool) + Send + Sync + 'static,
    {
        let id = self.next_listener_id.fetch_add(1, Ordering::Relaxed);
        self.transport_listeners
            .lock()
            .push((id, Box::new(listener)));
        id
    }

    /// Remove a transport listener; effective before the next
    /// transport notification
    pub fn remove_transport_listener(&self, id: u64) {
        self.transport_listeners.lock().retain(|(lid, _)| *lid != id);
    }

    /// Register an audio-rate listener, invoked in registration order
    /// once per buffer on the audio thread
    pub fn add_audio_listener<F>(&self, listener: F)
    where
        F: FnMut(&TimeEvent) + Send + 'static,
    {
        self.audio_listeners.lock().push(Box::new(listener));
    }

    fn notify_transport(&self, playing: bool) {
        let listeners = self.transport_listeners.lock();
        for (_, listener) in listeners.iter() {
            listener(playing);
        }
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // AUDIO CALLBACK
    // ═══════════════════════════════════════════════════════════════════════════

    /// Advance time by one buffer and fire the time event
    ///
    /// The beat position only moves while playing; the event fires
    /// every buffer regardless so meters keep refreshing.
    pub fn audio_out(&self, frames: usize) -> TimeEvent {
        let bpm = self.bpm();
        if self.is_playing() {
            let advance = frames as f64 * bpm as f64 / (60.0 * self.sample_rate);
            let next = self.beat_position() + advance;
            self.beat_position_bits.store(next.to_bits(), Ordering::Relaxed);
            self.sample_counter
                .fetch_add(frames as u64, Ordering::Relaxed);
        }

        let event = TimeEvent {
            bpm,
            beat_position: self.beat_position(),
            frames,
        };
        let mut listeners = self.audio_listeners.lock();
        for listener in listeners.iter_mut() {
            listener(&event);
        }
        event
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::AtomicUsize;

    const SR: f64 = 48000.0;

    #[test]
    fn test_beat_advance_is_exact() {
        let clock = Clock::new(SR);
        clock.start();
        for _ in 0..100 {
            clock.audio_out(512);
        }
        // 100 * 512 * 120 / (60 * 48000) = 2.1333…
        let expected = 100.0 * 512.0 * 120.0 / (60.0 * SR);
        assert!((clock.beat_position() - expected).abs() < 1e-9);
        assert_eq!(clock.sample_counter(), 51200);
    }

    #[test]
    fn test_position_frozen_while_stopped() {
        let clock = Clock::new(SR);
        clock.audio_out(512);
        assert_eq!(clock.beat_position(), 0.0);
        assert_eq!(clock.sample_counter(), 0);
    }

    #[test]
    fn test_monotonic_while_playing() {
        let clock = Clock::new(SR);
        clock.start();
        let mut last = 0.0;
        for _ in 0..50 {
            clock.audio_out(256);
            let beat = clock.beat_position();
            assert!(beat > last);
            last = beat;
        }
    }

    #[test]
    fn test_bpm_change_effective_next_buffer() {
        let clock = Clock::new(SR);
        clock.start();
        clock.audio_out(480); // 480 * 120 / (60*48000) = 0.02 beats
        clock.set_bpm(240.0);
        clock.audio_out(480); // 0.04 beats
        assert!((clock.beat_position() - 0.06).abs() < 1e-9);
        clock.set_bpm(0.0); // rejected
        assert_eq!(clock.bpm(), 240.0);
    }

    #[test]
    fn test_transport_listener_lifecycle() {
        let clock = Clock::new(SR);
        let count = Arc::new(AtomicUsize::new(0));
        let c = Arc::clone(&count);
        let id = clock.add_transport_listener(move |_| {
            c.fetch_add(1, Ordering::Relaxed);
        });

        clock.start();
        clock.start(); // no transition, no notification
        clock.stop();
        assert_eq!(count.load(Ordering::Relaxed), 2);

        clock.remove_transport_listener(id);
        clock.start();
        assert_eq!(count.load(Ordering::Relaxed), 2);
    }

    #[test]
    fn test_reset_zeroes_position() {
        let clock = Clock::new(SR);
        clock.start();
        clock.audio_out(4800);
        clock.reset();
        assert_eq!(clock.beat_position(), 0.0);
        assert_eq!(clock.sample_counter(), 0);
        assert!(clock.is_playing());
    }

    #[test]
    fn test_audio_listener_order() {
        let clock = Clock::new(SR);
        let order = Arc::new(Mutex::new(Vec::new()));
        for tag in [1, 2, 3] {
            let order = Arc::clone(&order);
            clock.add_audio_listener(move |_| order.lock().push(tag));
        }
        clock.audio_out(64);
        assert_eq!(*order.lock(), vec![1, 2, 3]);
    }
}
