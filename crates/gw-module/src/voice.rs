//! Fixed-capacity voice pool
//!
//! Shared polyphony management for any module that plays voices. The
//! pool never allocates beyond its capacity: allocation hands out a
//! FREE slot when one exists, otherwise applies the stealing policy to
//! the PLAYING voice with the smallest start time.

/// Voice lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum VoiceState {
    #[default]
    Free,
    Playing,
    Releasing,
}

/// Minimal surface a pooled voice must expose
pub trait Voice {
    fn state(&self) -> VoiceState;

    fn start_time(&self) -> f64;

    #[inline]
    fn is_free(&self) -> bool {
        self.state() == VoiceState::Free
    }

    #[inline]
    fn is_active(&self) -> bool {
        self.state() != VoiceState::Free
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StealingStrategy {
    #[default]
    Lru,
    Oldest,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PolyphonyMode {
    Monophonic,
    #[default]
    Polyphonic,
}

/// Fixed array of `N` voice slots with a stealing policy
pub struct VoicePool<V, const N: usize> {
    voices: [V; N],
    stealing: StealingStrategy,
    polyphony: PolyphonyMode,
}

impl<V: Voice + Default, const N: usize> Default for VoicePool<V, N> {
    fn default() -> Self {
        Self::new()
    }
}

impl<V: Voice + Default, const N: usize> VoicePool<V, N> {
    pub fn new() -> Self {
        Self {
            voices: std::array::from_fn(|_| V::default()),
            stealing: StealingStrategy::default(),
            polyphony: PolyphonyMode::default(),
        }
    }

    pub const fn capacity(&self) -> usize {
        N
    }

    pub fn stealing_strategy(&self) -> StealingStrategy {
        self.stealing
    }

    pub fn set_stealing_strategy(&mut self, strategy: StealingStrategy) {
        self.stealing = strategy;
    }

    pub fn polyphony_mode(&self) -> PolyphonyMode {
        self.polyphony
    }

    pub fn set_polyphony_mode(&mut self, mode: PolyphonyMode) {
        self.polyphony = mode;
    }

    pub fn voices(&self) -> &[V; N] {
        &self.voices
    }

    pub fn voices_mut(&mut self) -> &mut [V; N] {
        &mut self.voices
    }

    /// Allocate a voice slot
    ///
    /// Returns a FREE slot when available, else steals per policy.
    /// `None` only when nothing is PLAYING to steal.
    pub fn allocate(&mut self) -> Option<&mut V> {
        if let Some(index) = self.voices.iter().position(Voice::is_free) {
            return Some(&mut self.voices[index]);
        }
        self.steal()
    }

    fn steal(&mut self) -> Option<&mut V> {
        match self.stealing {
            // Both policies pick the longest-sounding PLAYING voice
            StealingStrategy::Lru | StealingStrategy::Oldest => {
                let index = self
                    .voices
                    .iter()
                    .enumerate()
                    .filter(|(_, v)| v.state() == VoiceState::Playing)
                    .min_by(|(_, a), (_, b)| a.start_time().total_cmp(&b.start_time()))
                    .map(|(i, _)| i)?;
                Some(&mut self.voices[index])
            }
        }
    }

    pub fn active_count(&self) -> usize {
        self.voices.iter().filter(|v| v.is_active()).count()
    }

    pub fn active_voices_mut(&mut self) -> impl Iterator<Item = &mut V> {
        self.voices.iter_mut().filter(|v| v.is_active())
    }
}
