//! Pattern runtime
//!
//! Owns every pattern, chain, and sequencer binding. Handles:
//! - Per-buffer, sample-accurate step evaluation and trigger emission
//! - Chain progression when a pattern wraps
//! - Sequencer (re)binding with shared-pattern reference counting
//! - Pattern deletion cleanup (chain pruning, sequencer rebinding)
//!
//! ## Thread model
//!
//! `evaluate_patterns` runs on the audio thread. All mutators run during
//! the engine's command drain, which also happens on the audio thread at
//! buffer boundaries, so playback state never changes mid-sample.

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, VecDeque};
use std::sync::Arc;

use gw_core::now_secs;

use crate::chain::Chain;
use crate::events::{EventBus, RuntimeEvent};
use crate::pattern::Pattern;
use crate::playback::PlaybackState;
use crate::step::Step;
use crate::trigger::TriggerEvent;

// ═══════════════════════════════════════════════════════════════════════════════
// SEQUENCER BINDING
// ═══════════════════════════════════════════════════════════════════════════════

/// Per-sequencer binding state
///
/// One sequencer binds to at most one pattern and optionally one chain;
/// many sequencers may reference the same pattern simultaneously.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SequencerBinding {
    pub pattern_name: Option<String>,
    pub chain_name: Option<String>,
    pub chain_enabled: bool,
}

// ═══════════════════════════════════════════════════════════════════════════════
// PATTERN RUNTIME
// ═══════════════════════════════════════════════════════════════════════════════

/// Default step count for auto-created patterns
pub const DEFAULT_STEP_COUNT: usize = 16;

struct PatternSlot {
    name: Arc<str>,
    pattern: Pattern,
    playback: PlaybackState,
}

enum SlotOutcome {
    /// Keep evaluating this pattern for the rest of the buffer
    Continue,
    /// Every sequencer rebound away; stop evaluating this pattern
    Stopped,
}

/// Serializable runtime contents (session persistence)
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RuntimeSnapshot {
    pub patterns: Vec<PatternRecord>,
    pub chains: BTreeMap<String, Chain>,
    pub sequencer_bindings: BTreeMap<String, SequencerBinding>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PatternRecord {
    pub name: String,
    pub pattern: Pattern,
}

/// Owns patterns, chains, and sequencer bindings; evaluates them on
/// every audio buffer
pub struct PatternRuntime {
    sample_rate: f64,
    transport_playing: bool,
    slots: Vec<PatternSlot>,
    chains: BTreeMap<String, Chain>,
    bindings: BTreeMap<String, SequencerBinding>,
    bus: EventBus,
    rng: ChaCha8Rng,
    next_auto_index: u32,
    /// Reusable evaluation worklist; lives here so per-buffer
    /// evaluation allocates nothing in steady state
    eval_work: VecDeque<(usize, usize)>,
}

impl PatternRuntime {
    pub fn new(sample_rate: f64) -> Self {
        Self {
            sample_rate,
            transport_playing: false,
            slots: Vec::new(),
            chains: BTreeMap::new(),
            bindings: BTreeMap::new(),
            bus: EventBus::new(),
            rng: ChaCha8Rng::seed_from_u64(rand::rng().random()),
            next_auto_index: 0,
            eval_work: VecDeque::new(),
        }
    }

    /// Pin the chance-gate RNG stream (tests, deterministic replay)
    pub fn seed_rng(&mut self, seed: u64) {
        self.rng = ChaCha8Rng::seed_from_u64(seed);
    }

    pub fn sample_rate(&self) -> f64 {
        self.sample_rate
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // EVENT BUS
    // ═══════════════════════════════════════════════════════════════════════════

    pub fn subscribe_events<F>(&mut self, listener: F) -> u64
    where
        F: Fn(&RuntimeEvent) + Send + Sync + 'static,
    {
        self.bus.subscribe(listener)
    }

    pub fn unsubscribe_events(&mut self, id: u64) {
        self.bus.unsubscribe(id);
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // PATTERN MANAGEMENT
    // ═══════════════════════════════════════════════════════════════════════════

    /// Add a pattern; `None` name auto-allocates `P0, P1, …`
    ///
    /// Returns the pattern's name, or `None` when the requested name is
    /// already taken. Auto-indices are never recycled within a session.
    pub fn add_pattern(&mut self, name: Option<&str>, step_count: usize) -> Option<String> {
        let name = match name {
            Some(n) if n.is_empty() => return None,
            Some(n) => {
                if self.slot_index(n).is_some() {
                    log::warn!("pattern '{n}' already exists");
                    return None;
                }
                n.to_string()
            }
            None => self.allocate_pattern_name(),
        };

        if let Some(index) = parse_auto_index(&name) {
            self.next_auto_index = self.next_auto_index.max(index + 1);
        }

        self.slots.push(PatternSlot {
            name: Arc::from(name.as_str()),
            pattern: Pattern::new(step_count),
            playback: PlaybackState::default(),
        });
        self.bus.publish(&RuntimeEvent::PatternChanged(name.clone()));
        Some(name)
    }

    /// Remove a pattern and repair everything that referenced it
    ///
    /// Chains drop matching entries; sequencers bound to it rebind to the
    /// first remaining pattern, or to a freshly created default when none
    /// remain.
    pub fn remove_pattern(&mut self, name: &str) -> bool {
        let Some(index) = self.slot_index(name) else {
            log::warn!("removePattern: unknown pattern '{name}'");
            return false;
        };
        self.slots.remove(index);

        for chain in self.chains.values_mut() {
            chain.remove_entries_for(name);
        }

        // Rebind orphaned sequencers
        let orphans: Vec<String> = self
            .bindings
            .iter()
            .filter(|(_, b)| b.pattern_name.as_deref() == Some(name))
            .map(|(seq, _)| seq.clone())
            .collect();

        if !orphans.is_empty() {
            let fallback = match self.slots.first() {
                Some(slot) => slot.name.to_string(),
                None => {
                    let fresh = self.allocate_pattern_name();
                    self.add_pattern(Some(&fresh), DEFAULT_STEP_COUNT);
                    fresh
                }
            };
            for seq in orphans {
                if let Some(binding) = self.bindings.get_mut(&seq) {
                    binding.pattern_name = Some(fallback.clone());
                }
                self.start_pattern_if_needed(&fallback);
                self.bus
                    .publish(&RuntimeEvent::SequencerBindingChanged(seq));
            }
        }

        self.bus
            .publish(&RuntimeEvent::PatternDeleted(name.to_string()));
        true
    }

    pub fn pattern(&self, name: &str) -> Option<&Pattern> {
        self.slot_index(name).map(|i| &self.slots[i].pattern)
    }

    /// Edit a pattern in place; publishes `PatternChanged` when the
    /// closure reports success
    pub fn with_pattern_mut<F>(&mut self, name: &str, edit: F) -> bool
    where
        F: FnOnce(&mut Pattern) -> bool,
    {
        let Some(index) = self.slot_index(name) else {
            log::warn!("editPattern: unknown pattern '{name}'");
            return false;
        };
        let changed = edit(&mut self.slots[index].pattern);
        if changed {
            self.bus
                .publish(&RuntimeEvent::PatternChanged(name.to_string()));
        }
        changed
    }

    /// Randomize a pattern's steps with the runtime RNG
    ///
    /// Roughly 70% of steps get a trigger in the pattern's index range,
    /// the rest become rests.
    pub fn randomize_pattern(&mut self, name: &str, index_range: i32) -> bool {
        let Some(slot_index) = self.slot_index(name) else {
            return false;
        };
        let count = self.slots[slot_index].pattern.step_count();
        for i in 0..count {
            let step = if self.rng.random_range(0..100) < 70 {
                Step::trigger(self.rng.random_range(0..index_range.max(1)))
            } else {
                Step::rest()
            };
            self.slots[slot_index].pattern.set_step(i, step);
        }
        self.bus
            .publish(&RuntimeEvent::PatternChanged(name.to_string()));
        true
    }

    pub fn pattern_names(&self) -> Vec<String> {
        self.slots.iter().map(|s| s.name.to_string()).collect()
    }

    pub fn pattern_count(&self) -> usize {
        self.slots.len()
    }

    pub fn playback_state(&self, name: &str) -> Option<&PlaybackState> {
        self.slot_index(name).map(|i| &self.slots[i].playback)
    }

    fn slot_index(&self, name: &str) -> Option<usize> {
        self.slots.iter().position(|s| &*s.name == name)
    }

    /// Lowest free auto index, monotonic within a session
    fn allocate_pattern_name(&mut self) -> String {
        let mut index = self.next_auto_index;
        loop {
            let candidate = format!("P{index}");
            if self.slot_index(&candidate).is_none() {
                self.next_auto_index = index + 1;
                return candidate;
            }
            index += 1;
        }
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // CHAIN MANAGEMENT
    // ═══════════════════════════════════════════════════════════════════════════

    pub fn add_chain(&mut self, name: &str) -> bool {
        if name.is_empty() || self.chains.contains_key(name) {
            return false;
        }
        self.chains.insert(name.to_string(), Chain::new());
        true
    }

    pub fn remove_chain(&mut self, name: &str) -> bool {
        if self.chains.remove(name).is_none() {
            return false;
        }
        let bound: Vec<String> = self
            .bindings
            .iter_mut()
            .filter(|(_, b)| b.chain_name.as_deref() == Some(name))
            .map(|(seq, b)| {
                b.chain_name = None;
                b.chain_enabled = false;
                seq.clone()
            })
            .collect();
        for seq in bound {
            self.bus
                .publish(&RuntimeEvent::SequencerBindingChanged(seq));
        }
        true
    }

    pub fn chain(&self, name: &str) -> Option<&Chain> {
        self.chains.get(name)
    }

    pub fn chain_mut(&mut self, name: &str) -> Option<&mut Chain> {
        self.chains.get_mut(name)
    }

    pub fn chain_names(&self) -> Vec<String> {
        self.chains.keys().cloned().collect()
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // SEQUENCER BINDINGS
    // ═══════════════════════════════════════════════════════════════════════════

    pub fn binding(&self, sequencer: &str) -> Option<&SequencerBinding> {
        self.bindings.get(sequencer)
    }

    /// Bind a sequencer to a pattern
    ///
    /// The previous pattern keeps playing only while another sequencer
    /// still references it. Rebinding to the currently bound pattern is a
    /// no-op that preserves the playback phase; any other rebind starts
    /// the target from a fresh playhead.
    pub fn bind_sequencer_pattern(&mut self, sequencer: &str, pattern: &str) -> bool {
        if self.slot_index(pattern).is_none() {
            log::warn!("bindSequencerPattern: unknown pattern '{pattern}'");
            return false;
        }

        let binding = self.bindings.entry(sequencer.to_string()).or_default();
        let old = binding.pattern_name.take();
        if old.as_deref() == Some(pattern) {
            binding.pattern_name = old;
            return true;
        }
        binding.pattern_name = Some(pattern.to_string());

        if let Some(old) = old {
            self.pause_pattern_if_unreferenced(&old);
        }
        self.start_pattern_if_needed(pattern);

        self.bus
            .publish(&RuntimeEvent::SequencerBindingChanged(sequencer.to_string()));
        true
    }

    /// Attach a chain to a sequencer
    ///
    /// The chain playhead is aligned to the currently bound pattern when
    /// that pattern appears in the chain, else to entry 0.
    pub fn bind_sequencer_chain(&mut self, sequencer: &str, chain_name: &str) -> bool {
        if !self.chains.contains_key(chain_name) {
            log::warn!("bindSequencerChain: unknown chain '{chain_name}'");
            return false;
        }
        let binding = self.bindings.entry(sequencer.to_string()).or_default();
        binding.chain_name = Some(chain_name.to_string());
        binding.chain_enabled = true;

        let bound_pattern = binding.pattern_name.clone();
        if let (Some(pattern), Some(chain)) = (bound_pattern, self.chains.get_mut(chain_name)) {
            let position = chain.entries().iter().position(|e| e == &pattern);
            chain.set_current_index(position.unwrap_or(0));
        }

        self.bus
            .publish(&RuntimeEvent::SequencerBindingChanged(sequencer.to_string()));
        true
    }

    pub fn set_sequencer_chain_enabled(&mut self, sequencer: &str, enabled: bool) -> bool {
        let Some(binding) = self.bindings.get_mut(sequencer) else {
            return false;
        };
        binding.chain_enabled = enabled;
        self.bus
            .publish(&RuntimeEvent::SequencerBindingChanged(sequencer.to_string()));
        true
    }

    /// Drop a sequencer's bindings entirely (module removal)
    pub fn remove_sequencer(&mut self, sequencer: &str) {
        if let Some(binding) = self.bindings.remove(sequencer) {
            if let Some(pattern) = binding.pattern_name {
                self.pause_pattern_if_unreferenced(&pattern);
            }
            self.bus
                .publish(&RuntimeEvent::SequencerBindingChanged(sequencer.to_string()));
        }
    }

    /// Move a sequencer's binding to a new name (module rename)
    pub fn rename_sequencer(&mut self, old: &str, new: &str) {
        if let Some(binding) = self.bindings.remove(old) {
            self.bindings.insert(new.to_string(), binding);
        }
    }

    /// Sequencers currently bound to `pattern`
    pub fn sequencers_for_pattern(&self, pattern: &str) -> Vec<String> {
        self.bindings
            .iter()
            .filter(|(_, b)| b.pattern_name.as_deref() == Some(pattern))
            .map(|(seq, _)| seq.clone())
            .collect()
    }

    pub fn sequencer_names(&self) -> Vec<String> {
        self.bindings.keys().cloned().collect()
    }

    fn pattern_reference_count(&self, pattern: &str) -> usize {
        self.bindings
            .values()
            .filter(|b| b.pattern_name.as_deref() == Some(pattern))
            .count()
    }

    fn pause_pattern_if_unreferenced(&mut self, pattern: &str) {
        if self.pattern_reference_count(pattern) == 0 {
            if let Some(index) = self.slot_index(pattern) {
                self.slots[index].playback.pause();
            }
        }
    }

    /// Fresh-start a pattern's playback when the transport runs and
    /// nothing is playing it yet
    fn start_pattern_if_needed(&mut self, pattern: &str) {
        let Some(index) = self.slot_index(pattern) else {
            return;
        };
        let playback = &mut self.slots[index].playback;
        if self.transport_playing {
            if !playback.is_playing {
                playback.start();
            }
        } else {
            // Rebind while stopped still resets the playhead
            playback.reset();
        }
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // TRANSPORT
    // ═══════════════════════════════════════════════════════════════════════════

    /// Transport started: every bound pattern begins (or resumes) playing
    pub fn on_transport_start(&mut self) {
        self.transport_playing = true;
        let bound: Vec<String> = self
            .bindings
            .values()
            .filter_map(|b| b.pattern_name.clone())
            .collect();
        for name in bound {
            if let Some(index) = self.slot_index(&name) {
                let playback = &mut self.slots[index].playback;
                playback.is_playing = true;
                playback.sample_accumulator = 0.0;
                playback.clear_playing_step();
            }
        }
    }

    /// Transport stopped: playback halts and positions reset
    pub fn on_transport_stop(&mut self) {
        self.transport_playing = false;
        for slot in &mut self.slots {
            slot.playback.stop();
        }
    }

    /// Transport paused: playback halts, positions survive for resume
    pub fn on_transport_pause(&mut self) {
        self.transport_playing = false;
        for slot in &mut self.slots {
            slot.playback.pause();
        }
    }

    /// Transport reset: playheads and chain positions rewind
    pub fn on_transport_reset(&mut self) {
        for slot in &mut self.slots {
            slot.playback.reset();
        }
        for chain in self.chains.values_mut() {
            chain.reset();
        }
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // EVALUATION (audio thread)
    // ═══════════════════════════════════════════════════════════════════════════

    /// Evaluate every playing pattern over one audio buffer
    ///
    /// Appends emitted triggers to `out`, each tagged with its intra-
    /// buffer sample offset. `bpm` is sampled once per buffer by the
    /// caller, so tempo changes land exactly on buffer boundaries.
    pub fn evaluate_patterns(&mut self, num_frames: usize, bpm: f32, out: &mut Vec<TriggerEvent>) {
        if bpm <= 0.0 || num_frames == 0 {
            return;
        }
        let now = now_secs();

        let mut work = std::mem::take(&mut self.eval_work);
        work.clear();
        work.extend(
            self.slots
                .iter()
                .enumerate()
                .filter(|(_, s)| s.playback.is_playing)
                .map(|(i, _)| (i, 0)),
        );

        while let Some((index, start)) = work.pop_front() {
            self.evaluate_slot(index, start, num_frames, bpm, now, out, &mut work);
        }
        self.eval_work = work;

        // Clear notes whose step duration has elapsed
        for slot in &mut self.slots {
            if slot.playback.has_playing_step() && now >= slot.playback.step_end_time {
                slot.playback.clear_playing_step();
            }
        }
    }

    fn evaluate_slot(
        &mut self,
        index: usize,
        start_frame: usize,
        num_frames: usize,
        bpm: f32,
        now: f64,
        out: &mut Vec<TriggerEvent>,
        work: &mut VecDeque<(usize, usize)>,
    ) {
        let samples_per_step = {
            let pattern = &self.slots[index].pattern;
            self.sample_rate * 60.0 / (bpm as f64 * pattern.steps_per_beat().abs() as f64)
        };

        let mut frame = start_frame;
        while frame < num_frames {
            let advanced = {
                let playback = &mut self.slots[index].playback;
                playback.sample_accumulator += 1.0;
                if playback.sample_accumulator >= samples_per_step {
                    playback.sample_accumulator -= samples_per_step;
                    true
                } else {
                    false
                }
            };
            if advanced {
                if let SlotOutcome::Stopped = self.advance_step(index, frame, bpm, now, out, work)
                {
                    return;
                }
            }
            frame += 1;
        }
    }

    /// One step advance: move the playhead, run chain progression on
    /// wrap, evaluate gates, and emit a trigger when they pass
    fn advance_step(
        &mut self,
        index: usize,
        frame: usize,
        bpm: f32,
        now: f64,
        out: &mut Vec<TriggerEvent>,
        work: &mut VecDeque<(usize, usize)>,
    ) -> SlotOutcome {
        let name = self.slots[index].name.clone();

        let (next_step, wrapped) = {
            let slot = &mut self.slots[index];
            let count = slot.pattern.step_count() as i32;
            let forward = slot.pattern.is_forward();
            let prev = slot.playback.playback_step;

            let (next, wrapped) = if prev < 0 {
                // First advance after (re)start lands on the entry step
                (if forward { 0 } else { count - 1 }, false)
            } else if forward {
                let next = (prev + 1) % count;
                (next, next == 0)
            } else {
                let next = (prev - 1 + count) % count;
                (next, prev == 0)
            };

            slot.playback.playback_step = next;
            if wrapped {
                slot.playback.pattern_cycle_count += 1;
            }
            (next as usize, wrapped)
        };

        if wrapped {
            // Chain progression: every sequencer bound to this pattern
            // with an enabled chain advances it; rebinds land between
            // samples, never mid-step.
            let mut rebinds: Vec<(String, String)> = Vec::new();
            {
                let Self {
                    bindings, chains, ..
                } = self;
                for (sequencer, binding) in bindings.iter_mut() {
                    if !binding.chain_enabled || binding.pattern_name.as_deref() != Some(&*name) {
                        continue;
                    }
                    let Some(chain_name) = binding.chain_name.as_deref() else {
                        continue;
                    };
                    let Some(chain) = chains.get_mut(chain_name) else {
                        continue;
                    };
                    if let Some(next_pattern) = chain.advance_on_pattern_finish() {
                        if next_pattern != &*name {
                            let next_pattern = next_pattern.to_string();
                            binding.pattern_name = Some(next_pattern.clone());
                            rebinds.push((sequencer.clone(), next_pattern));
                        }
                    }
                }
            }

            if !rebinds.is_empty() {
                for (_, target) in &rebinds {
                    let Some(target_index) = self.slot_index(target) else {
                        log::warn!("chain advanced to unknown pattern '{target}'");
                        continue;
                    };
                    if !self.slots[target_index].playback.is_playing {
                        // Fresh playhead; the chained pattern's entry
                        // step fires at this exact sample
                        self.slots[target_index].playback.start();
                        self.advance_step(target_index, frame, bpm, now, out, work);
                        work.push_back((target_index, frame + 1));
                    }
                }
                for (sequencer, _) in &rebinds {
                    self.bus
                        .publish(&RuntimeEvent::SequencerBindingChanged(sequencer.clone()));
                }

                let still_bound = self
                    .bindings
                    .values()
                    .any(|b| b.pattern_name.as_deref() == Some(&*name));
                if !still_bound {
                    self.slots[index].playback.pause();
                    return SlotOutcome::Stopped;
                }
            }
        }

        self.fire_step(index, next_step, frame, bpm, now, out);
        SlotOutcome::Continue
    }

    /// Evaluate gates on the step under the playhead and emit a trigger
    ///
    /// Rests advance the playhead but never touch the sounding note.
    fn fire_step(
        &mut self,
        index: usize,
        step_index: usize,
        frame: usize,
        bpm: f32,
        now: f64,
        out: &mut Vec<TriggerEvent>,
    ) {
        let Self { slots, rng, .. } = self;
        let slot = &mut slots[index];
        let Some(step) = slot.pattern.step(step_index) else {
            return;
        };
        if step.is_rest() {
            return;
        }

        // Ratio gate: fire on cycle A of every B (1-based)
        let ratio_a = step.ratio_a.clamp(1, 16) as u64;
        let ratio_b = step.ratio_b.clamp(1, 16) as u64;
        let cycle_pos = (slot.playback.pattern_cycle_count % ratio_b) + 1;
        if cycle_pos != ratio_a {
            slot.playback.clear_playing_step();
            return;
        }

        // Chance gate: uniform draw in [0, 100)
        let chance = step.chance.min(100) as u32;
        if chance < 100 {
            let roll: u32 = rng.random_range(0..100);
            if roll >= chance {
                slot.playback.clear_playing_step();
                return;
            }
        }

        let duration = step.length as f64 * slot.pattern.step_duration_secs(bpm);
        slot.playback.current_playing_step = step_index as i32;
        slot.playback.step_start_time = now;
        slot.playback.step_end_time = now + duration;

        out.push(TriggerEvent {
            pattern: slot.name.clone(),
            step: step_index,
            sample_offset: frame,
            duration_secs: duration,
            note: step.index,
            columns: Arc::clone(slot.pattern.columns()),
            values: step.values.clone(),
        });
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // SESSION PERSISTENCE
    // ═══════════════════════════════════════════════════════════════════════════

    /// Export patterns, chains, and bindings for the session tree
    pub fn export(&self) -> RuntimeSnapshot {
        RuntimeSnapshot {
            patterns: self
                .slots
                .iter()
                .map(|s| PatternRecord {
                    name: s.name.to_string(),
                    pattern: s.pattern.clone(),
                })
                .collect(),
            chains: self.chains.clone(),
            sequencer_bindings: self.bindings.clone(),
        }
    }

    /// Rebuild runtime contents from a session tree
    ///
    /// Order-aware: patterns first, then chains (entries referencing
    /// unknown patterns are pruned), then bindings (repaired to an
    /// existing pattern, or a fresh default when none remain).
    pub fn import(&mut self, snapshot: RuntimeSnapshot) {
        self.slots.clear();
        self.chains.clear();
        self.bindings.clear();
        self.next_auto_index = 0;

        for record in snapshot.patterns {
            let mut pattern = record.pattern;
            pattern.repair();
            if record.name.is_empty() || self.slot_index(&record.name).is_some() {
                log::warn!("session: skipping invalid pattern record '{}'", record.name);
                continue;
            }
            if let Some(auto) = parse_auto_index(&record.name) {
                self.next_auto_index = self.next_auto_index.max(auto + 1);
            }
            self.slots.push(PatternSlot {
                name: Arc::from(record.name.as_str()),
                pattern,
                playback: PlaybackState::default(),
            });
        }

        for (name, mut chain) in snapshot.chains {
            chain.repair(|p| self.slot_index(p).is_some());
            self.chains.insert(name, chain);
        }

        for (sequencer, mut binding) in snapshot.sequencer_bindings {
            if let Some(pattern) = binding.pattern_name.as_deref() {
                if self.slot_index(pattern).is_none() {
                    let fallback = match self.slots.first() {
                        Some(slot) => slot.name.to_string(),
                        None => {
                            let fresh = self.allocate_pattern_name();
                            self.slots.push(PatternSlot {
                                name: Arc::from(fresh.as_str()),
                                pattern: Pattern::new(DEFAULT_STEP_COUNT),
                                playback: PlaybackState::default(),
                            });
                            fresh
                        }
                    };
                    binding.pattern_name = Some(fallback);
                }
            }
            if let Some(chain) = binding.chain_name.as_deref() {
                if !self.chains.contains_key(chain) {
                    binding.chain_name = None;
                    binding.chain_enabled = false;
                }
            }
            self.bindings.insert(sequencer, binding);
        }
    }
}

/// Parse the numeric suffix of an auto-generated pattern name (`P7` → 7)
fn parse_auto_index(name: &str) -> Option<u32> {
    name.strip_prefix('P')?.parse().ok()
}

// ═══════════════════════════════════════════════════════════════════════════════
// TESTS
// ═══════════════════════════════════════════════════════════════════════════════

#[cfg(test)]
mod tests {
    use super::*;
    use crate::step::Step;

    const SR: f64 = 48000.0;
    const BPM: f32 = 120.0;
    const FRAMES: usize = 512;

    fn runtime() -> PatternRuntime {
        let mut rt = PatternRuntime::new(SR);
        rt.seed_rng(0xBEEF);
        rt
    }

    /// Pattern with triggers on the given step indices
    fn make_pattern(rt: &mut PatternRuntime, steps: &[i32]) -> String {
        let name = rt.add_pattern(None, steps.len()).unwrap();
        for (i, &index) in steps.iter().enumerate() {
            if index >= 0 {
                rt.with_pattern_mut(&name, |p| p.set_step(i, Step::trigger(index)));
            }
        }
        name
    }

    fn run_buffers(rt: &mut PatternRuntime, buffers: usize) -> Vec<TriggerEvent> {
        let mut out = Vec::new();
        for _ in 0..buffers {
            rt.evaluate_patterns(FRAMES, BPM, &mut out);
        }
        out
    }

    #[test]
    fn test_auto_naming_not_recycled() {
        let mut rt = runtime();
        assert_eq!(rt.add_pattern(None, 4), Some("P0".into()));
        assert_eq!(rt.add_pattern(None, 4), Some("P1".into()));
        rt.remove_pattern("P0");
        // P0 is not reused within the session
        assert_eq!(rt.add_pattern(None, 4), Some("P2".into()));
    }

    #[test]
    fn test_duplicate_name_rejected() {
        let mut rt = runtime();
        assert!(rt.add_pattern(Some("beat"), 4).is_some());
        assert!(rt.add_pattern(Some("beat"), 8).is_none());
    }

    #[test]
    fn test_trigger_order_with_rest() {
        // 4 steps, step 1 is a rest: two cycles emit 1,2,3,1,2,3
        let mut rt = runtime();
        let name = make_pattern(&mut rt, &[1, -1, 2, 3]);
        rt.bind_sequencer_pattern("t1", &name);
        rt.on_transport_start();

        // 2 cycles at 4 steps/beat, 120 BPM: 8 steps * 6000 samples
        let triggers = run_buffers(&mut rt, 94);
        let notes: Vec<i32> = triggers.iter().map(|t| t.note).collect();
        assert_eq!(notes, vec![1, 2, 3, 1, 2, 3]);
        assert!(triggers.iter().all(|t| &*t.pattern == name));
    }

    #[test]
    fn test_rest_advances_playhead() {
        let mut rt = runtime();
        let name = make_pattern(&mut rt, &[-1, 5]);
        rt.bind_sequencer_pattern("t1", &name);
        rt.on_transport_start();

        // First advance lands on the rest, second on the trigger
        let mut out = Vec::new();
        // samples_per_step = 48000*60/(120*4) = 6000
        rt.evaluate_patterns(6000, BPM, &mut out);
        assert!(out.is_empty());
        assert_eq!(rt.playback_state(&name).unwrap().playback_step, 0);
        assert_eq!(rt.playback_state(&name).unwrap().current_playing_step, -1);

        rt.evaluate_patterns(6000, BPM, &mut out);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].note, 5);
    }

    #[test]
    fn test_timing_determinism() {
        // floor(T*F*bpm*spb / (60*SR)) advancements, +-1 across buffers
        let mut rt = runtime();
        let name = make_pattern(&mut rt, &[1, 1, 1, 1]);
        rt.bind_sequencer_pattern("t1", &name);
        rt.on_transport_start();

        let buffers = 200usize;
        let triggers = run_buffers(&mut rt, buffers);
        let expected =
            (buffers as f64 * FRAMES as f64 * BPM as f64 * 4.0 / (60.0 * SR)).floor() as i64;
        let got = triggers.len() as i64;
        assert!(
            (got - expected).abs() <= 1,
            "expected {expected}±1 triggers, got {got}"
        );
    }

    #[test]
    fn test_backward_direction() {
        let mut rt = runtime();
        let name = make_pattern(&mut rt, &[0, 1, 2, 3]);
        rt.with_pattern_mut(&name, |p| p.set_steps_per_beat(-4.0));
        rt.bind_sequencer_pattern("t1", &name);
        rt.on_transport_start();

        let triggers = run_buffers(&mut rt, 47); // one cycle
        let notes: Vec<i32> = triggers.iter().map(|t| t.note).collect();
        assert_eq!(notes, vec![3, 2, 1, 0]);
    }

    #[test]
    fn test_ratio_gate() {
        // 1 step, ratio 1:3, 9 cycles: triggers on cycles 1, 4, 7
        let mut rt = runtime();
        let name = rt.add_pattern(None, 1).unwrap();
        rt.with_pattern_mut(&name, |p| {
            p.set_step(0, Step::trigger(1).with_ratio(1, 3))
        });
        rt.bind_sequencer_pattern("t1", &name);
        rt.on_transport_start();

        // 9 advances at 6000 samples each
        let mut out = Vec::new();
        for _ in 0..9 {
            rt.evaluate_patterns(6000, BPM, &mut out);
        }
        assert_eq!(out.len(), 3);
    }

    #[test]
    fn test_chance_gate_deterministic() {
        let mut rt = runtime();
        let name = rt.add_pattern(None, 1).unwrap();
        rt.with_pattern_mut(&name, |p| {
            p.set_step(0, Step::trigger(1).with_chance(0))
        });
        rt.bind_sequencer_pattern("t1", &name);
        rt.on_transport_start();

        let triggers = run_buffers(&mut rt, 100);
        assert!(triggers.is_empty());

        // chance=100 never rolls, always fires
        rt.with_pattern_mut(&name, |p| {
            p.set_step(0, Step::trigger(1).with_chance(100))
        });
        let triggers = run_buffers(&mut rt, 94);
        assert!(!triggers.is_empty());
    }

    #[test]
    fn test_chain_progression() {
        // C = [P0 x2, P1 x1]; 4 cycles bind P0, P0, P1, P0
        let mut rt = runtime();
        let p0 = make_pattern(&mut rt, &[1, -1, -1, -1]);
        let p1 = make_pattern(&mut rt, &[2, -1, -1, -1]);
        rt.add_chain("C");
        {
            let chain = rt.chain_mut("C").unwrap();
            chain.add_entry(&p0);
            chain.add_entry(&p1);
            chain.set_repeat_count(0, 2);
        }
        rt.bind_sequencer_pattern("t1", &p0);
        rt.bind_sequencer_chain("t1", "C");
        rt.on_transport_start();

        // 16 step advances = 4 cycles of 4 steps
        let mut out = Vec::new();
        for _ in 0..16 {
            rt.evaluate_patterns(6000, BPM, &mut out);
        }
        let sequence: Vec<&str> = out.iter().map(|t| &*t.pattern).collect();
        assert_eq!(sequence, vec![&*p0, &*p0, &*p1, &*p0]);
        assert_eq!(
            rt.binding("t1").unwrap().pattern_name.as_deref(),
            Some(p0.as_str())
        );
    }

    #[test]
    fn test_rebind_resets_phase_unless_same() {
        let mut rt = runtime();
        let p0 = make_pattern(&mut rt, &[1, 1, 1, 1]);
        let p1 = make_pattern(&mut rt, &[2, 2, 2, 2]);
        rt.bind_sequencer_pattern("t1", &p0);
        rt.on_transport_start();
        run_buffers(&mut rt, 10);
        let acc = rt.playback_state(&p0).unwrap().sample_accumulator;
        assert!(acc > 0.0);

        // no-op rebind keeps phase
        rt.bind_sequencer_pattern("t1", &p0);
        assert_eq!(rt.playback_state(&p0).unwrap().sample_accumulator, acc);

        // real rebind starts the target fresh and pauses the old pattern
        rt.bind_sequencer_pattern("t1", &p1);
        assert!(!rt.playback_state(&p0).unwrap().is_playing);
        let fresh = rt.playback_state(&p1).unwrap();
        assert!(fresh.is_playing);
        assert_eq!(fresh.sample_accumulator, 0.0);
    }

    #[test]
    fn test_shared_pattern_stays_playing() {
        let mut rt = runtime();
        let p0 = make_pattern(&mut rt, &[1]);
        let p1 = make_pattern(&mut rt, &[2]);
        rt.bind_sequencer_pattern("t1", &p0);
        rt.bind_sequencer_pattern("t2", &p0);
        rt.on_transport_start();

        rt.bind_sequencer_pattern("t1", &p1);
        // t2 still references p0
        assert!(rt.playback_state(&p0).unwrap().is_playing);
    }

    #[test]
    fn test_remove_pattern_cleanup() {
        // Chain [P0, P1], sequencer bound to P1; deleting P1 prunes the
        // chain and rebinds the sequencer to P0
        let mut rt = runtime();
        let p0 = make_pattern(&mut rt, &[1]);
        let p1 = make_pattern(&mut rt, &[2]);
        rt.add_chain("C");
        {
            let chain = rt.chain_mut("C").unwrap();
            chain.add_entry(&p0);
            chain.add_entry(&p1);
        }
        rt.bind_sequencer_pattern("t1", &p1);

        let deleted = std::sync::Arc::new(std::sync::atomic::AtomicBool::new(false));
        let flag = std::sync::Arc::clone(&deleted);
        rt.subscribe_events(move |e| {
            if matches!(e, RuntimeEvent::PatternDeleted(n) if n == "P1") {
                flag.store(true, std::sync::atomic::Ordering::Relaxed);
            }
        });

        assert!(rt.remove_pattern(&p1));
        assert_eq!(rt.chain("C").unwrap().entries(), &[p0.clone()]);
        assert_eq!(
            rt.binding("t1").unwrap().pattern_name.as_deref(),
            Some(p0.as_str())
        );
        assert!(deleted.load(std::sync::atomic::Ordering::Relaxed));
    }

    #[test]
    fn test_remove_last_pattern_creates_default() {
        let mut rt = runtime();
        let p0 = make_pattern(&mut rt, &[1]);
        rt.bind_sequencer_pattern("t1", &p0);
        assert!(rt.remove_pattern(&p0));

        let binding = rt.binding("t1").unwrap();
        let fallback = binding.pattern_name.clone().unwrap();
        let pattern = rt.pattern(&fallback).unwrap();
        assert_eq!(pattern.step_count(), DEFAULT_STEP_COUNT);
    }

    #[test]
    fn test_import_repairs_references() {
        let mut rt = runtime();
        let p0 = make_pattern(&mut rt, &[1]);
        rt.add_chain("C");
        rt.chain_mut("C").unwrap().add_entry(&p0);
        rt.chain_mut("C").unwrap().add_entry("ghost");
        rt.bind_sequencer_pattern("t1", &p0);

        let mut snapshot = rt.export();
        snapshot
            .sequencer_bindings
            .get_mut("t1")
            .unwrap()
            .pattern_name = Some("ghost".into());

        let mut restored = runtime();
        restored.import(snapshot);
        assert_eq!(restored.chain("C").unwrap().entries(), &[p0.clone()]);
        assert_eq!(
            restored.binding("t1").unwrap().pattern_name.as_deref(),
            Some(p0.as_str())
        );
    }

    #[test]
    fn test_transport_stop_resets_cycles() {
        let mut rt = runtime();
        let name = make_pattern(&mut rt, &[1]);
        rt.bind_sequencer_pattern("t1", &name);
        rt.on_transport_start();
        run_buffers(&mut rt, 94);
        assert!(rt.playback_state(&name).unwrap().pattern_cycle_count > 0);

        rt.on_transport_stop();
        let state = rt.playback_state(&name).unwrap();
        assert!(!state.is_playing);
        assert_eq!(state.pattern_cycle_count, 0);
    }
}
