//! Value-typed engine state

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

use gw_route::Connection;

/// Transport view
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct TransportState {
    pub is_playing: bool,
    pub bpm: f32,
    pub current_beat: f64,
}

/// Per-type state, parsed from each module's JSON snapshot
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum TypeSpecificState {
    #[default]
    None,
    Sequencer(SequencerState),
    Sampler(SamplerState),
    AudioMixer(AudioMixerState),
    VideoMixer(VideoMixerState),
}

impl TypeSpecificState {
    /// Parse a module's `state_snapshot()` value by type name
    ///
    /// Unknown types and malformed snapshots degrade to `None`; the
    /// snapshot build never fails on one module.
    pub fn parse(type_name: &str, snapshot: &Value) -> Self {
        fn decode<T: serde::de::DeserializeOwned + Default>(type_name: &str, value: &Value) -> T {
            serde_json::from_value(value.clone()).unwrap_or_else(|err| {
                log::debug!("could not parse {type_name} state snapshot: {err}");
                T::default()
            })
        }
        match type_name {
            "StepSequencer" => Self::Sequencer(decode(type_name, snapshot)),
            "MultiSampler" => Self::Sampler(decode(type_name, snapshot)),
            "AudioMixer" => Self::AudioMixer(decode(type_name, snapshot)),
            "VideoMixer" => Self::VideoMixer(decode(type_name, snapshot)),
            _ => Self::None,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SequencerState {
    pub bound_pattern: Option<String>,
    pub bound_chain: Option<String>,
    pub chain_enabled: bool,
    pub is_playing: bool,
    pub playback_step: i32,
    pub current_playing_step: i32,
    pub pattern_cycle_count: u64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SamplerState {
    pub active_voices: usize,
    pub polyphonic: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AudioMixerState {
    pub input_count: usize,
    pub master_volume: f32,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct VideoMixerState {
    pub input_count: usize,
    pub master_opacity: f32,
}

/// One module's view in a snapshot
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ModuleState {
    pub name: String,
    pub type_name: String,
    pub enabled: bool,
    pub parameters: BTreeMap<String, f32>,
    pub type_specific: TypeSpecificState,
}

/// Immutable engine snapshot handed to observers
///
/// `version` increases monotonically; observers compare versions to
/// coalesce redundant refreshes.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EngineState {
    pub version: u64,
    pub transport: TransportState,
    pub modules: BTreeMap<String, ModuleState>,
    pub connections: Vec<Connection>,
}

impl EngineState {
    pub fn module(&self, name: &str) -> Option<&ModuleState> {
        self.modules.get(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_type_specific_parse() {
        let snapshot = json!({
            "bound_pattern": "P0",
            "chain_enabled": true,
            "is_playing": true,
            "playback_step": 3,
            "current_playing_step": -1,
            "pattern_cycle_count": 2,
        });
        let state = TypeSpecificState::parse("StepSequencer", &snapshot);
        match state {
            TypeSpecificState::Sequencer(s) => {
                assert_eq!(s.bound_pattern.as_deref(), Some("P0"));
                assert_eq!(s.playback_step, 3);
            }
            other => panic!("expected sequencer state, got {other:?}"),
        }
    }

    #[test]
    fn test_unknown_type_degrades_to_none() {
        let state = TypeSpecificState::parse("Mystery", &json!({"x": 1}));
        assert!(matches!(state, TypeSpecificState::None));
        // Malformed snapshot for a known type also degrades gracefully
        let state = TypeSpecificState::parse("MultiSampler", &json!("not an object"));
        assert!(matches!(state, TypeSpecificState::Sampler(_)));
    }

    #[test]
    fn test_snapshot_is_value_typed() {
        let mut state = EngineState::default();
        state.modules.insert(
            "s1".into(),
            ModuleState {
                name: "s1".into(),
                type_name: "MultiSampler".into(),
                ..ModuleState::default()
            },
        );
        let held = state.clone();
        state.modules.clear();
        // The clone is unaffected by later mutation
        assert!(held.module("s1").is_some());
    }
}
