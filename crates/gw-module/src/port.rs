//! Typed module ports

use serde::{Deserialize, Serialize};

/// Signal kind carried by a port or connection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PortKind {
    Audio,
    Video,
    Event,
    Parameter,
}

impl PortKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Audio => "audio",
            Self::Video => "video",
            Self::Event => "event",
            Self::Parameter => "parameter",
        }
    }

    pub fn parse(text: &str) -> Option<Self> {
        match text.to_ascii_lowercase().as_str() {
            "audio" => Some(Self::Audio),
            "video" => Some(Self::Video),
            "event" => Some(Self::Event),
            "parameter" | "param" => Some(Self::Parameter),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PortDirection {
    Input,
    Output,
}

/// Named I/O endpoint on a module
///
/// `endpoint` is an opaque handle into the owning module's internals
/// (e.g. a mixer input slot); routing treats it as a token.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PortDescriptor {
    pub name: String,
    pub direction: PortDirection,
    pub kind: PortKind,
    pub endpoint: Option<usize>,
}

impl PortDescriptor {
    pub fn input(name: &str, kind: PortKind) -> Self {
        Self {
            name: name.to_string(),
            direction: PortDirection::Input,
            kind,
            endpoint: None,
        }
    }

    pub fn output(name: &str, kind: PortKind) -> Self {
        Self {
            name: name.to_string(),
            direction: PortDirection::Output,
            kind,
            endpoint: None,
        }
    }

    pub fn with_endpoint(mut self, endpoint: usize) -> Self {
        self.endpoint = Some(endpoint);
        self
    }
}
