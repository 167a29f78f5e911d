//! Connection record

use serde::{Deserialize, Serialize};

use gw_module::PortKind;

/// One typed edge in the module graph
///
/// `source_path`/`target_path` are used by parameter links,
/// `event_name`/`handler_name` by event links; both stay empty for
/// plain audio/video edges.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Connection {
    pub source: String,
    pub target: String,
    pub kind: PortKind,
    #[serde(default)]
    pub source_path: String,
    #[serde(default)]
    pub target_path: String,
    #[serde(default)]
    pub event_name: String,
    #[serde(default)]
    pub handler_name: String,
    #[serde(default = "default_active")]
    pub active: bool,
}

fn default_active() -> bool {
    true
}

impl Connection {
    pub fn audio(source: &str, target: &str) -> Self {
        Self::plain(source, target, PortKind::Audio)
    }

    pub fn video(source: &str, target: &str) -> Self {
        Self::plain(source, target, PortKind::Video)
    }

    pub fn event(source: &str, event_name: &str, target: &str, handler_name: &str) -> Self {
        Self {
            event_name: event_name.to_string(),
            handler_name: handler_name.to_string(),
            ..Self::plain(source, target, PortKind::Event)
        }
    }

    fn plain(source: &str, target: &str, kind: PortKind) -> Self {
        Self {
            source: source.to_string(),
            target: target.to_string(),
            kind,
            source_path: String::new(),
            target_path: String::new(),
            event_name: String::new(),
            handler_name: String::new(),
            active: true,
        }
    }

    /// Identity key; duplicate keys coalesce to a single edge
    pub fn key(&self) -> (&str, &str, PortKind, &str, &str) {
        (
            &self.source,
            &self.target,
            self.kind,
            &self.source_path,
            &self.target_path,
        )
    }

    pub fn touches(&self, module: &str) -> bool {
        self.source == module || self.target == module
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_identity() {
        let a = Connection::audio("src", "dst");
        let b = Connection::audio("src", "dst");
        let c = Connection::video("src", "dst");
        assert_eq!(a.key(), b.key());
        assert_ne!(a.key(), c.key());
    }
}
