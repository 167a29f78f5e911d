//! Connection manager
//!
//! Unified management of all module connections:
//! - Audio/Video routing (module→module and module→mixer)
//! - Parameter routing (wraps `ParameterRouter`)
//! - Event subscriptions (trigger source → handler slot)
//! - Auto-routing of orphaned outputs and chain ends
//! - Connection discovery for newly created modules
//!
//! Capability constraints are enforced at connect time; the edge set is
//! kept consistent with the live registry, so no edge ever references a
//! missing module.

use serde_json::{Value, json};

use gw_core::{GwError, GwResult};
use gw_module::{Capability, ModuleRegistry, PortKind};

use crate::connection::Connection;
use crate::param_router::{Condition, ParameterRouter};
use crate::path::ParamPath;

/// Default event/handler slot names used by connection discovery
pub const TRIGGER_EVENT: &str = "trigger";
pub const TRIGGER_HANDLER: &str = "on_trigger";

/// Typed edge set of the module graph
#[derive(Default)]
pub struct ConnectionManager {
    edges: Vec<Connection>,
    params: ParameterRouter,
}

impl ConnectionManager {
    pub fn new() -> Self {
        Self::default()
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // AUDIO / VIDEO ROUTING
    // ═══════════════════════════════════════════════════════════════════════════

    /// Connect an audio edge; source must produce audio, target consume it
    pub fn connect_audio(
        &mut self,
        registry: &ModuleRegistry,
        source: &str,
        target: &str,
    ) -> GwResult<()> {
        self.connect_signal(
            registry,
            source,
            target,
            PortKind::Audio,
            Capability::ProducesAudio,
            Capability::ConsumesAudio,
        )
    }

    /// Connect a video edge; source must produce video, target consume it
    pub fn connect_video(
        &mut self,
        registry: &ModuleRegistry,
        source: &str,
        target: &str,
    ) -> GwResult<()> {
        self.connect_signal(
            registry,
            source,
            target,
            PortKind::Video,
            Capability::ProducesVideo,
            Capability::ConsumesVideo,
        )
    }

    /// Generic connect: picks audio when both sides speak it, else video
    pub fn connect(
        &mut self,
        registry: &ModuleRegistry,
        source: &str,
        target: &str,
    ) -> GwResult<PortKind> {
        let (src_caps, dst_caps) = {
            let src = registry
                .get(source)
                .ok_or_else(|| GwError::NotFound(format!("module '{source}'")))?;
            let dst = registry
                .get(target)
                .ok_or_else(|| GwError::NotFound(format!("module '{target}'")))?;
            let caps = (src.lock().capabilities(), dst.lock().capabilities());
            caps
        };

        if src_caps.contains(Capability::ProducesAudio)
            && dst_caps.contains(Capability::ConsumesAudio)
        {
            self.connect_audio(registry, source, target)?;
            Ok(PortKind::Audio)
        } else if src_caps.contains(Capability::ProducesVideo)
            && dst_caps.contains(Capability::ConsumesVideo)
        {
            self.connect_video(registry, source, target)?;
            Ok(PortKind::Video)
        } else {
            Err(GwError::Constraint(format!(
                "'{source}' and '{target}' have no compatible signal kind"
            )))
        }
    }

    fn connect_signal(
        &mut self,
        registry: &ModuleRegistry,
        source: &str,
        target: &str,
        kind: PortKind,
        produces: Capability,
        consumes: Capability,
    ) -> GwResult<()> {
        if source == target {
            return Err(GwError::Constraint(format!(
                "cannot connect '{source}' to itself"
            )));
        }
        let src = registry
            .get(source)
            .ok_or_else(|| GwError::NotFound(format!("module '{source}'")))?;
        let dst = registry
            .get(target)
            .ok_or_else(|| GwError::NotFound(format!("module '{target}'")))?;

        if !src.lock().has_capability(produces) {
            return Err(GwError::Constraint(format!(
                "'{source}' does not produce {}",
                kind.as_str()
            )));
        }
        if !dst.lock().has_capability(consumes) {
            return Err(GwError::Constraint(format!(
                "'{target}' does not consume {}",
                kind.as_str()
            )));
        }

        let edge = match kind {
            PortKind::Audio => Connection::audio(source, target),
            PortKind::Video => Connection::video(source, target),
            _ => unreachable!("connect_signal only routes audio/video"),
        };
        if self.insert_edge(edge) {
            src.lock().on_connection_established(target, kind, false);
            dst.lock().on_connection_established(source, kind, true);
        }
        Ok(())
    }

    /// Disconnect audio edges from `source` (to `target`, or all)
    pub fn disconnect_audio(
        &mut self,
        registry: &ModuleRegistry,
        source: &str,
        target: Option<&str>,
    ) -> usize {
        self.remove_edges(registry, |c| {
            c.kind == PortKind::Audio
                && c.source == source
                && target.is_none_or(|t| c.target == t)
        })
    }

    /// Disconnect video edges from `source` (to `target`, or all)
    pub fn disconnect_video(
        &mut self,
        registry: &ModuleRegistry,
        source: &str,
        target: Option<&str>,
    ) -> usize {
        self.remove_edges(registry, |c| {
            c.kind == PortKind::Video
                && c.source == source
                && target.is_none_or(|t| c.target == t)
        })
    }

    /// Disconnect edges from `source`, optionally filtered by target
    /// and kind
    pub fn disconnect(
        &mut self,
        registry: &ModuleRegistry,
        source: &str,
        target: Option<&str>,
        kind: Option<PortKind>,
    ) -> usize {
        let mut removed = self.remove_edges(registry, |c| {
            c.source == source
                && target.is_none_or(|t| c.target == t)
                && kind.is_none_or(|k| c.kind == k)
        });
        if kind.is_none() || kind == Some(PortKind::Parameter) {
            if target.is_none() {
                removed += self.params.disconnect_module(source);
            }
            // Parameter edges between a specific pair are addressed by
            // path through disconnect_parameter
        }
        removed
    }

    /// Remove every edge touching `module` (its removal is imminent)
    pub fn disconnect_all(&mut self, registry: &ModuleRegistry, module: &str) -> usize {
        let removed = self.remove_edges(registry, |c| c.touches(module));
        removed + self.params.disconnect_module(module)
    }

    pub fn clear(&mut self) {
        self.edges.clear();
        self.params.clear();
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // PARAMETER ROUTING
    // ═══════════════════════════════════════════════════════════════════════════

    /// Bind a source parameter path to a target parameter path
    ///
    /// The optional condition is polled at propagation time; while it
    /// returns false the value is not forwarded but the link persists.
    pub fn connect_parameter(
        &mut self,
        registry: &ModuleRegistry,
        source_path: &str,
        target_path: &str,
        condition: Option<Condition>,
    ) -> GwResult<()> {
        self.params
            .connect(registry, source_path, target_path, condition)
    }

    /// Remove parameter bindings originating at `source_path`
    pub fn disconnect_parameter(&mut self, source_path: &str) -> GwResult<usize> {
        self.params.disconnect(source_path)
    }

    /// Forward a changed parameter along its bindings
    pub fn propagate_parameter(
        &self,
        registry: &ModuleRegistry,
        module: &str,
        param: &str,
        index: Option<usize>,
        value: f32,
    ) {
        self.params.propagate(registry, module, param, index, value);
    }

    pub fn parameter_connections(&self) -> Vec<(String, String)> {
        self.params.connections()
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // EVENT SUBSCRIPTIONS
    // ═══════════════════════════════════════════════════════════════════════════

    /// Wire an event source to a handler slot on the target
    pub fn subscribe_event(
        &mut self,
        registry: &ModuleRegistry,
        source: &str,
        event_name: &str,
        target: &str,
        handler_name: &str,
    ) -> GwResult<()> {
        let src = registry
            .get(source)
            .ok_or_else(|| GwError::NotFound(format!("module '{source}'")))?;
        let dst = registry
            .get(target)
            .ok_or_else(|| GwError::NotFound(format!("module '{target}'")))?;

        if !src.lock().has_capability(Capability::EmitsTriggers) {
            return Err(GwError::Constraint(format!(
                "'{source}' does not emit triggers"
            )));
        }
        if !dst.lock().has_capability(Capability::AcceptsTriggers) {
            return Err(GwError::Constraint(format!(
                "'{target}' does not accept triggers"
            )));
        }
        if !dst
            .lock()
            .metadata()
            .handler_names
            .iter()
            .any(|h| *h == handler_name)
        {
            log::warn!("'{target}' has no declared handler '{handler_name}'");
        }

        if self.insert_edge(Connection::event(source, event_name, target, handler_name)) {
            src.lock()
                .on_connection_established(target, PortKind::Event, false);
            dst.lock()
                .on_connection_established(source, PortKind::Event, true);
        }
        Ok(())
    }

    /// Remove an event subscription; empty handler matches any
    pub fn unsubscribe_event(
        &mut self,
        registry: &ModuleRegistry,
        source: &str,
        event_name: &str,
        target: &str,
        handler_name: &str,
    ) -> usize {
        self.remove_edges(registry, |c| {
            c.kind == PortKind::Event
                && c.source == source
                && c.target == target
                && c.event_name == event_name
                && (handler_name.is_empty() || c.handler_name == handler_name)
        })
    }

    /// Active event subscriptions from `source`: (target, handler)
    pub fn event_targets(&self, source: &str) -> impl Iterator<Item = (&str, &str)> {
        self.edges.iter().filter_map(move |c| {
            (c.kind == PortKind::Event && c.active && c.source == source)
                .then_some((c.target.as_str(), c.handler_name.as_str()))
        })
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // AUTO-ROUTING
    // ═══════════════════════════════════════════════════════════════════════════

    /// Route producing modules with zero outgoing edges of that kind to
    /// the master sinks; returns connections created
    pub fn auto_route_orphaned_outputs(
        &mut self,
        registry: &ModuleRegistry,
        master_audio: &str,
        master_video: &str,
    ) -> usize {
        let mut created = 0;
        for name in registry.names() {
            if name == master_audio || name == master_video {
                continue;
            }
            let caps = match registry.get(&name) {
                Some(module) => module.lock().capabilities(),
                None => continue,
            };
            if caps.contains(Capability::ProducesAudio)
                && !self.has_outgoing(&name, PortKind::Audio)
                && self.connect_audio(registry, &name, master_audio).is_ok()
            {
                created += 1;
            }
            if caps.contains(Capability::ProducesVideo)
                && !self.has_outgoing(&name, PortKind::Video)
                && self.connect_video(registry, &name, master_video).is_ok()
            {
                created += 1;
            }
        }
        created
    }

    /// Route terminal nodes of producing chains to the master sinks
    ///
    /// A chain end consumes and produces a signal kind, has incoming
    /// edges but no outgoing ones.
    pub fn auto_route_chain_ends(
        &mut self,
        registry: &ModuleRegistry,
        master_audio: &str,
        master_video: &str,
    ) -> usize {
        let mut created = 0;
        for name in registry.names() {
            if name == master_audio || name == master_video {
                continue;
            }
            let caps = match registry.get(&name) {
                Some(module) => module.lock().capabilities(),
                None => continue,
            };
            if caps.contains(Capability::ProducesAudio)
                && self.has_incoming(&name, PortKind::Audio)
                && !self.has_outgoing(&name, PortKind::Audio)
                && self.connect_audio(registry, &name, master_audio).is_ok()
            {
                created += 1;
            }
            if caps.contains(Capability::ProducesVideo)
                && self.has_incoming(&name, PortKind::Video)
                && !self.has_outgoing(&name, PortKind::Video)
                && self.connect_video(registry, &name, master_video).is_ok()
            {
                created += 1;
            }
        }
        created
    }

    /// Type-directed default wiring for a newly created module
    ///
    /// Trigger sources hook up to the first accepting sibling (and vice
    /// versa); producing outputs land on the master sinks.
    pub fn discover_connections_for_module(
        &mut self,
        registry: &ModuleRegistry,
        name: &str,
        master_audio: &str,
        master_video: &str,
    ) -> usize {
        let Some(module) = registry.get(name) else {
            return 0;
        };
        let caps = module.lock().capabilities();
        let mut created = 0;

        if caps.contains(Capability::EmitsTriggers) {
            if let Some(sibling) = self
                .find_compatible_modules(registry, name, PortKind::Event)
                .first()
                .cloned()
            {
                if self
                    .subscribe_event(registry, name, TRIGGER_EVENT, &sibling, TRIGGER_HANDLER)
                    .is_ok()
                {
                    created += 1;
                }
            }
        }
        if caps.contains(Capability::AcceptsTriggers) {
            let sources: Vec<String> = registry
                .names()
                .into_iter()
                .filter(|other| {
                    other != name
                        && registry
                            .get(other)
                            .is_some_and(|m| m.lock().has_capability(Capability::EmitsTriggers))
                        && self.event_targets(other).next().is_none()
                })
                .collect();
            for source in sources {
                if self
                    .subscribe_event(registry, &source, TRIGGER_EVENT, name, TRIGGER_HANDLER)
                    .is_ok()
                {
                    created += 1;
                }
            }
        }

        if caps.contains(Capability::ProducesAudio)
            && name != master_audio
            && !self.has_outgoing(name, PortKind::Audio)
            && self.connect_audio(registry, name, master_audio).is_ok()
        {
            created += 1;
        }
        if caps.contains(Capability::ProducesVideo)
            && name != master_video
            && !self.has_outgoing(name, PortKind::Video)
            && self.connect_video(registry, name, master_video).is_ok()
        {
            created += 1;
        }
        created
    }

    /// Modules `name` could connect to with the given signal kind
    pub fn find_compatible_modules(
        &self,
        registry: &ModuleRegistry,
        name: &str,
        kind: PortKind,
    ) -> Vec<String> {
        let required = match kind {
            PortKind::Audio => Capability::ConsumesAudio,
            PortKind::Video => Capability::ConsumesVideo,
            PortKind::Event => Capability::AcceptsTriggers,
            PortKind::Parameter => {
                return registry.names().into_iter().filter(|n| n != name).collect();
            }
        };
        let mut compatible = Vec::new();
        registry.for_each(|_, other, module| {
            if other != name && module.lock().has_capability(required) {
                compatible.push(other.to_string());
            }
        });
        compatible
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // QUERIES
    // ═══════════════════════════════════════════════════════════════════════════

    /// All connections, parameter bindings included
    pub fn connections(&self) -> Vec<Connection> {
        let mut all = self.edges.clone();
        for (source_path, target_path) in self.params.connections() {
            let source = ParamPath::parse(&source_path).map(|p| p.module).unwrap_or_default();
            let target = ParamPath::parse(&target_path).map(|p| p.module).unwrap_or_default();
            all.push(Connection {
                source,
                target,
                kind: PortKind::Parameter,
                source_path,
                target_path,
                event_name: String::new(),
                handler_name: String::new(),
                active: true,
            });
        }
        all
    }

    pub fn connections_from(&self, module: &str) -> Vec<Connection> {
        self.connections()
            .into_iter()
            .filter(|c| c.source == module)
            .collect()
    }

    pub fn connections_to(&self, module: &str) -> Vec<Connection> {
        self.connections()
            .into_iter()
            .filter(|c| c.target == module)
            .collect()
    }

    pub fn has_connection(&self, source: &str, target: &str, kind: PortKind) -> bool {
        self.edges
            .iter()
            .any(|c| c.source == source && c.target == target && c.kind == kind)
    }

    /// Modules with an edge of `kind` arriving at `module`
    pub fn sources_into(&self, module: &str, kind: PortKind) -> Vec<&str> {
        self.edges
            .iter()
            .filter(|c| c.kind == kind && c.active && c.target == module)
            .map(|c| c.source.as_str())
            .collect()
    }

    pub fn total_connections(&self) -> usize {
        self.edges.len() + self.params.len()
    }

    fn has_outgoing(&self, module: &str, kind: PortKind) -> bool {
        self.edges
            .iter()
            .any(|c| c.source == module && c.kind == kind)
    }

    fn has_incoming(&self, module: &str, kind: PortKind) -> bool {
        self.edges
            .iter()
            .any(|c| c.target == module && c.kind == kind)
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // RENAME SUPPORT
    // ═══════════════════════════════════════════════════════════════════════════

    /// Rewrite every edge and parameter path after a module rename
    pub fn rename_module(&mut self, old: &str, new: &str) {
        for edge in &mut self.edges {
            if edge.source == old {
                edge.source = new.to_string();
            }
            if edge.target == old {
                edge.target = new.to_string();
            }
        }
        self.params.rename_module(old, new);
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // SERIALIZATION
    // ═══════════════════════════════════════════════════════════════════════════

    pub fn to_json(&self) -> Value {
        json!(self.connections())
    }

    /// Rebuild edges from JSON, skipping records whose endpoints are
    /// not live modules
    pub fn from_json(&mut self, registry: &ModuleRegistry, value: &Value) -> GwResult<usize> {
        let records: Vec<Connection> = serde_json::from_value(value.clone())
            .map_err(|e| GwError::Serialization(e.to_string()))?;
        let mut restored = 0;
        for record in records {
            let result = match record.kind {
                PortKind::Audio => self
                    .connect_audio(registry, &record.source, &record.target)
                    .map(|_| ()),
                PortKind::Video => self
                    .connect_video(registry, &record.source, &record.target)
                    .map(|_| ()),
                PortKind::Event => self
                    .subscribe_event(
                        registry,
                        &record.source,
                        &record.event_name,
                        &record.target,
                        &record.handler_name,
                    )
                    .map(|_| ()),
                PortKind::Parameter => self
                    .connect_parameter(registry, &record.source_path, &record.target_path, None)
                    .map(|_| ()),
            };
            match result {
                Ok(()) => restored += 1,
                Err(err) => log::warn!(
                    "skipping persisted connection {} -> {}: {err}",
                    record.source,
                    record.target
                ),
            }
        }
        Ok(restored)
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // INTERNAL
    // ═══════════════════════════════════════════════════════════════════════════

    /// Insert an edge unless an identical key exists
    fn insert_edge(&mut self, edge: Connection) -> bool {
        if self.edges.iter().any(|c| c.key() == edge.key()) {
            return false;
        }
        self.edges.push(edge);
        true
    }

    fn remove_edges<F>(&mut self, registry: &ModuleRegistry, matches: F) -> usize
    where
        F: Fn(&Connection) -> bool,
    {
        let mut removed = Vec::new();
        self.edges.retain(|c| {
            if matches(c) {
                removed.push((c.source.clone(), c.target.clone(), c.kind));
                false
            } else {
                true
            }
        });
        for (source, target, kind) in &removed {
            if let Some(module) = registry.get(source) {
                module.lock().on_connection_broken(target, *kind, false);
            }
            if let Some(module) = registry.get(target) {
                module.lock().on_connection_broken(source, *kind, true);
            }
        }
        removed.len()
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// TESTS
// ═══════════════════════════════════════════════════════════════════════════════
