//! Identifiers for agents, events, and correlated conversations.
//!
//! Mirrors the `EventId` pattern from the teacher's event system: a thin
//! `Uuid` wrapper with `Display`/`serde` derived, plus a constructor that
//! hides the randomness source.

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Globally unique identifier for an agent, stable across migrations of the
/// same logical agent.
///
/// Carries a human-readable agent type alongside an opaque unique suffix so
/// that `AgentId` display strings remain meaningful in logs and audits
/// (`weather-agent#3f9a…`) without requiring a lookup.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AgentId {
    /// Human-readable agent type, e.g. `"weather-agent"`.
    pub agent_type: String,
    /// Opaque unique suffix, unique within the agent mesh.
    pub instance: Uuid,
}

impl AgentId {
    /// Allocate a fresh `AgentId` of the given type.
    pub fn new(agent_type: impl Into<String>) -> Self {
        Self {
            agent_type: agent_type.into(),
            instance: Uuid::new_v4(),
        }
    }

    /// Derive a fresh `AgentId` of the same type, with a new unique suffix.
    ///
    /// Used by `clone`/`replicate`, which must mint new identities while
    /// keeping the type tag of the source agent.
    pub fn fresh_clone(&self) -> Self {
        Self::new(self.agent_type.clone())
    }
}

impl fmt::Display for AgentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.agent_type, self.instance)
    }
}

/// Unique identifier for a single event instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EventId(pub Uuid);

impl EventId {
    /// Create a new random `EventId`.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for EventId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for EventId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Opaque string linking events in a conversation (request <-> response <->
/// downstream requests).
///
/// Kept as an opaque string rather than a `Uuid` newtype because the
/// orchestrator derives child correlation ids from a parent by
/// concatenation (see `amcp-orchestrator`), which is easiest to reason
/// about as string composition.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CorrelationId(pub String);

impl CorrelationId {
    /// Create a new random top-level correlation id.
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// Derive a child correlation id scoped under this one, e.g. for a
    /// per-task dispatch under an orchestration-level correlation id.
    pub fn derive(&self, suffix: &str) -> Self {
        Self(format!("{}.{}", self.0, suffix))
    }
}

impl Default for CorrelationId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for CorrelationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for CorrelationId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for CorrelationId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn agent_id_display_includes_type() {
        let id = AgentId::new("weather-agent");
        assert!(id.to_string().starts_with("weather-agent#"));
    }

    #[test]
    fn fresh_clone_keeps_type_changes_instance() {
        let original = AgentId::new("weather-agent");
        let cloned = original.fresh_clone();
        assert_eq!(cloned.agent_type, original.agent_type);
        assert_ne!(cloned.instance, original.instance);
    }

    #[test]
    fn correlation_id_derive_is_scoped() {
        let parent = CorrelationId::from("c1");
        let child = parent.derive("task-0");
        assert_eq!(child.0, "c1.task-0");
    }
}
