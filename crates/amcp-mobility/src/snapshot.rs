//! Versioned, opaque binary snapshot format for strong mobility (spec §6.2).
//!
//! The format is a contract between the runtime and the agent type, not a
//! generic state container: the runtime carries `user_state` as opaque
//! bytes and never inspects it. Unknown fields from a newer writer are
//! preserved in `metadata` rather than rejected outright; only an unknown
//! top-level format version is a hard failure.

use amcp_types::{AgentId, AmcpError, AmcpResult};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// Current snapshot format version. Bump on any breaking change to this
/// struct's wire shape.
pub const SNAPSHOT_FORMAT_VERSION: u32 = 1;

/// An agent's complete mobile state, ready to cross a context boundary.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentSnapshot {
    pub format_version: u32,
    pub agent_id: AgentId,
    pub agent_type: String,
    /// Opaque to the runtime; interpreted only by the agent type's factory.
    pub user_state: Vec<u8>,
    pub subscriptions: BTreeSet<String>,
    pub capabilities: BTreeSet<String>,
    /// Opaque security-context bytes (e.g. a signed capability token),
    /// carried so the destination can re-establish the same authorization
    /// the agent held on the source.
    pub auth_context: Vec<u8>,
    pub metadata: BTreeMap<String, String>,
    pub snapshot_time: DateTime<Utc>,
}

impl AgentSnapshot {
    pub fn new(
        agent_id: AgentId,
        agent_type: String,
        user_state: Vec<u8>,
        subscriptions: BTreeSet<String>,
        capabilities: BTreeSet<String>,
        auth_context: Vec<u8>,
    ) -> Self {
        Self {
            format_version: SNAPSHOT_FORMAT_VERSION,
            agent_id,
            agent_type,
            user_state,
            subscriptions,
            capabilities,
            auth_context,
            metadata: BTreeMap::new(),
            snapshot_time: Utc::now(),
        }
    }

    /// Serialize to the wire format (MessagePack).
    pub fn encode(&self) -> AmcpResult<Vec<u8>> {
        rmp_serde::to_vec_named(self)
            .map_err(|e| AmcpError::Serialization(format!("snapshot encode: {e}")))
    }

    /// Deserialize from the wire format, rejecting unknown format versions.
    pub fn decode(bytes: &[u8]) -> AmcpResult<Self> {
        let snapshot: Self = rmp_serde::from_slice(bytes)
            .map_err(|e| AmcpError::Serialization(format!("snapshot decode: {e}")))?;
        if snapshot.format_version != SNAPSHOT_FORMAT_VERSION {
            return Err(AmcpError::UnsupportedSnapshot(snapshot.format_version));
        }
        Ok(snapshot)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> AgentSnapshot {
        AgentSnapshot::new(
            AgentId::new("weather-agent"),
            "weather-agent".to_string(),
            b"state".to_vec(),
            BTreeSet::from(["task.request.weather".to_string()]),
            BTreeSet::from(["weather.lookup".to_string()]),
            Vec::new(),
        )
    }

    #[test]
    fn round_trips_through_encode_decode() {
        let snapshot = sample();
        let bytes = snapshot.encode().unwrap();
        let decoded = AgentSnapshot::decode(&bytes).unwrap();
        assert_eq!(decoded.agent_id, snapshot.agent_id);
        assert_eq!(decoded.subscriptions, snapshot.subscriptions);
    }

    #[test]
    fn rejects_unsupported_version() {
        let mut snapshot = sample();
        snapshot.format_version = SNAPSHOT_FORMAT_VERSION + 1;
        let bytes = rmp_serde::to_vec_named(&snapshot).unwrap();
        let result = AgentSnapshot::decode(&bytes);
        assert!(matches!(result, Err(AmcpError::UnsupportedSnapshot(_))));
    }
}
