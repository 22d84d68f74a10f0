//! Capability registry: where an agent is, and what it can do (spec §4.5).
//!
//! In a single-context deployment these operations are linearizable
//! (guaranteed by `DashMap`'s per-shard locking); a federated deployment
//! composes several registries and tolerates staleness, which is the
//! caller's (orchestrator's) concern, not this type's.

use amcp_types::{AgentId, Capability, EndpointDirectory};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use std::collections::BTreeMap;
use std::time::Duration;
use tracing::debug;

/// One agent's registered location and advertised capabilities.
#[derive(Debug, Clone)]
pub struct CapabilityRecord {
    pub agent_id: AgentId,
    pub agent_type: String,
    pub capabilities: Vec<Capability>,
    /// How to reach the agent — typically the hosting context's id.
    pub endpoint: String,
    pub last_heartbeat: DateTime<Utc>,
    pub metadata: BTreeMap<String, String>,
}

impl CapabilityRecord {
    fn has(&self, capability: &Capability) -> bool {
        self.capabilities
            .iter()
            .any(|granted| amcp_types::capability::capability_matches(granted.as_str(), capability))
    }
}

/// Concurrent capability registry, keyed by `AgentId`.
pub struct CapabilityRegistry {
    records: DashMap<AgentId, CapabilityRecord>,
    heartbeat_ttl: Duration,
}

impl CapabilityRegistry {
    pub fn new(heartbeat_ttl: Duration) -> Self {
        Self {
            records: DashMap::new(),
            heartbeat_ttl,
        }
    }

    /// Register (or overwrite) an agent's capability record.
    pub fn register(
        &self,
        agent_id: AgentId,
        agent_type: String,
        capabilities: Vec<Capability>,
        endpoint: String,
        metadata: BTreeMap<String, String>,
    ) {
        debug!(agent = %agent_id, endpoint, "registering capability record");
        self.records.insert(
            agent_id.clone(),
            CapabilityRecord {
                agent_id,
                agent_type,
                capabilities,
                endpoint,
                last_heartbeat: Utc::now(),
                metadata,
            },
        );
    }

    /// Refresh an agent's liveness timestamp. No-op if the agent is not
    /// registered (e.g. heartbeat arriving after `unregister`).
    pub fn heartbeat(&self, agent_id: &AgentId) {
        if let Some(mut record) = self.records.get_mut(agent_id) {
            record.last_heartbeat = Utc::now();
        }
    }

    /// Remove an agent's record entirely.
    pub fn unregister(&self, agent_id: &AgentId) {
        self.records.remove(agent_id);
    }

    /// Agents advertising at least one capability matching `capability`
    /// (glob-aware, per [`amcp_types::capability::capability_matches`]).
    pub fn find_agents_by_capability(&self, capability: &Capability) -> Vec<AgentId> {
        self.records
            .iter()
            .filter(|entry| entry.value().has(capability))
            .map(|entry| entry.key().clone())
            .collect()
    }

    /// Agents advertising every capability in `capabilities`.
    pub fn find_agents_by_all_capabilities(&self, capabilities: &[Capability]) -> Vec<AgentId> {
        self.records
            .iter()
            .filter(|entry| capabilities.iter().all(|c| entry.value().has(c)))
            .map(|entry| entry.key().clone())
            .collect()
    }

    /// Current endpoint for an agent, if registered.
    pub fn endpoint_of(&self, agent_id: &AgentId) -> Option<String> {
        self.records.get(agent_id).map(|r| r.endpoint.clone())
    }

    /// Remove every record whose last heartbeat predates the configured
    /// TTL. Returns the number of records removed.
    pub fn cleanup(&self) -> usize {
        let now = Utc::now();
        let ttl = self.heartbeat_ttl;
        let stale: Vec<AgentId> = self
            .records
            .iter()
            .filter(|entry| {
                now.signed_duration_since(entry.value().last_heartbeat)
                    .to_std()
                    .map(|age| age > ttl)
                    .unwrap_or(false)
            })
            .map(|entry| entry.key().clone())
            .collect();
        for agent_id in &stale {
            self.records.remove(agent_id);
        }
        stale.len()
    }

    /// Number of currently registered agents.
    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

impl EndpointDirectory for CapabilityRegistry {
    fn update_endpoint(&self, agent_id: &AgentId, endpoint: &str) {
        if let Some(mut record) = self.records.get_mut(agent_id) {
            record.endpoint = endpoint.to_string();
            record.last_heartbeat = Utc::now();
        }
    }

    fn remove_endpoint(&self, agent_id: &AgentId, endpoint: &str) {
        if let Some(record) = self.records.get(agent_id) {
            if record.endpoint != endpoint {
                return;
            }
        } else {
            return;
        }
        self.records.remove(agent_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn capability(name: &str) -> Capability {
        Capability::new(name)
    }

    #[test]
    fn register_and_find_by_capability() {
        let registry = CapabilityRegistry::new(Duration::from_secs(90));
        let agent = AgentId::new("weather-agent");
        registry.register(
            agent.clone(),
            "weather-agent".to_string(),
            vec![capability("weather.lookup")],
            "ctx-1".to_string(),
            BTreeMap::new(),
        );
        let found = registry.find_agents_by_capability(&capability("weather.lookup"));
        assert_eq!(found, vec![agent]);
    }

    #[test]
    fn find_by_all_capabilities_requires_every_one() {
        let registry = CapabilityRegistry::new(Duration::from_secs(90));
        let agent = AgentId::new("multi-agent");
        registry.register(
            agent.clone(),
            "multi-agent".to_string(),
            vec![capability("weather.lookup"), capability("stock.lookup")],
            "ctx-1".to_string(),
            BTreeMap::new(),
        );
        let both = registry
            .find_agents_by_all_capabilities(&[capability("weather.lookup"), capability("stock.lookup")]);
        assert_eq!(both, vec![agent.clone()]);
        let missing = registry
            .find_agents_by_all_capabilities(&[capability("weather.lookup"), capability("travel.lookup")]);
        assert!(missing.is_empty());
    }

    #[test]
    fn cleanup_removes_stale_records() {
        let registry = CapabilityRegistry::new(Duration::from_millis(1));
        let agent = AgentId::new("stale-agent");
        registry.register(
            agent.clone(),
            "stale-agent".to_string(),
            vec![],
            "ctx-1".to_string(),
            BTreeMap::new(),
        );
        std::thread::sleep(Duration::from_millis(10));
        assert_eq!(registry.cleanup(), 1);
        assert!(registry.endpoint_of(&agent).is_none());
    }

    #[test]
    fn update_endpoint_is_the_migration_commit_point() {
        let registry = CapabilityRegistry::new(Duration::from_secs(90));
        let agent = AgentId::new("mobile-agent");
        registry.register(
            agent.clone(),
            "mobile-agent".to_string(),
            vec![],
            "ctx-source".to_string(),
            BTreeMap::new(),
        );
        assert_eq!(registry.endpoint_of(&agent), Some("ctx-source".to_string()));
        registry.update_endpoint(&agent, "ctx-dest");
        assert_eq!(registry.endpoint_of(&agent), Some("ctx-dest".to_string()));
    }
}
