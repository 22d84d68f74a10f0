//! The remote side of a hand-off, and the directory of known destinations.
//!
//! Concrete transport (TCP, a message queue, an in-process loopback for
//! single-binary deployments) lives outside this crate; `RemoteContext` is
//! the only thing `MobilityManager` depends on, mirroring how the broker
//! depends only on its own `Transport` trait rather than a concrete
//! adapter.

use crate::protocol::{InstallRequest, InstallResponse};
use amcp_types::AgentId;
use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::Arc;

/// A destination context's install endpoint, as seen by the mobility
/// manager on the source side.
#[async_trait]
pub trait RemoteContext: Send + Sync {
    /// Hand a signed install request to the destination and await its
    /// decision. Never panics; failures are represented as
    /// [`InstallResponse::Refused`] or an `Err` for transport-level
    /// failure (network partition, timeout).
    async fn install(&self, request: InstallRequest) -> Result<InstallResponse, String>;

    /// Ask this context to dispatch `agent_id` back to `to_context`. Used
    /// by `retract`: this call only confirms the source accepted the
    /// recall request, not that the hand-off completed — the actual
    /// install arrives later as an ordinary `InstallRequest` addressed to
    /// `to_context`.
    async fn recall(&self, agent_id: &AgentId, to_context: &str) -> Result<(), String>;

    /// Human-readable identity of this destination, used as the
    /// capability registry endpoint once an install commits.
    fn context_id(&self) -> &str;
}

/// Tracks the `RemoteContext` handles the mobility manager can dispatch
/// to, keyed by destination context id.
#[derive(Clone)]
pub struct RemoteContextDirectory {
    contexts: Arc<DashMap<String, Arc<dyn RemoteContext>>>,
}

impl RemoteContextDirectory {
    pub fn new() -> Self {
        Self {
            contexts: Arc::new(DashMap::new()),
        }
    }

    pub fn register(&self, context: Arc<dyn RemoteContext>) {
        self.contexts.insert(context.context_id().to_string(), context);
    }

    pub fn unregister(&self, context_id: &str) {
        self.contexts.remove(context_id);
    }

    pub fn get(&self, context_id: &str) -> Option<Arc<dyn RemoteContext>> {
        self.contexts.get(context_id).map(|entry| entry.value().clone())
    }

    pub fn known_contexts(&self) -> Vec<String> {
        self.contexts.iter().map(|entry| entry.key().clone()).collect()
    }
}

impl Default for RemoteContextDirectory {
    fn default() -> Self {
        Self::new()
    }
}
