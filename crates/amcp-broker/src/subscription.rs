//! Subscriptions — a (pattern, subscriber, options) registration (spec §3).
//!
//! Subscriptions are logically owned by the context on behalf of an agent;
//! the broker only holds the registry that routing consults. `amcp-kernel`
//! creates these through `EventBroker::subscribe` and is responsible for
//! tearing them down on deactivate/migrate/destroy.

use amcp_types::{AgentId, DeliveryOptions, Event};
use async_trait::async_trait;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use uuid::Uuid;

/// Unique identifier for a live subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(pub Uuid);

impl SubscriptionId {
    fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The agent-side entry point a subscription delivers events to.
///
/// Implemented by `amcp-kernel`'s per-agent dispatcher; the broker only
/// ever calls `handle`, never reaches into agent internals.
#[async_trait]
pub trait EventHandler: Send + Sync {
    /// Deliver one event. Errors are retried per the subscription's
    /// reliability (`at-least-once`) or dropped (`best-effort`).
    async fn handle(&self, event: Event) -> Result<(), String>;
}

/// A live subscription: pattern, subscriber, and per-subscription delivery
/// overrides.
pub struct Subscription {
    /// Identity of this subscription, returned from `subscribe` so the
    /// caller can later `unsubscribe`.
    pub id: SubscriptionId,
    /// The raw pattern string this subscription was registered with —
    /// kept alongside the parsed `TopicPattern` so idempotent re-subscribe
    /// can compare by the string the caller supplied.
    pub pattern: String,
    /// Owning agent.
    pub agent_id: AgentId,
    /// Per-subscription delivery overrides.
    pub options: DeliveryOptions,
    /// Monotonic per-subscription sequence counter, used to detect gaps
    /// and preserve publish order within a single publisher.
    pub(crate) sequence: AtomicU64,
}

impl Subscription {
    pub(crate) fn new(pattern: String, agent_id: AgentId, options: DeliveryOptions) -> Self {
        Self {
            id: SubscriptionId::new(),
            pattern,
            agent_id,
            options,
            sequence: AtomicU64::new(0),
        }
    }

    pub(crate) fn next_sequence(&self) -> u64 {
        self.sequence.fetch_add(1, Ordering::SeqCst)
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("id", &self.id)
            .field("pattern", &self.pattern)
            .field("agent_id", &self.agent_id)
            .field("options", &self.options)
            .finish()
    }
}
