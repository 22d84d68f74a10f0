//! Agent runtime & hosting context (spec §4.3).
//!
//! The context is the lifecycle authority and the only legitimate mutator
//! of agent state: `Agent` implementations never transition themselves,
//! they only respond to the callbacks the context invokes around each
//! transition.

use crate::capability_registry::CapabilityRegistry;
use crate::error::{KernelError, KernelResult};
use amcp_broker::{BrokerState, EventBroker, EventHandler, SubscriptionId};
use amcp_mobility::{AgentSnapshot, InstallOutcome, LocalAgentHost};
use amcp_types::{AgentId, AgentState, AmcpError, AmcpResult, Capability, DeliveryOptions, Event, Payload};
use async_trait::async_trait;
use dashmap::DashMap;
use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Mutex, RwLock};
use tracing::{debug, info, warn};

/// Metadata key a snapshot's source context stamps its own id under, so the
/// destination can pass it to `onAfterMigration(source)`.
const SOURCE_CONTEXT_METADATA_KEY: &str = "source_context";
/// Metadata key carrying a JSON-encoded list of events parked in the source
/// agent's migration buffer, when `preserve_pending_events` is requested.
const PENDING_EVENTS_METADATA_KEY: &str = "pending_events";

/// An agent implementation. Instantiated by an [`AgentFactory`]; all
/// lifecycle transitions are driven by the [`Context`], never by the
/// agent itself.
#[async_trait]
pub trait Agent: Send + Sync {
    /// Called while the agent is `Activating`. May install subscriptions
    /// by returning their patterns; the context installs them before the
    /// transition to `Active` completes. Failure rolls the agent back to
    /// `Inactive` with `ActivationFailed`.
    async fn on_activate(&self) -> AmcpResult<Vec<String>> {
        Ok(Vec::new())
    }

    /// Called while the agent is `Deactivating`, after in-flight events
    /// have drained.
    async fn on_deactivate(&self) -> AmcpResult<()> {
        Ok(())
    }

    /// Called on the source before a mobility hand-off serializes state.
    /// Any non-serializable resource (open connections) must be closed
    /// here.
    async fn on_before_migration(&self, _destination: &str) -> AmcpResult<()> {
        Ok(())
    }

    /// Called on the destination after a mobility hand-off restores
    /// state, before the acknowledgement is sent to the source.
    async fn on_after_migration(&self, _source: &str) -> AmcpResult<()> {
        Ok(())
    }

    /// Handle one delivered event. Only ever invoked while the agent is
    /// `Active`.
    async fn handle_event(&self, event: Event) -> Result<(), String>;

    /// Capabilities this agent advertises to the registry on activation.
    fn capabilities(&self) -> Vec<Capability> {
        Vec::new()
    }

    /// Opaque application state, serialized for mobility. Agents with no
    /// mobile state (the common case for this context's own lifetime)
    /// can leave this empty.
    fn user_state(&self) -> Vec<u8> {
        Vec::new()
    }

    /// Whether the context may invoke `handle_event` concurrently for
    /// this agent. Default is `false`: handlers run serially, freeing
    /// the implementation from internal locking.
    fn concurrent_safe(&self) -> bool {
        false
    }
}

/// Builds an [`Agent`] instance for a given agent type.
#[async_trait]
pub trait AgentFactory: Send + Sync {
    async fn create(&self, init_data: Payload) -> AmcpResult<Arc<dyn Agent>>;

    /// Recreate an instance from bytes previously produced by
    /// [`Agent::user_state`], the restore counterpart mobility hand-off
    /// needs to turn a snapshot back into a live agent (spec §9,
    /// "require each agent type to provide explicit serialize/deserialize
    /// operations"). Default delegates to `create` with an empty payload,
    /// which is correct for agent types that keep no mobile state (the
    /// same types that leave `Agent::user_state` at its empty default);
    /// any type with real mobile state must override this to decode
    /// `snapshot_state` instead of starting fresh.
    async fn restore(&self, snapshot_state: &[u8]) -> AmcpResult<Arc<dyn Agent>> {
        let _ = snapshot_state;
        self.create(Payload::Bytes(Vec::new())).await
    }
}

const MIGRATION_BUFFER_CAPACITY: usize = 256;

struct AgentSlot {
    agent: Arc<dyn Agent>,
    agent_type: String,
    state: RwLock<AgentState>,
    /// Live subscriptions owned on this agent's behalf, paired with the
    /// pattern string each was registered with — mobility snapshots read
    /// the patterns back out of here rather than re-deriving them.
    subscriptions: Mutex<Vec<(SubscriptionId, String)>>,
    /// Serializes lifecycle callbacks and (for non-concurrent-safe agents)
    /// handler invocations, per spec §4.3's "never observes overlapping
    /// callbacks" guarantee.
    invocation_lock: Mutex<()>,
    /// Events parked while the agent is `Migrating`, forwarded to the
    /// destination on successful hand-off or spilled back to the broker
    /// for redelivery otherwise.
    migration_buffer: Mutex<VecDeque<Event>>,
}

/// Bridges the broker's [`EventHandler`] contract to per-agent lifecycle
/// enforcement: handlers only ever run while the agent is `Active`.
struct AgentDispatcher {
    slot: Arc<AgentSlot>,
}

#[async_trait]
impl EventHandler for AgentDispatcher {
    async fn handle(&self, event: Event) -> Result<(), String> {
        let state = *self.slot.state.read().await;
        match state {
            AgentState::Active => {
                if self.slot.agent.concurrent_safe() {
                    self.slot.agent.handle_event(event).await
                } else {
                    let _guard = self.slot.invocation_lock.lock().await;
                    self.slot.agent.handle_event(event).await
                }
            }
            AgentState::Migrating => {
                let mut buffer = self.slot.migration_buffer.lock().await;
                if buffer.len() >= MIGRATION_BUFFER_CAPACITY {
                    // Buffer full: fail so the broker redelivers per its
                    // own at-least-once policy rather than silently
                    // dropping the event.
                    return Err("migration buffer full, spilling back to broker".to_string());
                }
                buffer.push_back(event);
                Ok(())
            }
            other => Err(format!("agent not active (state: {other})")),
        }
    }
}

/// A hosting environment for agents: the lifecycle authority, owner of
/// the agent registry, and the context's view onto the broker and
/// capability registry.
pub struct Context {
    pub context_id: String,
    agents: DashMap<AgentId, Arc<AgentSlot>>,
    factories: DashMap<String, Arc<dyn AgentFactory>>,
    broker: Arc<EventBroker>,
    registry: Arc<CapabilityRegistry>,
    properties: DashMap<String, String>,
    shutdown_tx: watch::Sender<bool>,
    shutdown_rx: watch::Receiver<bool>,
    deactivation_grace_period: Duration,
}

impl Context {
    pub fn new(context_id: impl Into<String>, broker: Arc<EventBroker>, registry: Arc<CapabilityRegistry>) -> Self {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        Self {
            context_id: context_id.into(),
            agents: DashMap::new(),
            factories: DashMap::new(),
            broker,
            registry,
            properties: DashMap::new(),
            shutdown_tx,
            shutdown_rx,
            deactivation_grace_period: Duration::from_secs(5),
        }
    }

    pub fn set_property(&self, key: impl Into<String>, value: impl Into<String>) {
        self.properties.insert(key.into(), value.into());
    }

    pub fn property(&self, key: &str) -> Option<String> {
        self.properties.get(key).map(|v| v.clone())
    }

    /// Register a factory for `agent_type`; `create_agent` consults this
    /// registry and fails with `UnknownAgentType` for unregistered types.
    pub fn register_factory(&self, agent_type: impl Into<String>, factory: Arc<dyn AgentFactory>) {
        self.factories.insert(agent_type.into(), factory);
    }

    /// A watch receiver that fires once `shutdown()` begins.
    pub fn shutdown_signal(&self) -> watch::Receiver<bool> {
        self.shutdown_rx.clone()
    }

    pub fn registry(&self) -> &Arc<CapabilityRegistry> {
        &self.registry
    }

    pub fn broker(&self) -> &Arc<EventBroker> {
        &self.broker
    }

    /// Allocate an AgentID and instantiate via the factory for `agent_type`.
    pub async fn create_agent(&self, agent_type: &str, init_data: Payload) -> KernelResult<AgentId> {
        let factory = self
            .factories
            .get(agent_type)
            .ok_or_else(|| KernelError::Core(AmcpError::UnknownAgentType(agent_type.to_string())))?
            .clone();
        let agent = factory.create(init_data).await.map_err(KernelError::Core)?;
        let agent_id = AgentId::new(agent_type);
        let slot = Arc::new(AgentSlot {
            agent,
            agent_type: agent_type.to_string(),
            state: RwLock::new(AgentState::Inactive),
            subscriptions: Mutex::new(Vec::new()),
            invocation_lock: Mutex::new(()),
            migration_buffer: Mutex::new(VecDeque::new()),
        });
        self.agents.insert(agent_id.clone(), slot);
        info!(agent = %agent_id, agent_type, "agent created");
        Ok(agent_id)
    }

    fn slot(&self, agent_id: &AgentId) -> KernelResult<Arc<AgentSlot>> {
        self.agents
            .get(agent_id)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| KernelError::Core(AmcpError::NotFound(format!("agent {agent_id}"))))
    }

    /// `Inactive -> Activating -> Active`. Rolls back to `Inactive` and
    /// reports `ActivationFailed` if `on_activate` fails.
    pub async fn activate(&self, agent_id: &AgentId) -> KernelResult<()> {
        let slot = self.slot(agent_id)?;
        let _guard = slot.invocation_lock.lock().await;
        self.transition(&slot, AgentState::Activating, "activate").await?;

        match slot.agent.on_activate().await {
            Ok(patterns) => {
                let mut installed = slot.subscriptions.lock().await;
                for pattern in patterns {
                    let handler = Arc::new(AgentDispatcher { slot: slot.clone() });
                    match self
                        .broker
                        .subscribe(&pattern, agent_id.clone(), handler, DeliveryOptions::default())
                    {
                        Ok(subscription) => installed.push((subscription.id, pattern)),
                        Err(e) => warn!(agent = %agent_id, pattern, error = %e, "failed to install subscription"),
                    }
                }
                drop(installed);
                *slot.state.write().await = AgentState::Active;
                info!(agent = %agent_id, "agent activated");
                self.registry.register(
                    agent_id.clone(),
                    slot.agent_type.clone(),
                    slot.agent.capabilities(),
                    self.context_id.clone(),
                    BTreeMap::new(),
                );
                Ok(())
            }
            Err(e) => {
                *slot.state.write().await = AgentState::Inactive;
                warn!(agent = %agent_id, error = %e, "activation failed, rolled back");
                Err(KernelError::Core(AmcpError::ActivationFailed(e.to_string())))
            }
        }
    }

    /// `Active -> Deactivating -> Inactive`.
    pub async fn deactivate(&self, agent_id: &AgentId) -> KernelResult<()> {
        let slot = self.slot(agent_id)?;
        let _guard = slot.invocation_lock.lock().await;
        self.transition(&slot, AgentState::Deactivating, "deactivate").await?;

        // Grace period for in-flight handlers to drain; the broker's own
        // dispatcher loop is what's actually running them, so this is a
        // best-effort pause rather than a hard join.
        tokio::time::sleep(self.deactivation_grace_period.min(Duration::from_millis(50))).await;

        let result = slot.agent.on_deactivate().await;
        let mut installed = slot.subscriptions.lock().await;
        for (subscription_id, _pattern) in installed.drain(..) {
            self.broker.unsubscribe(subscription_id);
        }
        drop(installed);
        self.registry.unregister(agent_id);
        *slot.state.write().await = AgentState::Inactive;
        info!(agent = %agent_id, "agent deactivated");
        result.map_err(KernelError::Core)
    }

    /// Deactivates if needed, then transitions to the terminal `Destroyed`.
    pub async fn destroy(&self, agent_id: &AgentId) -> KernelResult<()> {
        let current = *self.slot(agent_id)?.state.read().await;
        if current == AgentState::Active {
            self.deactivate(agent_id).await?;
        }
        let slot = self.slot(agent_id)?;
        self.transition(&slot, AgentState::Destroyed, "destroy").await?;
        self.agents.remove(agent_id);
        info!(agent = %agent_id, "agent destroyed");
        Ok(())
    }

    /// Current lifecycle state of an agent.
    pub async fn state_of(&self, agent_id: &AgentId) -> KernelResult<AgentState> {
        Ok(*self.slot(agent_id)?.state.read().await)
    }

    /// Stamp `sender` if absent, then forward to the broker.
    pub async fn publish(&self, mut event: Event, sender: Option<AgentId>) -> AmcpResult<()> {
        if event.sender.is_none() {
            event.sender = sender;
        }
        self.broker.publish(event).await
    }

    /// Create a subscription on behalf of `agent_id`, owned by the context.
    pub async fn subscribe(
        &self,
        agent_id: &AgentId,
        pattern: &str,
        options: DeliveryOptions,
    ) -> KernelResult<SubscriptionId> {
        let slot = self.slot(agent_id)?;
        let handler = Arc::new(AgentDispatcher { slot: slot.clone() });
        let subscription = self
            .broker
            .subscribe(pattern, agent_id.clone(), handler, options)
            .map_err(KernelError::Core)?;
        slot.subscriptions.lock().await.push((subscription.id, pattern.to_string()));
        Ok(subscription.id)
    }

    async fn transition(&self, slot: &AgentSlot, next: AgentState, operation: &str) -> KernelResult<()> {
        let mut state = slot.state.write().await;
        if !state.can_transition_to(next) {
            return Err(KernelError::Core(AmcpError::LifecycleViolation {
                operation: operation.to_string(),
                state: state.to_string(),
            }));
        }
        *state = next;
        Ok(())
    }

    /// Global cancellation: closes ingress, drains handlers with a grace
    /// period, then deactivates every resident agent.
    pub async fn shutdown(&self) {
        info!(context = %self.context_id, "context shutdown initiated");
        let _ = self.shutdown_tx.send(true);
        self.broker.stop().await;

        let agent_ids: Vec<AgentId> = self.agents.iter().map(|entry| entry.key().clone()).collect();
        for agent_id in agent_ids {
            if let Ok(AgentState::Active) = self.state_of(&agent_id).await {
                if let Err(e) = self.deactivate(&agent_id).await {
                    warn!(agent = %agent_id, error = %e, "error deactivating agent during shutdown");
                }
            }
        }
        debug!(context = %self.context_id, "context shutdown complete");
    }

    pub fn is_shutting_down(&self) -> bool {
        *self.shutdown_rx.borrow()
    }

    /// Forwards the broker's own lifecycle/health state for health endpoints.
    pub async fn broker_state(&self) -> BrokerState {
        self.broker.state().await
    }
}

/// Bridges this context into the strong-mobility protocol (spec §4.4):
/// snapshotting quiesces the agent in place via the same lifecycle
/// transitions `activate`/`deactivate` use, and installing recreates it
/// through the same per-type factory `create_agent` consults.
#[async_trait]
impl LocalAgentHost for Context {
    async fn snapshot_for_migration(
        &self,
        agent_id: &AgentId,
        destination: &str,
        preserve_pending_events: bool,
    ) -> AmcpResult<AgentSnapshot> {
        let slot = self.slot(agent_id)?;
        let _guard = slot.invocation_lock.lock().await;
        self.transition(&slot, AgentState::Migrating, "migrate").await?;

        if let Err(e) = slot.agent.on_before_migration(destination).await {
            // Roll the transition back so the agent stays usable; the
            // caller's mobility manager treats this the same as a
            // transport-level refusal.
            *slot.state.write().await = AgentState::Active;
            return Err(e);
        }

        let subscriptions: BTreeSet<String> = slot
            .subscriptions
            .lock()
            .await
            .iter()
            .map(|(_, pattern)| pattern.clone())
            .collect();
        let capabilities: BTreeSet<String> = slot.agent.capabilities().iter().map(|c| c.as_str().to_string()).collect();
        let user_state = slot.agent.user_state();

        let mut snapshot = AgentSnapshot::new(
            agent_id.clone(),
            slot.agent_type.clone(),
            user_state,
            subscriptions,
            capabilities,
            Vec::new(),
        );
        snapshot.metadata.insert(SOURCE_CONTEXT_METADATA_KEY.to_string(), self.context_id.clone());

        if preserve_pending_events {
            let buffered = slot.migration_buffer.lock().await;
            if !buffered.is_empty() {
                if let Ok(encoded) = serde_json::to_string(&buffered.iter().collect::<Vec<_>>()) {
                    snapshot.metadata.insert(PENDING_EVENTS_METADATA_KEY.to_string(), encoded);
                }
            }
        }

        Ok(snapshot)
    }

    async fn snapshot_for_clone(&self, agent_id: &AgentId) -> AmcpResult<AgentSnapshot> {
        let slot = self.slot(agent_id)?;
        let subscriptions: BTreeSet<String> = slot
            .subscriptions
            .lock()
            .await
            .iter()
            .map(|(_, pattern)| pattern.clone())
            .collect();
        let capabilities: BTreeSet<String> = slot.agent.capabilities().iter().map(|c| c.as_str().to_string()).collect();
        let user_state = slot.agent.user_state();
        Ok(AgentSnapshot::new(
            agent_id.clone(),
            slot.agent_type.clone(),
            user_state,
            subscriptions,
            capabilities,
            Vec::new(),
        ))
    }

    async fn install_snapshot(&self, snapshot: AgentSnapshot) -> AmcpResult<InstallOutcome> {
        if self.agents.contains_key(&snapshot.agent_id) {
            return Ok(InstallOutcome::AlreadyInstalled(snapshot.agent_id));
        }
        let factory = self
            .factories
            .get(&snapshot.agent_type)
            .ok_or_else(|| AmcpError::UnknownAgentType(snapshot.agent_type.clone()))?
            .clone();
        let agent = factory.restore(&snapshot.user_state).await?;
        let agent_id = snapshot.agent_id.clone();
        let slot = Arc::new(AgentSlot {
            agent,
            agent_type: snapshot.agent_type.clone(),
            state: RwLock::new(AgentState::Inactive),
            subscriptions: Mutex::new(Vec::new()),
            invocation_lock: Mutex::new(()),
            migration_buffer: Mutex::new(VecDeque::new()),
        });
        self.agents.insert(agent_id.clone(), slot.clone());

        let _guard = slot.invocation_lock.lock().await;
        self.transition(&slot, AgentState::Activating, "install").await?;
        {
            let mut installed = slot.subscriptions.lock().await;
            for pattern in &snapshot.subscriptions {
                let handler = Arc::new(AgentDispatcher { slot: slot.clone() });
                match self
                    .broker
                    .subscribe(pattern, agent_id.clone(), handler, DeliveryOptions::default())
                {
                    Ok(subscription) => installed.push((subscription.id, pattern.clone())),
                    Err(e) => warn!(agent = %agent_id, pattern, error = %e, "failed to install restored subscription"),
                }
            }
        }
        *slot.state.write().await = AgentState::Active;
        self.registry.register(
            agent_id.clone(),
            snapshot.agent_type.clone(),
            slot.agent.capabilities(),
            self.context_id.clone(),
            BTreeMap::new(),
        );
        info!(agent = %agent_id, "agent installed from snapshot");

        let source = snapshot.metadata.get(SOURCE_CONTEXT_METADATA_KEY).cloned().unwrap_or_default();
        slot.agent.on_after_migration(&source).await?;

        if let Some(encoded) = snapshot.metadata.get(PENDING_EVENTS_METADATA_KEY) {
            if let Ok(events) = serde_json::from_str::<Vec<Event>>(encoded) {
                for event in events {
                    if let Err(e) = self.broker.publish(event).await {
                        warn!(agent = %agent_id, error = %e, "failed to redeliver a parked event after install");
                    }
                }
            }
        }

        Ok(InstallOutcome::Installed(agent_id))
    }

    async fn resume_after_failed_migration(&self, agent_id: &AgentId) -> AmcpResult<()> {
        let slot = self.slot(agent_id)?;
        let _guard = slot.invocation_lock.lock().await;
        self.transition(&slot, AgentState::Active, "resume after failed migration").await?;

        let mut buffered = slot.migration_buffer.lock().await;
        let parked: Vec<Event> = buffered.drain(..).collect();
        drop(buffered);
        for event in parked {
            if let Err(e) = slot.agent.handle_event(event).await {
                warn!(agent = %agent_id, error = %e, "error redelivering parked event after migration resume");
            }
        }
        info!(agent = %agent_id, "agent resumed after failed migration");
        Ok(())
    }

    async fn destroy_local(&self, agent_id: &AgentId) -> AmcpResult<()> {
        let slot = self.slot(agent_id)?;
        {
            let _guard = slot.invocation_lock.lock().await;
            self.transition(&slot, AgentState::Destroyed, "destroy local (mobility)").await?;
            let mut installed = slot.subscriptions.lock().await;
            for (subscription_id, _pattern) in installed.drain(..) {
                self.broker.unsubscribe(subscription_id);
            }
        }
        self.registry.unregister(agent_id);
        self.agents.remove(agent_id);
        info!(agent = %agent_id, "agent destroyed locally after dispatch");
        Ok(())
    }

    fn local_endpoint(&self) -> String {
        self.context_id.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use amcp_broker::BrokerConfig;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct EchoAgent {
        activated: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl Agent for EchoAgent {
        async fn on_activate(&self) -> AmcpResult<Vec<String>> {
            self.activated.fetch_add(1, Ordering::SeqCst);
            Ok(vec!["echo.request".to_string()])
        }

        async fn handle_event(&self, _event: Event) -> Result<(), String> {
            Ok(())
        }

        fn capabilities(&self) -> Vec<Capability> {
            vec![Capability::new("echo")]
        }
    }

    struct EchoFactory {
        activated: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl AgentFactory for EchoFactory {
        async fn create(&self, _init_data: Payload) -> AmcpResult<Arc<dyn Agent>> {
            Ok(Arc::new(EchoAgent {
                activated: self.activated.clone(),
            }))
        }
    }

    fn test_context() -> Context {
        let broker = Arc::new(EventBroker::new(BrokerConfig::default()));
        let registry = Arc::new(CapabilityRegistry::new(Duration::from_secs(90)));
        Context::new("ctx-test", broker, registry)
    }

    #[tokio::test]
    async fn create_with_unknown_type_fails() {
        let ctx = test_context();
        let result = ctx.create_agent("nonexistent", Payload::Scalar(serde_json::Value::Null)).await;
        assert!(matches!(result, Err(KernelError::Core(AmcpError::UnknownAgentType(_)))));
    }

    #[tokio::test]
    async fn full_lifecycle_round_trip() {
        let ctx = test_context();
        let activated = Arc::new(AtomicUsize::new(0));
        ctx.register_factory("echo", Arc::new(EchoFactory { activated: activated.clone() }));

        let agent_id = ctx.create_agent("echo", Payload::Scalar(serde_json::Value::Null)).await.unwrap();
        assert_eq!(ctx.state_of(&agent_id).await.unwrap(), AgentState::Inactive);

        ctx.activate(&agent_id).await.unwrap();
        assert_eq!(ctx.state_of(&agent_id).await.unwrap(), AgentState::Active);
        assert_eq!(activated.load(Ordering::SeqCst), 1);
        assert_eq!(ctx.registry().find_agents_by_capability(&Capability::new("echo")), vec![agent_id.clone()]);

        ctx.deactivate(&agent_id).await.unwrap();
        assert_eq!(ctx.state_of(&agent_id).await.unwrap(), AgentState::Inactive);
        assert!(ctx.registry().find_agents_by_capability(&Capability::new("echo")).is_empty());

        ctx.destroy(&agent_id).await.unwrap();
        assert!(ctx.state_of(&agent_id).await.is_err());
    }

    #[tokio::test]
    async fn double_activate_is_a_lifecycle_violation() {
        let ctx = test_context();
        ctx.register_factory("echo", Arc::new(EchoFactory { activated: Arc::new(AtomicUsize::new(0)) }));
        let agent_id = ctx.create_agent("echo", Payload::Scalar(serde_json::Value::Null)).await.unwrap();
        ctx.activate(&agent_id).await.unwrap();
        let result = ctx.activate(&agent_id).await;
        assert!(matches!(result, Err(KernelError::Core(AmcpError::LifecycleViolation { .. }))));
    }

    // --- Strong mobility: dispatch round-trip (spec §8 serialization
    // round-trip property, E2E scenario 3) -------------------------------

    use amcp_mobility::{InstallRequest, InstallResponse, MobilityManager, RemoteContext};
    use std::sync::atomic::AtomicU64;

    struct CounterAgent {
        n: AtomicU64,
        handled: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl Agent for CounterAgent {
        async fn on_activate(&self) -> AmcpResult<Vec<String>> {
            Ok(vec!["counter.bump".to_string()])
        }

        async fn handle_event(&self, _event: Event) -> Result<(), String> {
            self.n.fetch_add(1, Ordering::SeqCst);
            self.handled.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        fn capabilities(&self) -> Vec<Capability> {
            vec![Capability::new("counter.count")]
        }

        fn user_state(&self) -> Vec<u8> {
            self.n.load(Ordering::SeqCst).to_le_bytes().to_vec()
        }
    }

    struct CounterFactory {
        handled: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl AgentFactory for CounterFactory {
        async fn create(&self, init_data: Payload) -> AmcpResult<Arc<dyn Agent>> {
            let n = init_data.get("n").and_then(|v| v.as_u64()).unwrap_or(0);
            Ok(Arc::new(CounterAgent { n: AtomicU64::new(n), handled: self.handled.clone() }))
        }

        async fn restore(&self, snapshot_state: &[u8]) -> AmcpResult<Arc<dyn Agent>> {
            let n = <[u8; 8]>::try_from(snapshot_state)
                .map(u64::from_le_bytes)
                .map_err(|_| AmcpError::Serialization("counter snapshot: expected 8 bytes".to_string()))?;
            Ok(Arc::new(CounterAgent { n: AtomicU64::new(n), handled: self.handled.clone() }))
        }
    }

    /// Bridges one context's `MobilityManager` as the `RemoteContext` seen
    /// by another, the same loopback shape `amcp-mobility`'s own tests use.
    struct ContextBridge {
        manager: Arc<MobilityManager>,
        context_id: String,
    }

    #[async_trait]
    impl RemoteContext for ContextBridge {
        async fn install(&self, request: InstallRequest) -> Result<InstallResponse, String> {
            Ok(self.manager.accept_install(request).await)
        }
        async fn recall(&self, _agent_id: &AgentId, _to_context: &str) -> Result<(), String> {
            Ok(())
        }
        fn context_id(&self) -> &str {
            &self.context_id
        }
    }

    #[tokio::test]
    async fn dispatch_moves_agent_state_and_commits_registry_to_destination() {
        let registry_a = Arc::new(CapabilityRegistry::new(Duration::from_secs(90)));
        let ctx_a = Arc::new(Context::new(
            "C1",
            Arc::new(EventBroker::new(BrokerConfig::default())),
            registry_a.clone(),
        ));
        let registry_b = Arc::new(CapabilityRegistry::new(Duration::from_secs(90)));
        let ctx_b = Arc::new(Context::new(
            "C2",
            Arc::new(EventBroker::new(BrokerConfig::default())),
            registry_b.clone(),
        ));

        let handled = Arc::new(AtomicUsize::new(0));
        ctx_a.register_factory("counter", Arc::new(CounterFactory { handled: handled.clone() }));
        ctx_b.register_factory("counter", Arc::new(CounterFactory { handled: handled.clone() }));

        let agent_id = ctx_a
            .create_agent("counter", Payload::map([("n".to_string(), serde_json::json!(5))]))
            .await
            .unwrap();
        ctx_a.activate(&agent_id).await.unwrap();
        assert_eq!(ctx_a.state_of(&agent_id).await.unwrap(), AgentState::Active);

        let manager_a = Arc::new(MobilityManager::new(ctx_a.clone(), registry_a.clone(), "test-secret"));
        let manager_b = Arc::new(MobilityManager::new(ctx_b.clone(), registry_b.clone(), "test-secret"));
        manager_a.remotes().register(Arc::new(ContextBridge { manager: manager_b.clone(), context_id: "C2".to_string() }));

        manager_a.dispatch(&agent_id, "C2").await.unwrap();

        // Destroyed on the source.
        assert!(ctx_a.state_of(&agent_id).await.is_err());
        assert!(registry_a.find_agents_by_capability(&Capability::new("counter.count")).is_empty());

        // Reborn ACTIVE on the destination with the same state.
        assert_eq!(ctx_b.state_of(&agent_id).await.unwrap(), AgentState::Active);
        assert_eq!(
            registry_b.find_agents_by_capability(&Capability::new("counter.count")),
            vec![agent_id.clone()]
        );

        // The topic the agent was subscribed to on C1 is handled by the
        // instance now running on C2.
        ctx_b
            .publish(Event::new(amcp_types::Topic::parse("counter.bump").unwrap(), Payload::Scalar(serde_json::Value::Null), None), None)
            .await
            .unwrap();
        for _ in 0..50 {
            if handled.load(Ordering::SeqCst) >= 1 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(handled.load(Ordering::SeqCst), 1);

        // The restored instance's state round-tripped through the snapshot
        // byte-for-byte: {n: 5} survived the hop.
        let post_migration_snapshot = ctx_b.snapshot_for_clone(&agent_id).await.unwrap();
        assert_eq!(post_migration_snapshot.user_state, 6u64.to_le_bytes().to_vec());
    }

    #[tokio::test]
    async fn dispatch_refused_by_destination_resumes_source_agent() {
        let registry_a = Arc::new(CapabilityRegistry::new(Duration::from_secs(90)));
        let ctx_a = Arc::new(Context::new(
            "C1",
            Arc::new(EventBroker::new(BrokerConfig::default())),
            registry_a.clone(),
        ));
        let handled = Arc::new(AtomicUsize::new(0));
        ctx_a.register_factory("counter", Arc::new(CounterFactory { handled }));

        let agent_id = ctx_a
            .create_agent("counter", Payload::map([("n".to_string(), serde_json::json!(1))]))
            .await
            .unwrap();
        ctx_a.activate(&agent_id).await.unwrap();

        struct AlwaysRefuse;
        #[async_trait]
        impl RemoteContext for AlwaysRefuse {
            async fn install(&self, _request: InstallRequest) -> Result<InstallResponse, String> {
                Ok(InstallResponse::Refused { reason: "unknown agent type".to_string() })
            }
            async fn recall(&self, _agent_id: &AgentId, _to_context: &str) -> Result<(), String> {
                Ok(())
            }
            fn context_id(&self) -> &str {
                "C2"
            }
        }

        let manager_a = Arc::new(MobilityManager::new(ctx_a.clone(), registry_a.clone(), "test-secret"));
        manager_a.remotes().register(Arc::new(AlwaysRefuse));

        let result = manager_a.dispatch(&agent_id, "C2").await;
        assert!(result.is_err());
        assert_eq!(ctx_a.state_of(&agent_id).await.unwrap(), AgentState::Active);
        assert_eq!(
            registry_a.find_agents_by_capability(&Capability::new("counter.count")),
            vec![agent_id]
        );
    }
}
