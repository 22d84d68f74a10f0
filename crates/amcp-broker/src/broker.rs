//! The event broker: subscription registry, routing, ordering,
//! acknowledgement, back-pressure, and dead-lettering (spec §4.2).

use crate::matcher;
use crate::subscription::{EventHandler, Subscription, SubscriptionId};
use crate::transport::{CircuitBreaker, CircuitBreakerConfig, InMemoryTransport, Transport};
use amcp_types::{AmcpError, AmcpResult, DeliveryOptions, Event, Payload, Reliability, Topic, TopicPattern};
use dashmap::DashMap;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, Notify, RwLock};
use tracing::{debug, warn};

/// What happens to a new event when a subscription's bounded queue is full.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackpressurePolicy {
    /// Evict the oldest queued event to make room.
    DropOldest,
    /// Refuse the new event, keeping the queue as it is.
    DropNewest,
    /// Hold the publisher's await until a slot frees up.
    BlockPublisher,
}

impl BackpressurePolicy {
    /// Per spec §4.2: `drop-oldest` for `best-effort`, `block-publisher`
    /// for `at-least-once`, unless overridden by configuration.
    fn default_for(reliability: Reliability) -> Self {
        match reliability {
            Reliability::BestEffort => BackpressurePolicy::DropOldest,
            Reliability::AtLeastOnce => BackpressurePolicy::BlockPublisher,
        }
    }
}

/// Broker-wide tunables, corresponding to the `broker.*` configuration
/// surface in spec §6.3.
#[derive(Debug, Clone)]
pub struct BrokerConfig {
    /// Bounded per-subscription queue capacity.
    pub queue_capacity: usize,
    /// Overrides the reliability-derived default backpressure policy for
    /// every subscription.
    pub backpressure_override: Option<BackpressurePolicy>,
    /// Maximum redelivery attempts for `at-least-once` before dead-lettering.
    pub retry_max: u32,
    /// Base delay for exponential redelivery backoff.
    pub retry_base_delay: Duration,
    /// Grace period `stop()` waits for in-flight deliveries to drain.
    pub stop_grace_period: Duration,
    pub circuit_breaker: CircuitBreakerConfig,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            queue_capacity: 256,
            backpressure_override: None,
            retry_max: 5,
            retry_base_delay: Duration::from_millis(100),
            stop_grace_period: Duration::from_secs(5),
            circuit_breaker: CircuitBreakerConfig::default(),
        }
    }
}

/// Broker lifecycle / health state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BrokerState {
    /// Accepting publishes and subscriptions.
    Running,
    /// Transport is unhealthy; publishes fail until a health probe recovers.
    Degraded,
    /// Stopped; publishes fail with `BrokerClosed`.
    Stopped,
}

struct SubQueue {
    events: Mutex<VecDeque<Event>>,
    notify: Notify,
    capacity: usize,
    active: AtomicBool,
}

impl SubQueue {
    fn new(capacity: usize) -> Self {
        Self {
            events: Mutex::new(VecDeque::with_capacity(capacity.min(64))),
            notify: Notify::new(),
            capacity,
            active: AtomicBool::new(true),
        }
    }
}

/// The central pub/sub broker.
///
/// Owns the subscription registry exclusively: the only ways to mutate it
/// are `subscribe`/`unsubscribe`, matching the shared-resource discipline
/// in spec §5.
pub struct EventBroker {
    subscriptions: Arc<DashMap<SubscriptionId, Arc<Subscription>>>,
    queues: Arc<DashMap<SubscriptionId, Arc<SubQueue>>>,
    handlers: Arc<DashMap<SubscriptionId, Arc<dyn EventHandler>>>,
    dispatchers: DashMap<SubscriptionId, tokio::task::JoinHandle<()>>,
    state: RwLock<BrokerState>,
    config: BrokerConfig,
    transport: Arc<dyn Transport>,
    circuit: Arc<CircuitBreaker>,
}

impl EventBroker {
    /// Build a broker over the in-memory transport (the default; spec
    /// `broker.type = "memory"`).
    pub fn new(config: BrokerConfig) -> Self {
        Self::with_transport(config, Arc::new(InMemoryTransport))
    }

    /// Build a broker over a caller-supplied transport, e.g. an external
    /// queue adapter (`broker.type = "external"`).
    pub fn with_transport(config: BrokerConfig, transport: Arc<dyn Transport>) -> Self {
        let circuit = Arc::new(CircuitBreaker::new(config.circuit_breaker.clone()));
        Self {
            subscriptions: Arc::new(DashMap::new()),
            queues: Arc::new(DashMap::new()),
            handlers: Arc::new(DashMap::new()),
            dispatchers: DashMap::new(),
            state: RwLock::new(BrokerState::Running),
            config,
            transport,
            circuit,
        }
    }

    /// Enable delivery. A freshly constructed broker starts `Running`
    /// already; `start()` is the inverse of `stop()` for restarts.
    pub async fn start(&self) {
        let mut state = self.state.write().await;
        *state = BrokerState::Running;
    }

    /// Stop accepting new publishes, drain in-flight deliveries for up to
    /// the configured grace period, then abort dispatchers for whatever
    /// remains undelivered.
    pub async fn stop(&self) {
        {
            let mut state = self.state.write().await;
            *state = BrokerState::Stopped;
        }
        tokio::time::sleep(self.config.stop_grace_period).await;
        for entry in self.dispatchers.iter() {
            entry.value().abort();
        }
    }

    async fn current_state(&self) -> BrokerState {
        *self.state.read().await
    }

    /// Current broker lifecycle/health state.
    pub async fn state(&self) -> BrokerState {
        self.current_state().await
    }

    /// Register a subscription. Idempotent: re-subscribing with the exact
    /// same `(pattern, agent_id, options)` returns the existing live
    /// subscription rather than creating a duplicate.
    pub fn subscribe(
        &self,
        pattern: &str,
        agent_id: amcp_types::AgentId,
        handler: Arc<dyn EventHandler>,
        options: DeliveryOptions,
    ) -> AmcpResult<Arc<Subscription>> {
        let parsed = matcher::validate_pattern(pattern)?;
        for existing in self.subscriptions.iter() {
            if existing.pattern == parsed.as_str()
                && existing.agent_id == agent_id
                && existing.options.reliability == options.reliability
                && existing.options.ordered == options.ordered
            {
                return Ok(existing.value().clone());
            }
        }

        let subscription = Arc::new(Subscription::new(parsed.as_str().to_string(), agent_id, options));
        let queue = Arc::new(SubQueue::new(self.config.queue_capacity));
        self.subscriptions.insert(subscription.id, subscription.clone());
        self.queues.insert(subscription.id, queue.clone());
        self.handlers.insert(subscription.id, handler.clone());

        let dispatcher = self.spawn_dispatcher(subscription.clone(), queue, handler);
        self.dispatchers.insert(subscription.id, dispatcher);

        debug!(subscription = %subscription.id, pattern, "subscription registered");
        Ok(subscription)
    }

    /// Synchronously remove a subscription. In-flight deliveries already
    /// dequeued continue to completion; no new events are enqueued.
    pub fn unsubscribe(&self, subscription_id: SubscriptionId) {
        if let Some((_, queue)) = self.queues.remove(&subscription_id) {
            queue.active.store(false, Ordering::SeqCst);
            queue.notify.notify_waiters();
        }
        self.subscriptions.remove(&subscription_id);
        self.handlers.remove(&subscription_id);
        if let Some((_, handle)) = self.dispatchers.remove(&subscription_id) {
            // Let the dispatcher notice `active == false` and exit on its
            // own rather than aborting mid-delivery.
            drop(handle);
        }
    }

    /// Publish an event to every subscription whose pattern matches its
    /// topic. Never fails for "no subscribers".
    pub async fn publish(&self, event: Event) -> AmcpResult<()> {
        match self.current_state().await {
            BrokerState::Stopped => return Err(AmcpError::BrokerClosed),
            BrokerState::Degraded => {
                if !self.circuit.allow() {
                    return Err(AmcpError::BrokerUnavailable(
                        "transport circuit is open".to_string(),
                    ));
                }
            }
            BrokerState::Running => {}
        }

        let mut matched = false;
        for entry in self.subscriptions.iter() {
            let subscription = entry.value().clone();
            let pattern = match TopicPattern::parse(&subscription.pattern) {
                Ok(p) => p,
                Err(_) => continue,
            };
            if !matcher::matches(&event.topic, &pattern) {
                continue;
            }
            matched = true;
            let queue = match self.queues.get(&subscription.id) {
                Some(q) => q.clone(),
                None => continue,
            };
            self.enqueue(&subscription, &queue, event.clone()).await;
        }

        if !matched && !self.transport_is_pure_local() {
            if self.circuit.allow() {
                let payload = serde_json::to_vec(&event.payload).unwrap_or_default();
                match self.transport.send(event.topic.as_str(), &payload).await {
                    Ok(()) => self.circuit.record_success(),
                    Err(e) => {
                        self.circuit.record_failure();
                        warn!(error = %e, "transport send failed");
                        if self.circuit.is_open() {
                            *self.state.write().await = BrokerState::Degraded;
                        }
                    }
                }
            }
        }

        Ok(())
    }

    fn transport_is_pure_local(&self) -> bool {
        self.transport.name() == "in-memory"
    }

    async fn enqueue(&self, subscription: &Subscription, queue: &Arc<SubQueue>, event: Event) {
        let policy = self
            .config
            .backpressure_override
            .unwrap_or_else(|| BackpressurePolicy::default_for(subscription.options.reliability));

        loop {
            let mut guard = queue.events.lock().await;
            if guard.len() < queue.capacity {
                guard.push_back(event);
                drop(guard);
                queue.notify.notify_one();
                return;
            }
            match policy {
                BackpressurePolicy::DropOldest => {
                    guard.pop_front();
                    guard.push_back(event);
                    drop(guard);
                    queue.notify.notify_one();
                    return;
                }
                BackpressurePolicy::DropNewest => {
                    debug!(subscription = %subscription.id, "queue full, dropping newest event");
                    return;
                }
                BackpressurePolicy::BlockPublisher => {
                    drop(guard);
                    // Wait for the dispatcher to make room, then retry.
                    queue.notify.notified().await;
                }
            }
        }
    }

    fn spawn_dispatcher(
        &self,
        subscription: Arc<Subscription>,
        queue: Arc<SubQueue>,
        handler: Arc<dyn EventHandler>,
    ) -> tokio::task::JoinHandle<()> {
        let retry_max = self.config.retry_max;
        let base_delay = self.config.retry_base_delay;
        let at_least_once = subscription.options.reliability == Reliability::AtLeastOnce;
        let self_publish = DeadLetterSink {
            queues: self.queues.clone(),
            subscriptions: self.subscriptions.clone(),
            handlers: self.handlers.clone(),
            config: self.config.clone(),
        };

        tokio::spawn(async move {
            loop {
                let event = {
                    let mut guard = queue.events.lock().await;
                    match guard.pop_front() {
                        Some(event) => event,
                        None => {
                            if !queue.active.load(Ordering::SeqCst) {
                                return;
                            }
                            drop(guard);
                            queue.notify.notified().await;
                            continue;
                        }
                    }
                };
                queue.notify.notify_one(); // wake a blocked publisher

                if at_least_once {
                    let mut attempt = 0u32;
                    loop {
                        match handler.handle(event.clone()).await {
                            Ok(()) => break,
                            Err(e) => {
                                attempt += 1;
                                if attempt >= retry_max {
                                    warn!(
                                        subscription = %subscription.id,
                                        event = %event.id,
                                        error = %e,
                                        "redelivery exhausted, dead-lettering"
                                    );
                                    self_publish.dead_letter(event).await;
                                    break;
                                }
                                let delay = base_delay * 2u32.saturating_pow(attempt.min(10));
                                tokio::time::sleep(delay).await;
                            }
                        }
                    }
                } else {
                    let _ = handler.handle(event).await;
                }

                if !queue.active.load(Ordering::SeqCst) {
                    let remaining = queue.events.lock().await.is_empty();
                    if remaining {
                        return;
                    }
                }
            }
        })
    }
}

/// Minimal self-reference the dispatcher closures need to dead-letter an
/// event without holding a strong cycle back to `EventBroker` itself.
#[derive(Clone)]
struct DeadLetterSink {
    queues: Arc<DashMap<SubscriptionId, Arc<SubQueue>>>,
    subscriptions: Arc<DashMap<SubscriptionId, Arc<Subscription>>>,
    handlers: Arc<DashMap<SubscriptionId, Arc<dyn EventHandler>>>,
    config: BrokerConfig,
}

impl DeadLetterSink {
    async fn dead_letter(&self, event: Event) {
        let dead_topic = match Topic::parse(&format!("amcp.deadletter.{}", event.topic.as_str())) {
            Ok(t) => t,
            Err(_) => return,
        };
        let mut metadata = event.metadata.clone();
        metadata.insert("amcp-original-topic".to_string(), event.topic.as_str().to_string());
        let dead_event = Event {
            id: amcp_types::EventId::new(),
            topic: dead_topic.clone(),
            payload: event.payload,
            sender: event.sender,
            timestamp: chrono::Utc::now(),
            correlation_id: event.correlation_id,
            metadata,
            delivery_options: DeliveryOptions::default(),
        };
        for entry in self.subscriptions.iter() {
            let subscription = entry.value().clone();
            let pattern = match TopicPattern::parse(&subscription.pattern) {
                Ok(p) => p,
                Err(_) => continue,
            };
            if !matcher::matches(&dead_event.topic, &pattern) {
                continue;
            }
            if let (Some(queue), Some(handler)) = (
                self.queues.get(&subscription.id),
                self.handlers.get(&subscription.id),
            ) {
                let mut guard = queue.events.lock().await;
                if guard.len() < self.config.queue_capacity {
                    guard.push_back(dead_event.clone());
                }
                drop(guard);
                queue.notify.notify_one();
                let _ = handler; // delivered by that subscription's own dispatcher
            }
        }
    }
}
