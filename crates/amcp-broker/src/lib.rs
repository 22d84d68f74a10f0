//! Topic matching and the event broker: hierarchical pub/sub routing for
//! the agent mesh core, independent of any particular context or agent.

pub mod broker;
pub mod error;
pub mod matcher;
pub mod subscription;
pub mod transport;

pub use broker::{BackpressurePolicy, BrokerConfig, BrokerState, EventBroker};
pub use error::BrokerError;
pub use subscription::{EventHandler, Subscription, SubscriptionId};
pub use transport::{CircuitBreaker, CircuitBreakerConfig, InMemoryTransport, Transport};
