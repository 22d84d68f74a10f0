//! Agent runtime, hosting context, capability registry, and correlation
//! tracker for the agent mesh core.

pub mod capability_registry;
pub mod config;
pub mod context;
pub mod correlation;
pub mod error;

pub use capability_registry::{CapabilityRecord, CapabilityRegistry};
pub use config::{load_config, AmcpConfig};
pub use context::{Agent, AgentFactory, Context};
pub use correlation::{CorrelationOutcome, CorrelationTracker};
pub use error::{KernelError, KernelResult};
