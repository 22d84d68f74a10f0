//! The LLM-driven orchestrator agent: intent analysis, parameter
//! normalization, capability-based dispatch, response collection, and
//! synthesis (spec §4.10).

pub mod agent;
pub mod error;
pub mod keyword_router;
pub mod normalize;
pub mod plan;
pub mod prompt;
pub mod state;

pub use agent::{OrchestratorAgent, OrchestratorConfig, OrchestratorFactory};
pub use error::{OrchestratorError, OrchestratorResult};
pub use plan::{Plan, Task};
pub use state::{FailureCategory, OrchestrationRecord, OrchestrationStatus, TaskAudit, TaskStatus};
