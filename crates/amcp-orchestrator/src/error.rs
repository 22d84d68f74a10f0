//! Orchestrator-local error type.

use amcp_types::AmcpError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum OrchestratorError {
    #[error(transparent)]
    Core(#[from] AmcpError),

    #[error("malformed task plan: {0}")]
    MalformedPlan(String),
}

pub type OrchestratorResult<T> = Result<T, OrchestratorError>;
