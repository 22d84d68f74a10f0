//! LLM-connector-local error type.

use amcp_types::AmcpError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum LlmError {
    #[error(transparent)]
    Core(#[from] AmcpError),

    /// The opportunistic disk cache could not be opened; the engine
    /// continues in memory-only mode rather than failing construction.
    #[error("cache persistence unavailable: {0}")]
    CachePersistenceUnavailable(String),
}

pub type LlmResult<T> = Result<T, LlmError>;
