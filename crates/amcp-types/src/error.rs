//! Shared error taxonomy for the agent mesh core.
//!
//! Every crate in the workspace wraps `AmcpError` with `#[error(transparent)]`
//! or `#[from]`, layering crate-local variants over it the way the teacher
//! layers `KernelError` over the base error type.

use thiserror::Error;

/// Which step of a strong-mobility hand-off failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MigrationFailure {
    /// Transport/network failure during hand-off.
    Network,
    /// Snapshot serialization or deserialization failed.
    Serialization,
    /// Destination detected an AgentID collision; the caller may treat
    /// this as success if the collision is with its own prior attempt.
    Collision,
    /// Destination refused the install (e.g. unknown agent type).
    Refused,
}

impl std::fmt::Display for MigrationFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            MigrationFailure::Network => "network",
            MigrationFailure::Serialization => "serialization",
            MigrationFailure::Collision => "collision",
            MigrationFailure::Refused => "refused",
        };
        write!(f, "{s}")
    }
}

/// Top-level error type for the agent mesh core.
#[derive(Error, Debug)]
pub enum AmcpError {
    /// Malformed topic or topic pattern.
    #[error("invalid topic: {0}")]
    InvalidTopic(String),

    /// Malformed input that is not a topic.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// Unknown agent type; no factory registered for it.
    #[error("unknown agent type: {0}")]
    UnknownAgentType(String),

    /// Unknown AgentID, capability, or subscription.
    #[error("not found: {0}")]
    NotFound(String),

    /// Operation attempted in a lifecycle state that forbids it.
    #[error("lifecycle violation: operation '{operation}' is not valid in state '{state}'")]
    LifecycleViolation {
        /// The operation that was attempted.
        operation: String,
        /// The state the target was in.
        state: String,
    },

    /// `onActivate` failed; the agent is rolled back to `inactive`.
    #[error("activation failed: {0}")]
    ActivationFailed(String),

    /// An outward call exceeded its deadline (LLM, correlation wait,
    /// mobility hand-off, broker ack).
    #[error("timeout: {0}")]
    Timeout(String),

    /// A transient failure, subject to retry with backoff; surfaced once
    /// the retry budget is exhausted.
    #[error("transient failure: {0}")]
    Transient(String),

    /// The transport's circuit breaker is open.
    #[error("circuit open: {0}")]
    CircuitOpen(String),

    /// The broker is degraded past usability.
    #[error("broker unavailable: {0}")]
    BrokerUnavailable(String),

    /// The broker has been stopped; publish/subscribe after `stop()`.
    #[error("broker closed")]
    BrokerClosed,

    /// No LLM response is obtainable (cache miss, retries exhausted, no
    /// fallback rule matched).
    #[error("llm unavailable: {0}")]
    LLMUnavailable(String),

    /// An LLM request exceeded its timeout.
    #[error("llm timeout after {0}ms")]
    LLMTimeout(u64),

    /// The LLM backend returned a non-timeout error.
    #[error("llm error: {0}")]
    LLMError(String),

    /// A strong-mobility operation failed partway through the protocol.
    #[error("migration failed ({subcode}, recoverable={recoverable}): {message}")]
    MigrationFailed {
        /// Which step of the protocol failed.
        subcode: MigrationFailure,
        /// Whether the source agent can safely resume.
        recoverable: bool,
        /// Human-readable detail.
        message: String,
    },

    /// The destination already hosts this AgentID (retried transport);
    /// the mobility manager's caller may treat this as success.
    #[error("already installed: {0}")]
    AlreadyInstalled(String),

    /// An opaque security-context rejection, propagated from outside the
    /// core without further detail.
    #[error("policy violation: {0}")]
    PolicyViolation(String),

    /// A mobility snapshot carried an unsupported format version.
    #[error("unsupported snapshot version: {0}")]
    UnsupportedSnapshot(u32),

    /// Wraps an I/O error (config loading, rule store, cache persistence).
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Wraps a (de)serialization error.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// An invariant the core enforces internally was violated.
    #[error("internal error: {0}")]
    Internal(String),
}

/// Alias for `Result<T, AmcpError>`.
pub type AmcpResult<T> = Result<T, AmcpError>;

impl AmcpError {
    /// Whether this is a health-based refusal that should route to a
    /// fallback path rather than surface raw to the caller.
    pub fn is_health_refusal(&self) -> bool {
        matches!(
            self,
            AmcpError::CircuitOpen(_) | AmcpError::BrokerUnavailable(_) | AmcpError::LLMUnavailable(_)
        )
    }

    /// Whether this error is eligible for retry with backoff.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            AmcpError::Transient(_) | AmcpError::Timeout(_) | AmcpError::LLMTimeout(_)
        )
    }
}
