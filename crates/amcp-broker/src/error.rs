//! Broker-local error type.
//!
//! Thin wrapper over [`AmcpError`], matching the layering every crate in
//! the workspace uses: broker-specific context folds into the shared
//! taxonomy rather than growing a parallel one.

use amcp_types::AmcpError;
use thiserror::Error;

/// Errors the broker can produce beyond what [`AmcpError`] already covers.
#[derive(Error, Debug)]
pub enum BrokerError {
    /// Any condition already represented in the shared taxonomy.
    #[error(transparent)]
    Core(#[from] AmcpError),

    /// A subscription id passed to `unsubscribe` was never registered, or
    /// was already removed.
    #[error("unknown subscription: {0}")]
    UnknownSubscription(String),
}
