//! Kernel-specific error types.

use amcp_types::AmcpError;
use thiserror::Error;

/// Kernel error type, layering context-specific variants over the shared
/// taxonomy.
#[derive(Error, Debug)]
pub enum KernelError {
    /// A wrapped core error.
    #[error(transparent)]
    Core(#[from] AmcpError),

    /// The context failed to boot (config load, initial agent set).
    #[error("boot failed: {0}")]
    BootFailed(String),
}

/// Alias for kernel results.
pub type KernelResult<T> = Result<T, KernelError>;

/// Collapses a `KernelError` back into the shared `AmcpError` taxonomy, for
/// seams (like `LocalAgentHost`) defined in terms of the core error type
/// rather than this crate's own.
impl From<KernelError> for AmcpError {
    fn from(err: KernelError) -> Self {
        match err {
            KernelError::Core(core) => core,
            KernelError::BootFailed(message) => AmcpError::Internal(format!("boot failed: {message}")),
        }
    }
}
