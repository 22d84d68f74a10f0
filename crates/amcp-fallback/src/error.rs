//! Fallback-engine-local error type.

use amcp_types::AmcpError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum FallbackError {
    #[error(transparent)]
    Core(#[from] AmcpError),

    /// A rule record on disk could not be parsed; the record is skipped
    /// rather than aborting the whole load.
    #[error("malformed rule record '{0}': {1}")]
    MalformedRecord(String, String),
}

pub type FallbackResult<T> = Result<T, FallbackError>;
