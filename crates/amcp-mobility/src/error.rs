use amcp_types::AmcpError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum MobilityError {
    #[error(transparent)]
    Core(#[from] AmcpError),

    #[error("no known remote context '{0}'")]
    UnknownDestination(String),
}

pub type MobilityResult<T> = Result<T, MobilityError>;
