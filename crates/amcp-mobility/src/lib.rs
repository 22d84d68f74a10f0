//! Strong mobility for the agent mesh core: versioned snapshots, a signed
//! install protocol, and the manager that drives hand-offs between
//! hosting contexts.

pub mod error;
pub mod mobility;
pub mod protocol;
pub mod snapshot;
pub mod transport;

pub use error::{MobilityError, MobilityResult};
pub use mobility::{
    InstallOutcome, LocalAgentHost, MigrationOptions, MobilityManager, ReplicationOutcome,
    TargetSelection,
};
pub use protocol::{sign, verify, InstallRequest, InstallResponse, PROTOCOL_VERSION};
pub use snapshot::{AgentSnapshot, SNAPSHOT_FORMAT_VERSION};
pub use transport::{RemoteContext, RemoteContextDirectory};
