//! Install protocol: the message exchange a hand-off drives once the
//! snapshot has been produced.
//!
//! Wire framing (how these messages actually cross a socket) is a
//! transport adapter's concern, not this crate's — `RemoteContext` in
//! `transport.rs` is the seam. What belongs here is the message shape
//! itself and the HMAC-SHA256 signature over the snapshot bytes that lets
//! a destination authenticate the source before installing anything.

use crate::snapshot::AgentSnapshot;
use amcp_types::{AgentId, AmcpError, AmcpResult, MigrationFailure};
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

/// Current install-protocol version. A destination that cannot understand
/// this version should reject the install outright rather than guess.
pub const PROTOCOL_VERSION: u32 = 1;

/// Sign `payload` with a pre-shared secret.
pub fn sign(secret: &str, payload: &[u8]) -> String {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).expect("HMAC accepts any key size");
    mac.update(payload);
    hex::encode(mac.finalize().into_bytes())
}

/// Verify a signature in constant time.
pub fn verify(secret: &str, payload: &[u8], signature: &str) -> bool {
    let expected = sign(secret, payload);
    subtle::ConstantTimeEq::ct_eq(expected.as_bytes(), signature.as_bytes()).into()
}

/// A request to install a snapshot on a destination context.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InstallRequest {
    pub protocol_version: u32,
    pub snapshot: Vec<u8>,
    /// HMAC-SHA256 over `snapshot`, hex-encoded.
    pub signature: String,
    /// Whether the source expects to resume this agent if the install is
    /// refused (dispatch/migrate: no; clone/replicate: source keeps
    /// running regardless).
    pub expects_resume_on_refusal: bool,
}

impl InstallRequest {
    pub fn new(secret: &str, snapshot: &AgentSnapshot) -> AmcpResult<Self> {
        let bytes = snapshot.encode()?;
        let signature = sign(secret, &bytes);
        Ok(Self {
            protocol_version: PROTOCOL_VERSION,
            snapshot: bytes,
            signature,
            expects_resume_on_refusal: false,
        })
    }

    /// Verify the signature and decode the enclosed snapshot.
    pub fn open(&self, secret: &str) -> AmcpResult<AgentSnapshot> {
        if self.protocol_version != PROTOCOL_VERSION {
            return Err(AmcpError::MigrationFailed {
                subcode: MigrationFailure::Refused,
                recoverable: true,
                message: format!(
                    "unsupported install protocol version {}",
                    self.protocol_version
                ),
            });
        }
        if !verify(secret, &self.snapshot, &self.signature) {
            return Err(AmcpError::MigrationFailed {
                subcode: MigrationFailure::Refused,
                recoverable: true,
                message: "install signature verification failed".to_string(),
            });
        }
        AgentSnapshot::decode(&self.snapshot)
    }
}

/// The destination's response to an [`InstallRequest`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum InstallResponse {
    /// Install completed; the agent is now `Active` on the destination.
    Ack { agent_id: AgentId, endpoint: String },
    /// The destination already hosts this `AgentId` (a retried transport
    /// delivered the same install twice). Treated as success by the
    /// source.
    AlreadyInstalled { agent_id: AgentId, endpoint: String },
    /// The destination rejected the install (unknown agent type, policy,
    /// or a protocol mismatch).
    Refused { reason: String },
}
