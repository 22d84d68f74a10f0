//! Strong-mobility hand-off: `dispatch`, `clone`, `retract`, `migrate`,
//! `replicate`, `federateWith`.
//!
//! The manager never touches agent internals directly — it drives the
//! protocol through two seams: [`LocalAgentHost`] (what a hosting context
//! must expose to produce and install snapshots) and [`RemoteContext`]
//! (how a destination is reached). This keeps the hand-off protocol
//! itself free of any dependency on the agent runtime crate, the same way
//! the broker's retry loop doesn't know what `Transport` it's driving.

use crate::protocol::{InstallRequest, InstallResponse};
use crate::snapshot::AgentSnapshot;
use crate::transport::RemoteContextDirectory;
use amcp_types::{AgentId, AmcpError, AmcpResult, EndpointDirectory, MigrationFailure};
use async_trait::async_trait;
use std::sync::Arc;
use tokio::task::JoinSet;

/// What a hosting context must provide so the mobility manager can drive a
/// hand-off without reaching into agent-runtime internals.
#[async_trait]
pub trait LocalAgentHost: Send + Sync {
    /// Transition the agent to migrating, run `onBeforeMigration(destination)`,
    /// and produce its snapshot. `preserve_pending_events` controls whether
    /// events parked in the migration buffer are carried in
    /// `snapshot.metadata` for the destination to replay, or dropped.
    async fn snapshot_for_migration(
        &self,
        agent_id: &AgentId,
        destination: &str,
        preserve_pending_events: bool,
    ) -> AmcpResult<AgentSnapshot>;

    /// Produce a snapshot for `clone`/`replicate` without disturbing the
    /// running original: no state transition, no `onBeforeMigration`.
    async fn snapshot_for_clone(&self, agent_id: &AgentId) -> AmcpResult<AgentSnapshot>;

    /// Recreate an agent from a snapshot: factory construction, state
    /// restore, subscription install, transition to `Active`,
    /// `onAfterMigration`. Returns `AlreadyInstalled` rather than erroring
    /// if this AgentID is already resident (a retried transport).
    async fn install_snapshot(&self, snapshot: AgentSnapshot) -> AmcpResult<InstallOutcome>;

    /// Undo step 1: resume a `Migrating` agent back to `Active`, restoring
    /// subscriptions and delivering any parked events. Called when a
    /// hand-off fails before the destination's acknowledgement.
    async fn resume_after_failed_migration(&self, agent_id: &AgentId) -> AmcpResult<()>;

    /// Destroy the local instance after a destination confirms install.
    async fn destroy_local(&self, agent_id: &AgentId) -> AmcpResult<()>;

    /// This host's own address, recorded as the new endpoint once an
    /// install here commits.
    fn local_endpoint(&self) -> String;
}

/// Outcome of installing a snapshot on a destination.
#[derive(Debug, Clone)]
pub enum InstallOutcome {
    /// Freshly installed.
    Installed(AgentId),
    /// This AgentID was already resident; treated as success.
    AlreadyInstalled(AgentId),
}

/// Destination selection policy for `migrate`.
#[derive(Debug, Clone)]
pub enum TargetSelection {
    /// A single, explicitly chosen destination.
    Named(String),
    /// Try candidates in the given order; "load-balanced" in the absence
    /// of live load telemetry degrades to ordered failover, which is the
    /// honest behavior rather than a fabricated balancing heuristic.
    LoadBalanced(Vec<String>),
    /// Same shape as `LoadBalanced`; distinguished so that a future
    /// latency-aware context can reorder candidates before calling in.
    LeastLatency(Vec<String>),
}

/// Options for a `migrate` call.
#[derive(Debug, Clone)]
pub struct MigrationOptions {
    pub selection: TargetSelection,
    /// Try the next candidate on refusal instead of failing immediately.
    pub failover: bool,
    /// Carry events parked in the migration buffer to the destination.
    pub preserve_pending_events: bool,
}

/// Report from a `replicate` call: which targets succeeded, with their new
/// AgentIDs, and which failed, with a reason.
#[derive(Debug, Clone, Default)]
pub struct ReplicationOutcome {
    pub succeeded: Vec<AgentId>,
    pub failed: Vec<(String, String)>,
}

/// Drives the strong-mobility protocol for one hosting context.
pub struct MobilityManager {
    host: Arc<dyn LocalAgentHost>,
    directory: Arc<dyn EndpointDirectory>,
    remotes: RemoteContextDirectory,
    /// Pre-shared secret used to sign and verify install requests with
    /// every known remote. A federation with per-peer secrets would key
    /// this by destination instead; out of scope here.
    secret: String,
}

impl MobilityManager {
    pub fn new(host: Arc<dyn LocalAgentHost>, directory: Arc<dyn EndpointDirectory>, secret: impl Into<String>) -> Self {
        Self {
            host,
            directory,
            remotes: RemoteContextDirectory::new(),
            secret: secret.into(),
        }
    }

    /// The directory of known destinations this manager can dispatch to.
    pub fn remotes(&self) -> &RemoteContextDirectory {
        &self.remotes
    }

    fn remote_or_network_err(&self, destination: &str) -> AmcpResult<Arc<dyn crate::transport::RemoteContext>> {
        self.remotes.get(destination).ok_or_else(|| AmcpError::MigrationFailed {
            subcode: MigrationFailure::Network,
            recoverable: true,
            message: format!("no known remote context '{destination}'"),
        })
    }

    fn network_err(message: impl Into<String>, recoverable: bool) -> AmcpError {
        AmcpError::MigrationFailed {
            subcode: MigrationFailure::Network,
            recoverable,
            message: message.into(),
        }
    }

    fn refused_err(reason: impl Into<String>) -> AmcpError {
        AmcpError::MigrationFailed {
            subcode: MigrationFailure::Refused,
            recoverable: true,
            message: reason.into(),
        }
    }

    /// Move `agent_id` to `destination`, deleting it here once the
    /// destination confirms install. On failure the agent resumes
    /// running locally.
    pub async fn dispatch(&self, agent_id: &AgentId, destination: &str) -> AmcpResult<()> {
        self.dispatch_preserving(agent_id, destination, false).await
    }

    /// Install a copy of `agent_id` on `destination` under a fresh
    /// AgentID; the original keeps running untouched.
    pub async fn clone_agent(&self, agent_id: &AgentId, destination: &str) -> AmcpResult<AgentId> {
        let remote = self.remote_or_network_err(destination)?;
        let mut snapshot = self.host.snapshot_for_clone(agent_id).await?;
        snapshot.agent_id = snapshot.agent_id.fresh_clone();
        let new_agent_id = snapshot.agent_id.clone();

        let request = InstallRequest::new(&self.secret, &snapshot)?;
        match remote.install(request).await {
            Ok(InstallResponse::Ack { endpoint, .. }) | Ok(InstallResponse::AlreadyInstalled { endpoint, .. }) => {
                // Clone only ever adds a record; the source's own entry is
                // never touched.
                self.directory.update_endpoint(&new_agent_id, &endpoint);
                Ok(new_agent_id)
            }
            Ok(InstallResponse::Refused { reason }) => Err(Self::refused_err(reason)),
            Err(transport_err) => Err(Self::network_err(transport_err, false)),
        }
    }

    /// Recall an agent previously dispatched to `source_context`, back to
    /// this manager's own context. Asks the source to dispatch it back to
    /// our endpoint; the actual install happens when the resulting
    /// `InstallRequest` reaches [`MobilityManager::accept_install`] here.
    pub async fn retract(&self, agent_id: &AgentId, source_context: &str) -> AmcpResult<()> {
        let remote = self.remote_or_network_err(source_context)?;
        remote
            .recall(agent_id, &self.host.local_endpoint())
            .await
            .map_err(|e| Self::network_err(e, true))
    }

    /// Heuristic variant of `dispatch`: tries candidates from `options` in
    /// order, optionally failing over to the next one on refusal.
    /// Returns the destination that accepted the agent.
    pub async fn migrate(&self, agent_id: &AgentId, options: MigrationOptions) -> AmcpResult<String> {
        let candidates: Vec<String> = match &options.selection {
            TargetSelection::Named(destination) => vec![destination.clone()],
            TargetSelection::LoadBalanced(candidates) | TargetSelection::LeastLatency(candidates) => candidates.clone(),
        };
        if candidates.is_empty() {
            return Err(Self::refused_err("no migration candidates supplied"));
        }

        let mut last_err = None;
        for destination in &candidates {
            match self.dispatch_preserving(agent_id, destination, options.preserve_pending_events).await {
                Ok(()) => return Ok(destination.clone()),
                Err(err) => {
                    last_err = Some(err);
                    if !options.failover {
                        break;
                    }
                }
            }
        }
        Err(last_err.expect("loop ran at least once"))
    }

    async fn dispatch_preserving(&self, agent_id: &AgentId, destination: &str, preserve_pending_events: bool) -> AmcpResult<()> {
        let remote = self.remote_or_network_err(destination)?;
        let snapshot = self.host.snapshot_for_migration(agent_id, destination, preserve_pending_events).await?;
        let request = InstallRequest::new(&self.secret, &snapshot).map(|mut r| {
            r.expects_resume_on_refusal = true;
            r
        })?;
        match remote.install(request).await {
            Ok(InstallResponse::Ack { endpoint, .. }) | Ok(InstallResponse::AlreadyInstalled { endpoint, .. }) => {
                self.directory.update_endpoint(agent_id, &endpoint);
                self.host.destroy_local(agent_id).await
            }
            Ok(InstallResponse::Refused { reason }) => {
                self.host.resume_after_failed_migration(agent_id).await?;
                Err(Self::refused_err(reason))
            }
            Err(transport_err) => {
                self.host.resume_after_failed_migration(agent_id).await?;
                Err(Self::network_err(transport_err, true))
            }
        }
    }

    /// Clone to every target concurrently. "Atomic from the caller's
    /// view" means one awaited call covering every target, not a
    /// transactional rollback on partial failure — there is no
    /// distributed commit primitive here, so partial failure is reported
    /// rather than silently undone.
    pub async fn replicate(&self, agent_id: &AgentId, targets: &[String]) -> ReplicationOutcome {
        let mut joins = JoinSet::new();
        for target in targets {
            let target = target.clone();
            let agent_id = agent_id.clone();
            let manager = self.clone_handle();
            joins.spawn(async move {
                let result = manager.clone_agent(&agent_id, &target).await;
                (target, result)
            });
        }

        let mut outcome = ReplicationOutcome::default();
        while let Some(joined) = joins.join_next().await {
            match joined {
                Ok((_, Ok(new_agent_id))) => outcome.succeeded.push(new_agent_id),
                Ok((target, Err(err))) => outcome.failed.push((target, err.to_string())),
                Err(join_err) => outcome.failed.push(("<unknown>".to_string(), join_err.to_string())),
            }
        }
        outcome
    }

    /// A named multicast subscription pattern uniting `agentIds` under one
    /// logical federation. Federation membership itself is advisory — the
    /// manager only mints the topic; agents still subscribe to it
    /// themselves via their context.
    pub fn federate_with(&self, agent_ids: &[AgentId], federation_id: &str) -> String {
        let _ = agent_ids;
        format!("federation.{federation_id}.**")
    }

    /// Destination-side counterpart to `dispatch`/`migrate`/`clone`: open
    /// and install an inbound request, producing the response to send
    /// back to the source.
    pub async fn accept_install(&self, request: InstallRequest) -> InstallResponse {
        let snapshot = match request.open(&self.secret) {
            Ok(snapshot) => snapshot,
            Err(err) => return InstallResponse::Refused { reason: err.to_string() },
        };
        match self.host.install_snapshot(snapshot).await {
            Ok(InstallOutcome::Installed(agent_id)) => InstallResponse::Ack {
                agent_id,
                endpoint: self.host.local_endpoint(),
            },
            Ok(InstallOutcome::AlreadyInstalled(agent_id)) => InstallResponse::AlreadyInstalled {
                agent_id,
                endpoint: self.host.local_endpoint(),
            },
            Err(err) => InstallResponse::Refused { reason: err.to_string() },
        }
    }

    fn clone_handle(&self) -> Self {
        Self {
            host: self.host.clone(),
            directory: self.directory.clone(),
            remotes: self.remotes.clone(),
            secret: self.secret.clone(),
        }
    }
}
