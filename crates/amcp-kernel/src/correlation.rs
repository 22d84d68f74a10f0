//! Correlation & timeout tracker: maps a correlation id to a pending
//! continuation with a deadline (spec §4.6).
//!
//! Used by the orchestrator to match fanned-out task-response events back
//! to the task that dispatched them. Concurrent map with per-key exclusion
//! on completion (spec §5): whichever of "response arrived" or "deadline
//! elapsed" happens first fires exactly once; the other is a no-op.

use amcp_types::{CorrelationId, Event};
use dashmap::DashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::time::Instant;
use tracing::debug;

/// Outcome of waiting on a registered correlation.
#[derive(Debug)]
pub enum CorrelationOutcome {
    /// A matching event arrived before the deadline.
    Response(Event),
    /// The deadline elapsed with no matching event.
    Timeout,
    /// The tracker was dropped or the wait was cancelled before either
    /// outcome occurred.
    Cancelled,
}

struct PendingEntry {
    responder: oneshot::Sender<Event>,
    deadline: Instant,
}

/// Concurrent correlation-id → pending-continuation map.
pub struct CorrelationTracker {
    pending: Arc<DashMap<CorrelationId, PendingEntry>>,
}

impl CorrelationTracker {
    pub fn new() -> Self {
        Self {
            pending: Arc::new(DashMap::new()),
        }
    }

    /// Register a wait for `correlation_id` with the given timeout.
    ///
    /// Returns a future that resolves to exactly one of
    /// [`CorrelationOutcome::Response`] or [`CorrelationOutcome::Timeout`].
    /// The registration is removed before the future resolves, so a
    /// duplicate `resolve` call after completion is silently dropped.
    pub fn register(
        &self,
        correlation_id: CorrelationId,
        timeout: Duration,
    ) -> impl std::future::Future<Output = CorrelationOutcome> {
        let (tx, rx) = oneshot::channel();
        let deadline = Instant::now() + timeout;
        self.pending.insert(
            correlation_id.clone(),
            PendingEntry {
                responder: tx,
                deadline,
            },
        );
        let pending = self.pending.clone();
        async move {
            let result = tokio::time::timeout_at(deadline, rx).await;
            pending.remove(&correlation_id);
            match result {
                Ok(Ok(event)) => CorrelationOutcome::Response(event),
                Ok(Err(_)) => CorrelationOutcome::Cancelled,
                Err(_) => CorrelationOutcome::Timeout,
            }
        }
    }

    /// Deliver `event` to whatever continuation is registered under its
    /// correlation id, if any. Returns `true` if a waiter was resolved.
    pub fn resolve(&self, correlation_id: &CorrelationId, event: Event) -> bool {
        match self.pending.remove(correlation_id) {
            Some((_, entry)) => {
                let delivered = entry.responder.send(event).is_ok();
                debug!(%correlation_id, delivered, "correlation resolved");
                delivered
            }
            None => false,
        }
    }

    /// Cancel a pending wait without resolving it as a timeout or a
    /// response — used when an orchestration is itself cancelled.
    pub fn cancel(&self, correlation_id: &CorrelationId) {
        self.pending.remove(correlation_id);
    }

    /// Number of continuations currently awaiting a response.
    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }
}

impl Default for CorrelationTracker {
    fn default() -> Self {
        Self::new()
    }
}
