//! Per-orchestration state machine and task audit trail (spec §4.10).

use amcp_types::AgentId;
use chrono::{DateTime, Utc};

/// `NEW → PLANNING → DISPATCHING ⇄ COLLECTING → SYNTHESIZING → DONE`, with
/// `FAILED` reachable from any non-terminal state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrchestrationStatus {
    New,
    Planning,
    Dispatching,
    Collecting,
    Synthesizing,
    Done,
    Partial,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskStatus {
    Pending,
    Dispatched,
    Succeeded,
    Failed(String),
    TimedOut,
    Cancelled,
}

/// One line of the per-task audit trail returned alongside the synthesized
/// answer: capability, agent, status, latency.
#[derive(Debug, Clone)]
pub struct TaskAudit {
    pub index: usize,
    pub capability: String,
    pub agent_id: Option<AgentId>,
    pub status: TaskStatus,
    pub latency_ms: Option<u64>,
}

impl TaskAudit {
    pub fn pending(index: usize, capability: String) -> Self {
        Self { index, capability, agent_id: None, status: TaskStatus::Pending, latency_ms: None }
    }
}

/// The complete record of a single orchestration, from request to reply.
#[derive(Debug, Clone)]
pub struct OrchestrationRecord {
    pub correlation_id: String,
    pub trace_id: String,
    pub status: OrchestrationStatus,
    pub tasks: Vec<TaskAudit>,
    pub started_at: DateTime<Utc>,
}

/// Failure category for a total-failure structured error response
/// (spec §4.10 failure policy).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureCategory {
    NoAgent,
    AllTimeouts,
    LlmUnavailable,
}

impl FailureCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            FailureCategory::NoAgent => "no-agent",
            FailureCategory::AllTimeouts => "all-timeouts",
            FailureCategory::LlmUnavailable => "llm-unavailable",
        }
    }
}

/// Classify a total failure from its task audits: every task failed for
/// want of an agent → `no-agent`; every task timed out → `all-timeouts`;
/// otherwise `llm-unavailable` (synthesis itself could not be produced).
pub fn classify_total_failure(tasks: &[TaskAudit]) -> FailureCategory {
    if !tasks.is_empty() && tasks.iter().all(|t| matches!(&t.status, TaskStatus::Failed(reason) if reason.contains("no agent"))) {
        FailureCategory::NoAgent
    } else if !tasks.is_empty() && tasks.iter().all(|t| t.status == TaskStatus::TimedOut) {
        FailureCategory::AllTimeouts
    } else {
        FailureCategory::LlmUnavailable
    }
}
