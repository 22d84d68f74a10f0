//! The abstract LLM connector interface (spec §4.7).
//!
//! Concrete HTTP adapters for a particular vendor live outside this
//! crate, per the design note against vendor-specific libraries in the
//! core — this trait is the only thing the engine depends on.

use amcp_types::AmcpResult;
use async_trait::async_trait;
use std::collections::BTreeMap;

/// A model-call parameter bag (temperature, max tokens, etc). Kept as a
/// sorted map so the content-hash cache key is deterministic regardless of
/// call-site insertion order.
pub type LlmParameters = BTreeMap<String, serde_json::Value>;

/// An LLM backend. Implementations own their own transport, auth, and
/// per-model routing; this crate only ever calls `generate`/`is_healthy`.
#[async_trait]
pub trait LlmConnector: Send + Sync {
    /// Produce a model response for `prompt`. Fails with
    /// `AmcpError::LLMUnavailable`, `LLMTimeout`, or `LLMError` — never
    /// with an unrelated error kind, so the engine's fallback routing can
    /// dispatch on it directly.
    async fn generate(&self, prompt: &str, model_id: &str, parameters: &LlmParameters) -> AmcpResult<String>;

    /// Cheap liveness check, consulted before spending a retry budget.
    async fn is_healthy(&self) -> bool;
}
