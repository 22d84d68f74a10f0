//! The LLM engine: ties together a connector, the response cache, bounded
//! retries, a circuit breaker, and the rule-based fallback engine into the
//! single `generate` entry point described in spec §4.7.

use crate::cache::{content_hash, ResponseCache};
use crate::connector::{LlmConnector, LlmParameters};
use crate::retry::{retry_async, RetryConfig, RetryOutcome};
use amcp_broker::{CircuitBreaker, CircuitBreakerConfig};
use amcp_fallback::{FallbackEngine, FallbackOutcome};
use amcp_types::{AmcpError, AmcpResult};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Where a `generate` call's response actually came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseSource {
    Cache,
    Model,
    Fallback,
}

#[derive(Debug, Clone)]
pub struct LlmResponse {
    pub text: String,
    pub source: ResponseSource,
}

#[derive(Debug, Default)]
struct Counters {
    total_requests: AtomicU64,
    cache_hits: AtomicU64,
    fallback_invocations: AtomicU64,
    successes: AtomicU64,
    total_latency_ms: AtomicU64,
}

/// Point-in-time statistics snapshot (spec §4.7).
#[derive(Debug, Clone, Copy)]
pub struct LlmStats {
    pub total_requests: u64,
    pub cache_hits: u64,
    pub fallback_invocations: u64,
    pub average_latency_ms: f64,
    pub success_rate: f64,
}

/// Per-model timeout table with a default for models not listed.
#[derive(Debug, Clone)]
pub struct ModelTimeouts {
    default: Duration,
    overrides: HashMap<String, Duration>,
}

impl ModelTimeouts {
    pub fn new(default: Duration) -> Self {
        Self { default, overrides: HashMap::new() }
    }

    pub fn with_override(mut self, model_id: impl Into<String>, timeout: Duration) -> Self {
        self.overrides.insert(model_id.into(), timeout);
        self
    }

    /// Environment-variable override: `AMCP_LLM_TIMEOUT_<MODEL>` (model id
    /// upper-cased, non-alphanumeric runs collapsed to `_`), falling back
    /// to `AMCP_LLM_TIMEOUT_SECS`, then the configured default.
    pub fn resolve(&self, model_id: &str) -> Duration {
        let env_key = format!(
            "AMCP_LLM_TIMEOUT_{}",
            model_id
                .chars()
                .map(|c| if c.is_alphanumeric() { c.to_ascii_uppercase() } else { '_' })
                .collect::<String>()
        );
        if let Ok(secs) = std::env::var(&env_key) {
            if let Ok(secs) = secs.parse::<u64>() {
                return Duration::from_secs(secs);
            }
        }
        self.overrides.get(model_id).copied().unwrap_or(self.default)
    }
}

/// Configuration for an [`LlmEngine`].
#[derive(Debug, Clone)]
pub struct LlmEngineConfig {
    pub model_id: String,
    pub timeouts: std::sync::Arc<ModelTimeouts>,
    pub retry: RetryConfig,
    pub circuit_breaker: CircuitBreakerConfig,
}

/// The LLM connector plus its full surrounding resilience stack.
pub struct LlmEngine {
    connector: Arc<dyn LlmConnector>,
    cache: ResponseCache,
    fallback: Option<Arc<FallbackEngine>>,
    config: LlmEngineConfig,
    circuit_breaker: CircuitBreaker,
    counters: Counters,
}

impl LlmEngine {
    pub fn new(
        connector: Arc<dyn LlmConnector>,
        cache: ResponseCache,
        fallback: Option<Arc<FallbackEngine>>,
        config: LlmEngineConfig,
    ) -> Self {
        let circuit_breaker = CircuitBreaker::new(config.circuit_breaker.clone());
        Self { connector, cache, fallback, config, circuit_breaker, counters: Counters::default() }
    }

    pub async fn is_healthy(&self) -> bool {
        !self.circuit_breaker.is_open() && self.connector.is_healthy().await
    }

    /// Produce a response for `prompt`, consulting cache, then the model
    /// (with retries), then the fallback engine, in that order.
    pub async fn generate(&self, prompt: &str, parameters: &LlmParameters) -> AmcpResult<LlmResponse> {
        self.counters.total_requests.fetch_add(1, Ordering::SeqCst);
        let start = Instant::now();
        let model_id = self.config.model_id.clone();
        let key = content_hash(prompt, &model_id, parameters);

        if let Some(cached) = self.cache.get(&key) {
            self.counters.cache_hits.fetch_add(1, Ordering::SeqCst);
            self.counters.successes.fetch_add(1, Ordering::SeqCst);
            self.record_latency(start);
            return Ok(LlmResponse { text: cached, source: ResponseSource::Cache });
        }

        if self.circuit_breaker.allow() {
            let timeout = self.config.timeouts.resolve(&model_id);
            let outcome = retry_async(
                &self.config.retry,
                || {
                    let connector = self.connector.clone();
                    let model_id = model_id.clone();
                    let parameters = parameters.clone();
                    let prompt = prompt.to_string();
                    async move {
                        match tokio::time::timeout(timeout, connector.generate(&prompt, &model_id, &parameters)).await
                        {
                            Ok(result) => result,
                            Err(_) => Err(AmcpError::LLMTimeout(timeout.as_millis() as u64)),
                        }
                    }
                },
                |err: &AmcpError| err.is_transient() || err.is_health_refusal(),
            )
            .await;

            match outcome {
                RetryOutcome::Success { result, .. } => {
                    self.circuit_breaker.record_success();
                    self.cache.put(key, result.clone());
                    if let Some(fallback) = &self.fallback {
                        fallback.learn(prompt, &result);
                    }
                    self.counters.successes.fetch_add(1, Ordering::SeqCst);
                    self.record_latency(start);
                    return Ok(LlmResponse { text: result, source: ResponseSource::Model });
                }
                RetryOutcome::Exhausted { last_error, .. } => {
                    self.circuit_breaker.record_failure();
                    warn!(error = %last_error, "llm generation exhausted retries, falling back");
                }
            }
        } else {
            debug!("llm circuit breaker open, skipping model call");
        }

        self.counters.fallback_invocations.fetch_add(1, Ordering::SeqCst);
        let result = match &self.fallback {
            Some(fallback) => match fallback.match_prompt(prompt) {
                FallbackOutcome::RuleMatch { response, .. } | FallbackOutcome::GenericCategory { response, .. } => {
                    self.counters.successes.fetch_add(1, Ordering::SeqCst);
                    Ok(LlmResponse { text: response, source: ResponseSource::Fallback })
                }
                FallbackOutcome::NoMatch => Err(AmcpError::LLMUnavailable(
                    "model call failed and no fallback rule matched".to_string(),
                )),
            },
            None => Err(AmcpError::LLMUnavailable("model call failed and no fallback engine configured".to_string())),
        };
        self.record_latency(start);
        result
    }

    fn record_latency(&self, start: Instant) {
        self.counters.total_latency_ms.fetch_add(start.elapsed().as_millis() as u64, Ordering::SeqCst);
    }

    pub fn stats(&self) -> LlmStats {
        let total = self.counters.total_requests.load(Ordering::SeqCst);
        let successes = self.counters.successes.load(Ordering::SeqCst);
        let total_latency = self.counters.total_latency_ms.load(Ordering::SeqCst);
        LlmStats {
            total_requests: total,
            cache_hits: self.counters.cache_hits.load(Ordering::SeqCst),
            fallback_invocations: self.counters.fallback_invocations.load(Ordering::SeqCst),
            average_latency_ms: if total == 0 { 0.0 } else { total_latency as f64 / total as f64 },
            success_rate: if total == 0 { 0.0 } else { successes as f64 / total as f64 },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::AtomicUsize;

    struct FlakyConnector {
        fail_times: AtomicUsize,
    }

    #[async_trait]
    impl LlmConnector for FlakyConnector {
        async fn generate(&self, _prompt: &str, _model_id: &str, _parameters: &LlmParameters) -> AmcpResult<String> {
            if self.fail_times.load(Ordering::SeqCst) > 0 {
                self.fail_times.fetch_sub(1, Ordering::SeqCst);
                return Err(AmcpError::Transient("simulated overload".to_string()));
            }
            Ok("model response".to_string())
        }

        async fn is_healthy(&self) -> bool {
            true
        }
    }

    struct AlwaysFailsConnector;

    #[async_trait]
    impl LlmConnector for AlwaysFailsConnector {
        async fn generate(&self, _prompt: &str, _model_id: &str, _parameters: &LlmParameters) -> AmcpResult<String> {
            Err(AmcpError::LLMUnavailable("backend down".to_string()))
        }

        async fn is_healthy(&self) -> bool {
            false
        }
    }

    fn test_config() -> LlmEngineConfig {
        LlmEngineConfig {
            model_id: "test-model".to_string(),
            timeouts: Arc::new(ModelTimeouts::new(Duration::from_millis(200))),
            retry: RetryConfig { max_attempts: 3, min_delay_ms: 1, max_delay_ms: 5, jitter: 0.0 },
            circuit_breaker: CircuitBreakerConfig { failure_threshold: 2, cooldown: Duration::from_secs(30), success_threshold: 1 },
        }
    }

    #[tokio::test]
    async fn cache_hit_skips_the_connector() {
        let connector = Arc::new(FlakyConnector { fail_times: AtomicUsize::new(0) });
        let cache = ResponseCache::in_memory(10, Duration::from_secs(60));
        let params = LlmParameters::new();
        cache.put(content_hash("hi", "test-model", &params), "cached!".to_string());
        let engine = LlmEngine::new(connector, cache, None, test_config());
        let response = engine.generate("hi", &params).await.unwrap();
        assert_eq!(response.source, ResponseSource::Cache);
        assert_eq!(response.text, "cached!");
    }

    #[tokio::test]
    async fn retries_then_succeeds_and_populates_cache() {
        let connector = Arc::new(FlakyConnector { fail_times: AtomicUsize::new(1) });
        let cache = ResponseCache::in_memory(10, Duration::from_secs(60));
        let engine = LlmEngine::new(connector, cache, None, test_config());
        let params = LlmParameters::new();
        let response = engine.generate("hello", &params).await.unwrap();
        assert_eq!(response.source, ResponseSource::Model);
        let second = engine.generate("hello", &params).await.unwrap();
        assert_eq!(second.source, ResponseSource::Cache);
    }

    #[tokio::test]
    async fn exhausted_retries_fall_back_to_rule_engine() {
        let dir = tempfile::tempdir().unwrap();
        let fallback = Arc::new(
            amcp_fallback::FallbackEngine::new(amcp_fallback::FallbackConfig {
                rules_dir: dir.path().to_path_buf(),
                ..Default::default()
            })
            .unwrap(),
        );
        let connector = Arc::new(AlwaysFailsConnector);
        let cache = ResponseCache::in_memory(10, Duration::from_secs(60));
        let engine = LlmEngine::new(connector, cache, Some(fallback), test_config());
        let response = engine.generate("hello there", &LlmParameters::new()).await.unwrap();
        assert_eq!(response.source, ResponseSource::Fallback);
    }

    #[tokio::test]
    async fn no_fallback_and_exhausted_retries_surfaces_llm_unavailable() {
        let connector = Arc::new(AlwaysFailsConnector);
        let cache = ResponseCache::in_memory(10, Duration::from_secs(60));
        let engine = LlmEngine::new(connector, cache, None, test_config());
        let result = engine.generate("hello there", &LlmParameters::new()).await;
        assert!(matches!(result, Err(AmcpError::LLMUnavailable(_))));
    }

    #[tokio::test]
    async fn stats_reflect_cache_and_fallback_usage() {
        let connector = Arc::new(FlakyConnector { fail_times: AtomicUsize::new(0) });
        let cache = ResponseCache::in_memory(10, Duration::from_secs(60));
        let engine = LlmEngine::new(connector, cache, None, test_config());
        let params = LlmParameters::new();
        engine.generate("a", &params).await.unwrap();
        engine.generate("a", &params).await.unwrap();
        let stats = engine.stats();
        assert_eq!(stats.total_requests, 2);
        assert_eq!(stats.cache_hits, 1);
        assert!((stats.success_rate - 1.0).abs() < f64::EPSILON);
    }
}
