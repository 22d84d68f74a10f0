//! Bounded retries with jittered exponential backoff.
//!
//! Jitter is seeded from system-time nanoseconds rather than pulling in
//! the `rand` crate — the jitter only needs to avoid thundering-herd
//! retries, not cryptographic unpredictability.

use tracing::{debug, warn};

/// Retry configuration for a single `generate` call.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub min_delay_ms: u64,
    pub max_delay_ms: u64,
    /// Jitter factor: actual delay is `base * (1 + random_fraction * jitter)`.
    pub jitter: f64,
}

impl Default for RetryConfig {
    /// 3 attempts, 1s initial delay, up to 60s, 20% jitter — the order of
    /// magnitude an LLM backend's own rate limiting tends to expect.
    fn default() -> Self {
        Self { max_attempts: 3, min_delay_ms: 1_000, max_delay_ms: 60_000, jitter: 0.2 }
    }
}

pub fn compute_backoff(config: &RetryConfig, attempt: u32) -> u64 {
    let base = config.min_delay_ms.saturating_mul(1u64.checked_shl(attempt).unwrap_or(u64::MAX));
    let capped = base.min(config.max_delay_ms);
    if config.jitter <= 0.0 {
        return capped;
    }
    let frac = pseudo_random_fraction();
    let with_jitter = (capped as f64) + (capped as f64) * frac * config.jitter;
    (with_jitter as u64).min(config.max_delay_ms)
}

fn pseudo_random_fraction() -> f64 {
    let nanos = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .subsec_nanos();
    let mixed = nanos.wrapping_mul(2654435761);
    (mixed as f64) / (u32::MAX as f64)
}

/// Outcome of a retried operation.
pub enum RetryOutcome<T, E> {
    Success { result: T, attempts: u32 },
    Exhausted { last_error: E, attempts: u32 },
}

/// Execute `operation` up to `config.max_attempts` times, retrying only
/// while `should_retry` holds on the error.
pub async fn retry_async<F, Fut, T, E, P>(config: &RetryConfig, mut operation: F, should_retry: P) -> RetryOutcome<T, E>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T, E>>,
    P: Fn(&E) -> bool,
    E: std::fmt::Debug,
{
    let max = config.max_attempts.max(1);
    let mut last_error: Option<E> = None;

    for attempt in 0..max {
        match operation().await {
            Ok(result) => return RetryOutcome::Success { result, attempts: attempt + 1 },
            Err(err) => {
                let is_last = attempt + 1 >= max;
                if is_last || !should_retry(&err) {
                    if !should_retry(&err) {
                        debug!(attempt = attempt + 1, "error is not retryable, giving up: {:?}", err);
                    } else {
                        warn!(attempt = attempt + 1, max_attempts = max, "retries exhausted: {:?}", err);
                    }
                    return RetryOutcome::Exhausted { last_error: err, attempts: attempt + 1 };
                }
                let delay_ms = compute_backoff(config, attempt);
                debug!(attempt = attempt + 1, delay_ms, "retrying after error: {:?}", err);
                tokio::time::sleep(std::time::Duration::from_millis(delay_ms)).await;
                last_error = Some(err);
            }
        }
    }

    RetryOutcome::Exhausted {
        last_error: last_error.expect("at least one attempt should have been made"),
        attempts: max,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_doubles_until_capped() {
        let config = RetryConfig { max_attempts: 5, min_delay_ms: 100, max_delay_ms: 1_000, jitter: 0.0 };
        assert_eq!(compute_backoff(&config, 0), 100);
        assert_eq!(compute_backoff(&config, 1), 200);
        assert_eq!(compute_backoff(&config, 2), 400);
        assert_eq!(compute_backoff(&config, 10), 1_000);
    }

    #[tokio::test]
    async fn succeeds_after_transient_failures() {
        let config = RetryConfig { max_attempts: 5, min_delay_ms: 1, max_delay_ms: 5, jitter: 0.0 };
        let mut calls = 0;
        let outcome = retry_async(
            &config,
            || {
                calls += 1;
                let attempt = calls;
                async move { if attempt < 3 { Err("not yet") } else { Ok("done") } }
            },
            |_| true,
        )
        .await;
        match outcome {
            RetryOutcome::Success { result, attempts } => {
                assert_eq!(result, "done");
                assert_eq!(attempts, 3);
            }
            RetryOutcome::Exhausted { .. } => panic!("expected success"),
        }
    }

    #[tokio::test]
    async fn non_retryable_error_stops_immediately() {
        let config = RetryConfig { max_attempts: 5, min_delay_ms: 1, max_delay_ms: 5, jitter: 0.0 };
        let mut calls = 0;
        let outcome = retry_async(
            &config,
            || {
                calls += 1;
                async move { Err::<(), &str>("fatal") }
            },
            |_| false,
        )
        .await;
        match outcome {
            RetryOutcome::Exhausted { attempts, .. } => assert_eq!(attempts, 1),
            RetryOutcome::Success { .. } => panic!("expected exhausted"),
        }
        assert_eq!(calls, 1);
    }
}
