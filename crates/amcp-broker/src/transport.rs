//! Pluggable transport for subscriptions that live outside this process,
//! plus the circuit breaker guarding it (spec §4.2).
//!
//! The default deployment never needs a transport at all — every
//! subscriber is local and delivery never leaves the broker's own queues.
//! A concrete adapter (e.g. an external queue) implements [`Transport`] and
//! is handed to the broker at construction; the broker itself depends only
//! on the trait.

use async_trait::async_trait;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Mutex;
use std::time::{Duration, Instant};
use tracing::{info, warn};

/// A remote delivery channel. Concrete adapters (external queue, another
/// context's ingress) live outside this crate; this trait is the only
/// thing the broker depends on.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Hand the serialized event off to the remote side. Failure here is
    /// what trips the circuit breaker.
    async fn send(&self, topic: &str, payload: &[u8]) -> Result<(), String>;

    /// Name for logging, e.g. `"in-memory"` or `"external-queue"`.
    fn name(&self) -> &str;
}

/// The default transport: every subscriber is local, so there is nothing
/// to send and nothing to fail.
pub struct InMemoryTransport;

#[async_trait]
impl Transport for InMemoryTransport {
    async fn send(&self, _topic: &str, _payload: &[u8]) -> Result<(), String> {
        Ok(())
    }

    fn name(&self) -> &str {
        "in-memory"
    }
}

/// Circuit breaker configuration.
#[derive(Debug, Clone)]
pub struct CircuitBreakerConfig {
    /// Consecutive transport failures that open the circuit.
    pub failure_threshold: u32,
    /// How long the circuit stays open before a half-open probe is allowed.
    pub cooldown: Duration,
    /// Consecutive half-open successes required to close the circuit.
    pub success_threshold: u32,
}

impl Default for CircuitBreakerConfig {
    /// 5 consecutive failures opens the circuit, 30s cooldown, 2 consecutive
    /// half-open successes closes it — the order of magnitude used by the
    /// teacher's provider-health probe timeouts and retry defaults, since
    /// spec.md names the behavior but not the constants.
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            cooldown: Duration::from_secs(30),
            success_threshold: 2,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

/// Tracks transport health and decides whether a publish requiring the
/// transport should be allowed through.
pub struct CircuitBreaker {
    config: CircuitBreakerConfig,
    state: Mutex<CircuitState>,
    opened_at: Mutex<Option<Instant>>,
    consecutive_failures: AtomicU32,
    consecutive_successes: AtomicU32,
}

impl CircuitBreaker {
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self {
            config,
            state: Mutex::new(CircuitState::Closed),
            opened_at: Mutex::new(None),
            consecutive_failures: AtomicU32::new(0),
            consecutive_successes: AtomicU32::new(0),
        }
    }

    /// Whether a call using the transport should be attempted right now.
    /// `Open` refuses until the cooldown elapses, at which point exactly
    /// one probe is let through as `HalfOpen`.
    pub fn allow(&self) -> bool {
        let mut state = self.state.lock().unwrap();
        match *state {
            CircuitState::Closed | CircuitState::HalfOpen => true,
            CircuitState::Open => {
                let opened_at = self.opened_at.lock().unwrap();
                if opened_at.map(|t| t.elapsed() >= self.config.cooldown).unwrap_or(false) {
                    *state = CircuitState::HalfOpen;
                    info!("circuit breaker entering half-open probe");
                    true
                } else {
                    false
                }
            }
        }
    }

    pub fn record_success(&self) {
        self.consecutive_failures.store(0, Ordering::SeqCst);
        let mut state = self.state.lock().unwrap();
        if *state == CircuitState::HalfOpen {
            let successes = self.consecutive_successes.fetch_add(1, Ordering::SeqCst) + 1;
            if successes >= self.config.success_threshold {
                *state = CircuitState::Closed;
                self.consecutive_successes.store(0, Ordering::SeqCst);
                info!("circuit breaker closed after successful probes");
            }
        }
    }

    pub fn record_failure(&self) {
        self.consecutive_successes.store(0, Ordering::SeqCst);
        let mut state = self.state.lock().unwrap();
        if *state == CircuitState::HalfOpen {
            *state = CircuitState::Open;
            *self.opened_at.lock().unwrap() = Some(Instant::now());
            warn!("circuit breaker re-opened after failed probe");
            return;
        }
        let failures = self.consecutive_failures.fetch_add(1, Ordering::SeqCst) + 1;
        if failures >= self.config.failure_threshold && *state == CircuitState::Closed {
            *state = CircuitState::Open;
            *self.opened_at.lock().unwrap() = Some(Instant::now());
            warn!(failures, "circuit breaker opened");
        }
    }

    pub fn is_open(&self) -> bool {
        *self.state.lock().unwrap() == CircuitState::Open
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn opens_after_threshold_failures() {
        let cb = CircuitBreaker::new(CircuitBreakerConfig {
            failure_threshold: 3,
            cooldown: Duration::from_secs(60),
            success_threshold: 2,
        });
        assert!(cb.allow());
        cb.record_failure();
        cb.record_failure();
        assert!(!cb.is_open());
        cb.record_failure();
        assert!(cb.is_open());
        assert!(!cb.allow());
    }

    #[test]
    fn half_open_success_closes_circuit() {
        let cb = CircuitBreaker::new(CircuitBreakerConfig {
            failure_threshold: 1,
            cooldown: Duration::from_millis(0),
            success_threshold: 2,
        });
        cb.record_failure();
        assert!(cb.is_open());
        assert!(cb.allow()); // cooldown elapsed immediately -> half-open
        cb.record_success();
        cb.record_success();
        assert!(!cb.is_open());
    }
}
