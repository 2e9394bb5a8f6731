use parking_lot::Mutex;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Externally visible breaker state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    /// Requests pass through
    Closed,
    /// Requests fail fast
    Open,
    /// Trial requests decide whether the provider recovered
    HalfOpen,
}

/// Circuit breaker configuration
#[derive(Debug, Clone)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures that open the circuit
    pub failure_threshold: usize,
    /// Time spent open before trial requests are let through
    pub recovery_timeout: Duration,
    /// Consecutive half-open successes that close the circuit
    pub success_threshold: usize,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            recovery_timeout: Duration::from_secs(60),
            success_threshold: 3,
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum Phase {
    Closed { failures: usize },
    Open { since: Instant },
    HalfOpen { successes: usize },
}

/// Circuit breaker guarding the hosted model provider
///
/// A provider that keeps failing is skipped outright until the recovery
/// timeout elapses, so the local fallback is reached without waiting on
/// doomed requests.
#[derive(Clone)]
pub struct CircuitBreaker {
    phase: Arc<Mutex<Phase>>,
    config: CircuitBreakerConfig,
}

impl CircuitBreaker {
    pub fn new() -> Self {
        Self::with_config(CircuitBreakerConfig::default())
    }

    pub fn with_config(config: CircuitBreakerConfig) -> Self {
        Self {
            phase: Arc::new(Mutex::new(Phase::Closed { failures: 0 })),
            config,
        }
    }

    /// Returns false while the circuit is open
    pub fn allow_request(&self) -> bool {
        let mut phase = self.phase.lock();
        match *phase {
            Phase::Closed { .. } | Phase::HalfOpen { .. } => true,
            Phase::Open { since } => {
                if since.elapsed() >= self.config.recovery_timeout {
                    *phase = Phase::HalfOpen { successes: 0 };
                    true
                } else {
                    false
                }
            }
        }
    }

    pub fn record_success(&self) {
        let mut phase = self.phase.lock();
        *phase = match *phase {
            Phase::HalfOpen { successes } if successes + 1 < self.config.success_threshold => {
                Phase::HalfOpen { successes: successes + 1 }
            }
            _ => Phase::Closed { failures: 0 },
        };
    }

    /// Records a failure; returns true when this failure opened the circuit
    pub fn record_failure(&self) -> bool {
        let mut phase = self.phase.lock();
        let (next, tripped) = match *phase {
            Phase::Closed { failures } if failures + 1 >= self.config.failure_threshold => {
                (Phase::Open { since: Instant::now() }, true)
            }
            Phase::Closed { failures } => (Phase::Closed { failures: failures + 1 }, false),
            Phase::HalfOpen { .. } => (Phase::Open { since: Instant::now() }, true),
            Phase::Open { .. } => (Phase::Open { since: Instant::now() }, false),
        };
        *phase = next;
        tripped
    }

    pub fn state(&self) -> CircuitState {
        match *self.phase.lock() {
            Phase::Closed { .. } => CircuitState::Closed,
            Phase::Open { .. } => CircuitState::Open,
            Phase::HalfOpen { .. } => CircuitState::HalfOpen,
        }
    }

    pub fn reset(&self) {
        *self.phase.lock() = Phase::Closed { failures: 0 };
    }
}

impl Default for CircuitBreaker {
    fn default() -> Self {
        Self::new()
    }
}
