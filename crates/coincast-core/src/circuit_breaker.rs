use std::sync::Mutex;
use std::time::{Duration, Instant};

use serde::Serialize;

use crate::data_source::SourceError;

/// Externally visible circuit state of one upstream market data API.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CircuitBreakerConfig {
    /// Consecutive transient failures that open the circuit.
    pub failure_threshold: u32,
    /// How long the circuit stays open before a single trial call is let through.
    pub cool_down: Duration,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            cool_down: Duration::from_secs(30),
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum Circuit {
    Closed { failures: u32 },
    Open { since: Instant },
    Trial,
}

/// Shared by the concurrent per-asset fetches of one adapter. Only transient
/// upstream failures count against it; an unknown asset says nothing about
/// upstream health.
#[derive(Debug)]
pub struct CircuitBreaker {
    name: &'static str,
    config: CircuitBreakerConfig,
    circuit: Mutex<Circuit>,
}

impl CircuitBreaker {
    pub fn new(name: &'static str, config: CircuitBreakerConfig) -> Self {
        Self {
            name,
            config,
            circuit: Mutex::new(Circuit::Closed { failures: 0 }),
        }
    }

    /// Fails fast with an `Unavailable` source error while the circuit is
    /// open. Once the cool-down has elapsed a single trial call is admitted.
    pub fn guard(&self) -> Result<(), SourceError> {
        let mut circuit = self.lock();
        match *circuit {
            Circuit::Closed { .. } | Circuit::Trial => Ok(()),
            Circuit::Open { since } if since.elapsed() >= self.config.cool_down => {
                tracing::debug!(breaker = self.name, "cool-down elapsed, trying upstream again");
                *circuit = Circuit::Trial;
                Ok(())
            }
            Circuit::Open { since } => Err(SourceError::unavailable(format!(
                "{} circuit is open for another {} ms; skipping upstream call",
                self.name,
                self.config
                    .cool_down
                    .saturating_sub(since.elapsed())
                    .as_millis()
            ))),
        }
    }

    /// Feeds the outcome of an upstream call back into the circuit.
    pub fn observe<T>(&self, outcome: &Result<T, SourceError>) {
        match outcome {
            Ok(_) => self.record_success(),
            Err(error) if error.retryable() => self.record_failure(),
            Err(_) => {}
        }
    }

    pub fn record_success(&self) {
        *self.lock() = Circuit::Closed { failures: 0 };
    }

    pub fn record_failure(&self) {
        let mut circuit = self.lock();
        let next = match *circuit {
            Circuit::Closed { failures } if failures + 1 < self.config.failure_threshold => {
                Circuit::Closed {
                    failures: failures + 1,
                }
            }
            Circuit::Open { since } => Circuit::Open { since },
            Circuit::Closed { failures } => {
                tracing::warn!(breaker = self.name, failures = failures + 1, "circuit opened");
                Circuit::Open {
                    since: Instant::now(),
                }
            }
            Circuit::Trial => {
                tracing::warn!(breaker = self.name, "trial call failed, circuit reopened");
                Circuit::Open {
                    since: Instant::now(),
                }
            }
        };
        *circuit = next;
    }

    pub fn state(&self) -> CircuitState {
        match *self.lock() {
            Circuit::Closed { .. } => CircuitState::Closed,
            Circuit::Open { .. } => CircuitState::Open,
            Circuit::Trial => CircuitState::HalfOpen,
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Circuit> {
        self.circuit
            .lock()
            .expect("circuit breaker lock is not poisoned")
    }
}
