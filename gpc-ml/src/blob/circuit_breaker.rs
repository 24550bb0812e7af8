//! Circuit breaker for the blob store
//!
//! ```text
//! closed ──N consecutive failures──▶ open ──cool-down elapsed──▶ half_open
//!   ▲                                  ▲                            │
//!   └────────── trial succeeded ───────┼──────── trial failed ──────┘
//! ```
//!
//! While open, calls are rejected without touching the transport. In
//! half-open exactly one trial call is let through; its result decides the
//! next state. Time is read from `tokio::time::Instant` so tests can drive the
//! cool-down with a paused clock.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::future::Future;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use thiserror::Error;
use tokio::time::Instant;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

#[derive(Debug, Clone)]
pub struct CircuitBreakerConfig {
    pub failure_threshold: u32,
    pub cool_down: Duration,
}

/// Call rejected because the circuit is open
#[derive(Debug, Clone, Error)]
#[error("Circuit '{name}' is open (retry after {retry_after:?})")]
pub struct CircuitOpen {
    pub name: String,
    pub retry_after: Duration,
}

/// Point-in-time view for the status surface
#[derive(Debug, Clone, Serialize)]
pub struct CircuitSnapshot {
    pub name: String,
    pub state: CircuitState,
    pub consecutive_failures: u32,
    pub failure_threshold: u32,
    pub opened_at: Option<DateTime<Utc>>,
}

/// Admission granted by [`CircuitBreaker::try_acquire`]
#[derive(Debug, Clone, Copy)]
pub struct Permit {
    trial: bool,
}

impl Permit {
    pub fn is_trial(&self) -> bool {
        self.trial
    }
}

#[derive(Debug)]
struct BreakerState {
    state: CircuitState,
    consecutive_failures: u32,
    opened_at: Option<Instant>,
    opened_at_wall: Option<DateTime<Utc>>,
    trial_in_flight: bool,
}

#[derive(Debug)]
pub struct CircuitBreaker {
    name: String,
    config: CircuitBreakerConfig,
    inner: Mutex<BreakerState>,
}

impl CircuitBreaker {
    pub fn new(name: impl Into<String>, config: CircuitBreakerConfig) -> Self {
        Self {
            name: name.into(),
            config: CircuitBreakerConfig {
                failure_threshold: config.failure_threshold.max(1),
                cool_down: config.cool_down,
            },
            inner: Mutex::new(BreakerState {
                state: CircuitState::Closed,
                consecutive_failures: 0,
                opened_at: None,
                opened_at_wall: None,
                trial_in_flight: false,
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, BreakerState> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn state(&self) -> CircuitState {
        self.lock().state
    }

    pub fn snapshot(&self) -> CircuitSnapshot {
        let inner = self.lock();
        CircuitSnapshot {
            name: self.name.clone(),
            state: inner.state,
            consecutive_failures: inner.consecutive_failures,
            failure_threshold: self.config.failure_threshold,
            opened_at: inner.opened_at_wall,
        }
    }

    /// Admit a call or reject it without side effects on the transport
    pub fn try_acquire(&self) -> Result<Permit, CircuitOpen> {
        let mut inner = self.lock();
        match inner.state {
            CircuitState::Closed => Ok(Permit { trial: false }),
            CircuitState::Open => {
                let elapsed = inner.opened_at.map(|t| t.elapsed()).unwrap_or_default();
                if elapsed >= self.config.cool_down {
                    inner.state = CircuitState::HalfOpen;
                    inner.trial_in_flight = true;
                    tracing::info!(circuit = %self.name, "Circuit half-open, admitting trial call");
                    Ok(Permit { trial: true })
                } else {
                    Err(CircuitOpen {
                        name: self.name.clone(),
                        retry_after: self.config.cool_down - elapsed,
                    })
                }
            }
            CircuitState::HalfOpen => {
                if inner.trial_in_flight {
                    Err(CircuitOpen {
                        name: self.name.clone(),
                        retry_after: Duration::ZERO,
                    })
                } else {
                    inner.trial_in_flight = true;
                    Ok(Permit { trial: true })
                }
            }
        }
    }

    /// Record the result of an admitted call.
    ///
    /// Results of non-trial calls that finish after the circuit left the
    /// closed state do not move it out of open/half-open.
    pub fn record(&self, permit: Permit, success: bool) {
        let mut inner = self.lock();

        if permit.trial {
            inner.trial_in_flight = false;
            if success {
                inner.state = CircuitState::Closed;
                inner.consecutive_failures = 0;
                inner.opened_at = None;
                inner.opened_at_wall = None;
                tracing::info!(circuit = %self.name, "Trial call succeeded, circuit closed");
            } else {
                inner.consecutive_failures += 1;
                self.open(&mut inner);
            }
            return;
        }

        match (inner.state, success) {
            (CircuitState::Closed, true) => inner.consecutive_failures = 0,
            (CircuitState::Closed, false) => {
                inner.consecutive_failures += 1;
                if inner.consecutive_failures >= self.config.failure_threshold {
                    self.open(&mut inner);
                }
            }
            (CircuitState::Open, false) => inner.consecutive_failures += 1,
            _ => {}
        }
    }

    fn open(&self, inner: &mut BreakerState) {
        inner.state = CircuitState::Open;
        inner.opened_at = Some(Instant::now());
        inner.opened_at_wall = Some(Utc::now());
        tracing::warn!(
            circuit = %self.name,
            consecutive_failures = inner.consecutive_failures,
            cool_down_secs = self.config.cool_down.as_secs_f64(),
            "Circuit opened"
        );
    }

    /// Run `operation` under the breaker. `is_failure` decides which errors
    /// count against the circuit. A call dropped before completion counts as
    /// a failure.
    pub async fn call<T, E, F, Fut>(
        &self,
        operation: F,
        is_failure: impl Fn(&E) -> bool,
    ) -> Result<Result<T, E>, CircuitOpen>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let permit = self.try_acquire()?;
        let mut guard = RecordOnDrop {
            breaker: self,
            permit: Some(permit),
        };

        let result = operation().await;
        let success = match &result {
            Ok(_) => true,
            Err(e) => !is_failure(e),
        };
        if let Some(permit) = guard.permit.take() {
            self.record(permit, success);
        }
        Ok(result)
    }
}

struct RecordOnDrop<'a> {
    breaker: &'a CircuitBreaker,
    permit: Option<Permit>,
}

impl Drop for RecordOnDrop<'_> {
    fn drop(&mut self) {
        if let Some(permit) = self.permit.take() {
            self.breaker.record(permit, false);
        }
    }
}
