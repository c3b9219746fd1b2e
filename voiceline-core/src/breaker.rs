//! Per-provider circuit breaker.
//!
//! Trips after consecutive failures, blocks calls while open, and after a
//! recovery timeout permits exactly one half-open trial. The trial's outcome
//! decides whether the circuit closes again or re-opens for a fresh timeout.

use std::time::{Duration, Instant};

use serde::Serialize;
use tracing::{debug, warn};

/// State of a circuit breaker.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum CircuitState {
    /// Normal operation — calls are permitted.
    Closed,
    /// Too many failures — calls are blocked.
    Open { since: Instant },
    /// Recovery probe — a single trial call is in flight.
    HalfOpen,
}

/// A snapshot of breaker state for status reporting.
#[derive(Debug, Clone, Serialize)]
pub struct BreakerSnapshot {
    pub status: &'static str,
    pub consecutive_failures: u32,
    /// Milliseconds since the circuit opened, when open.
    pub open_for_ms: Option<u64>,
}

/// A circuit breaker that trips after consecutive failures and recovers
/// through a single half-open trial.
#[derive(Debug)]
pub struct CircuitBreaker {
    state: CircuitState,
    failure_count: u32,
    failure_threshold: u32,
    recovery_timeout: Duration,
}

impl CircuitBreaker {
    pub fn new(failure_threshold: u32, recovery_timeout: Duration) -> Self {
        Self {
            state: CircuitState::Closed,
            failure_count: 0,
            failure_threshold,
            recovery_timeout,
        }
    }

    /// Try to acquire permission for a call.
    ///
    /// Closed circuits always permit. An open circuit past its recovery
    /// timeout moves to half-open and grants the one trial; while the trial
    /// is outstanding every other caller is refused.
    pub fn try_acquire(&mut self) -> bool {
        match self.state {
            CircuitState::Closed => true,
            CircuitState::Open { since } => {
                if since.elapsed() >= self.recovery_timeout {
                    debug!("circuit breaker transitioning to half-open, granting trial call");
                    self.state = CircuitState::HalfOpen;
                    true
                } else {
                    false
                }
            }
            // The single trial is already in flight.
            CircuitState::HalfOpen => false,
        }
    }

    /// Record a successful call.
    pub fn record_success(&mut self) {
        if self.state == CircuitState::HalfOpen {
            debug!("circuit breaker closing after successful trial");
        }
        self.failure_count = 0;
        self.state = CircuitState::Closed;
    }

    /// Record a failed call.
    ///
    /// A failed half-open trial re-opens the circuit immediately for a fresh
    /// recovery timeout.
    pub fn record_failure(&mut self) {
        self.failure_count += 1;
        let tripped = self.state == CircuitState::HalfOpen
            || self.failure_count >= self.failure_threshold;
        if tripped {
            warn!(
                failures = self.failure_count,
                threshold = self.failure_threshold,
                "circuit breaker opening"
            );
            self.state = CircuitState::Open {
                since: Instant::now(),
            };
        }
    }

    /// Get the current state.
    pub fn state(&self) -> CircuitState {
        self.state
    }

    pub fn snapshot(&self) -> BreakerSnapshot {
        let (status, open_for_ms) = match self.state {
            CircuitState::Closed => ("closed", None),
            CircuitState::Open { since } => ("open", Some(since.elapsed().as_millis() as u64)),
            CircuitState::HalfOpen => ("half_open", None),
        };
        BreakerSnapshot {
            status,
            consecutive_failures: self.failure_count,
            open_for_ms,
        }
    }
}
