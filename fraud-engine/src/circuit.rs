//! Circuit breaker for remote dependencies
//!
//! Closed until `failure_threshold` consecutive failures, then open for
//! `open_timeout`. The first call after that runs half-open; `recovery_threshold`
//! successes close the breaker again, any failure reopens it.

use crate::clock::Clock;
use crate::{Error, Result};
use chrono::{DateTime, Duration, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::Arc;
use tracing::{info, warn};

/// Breaker state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    /// Calls pass through
    Closed,
    /// Calls are refused
    Open,
    /// Trial calls pass through
    HalfOpen,
}

/// Point-in-time view of a breaker
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BreakerSnapshot {
    /// Breaker name
    pub name: String,
    /// Current state
    pub state: CircuitState,
    /// Consecutive failures while closed
    pub consecutive_failures: u32,
    /// Successes while half-open
    pub trial_successes: u32,
    /// When the breaker last opened
    pub opened_at: Option<DateTime<Utc>>,
}

#[derive(Debug)]
struct Inner {
    state: CircuitState,
    consecutive_failures: u32,
    trial_successes: u32,
    opened_at: Option<DateTime<Utc>>,
}

/// Circuit breaker
pub struct CircuitBreaker {
    name: String,
    failure_threshold: u32,
    recovery_threshold: u32,
    open_timeout: Duration,
    clock: Arc<dyn Clock>,
    inner: Mutex<Inner>,
}

impl CircuitBreaker {
    /// Create breaker. Thresholds below one are raised to one.
    pub fn with_config(
        name: impl Into<String>,
        failure_threshold: u32,
        recovery_threshold: u32,
        open_timeout_secs: i64,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            name: name.into(),
            failure_threshold: failure_threshold.max(1),
            recovery_threshold: recovery_threshold.max(1),
            open_timeout: Duration::seconds(open_timeout_secs.max(0)),
            clock,
            inner: Mutex::new(Inner {
                state: CircuitState::Closed,
                consecutive_failures: 0,
                trial_successes: 0,
                opened_at: None,
            }),
        }
    }

    /// Run `f` unless the breaker is open. Refused calls fail with
    /// [`Error::CircuitOpen`] without running `f`.
    pub async fn call<F, Fut, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        self.admit()?;

        let outcome = f().await;
        match &outcome {
            Ok(_) => self.record_success(),
            Err(_) => self.record_failure(),
        }
        outcome
    }

    fn admit(&self) -> Result<()> {
        let mut inner = self.inner.lock();
        if inner.state != CircuitState::Open {
            return Ok(());
        }

        let cooled = inner
            .opened_at
            .map_or(true, |at| self.clock.now() - at >= self.open_timeout);
        if cooled {
            info!(breaker = %self.name, "Circuit half-open, admitting trial call");
            inner.state = CircuitState::HalfOpen;
            inner.trial_successes = 0;
            Ok(())
        } else {
            Err(Error::CircuitOpen(self.name.clone()))
        }
    }

    /// Count a successful call
    pub fn record_success(&self) {
        let mut inner = self.inner.lock();
        match inner.state {
            CircuitState::Closed => inner.consecutive_failures = 0,
            CircuitState::HalfOpen => {
                inner.trial_successes += 1;
                if inner.trial_successes >= self.recovery_threshold {
                    info!(breaker = %self.name, "Circuit closed");
                    inner.state = CircuitState::Closed;
                    inner.consecutive_failures = 0;
                    inner.trial_successes = 0;
                    inner.opened_at = None;
                }
            }
            CircuitState::Open => {}
        }
    }

    /// Count a failed call
    pub fn record_failure(&self) {
        let now = self.clock.now();
        let mut inner = self.inner.lock();
        match inner.state {
            CircuitState::Closed => {
                inner.consecutive_failures += 1;
                if inner.consecutive_failures >= self.failure_threshold {
                    warn!(
                        breaker = %self.name,
                        failures = inner.consecutive_failures,
                        "Circuit opened"
                    );
                    inner.state = CircuitState::Open;
                    inner.opened_at = Some(now);
                }
            }
            CircuitState::HalfOpen => {
                warn!(breaker = %self.name, "Trial call failed, circuit reopened");
                inner.state = CircuitState::Open;
                inner.trial_successes = 0;
                inner.opened_at = Some(now);
            }
            CircuitState::Open => {}
        }
    }

    /// Current state
    pub fn snapshot(&self) -> BreakerSnapshot {
        let inner = self.inner.lock();
        BreakerSnapshot {
            name: self.name.clone(),
            state: inner.state,
            consecutive_failures: inner.consecutive_failures,
            trial_successes: inner.trial_successes,
            opened_at: inner.opened_at,
        }
    }
}
