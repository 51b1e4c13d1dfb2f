//! Per-destination circuit breaker.

use std::future::Future;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use thiserror::Error;
use tokio::time::Instant;

use crate::state::CircuitState;

/// Breaker tuning shared by every destination unless overridden.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BreakerConfig {
    /// Consecutive failures that open the breaker.
    pub failure_threshold: u32,
    /// How long the breaker stays open before allowing a trial call.
    pub reset_timeout: Duration,
}

impl BreakerConfig {
    /// Creates a config; a zero threshold is raised to one.
    pub fn new(failure_threshold: u32, reset_timeout: Duration) -> Self {
        Self {
            failure_threshold: failure_threshold.max(1),
            reset_timeout,
        }
    }
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            reset_timeout: Duration::from_secs(60),
        }
    }
}

/// Outcome of a call made through a breaker.
#[derive(Debug, Error)]
pub enum BreakerError<E> {
    /// The breaker rejected the call without invoking it.
    #[error("circuit '{name}' is open, retry in {retry_after:?}")]
    Open { name: String, retry_after: Duration },

    /// The wrapped call ran and failed; the original error is preserved.
    #[error("{0}")]
    Inner(E),
}

impl<E> BreakerError<E> {
    /// Returns the wrapped error if the call actually ran.
    pub fn into_inner(self) -> Option<E> {
        match self {
            BreakerError::Open { .. } => None,
            BreakerError::Inner(e) => Some(e),
        }
    }
}

/// Point-in-time view of a breaker, for diagnostics.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BreakerSnapshot {
    pub name: String,
    pub state: CircuitState,
    pub consecutive_failures: u32,
    pub failure_threshold: u32,
    pub reset_timeout: Duration,
    /// Time since the breaker last opened, if it is not closed.
    pub opened_for: Option<Duration>,
}

#[derive(Debug, Default)]
struct BreakerInner {
    state: CircuitState,
    consecutive_failures: u32,
    opened_at: Option<Instant>,
    trial_in_flight: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Permit {
    Normal,
    Trial,
}

/// A failure-tracking guard around calls to one destination.
///
/// The lock is held only while deciding whether a call may proceed and while
/// recording its outcome, never across the call itself.
#[derive(Debug)]
pub struct CircuitBreaker {
    name: String,
    config: BreakerConfig,
    inner: Mutex<BreakerInner>,
}

impl CircuitBreaker {
    /// Creates a closed breaker.
    pub fn new(name: impl Into<String>, config: BreakerConfig) -> Self {
        Self {
            name: name.into(),
            config,
            inner: Mutex::new(BreakerInner::default()),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn config(&self) -> BreakerConfig {
        self.config
    }

    /// Returns the effective state.
    ///
    /// An open breaker whose reset timeout has elapsed reports `HalfOpen`:
    /// the next call will be admitted as the trial.
    pub fn state(&self) -> CircuitState {
        let inner = self.lock();
        self.effective_state(&inner)
    }

    /// Returns a diagnostic snapshot of the breaker.
    pub fn snapshot(&self) -> BreakerSnapshot {
        let inner = self.lock();
        BreakerSnapshot {
            name: self.name.clone(),
            state: self.effective_state(&inner),
            consecutive_failures: inner.consecutive_failures,
            failure_threshold: self.config.failure_threshold,
            reset_timeout: self.config.reset_timeout,
            opened_for: inner.opened_at.map(|at| at.elapsed()),
        }
    }

    /// Runs `f` through the breaker, counting every error as a failure.
    pub async fn call<F, Fut, T, E>(&self, f: F) -> Result<T, BreakerError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        self.call_classified(f, |_| true).await
    }

    /// Runs `f` through the breaker; only errors for which `is_failure`
    /// returns true count against the destination.
    ///
    /// Errors that do not count (for example a 404 from a healthy service)
    /// are treated as a successful round trip for breaker purposes and are
    /// still returned to the caller unchanged.
    pub async fn call_classified<F, Fut, T, E, C>(
        &self,
        f: F,
        is_failure: C,
    ) -> Result<T, BreakerError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        C: Fn(&E) -> bool,
    {
        let permit = self.acquire()?;
        let mut guard = PermitGuard {
            breaker: self,
            permit,
            settled: false,
        };

        let result = f().await;
        match &result {
            Err(e) if is_failure(e) => guard.settle(false),
            _ => guard.settle(true),
        }
        result.map_err(BreakerError::Inner)
    }

    fn acquire<E>(&self) -> Result<Permit, BreakerError<E>> {
        let mut inner = self.lock();
        match inner.state {
            CircuitState::Closed => Ok(Permit::Normal),
            CircuitState::Open => {
                let elapsed = inner.opened_at.map(|at| at.elapsed()).unwrap_or_default();
                if elapsed >= self.config.reset_timeout {
                    self.transition(&mut inner, CircuitState::HalfOpen);
                    inner.trial_in_flight = true;
                    Ok(Permit::Trial)
                } else {
                    Err(self.reject(self.config.reset_timeout - elapsed))
                }
            }
            CircuitState::HalfOpen => {
                if inner.trial_in_flight {
                    Err(self.reject(Duration::ZERO))
                } else {
                    inner.trial_in_flight = true;
                    Ok(Permit::Trial)
                }
            }
        }
    }

    fn record(&self, permit: Permit, success: bool) {
        let mut inner = self.lock();
        if success {
            match (permit, inner.state) {
                (Permit::Trial, _) => {
                    inner.trial_in_flight = false;
                    inner.consecutive_failures = 0;
                    inner.opened_at = None;
                    self.transition(&mut inner, CircuitState::Closed);
                }
                (Permit::Normal, state) if state.allows_calls() => inner.consecutive_failures = 0,
                // A late success from before the breaker opened proves nothing
                // about the destination now.
                (Permit::Normal, _) => {}
            }
            return;
        }

        inner.consecutive_failures = inner.consecutive_failures.saturating_add(1);
        match (permit, inner.state) {
            (Permit::Trial, _) => {
                inner.trial_in_flight = false;
                inner.opened_at = Some(Instant::now());
                self.transition(&mut inner, CircuitState::Open);
            }
            (Permit::Normal, state)
                if state.allows_calls()
                    && inner.consecutive_failures >= self.config.failure_threshold =>
            {
                inner.opened_at = Some(Instant::now());
                self.transition(&mut inner, CircuitState::Open);
            }
            (Permit::Normal, _) => {}
        }
    }

    fn transition(&self, inner: &mut BreakerInner, to: CircuitState) {
        if inner.state == to {
            return;
        }
        let from = inner.state;
        inner.state = to;

        metrics::counter!(
            "circuit_breaker_transitions_total",
            "breaker" => self.name.clone(),
            "to" => to.as_str()
        )
        .increment(1);

        match to {
            CircuitState::Open => tracing::warn!(
                breaker = %self.name,
                %from,
                failures = inner.consecutive_failures,
                "circuit opened"
            ),
            CircuitState::HalfOpen => {
                tracing::info!(breaker = %self.name, "circuit half-open, admitting trial call")
            }
            CircuitState::Closed => tracing::info!(breaker = %self.name, "circuit closed"),
        }
    }

    fn reject<E>(&self, retry_after: Duration) -> BreakerError<E> {
        metrics::counter!("circuit_breaker_rejections_total", "breaker" => self.name.clone())
            .increment(1);
        tracing::debug!(breaker = %self.name, ?retry_after, "call rejected by open circuit");
        BreakerError::Open {
            name: self.name.clone(),
            retry_after,
        }
    }

    fn effective_state(&self, inner: &BreakerInner) -> CircuitState {
        match (inner.state, inner.opened_at) {
            (state, Some(at)) if state.is_open() && at.elapsed() >= self.config.reset_timeout => {
                CircuitState::HalfOpen
            }
            (state, _) => state,
        }
    }

    fn lock(&self) -> MutexGuard<'_, BreakerInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Records the outcome of an admitted call.
///
/// If the call's future is dropped before completing, the permit is settled
/// as a failure so an abandoned trial cannot wedge the breaker in `HalfOpen`.
struct PermitGuard<'a> {
    breaker: &'a CircuitBreaker,
    permit: Permit,
    settled: bool,
}

impl PermitGuard<'_> {
    fn settle(&mut self, success: bool) {
        self.settled = true;
        self.breaker.record(self.permit, success);
    }
}

impl Drop for PermitGuard<'_> {
    fn drop(&mut self) {
        if !self.settled && self.permit == Permit::Trial {
            self.breaker.record(self.permit, false);
        }
    }
}
