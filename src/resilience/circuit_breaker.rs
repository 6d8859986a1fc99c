//! Circuit breaker for backing-store protection.
//!
//! # States
//! - Closed: normal operation, calls pass through
//! - Open: store assumed down, calls fail fast
//! - Half-Open: testing if the store recovered
//!
//! # State Transitions
//! ```text
//! Closed → Open: failure_count >= failure_threshold within time_window
//! Open → Half-Open: after timeout (checked lazily on the next admission)
//! Half-Open → Closed: success_threshold consecutive trial successes
//! Half-Open → Open: any trial failure
//! ```
//!
//! # Design Decisions
//! - One breaker per operation class, not per key
//! - Fail fast in Open state (no waiting for timeout)
//! - Single trial in Half-Open; the slot is held by a [`Permit`]
//! - Permits remember the epoch they were issued in; a permit that outlives a
//!   transition settles as a no-op
//! - Counters reset only on transition (and the failure window on a
//!   Closed success)

use serde::Serialize;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::time::Instant;

use crate::config::schema::BreakerConfig;
use crate::observability::metrics::MetricsCollector;
use crate::resilience::{ErrorClass, OperationClass};

/// Breaker state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

impl CircuitState {
    pub fn as_str(self) -> &'static str {
        match self {
            CircuitState::Closed => "closed",
            CircuitState::Open => "open",
            CircuitState::HalfOpen => "half_open",
        }
    }

    pub(crate) fn gauge_value(self) -> f64 {
        match self {
            CircuitState::Closed => 0.0,
            CircuitState::HalfOpen => 1.0,
            CircuitState::Open => 2.0,
        }
    }
}

#[derive(Debug)]
struct BreakerInner {
    state: CircuitState,
    failure_count: u32,
    success_count: u32,
    window_started_at: Option<Instant>,
    opened_at: Option<Instant>,
    last_failure_at: Option<Instant>,
    trial_in_flight: bool,
    epoch: u64,
}

/// Circuit breaker guarding one operation class.
#[derive(Debug)]
pub struct CircuitBreaker {
    class: OperationClass,
    config: BreakerConfig,
    inner: Mutex<BreakerInner>,
    metrics: Arc<MetricsCollector>,
}

impl CircuitBreaker {
    pub fn new(class: OperationClass, config: BreakerConfig, metrics: Arc<MetricsCollector>) -> Self {
        Self {
            class,
            config,
            inner: Mutex::new(BreakerInner {
                state: CircuitState::Closed,
                failure_count: 0,
                success_count: 0,
                window_started_at: None,
                opened_at: None,
                last_failure_at: None,
                trial_in_flight: false,
                epoch: 0,
            }),
            metrics,
        }
    }

    pub fn class(&self) -> OperationClass {
        self.class
    }

    pub fn config(&self) -> &BreakerConfig {
        &self.config
    }

    fn lock(&self) -> MutexGuard<'_, BreakerInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Ask to run one call against the store.
    ///
    /// Returns `None` while Open (before the timeout elapsed) or while
    /// another Half-Open trial is in flight.
    pub fn try_acquire(&self) -> Option<Permit<'_>> {
        let mut inner = self.lock();

        if inner.state == CircuitState::Open {
            let elapsed = inner.opened_at.map(|at| at.elapsed()).unwrap_or_default();
            if elapsed < self.config.timeout() {
                return None;
            }
            self.transition(&mut inner, CircuitState::HalfOpen);
        }

        let kind = match inner.state {
            CircuitState::Closed => PermitKind::Normal,
            CircuitState::HalfOpen if !inner.trial_in_flight => {
                inner.trial_in_flight = true;
                PermitKind::Trial
            }
            _ => return None,
        };

        Some(Permit {
            breaker: self,
            kind,
            epoch: inner.epoch,
            settled: false,
        })
    }

    /// Current state, without triggering the Open → Half-Open check.
    pub fn state(&self) -> CircuitState {
        self.lock().state
    }

    pub fn failure_count(&self) -> u32 {
        self.lock().failure_count
    }

    pub fn success_count(&self) -> u32 {
        self.lock().success_count
    }

    /// Read-only view for `health()`.
    pub fn snapshot(&self) -> BreakerSnapshot {
        let inner = self.lock();
        BreakerSnapshot {
            class: self.class,
            state: inner.state,
            failure_count: inner.failure_count,
            success_count: inner.success_count,
            failure_threshold: self.config.failure_threshold,
            success_threshold: self.config.success_threshold,
            opened_for_ms: inner.opened_at.map(|at| at.elapsed().as_millis() as u64),
            last_failure_ms_ago: inner
                .last_failure_at
                .map(|at| at.elapsed().as_millis() as u64),
        }
    }

    fn on_success(&self, kind: PermitKind, epoch: u64) {
        let mut inner = self.lock();
        if inner.epoch != epoch {
            return;
        }
        match kind {
            PermitKind::Normal => {
                inner.failure_count = 0;
                inner.window_started_at = None;
            }
            PermitKind::Trial => {
                inner.trial_in_flight = false;
                inner.success_count += 1;
                if inner.success_count >= self.config.success_threshold {
                    self.transition(&mut inner, CircuitState::Closed);
                }
            }
        }
    }

    fn on_failure(&self, kind: PermitKind, epoch: u64) {
        let mut inner = self.lock();
        if inner.epoch != epoch {
            return;
        }
        let now = Instant::now();
        inner.last_failure_at = Some(now);

        match kind {
            PermitKind::Normal => {
                let window_expired = inner
                    .window_started_at
                    .map(|start| now.duration_since(start) > self.config.time_window())
                    .unwrap_or(true);
                if window_expired {
                    inner.window_started_at = Some(now);
                    inner.failure_count = 0;
                }
                inner.failure_count += 1;
                if inner.failure_count >= self.config.failure_threshold {
                    self.transition(&mut inner, CircuitState::Open);
                }
            }
            PermitKind::Trial => self.transition(&mut inner, CircuitState::Open),
        }
    }

    fn on_release(&self, kind: PermitKind, epoch: u64) {
        if kind != PermitKind::Trial {
            return;
        }
        let mut inner = self.lock();
        if inner.epoch == epoch {
            inner.trial_in_flight = false;
        }
    }

    fn transition(&self, inner: &mut BreakerInner, to: CircuitState) {
        let from = inner.state;
        inner.state = to;
        inner.failure_count = 0;
        inner.success_count = 0;
        inner.window_started_at = None;
        inner.trial_in_flight = false;
        inner.epoch += 1;
        inner.opened_at = (to == CircuitState::Open).then(Instant::now);

        match to {
            CircuitState::Open => tracing::warn!(
                class = %self.class,
                from = from.as_str(),
                "Circuit breaker opened"
            ),
            _ => tracing::info!(
                class = %self.class,
                from = from.as_str(),
                to = to.as_str(),
                "Circuit breaker state changed"
            ),
        }
        self.metrics.record_transition(self.class, from, to);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PermitKind {
    Normal,
    Trial,
}

/// Admission for one call. Settle it with [`Permit::succeed`] or
/// [`Permit::fail`]; dropping it unsettled frees a Half-Open trial slot.
#[derive(Debug)]
pub struct Permit<'a> {
    breaker: &'a CircuitBreaker,
    kind: PermitKind,
    epoch: u64,
    settled: bool,
}

impl Permit<'_> {
    /// Whether this permit is the Half-Open trial.
    pub fn is_trial(&self) -> bool {
        self.kind == PermitKind::Trial
    }

    /// Whether no transition happened since this permit was issued.
    pub fn is_current(&self) -> bool {
        self.breaker.lock().epoch == self.epoch
    }

    pub fn succeed(mut self) {
        self.settled = true;
        self.breaker.on_success(self.kind, self.epoch);
    }

    /// Record a failed call. Domain failures only release the permit.
    pub fn fail(mut self, class: ErrorClass) {
        self.settled = true;
        if class.counts_against_breaker() {
            self.breaker.on_failure(self.kind, self.epoch);
        } else {
            self.breaker.on_release(self.kind, self.epoch);
        }
    }
}

impl Drop for Permit<'_> {
    fn drop(&mut self) {
        if !self.settled {
            self.breaker.on_release(self.kind, self.epoch);
        }
    }
}

/// Serializable breaker status.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct BreakerSnapshot {
    pub class: OperationClass,
    pub state: CircuitState,
    pub failure_count: u32,
    pub success_count: u32,
    pub failure_threshold: u32,
    pub success_threshold: u32,
    pub opened_for_ms: Option<u64>,
    pub last_failure_ms_ago: Option<u64>,
}
