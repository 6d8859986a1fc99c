//! Retry coordination.
//!
//! # Responsibilities
//! - Decide whether a failed attempt may be retried (classifier driven)
//! - Wait between attempts with exponential backoff + jitter
//!
//! # Design Decisions
//! - Only Transient failures are retried
//! - Waiting is `tokio::time::sleep`, so a backing-off call never blocks
//!   unrelated tasks on the same runtime
//! - `max_attempts` counts retries, not calls: a call is tried at most
//!   `1 + max_attempts` times

use std::future::Future;
use std::time::Duration;

use crate::resilience::backoff::calculate_backoff;
use crate::resilience::classifier::Classify;
use crate::resilience::OperationClass;

/// Retry limits for one operation class.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl RetryPolicy {
    /// A policy that never retries.
    pub fn none() -> Self {
        Self {
            max_attempts: 0,
            base_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
        }
    }
}

/// Runs an operation, retrying retryable failures per its policy.
#[derive(Debug, Clone, Copy)]
pub struct RetryCoordinator {
    class: OperationClass,
    policy: RetryPolicy,
}

impl RetryCoordinator {
    pub fn new(class: OperationClass, policy: RetryPolicy) -> Self {
        Self { class, policy }
    }

    /// The same coordinator with retries disabled (half-open trials).
    pub fn single_shot(&self) -> Self {
        Self {
            class: self.class,
            policy: RetryPolicy::none(),
        }
    }

    pub fn policy(&self) -> RetryPolicy {
        self.policy
    }

    /// Run `op` until it succeeds, fails non-retryably, or retries run out.
    ///
    /// Returns the final result together with the number of retries spent.
    pub async fn run<T, E, F, Fut>(&self, op: F) -> (Result<T, E>, u32)
    where
        E: Classify + std::fmt::Display,
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        self.run_while(op, || true).await
    }

    /// Like [`run`](Self::run), but gives up retrying (keeping the last
    /// error) as soon as `admitted` turns false, before and after each
    /// backoff wait.
    pub async fn run_while<T, E, F, Fut, A>(&self, mut op: F, admitted: A) -> (Result<T, E>, u32)
    where
        E: Classify + std::fmt::Display,
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        A: Fn() -> bool,
    {
        let mut retries = 0;
        loop {
            match op().await {
                Ok(value) => return (Ok(value), retries),
                Err(e) => {
                    let class = e.error_class();
                    if !class.is_retryable() || retries >= self.policy.max_attempts || !admitted() {
                        return (Err(e), retries);
                    }

                    let delay =
                        calculate_backoff(retries, self.policy.base_delay, self.policy.max_delay);
                    tracing::debug!(
                        class = %self.class,
                        attempt = retries + 1,
                        delay = ?delay,
                        error = %e,
                        "Retrying store operation"
                    );
                    tokio::time::sleep(delay).await;
                    if !admitted() {
                        tracing::debug!(class = %self.class, "Breaker changed state, abandoning retries");
                        return (Err(e), retries);
                    }
                    retries += 1;
                }
            }
        }
    }
}
