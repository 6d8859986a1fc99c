//! Resilience subsystem.
//!
//! # Data Flow
//! ```text
//! engine.rs execute(class, operation, fallback, timeout):
//!     → circuit_breaker.rs (admit: Closed / HalfOpen trial / reject)
//!     → retries.rs (retry Transient failures with backoff.rs delays)
//!         → timeouts.rs (deadline per attempt)
//!         → classifier.rs (Transient / Persistent / Domain)
//!     → circuit_breaker.rs (settle the permit)
//!     → fallback (cache::FallbackCache for reads) or propagate
//! ```
//!
//! # Design Decisions
//! - One breaker per operation class (read / write / delete), built once
//! - Timeouts are non-negotiable; every store call has a deadline
//! - Domain failures never touch breaker accounting
//! - Fail fast while Open; a single probe call at a time while HalfOpen

pub mod backoff;
pub mod circuit_breaker;
pub mod classifier;
pub mod engine;
pub mod retries;
pub mod timeouts;

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use thiserror::Error;

use crate::store::StoreError;

pub use circuit_breaker::{BreakerSnapshot, CircuitBreaker, CircuitState};
pub use classifier::{classify, Classify, ErrorClass};
pub use engine::{Fallback, ResilientStore};
pub use retries::{RetryCoordinator, RetryPolicy};

/// The operation classes guarded by their own breaker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationClass {
    Read,
    Write,
    Delete,
}

impl OperationClass {
    pub const ALL: [OperationClass; 3] =
        [OperationClass::Read, OperationClass::Write, OperationClass::Delete];

    pub fn as_str(self) -> &'static str {
        match self {
            OperationClass::Read => "read",
            OperationClass::Write => "write",
            OperationClass::Delete => "delete",
        }
    }

    pub(crate) fn index(self) -> usize {
        match self {
            OperationClass::Read => 0,
            OperationClass::Write => 1,
            OperationClass::Delete => 2,
        }
    }
}

impl fmt::Display for OperationClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Errors surfaced by `execute` and the protected store helpers.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ResilienceError {
    /// The breaker is open and no fallback produced a value.
    #[error("circuit open for {class} operations")]
    CircuitOpen { class: OperationClass },

    /// The last attempt ran past its deadline.
    #[error("{class} operation exceeded deadline of {deadline:?}")]
    OperationTimeout {
        class: OperationClass,
        deadline: Duration,
    },

    /// The store failed; `kind` is the classifier's verdict.
    #[error("{class} operation failed ({kind}): {source}")]
    Store {
        class: OperationClass,
        kind: ErrorClass,
        #[source]
        source: StoreError,
    },
}

impl ResilienceError {
    pub(crate) fn from_attempt(class: OperationClass, err: timeouts::AttemptError) -> Self {
        match err {
            timeouts::AttemptError::DeadlineExceeded(deadline) => {
                ResilienceError::OperationTimeout { class, deadline }
            }
            timeouts::AttemptError::Store(source) => ResilienceError::Store {
                class,
                kind: classify(&source),
                source,
            },
        }
    }

    /// Operation class the failure belongs to.
    pub fn class(&self) -> OperationClass {
        match self {
            ResilienceError::CircuitOpen { class }
            | ResilienceError::OperationTimeout { class, .. }
            | ResilienceError::Store { class, .. } => *class,
        }
    }

    /// Classifier verdict, if the failure came from an actual attempt.
    pub fn error_class(&self) -> Option<ErrorClass> {
        match self {
            ResilienceError::CircuitOpen { .. } => None,
            ResilienceError::OperationTimeout { .. } => Some(ErrorClass::Transient),
            ResilienceError::Store { kind, .. } => Some(*kind),
        }
    }

    /// Whether this is a caller/business outcome rather than store trouble.
    pub fn is_domain(&self) -> bool {
        self.error_class() == Some(ErrorClass::Domain)
    }
}
