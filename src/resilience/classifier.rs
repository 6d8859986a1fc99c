//! Failure classification.
//!
//! # Classes
//! - Transient: connectivity / timeout. Retried, counted against the breaker.
//! - Persistent: authentication / resource exhaustion. Counted, never retried.
//! - Domain: malformed request / constraint / not found. Neither retried nor
//!   counted; these are caller or business outcomes, not store health.
//!
//! Anything unrecognised is Persistent.

use serde::Serialize;
use std::fmt;

use crate::store::StoreError;

/// How a failure affects retrying and breaker accounting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorClass {
    Transient,
    Persistent,
    Domain,
}

impl ErrorClass {
    /// Whether the retry coordinator may try again.
    pub fn is_retryable(self) -> bool {
        matches!(self, ErrorClass::Transient)
    }

    /// Whether the failure counts toward opening the breaker.
    pub fn counts_against_breaker(self) -> bool {
        !matches!(self, ErrorClass::Domain)
    }

    /// Stable label for metrics and logs.
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorClass::Transient => "transient",
            ErrorClass::Persistent => "persistent",
            ErrorClass::Domain => "domain",
        }
    }
}

impl fmt::Display for ErrorClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Map a store failure onto its class.
pub fn classify(err: &StoreError) -> ErrorClass {
    match err {
        StoreError::Connection(_) | StoreError::Timeout(_) => ErrorClass::Transient,
        StoreError::Authentication(_) | StoreError::ResourceExhausted(_) => ErrorClass::Persistent,
        StoreError::InvalidRequest(_) | StoreError::Constraint(_) | StoreError::NotFound(_) => {
            ErrorClass::Domain
        }
        StoreError::Other(_) => ErrorClass::Persistent,
    }
}

/// Errors that know their own class.
pub trait Classify {
    fn error_class(&self) -> ErrorClass;
}

impl Classify for StoreError {
    fn error_class(&self) -> ErrorClass {
        classify(self)
    }
}
