//! Deadline enforcement for a single store attempt.
//!
//! # Design Decisions
//! - Uses Tokio's timeout facilities; the attempt future is dropped on expiry
//! - A missed deadline is its own error, classified Transient

use std::future::Future;
use std::time::Duration;
use thiserror::Error;

use crate::resilience::classifier::{Classify, ErrorClass};
use crate::store::StoreError;

/// Outcome of one failed attempt against the store.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum AttemptError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("attempt exceeded deadline of {0:?}")]
    DeadlineExceeded(Duration),
}

impl Classify for AttemptError {
    fn error_class(&self) -> ErrorClass {
        match self {
            AttemptError::Store(e) => e.error_class(),
            AttemptError::DeadlineExceeded(_) => ErrorClass::Transient,
        }
    }
}

/// Run `fut` under `deadline`.
pub async fn with_deadline<T, F>(deadline: Duration, fut: F) -> Result<T, AttemptError>
where
    F: Future<Output = Result<T, StoreError>>,
{
    match tokio::time::timeout(deadline, fut).await {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(e)) => Err(AttemptError::Store(e)),
        Err(_) => Err(AttemptError::DeadlineExceeded(deadline)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_deadline_exceeded() {
        let result: Result<(), _> = with_deadline(Duration::from_millis(50), async {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(())
        })
        .await;
        let err = result.unwrap_err();
        assert_eq!(err, AttemptError::DeadlineExceeded(Duration::from_millis(50)));
        assert_eq!(err.error_class(), ErrorClass::Transient);
    }

    #[tokio::test]
    async fn test_store_error_passes_through() {
        let result: Result<(), _> = with_deadline(Duration::from_secs(1), async {
            Err(StoreError::Constraint("dup".into()))
        })
        .await;
        let err = result.unwrap_err();
        assert_eq!(err.error_class(), ErrorClass::Domain);
    }
}
