//! Backing-store seam.
//!
//! # Data Flow
//! ```text
//! Engine (resilience::engine)
//!     → DataStore trait (get / set / delete)
//!     → concrete implementation (memory.rs, or an external cache/SQL client)
//! ```
//!
//! # Design Decisions
//! - The engine only ever sees `dyn DataStore`; blocking vs. event-loop
//!   backends are a construction detail
//! - Implementations raise `StoreError`, which the classifier maps onto
//!   Transient / Persistent / Domain
//! - Key layout lives here so every writer agrees on it

pub mod memory;

use async_trait::async_trait;
use thiserror::Error;

pub use memory::MemoryStore;

/// Failures raised by the data-access module.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StoreError {
    /// The store could not be reached (refused, reset, DNS, broken pipe).
    #[error("connection failed: {0}")]
    Connection(String),

    /// The store itself reported a timeout.
    #[error("store timed out: {0}")]
    Timeout(String),

    /// Credentials were rejected.
    #[error("authentication rejected: {0}")]
    Authentication(String),

    /// Pool, memory or quota exhausted on the store side.
    #[error("resource exhausted: {0}")]
    ResourceExhausted(String),

    /// The request was malformed.
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// A uniqueness/foreign-key style constraint rejected the write.
    #[error("constraint violated: {0}")]
    Constraint(String),

    /// The addressed entity does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// Anything the driver could not map onto the variants above.
    #[error("store error: {0}")]
    Other(String),
}

/// Async key/value primitives provided by the data-access module.
#[async_trait]
pub trait DataStore: Send + Sync {
    /// Fetch a value. A missing key is `Ok(None)`, not an error.
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError>;

    /// Write (insert or overwrite) a value.
    async fn set(&self, key: &str, value: Vec<u8>) -> Result<(), StoreError>;

    /// Remove a value. Returns whether the key existed.
    async fn delete(&self, key: &str) -> Result<bool, StoreError>;
}

/// Key holding a session record's metadata.
pub fn session_key(logical_id: &str) -> String {
    format!("session:{logical_id}")
}

/// Key holding the latest state snapshot for an identity.
pub fn snapshot_key(logical_id: &str) -> String {
    format!("snapshot:{logical_id}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_layout() {
        assert_eq!(session_key("p1"), "session:p1");
        assert_eq!(snapshot_key("p1"), "snapshot:p1");
    }
}
