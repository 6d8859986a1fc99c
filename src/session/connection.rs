//! Transport connection seam.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;
use uuid::Uuid;

/// Identity of one physical connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConnectionId(Uuid);

impl ConnectionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Why a liveness probe could not complete.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ProbeError {
    #[error("connection is closed")]
    Closed,

    #[error("probe failed: {0}")]
    Transport(String),
}

/// A live transport connection, as seen by the session registry.
///
/// The registry owns the handle exclusively while the session is Active and
/// closes it when a newer connection supersedes it.
#[async_trait]
pub trait Connection: Send + Sync {
    fn id(&self) -> ConnectionId;

    /// One round trip (ping/pong). Completes when the peer answered.
    async fn probe(&self) -> Result<(), ProbeError>;

    /// Close the connection. Must be idempotent.
    async fn close(&self);

    fn is_open(&self) -> bool;
}
