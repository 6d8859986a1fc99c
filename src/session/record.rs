//! Session record as persisted under `session:{logical_id}`.

use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};

use crate::session::connection::ConnectionId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Active,
    Disconnected,
    Expired,
}

impl SessionStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            SessionStatus::Active => "active",
            SessionStatus::Disconnected => "disconnected",
            SessionStatus::Expired => "expired",
        }
    }
}

/// Metadata for one logical player identity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionRecord {
    pub logical_id: String,
    pub connection_id: ConnectionId,
    pub status: SessionStatus,
    /// Unix time in milliseconds.
    pub last_seen_ms: u64,
    pub snapshot_version: u64,
}

impl SessionRecord {
    pub fn active(logical_id: &str, connection_id: ConnectionId, snapshot_version: u64) -> Self {
        Self {
            logical_id: logical_id.to_string(),
            connection_id,
            status: SessionStatus::Active,
            last_seen_ms: unix_millis(),
            snapshot_version,
        }
    }

    pub fn is_active(&self) -> bool {
        self.status == SessionStatus::Active
    }
}

pub(crate) fn unix_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}
