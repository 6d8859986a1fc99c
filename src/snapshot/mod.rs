//! State snapshot / restore protocol.
//!
//! # Data Flow
//! ```text
//! snapshot(id, phase, payload)
//!     → lock cursor(id)
//!     → ResilientStore::get_fresh("snapshot:{id}")   (authoritative version)
//!     → version = max(stored, observed) + 1
//!     → ResilientStore::set("snapshot:{id}")
//!
//! restore(id)
//!     → lock cursor(id)
//!     → ResilientStore::get("snapshot:{id}")         (fallback cache while Open)
//!     → reject versions below the observed cursor
//! ```
//!
//! # Design Decisions
//! - Payloads are opaque JSON values; only the envelope is interpreted
//! - The cursor is the highest version this process wrote or restored
//! - Writes fail rather than guess a version when the store can't be read

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::Mutex;

use crate::observability::metrics::{MetricsCollector, SnapshotEvent};
use crate::resilience::{ResilienceError, ResilientStore};
use crate::session::record::unix_millis;
use crate::store::snapshot_key;

/// One persisted state hand-off point.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateSnapshot {
    pub logical_id: String,
    pub version: u64,
    /// Game phase marker, chosen by the caller.
    pub phase: String,
    pub payload: serde_json::Value,
    /// Unix time in milliseconds.
    pub taken_at_ms: u64,
}

/// Result of a restore that reached the store (or its fallback).
#[derive(Debug, Clone, PartialEq)]
pub enum RestoreOutcome {
    Restored(StateSnapshot),
    /// Nothing was ever snapshotted for this identity.
    NotFound,
}

impl RestoreOutcome {
    pub fn into_snapshot(self) -> Option<StateSnapshot> {
        match self {
            RestoreOutcome::Restored(snapshot) => Some(snapshot),
            RestoreOutcome::NotFound => None,
        }
    }
}

#[derive(Debug, Clone, Error, PartialEq)]
pub enum SnapshotError {
    /// The latest state could not be fetched (store down, no fallback).
    #[error("state for {logical_id} is unavailable: {source}")]
    StaleState {
        logical_id: String,
        #[source]
        source: ResilienceError,
    },

    /// The fetched snapshot is older than one already observed.
    #[error("snapshot for {logical_id} regressed to version {found}, already observed {observed}")]
    VersionRegression {
        logical_id: String,
        found: u64,
        observed: u64,
    },

    #[error("snapshot for {logical_id} is corrupt: {reason}")]
    Corrupt { logical_id: String, reason: String },

    /// Reading the current version or writing the new snapshot failed.
    #[error("snapshot store operation for {logical_id} failed: {source}")]
    Store {
        logical_id: String,
        #[source]
        source: ResilienceError,
    },
}

impl SnapshotError {
    pub fn logical_id(&self) -> &str {
        match self {
            SnapshotError::StaleState { logical_id, .. }
            | SnapshotError::VersionRegression { logical_id, .. }
            | SnapshotError::Corrupt { logical_id, .. }
            | SnapshotError::Store { logical_id, .. } => logical_id,
        }
    }

    /// Whether the caller is looking at possibly outdated state.
    pub fn is_stale(&self) -> bool {
        matches!(
            self,
            SnapshotError::StaleState { .. } | SnapshotError::VersionRegression { .. }
        )
    }
}

/// Versioned snapshot writer/reader.
pub struct SnapshotProtocol {
    engine: Arc<ResilientStore>,
    cursors: DashMap<String, Arc<Mutex<u64>>>,
    metrics: Arc<MetricsCollector>,
}

impl SnapshotProtocol {
    pub fn new(engine: Arc<ResilientStore>, metrics: Arc<MetricsCollector>) -> Self {
        Self {
            engine,
            cursors: DashMap::new(),
            metrics,
        }
    }

    fn cursor(&self, logical_id: &str) -> Arc<Mutex<u64>> {
        self.cursors
            .entry(logical_id.to_string())
            .or_default()
            .clone()
    }

    /// Persist a new snapshot. Returns its version.
    pub async fn snapshot(
        &self,
        logical_id: &str,
        phase: &str,
        payload: serde_json::Value,
    ) -> Result<u64, SnapshotError> {
        let cursor = self.cursor(logical_id);
        let mut observed = cursor.lock().await;
        let key = snapshot_key(logical_id);

        let stored = match self.engine.get_fresh(&key).await {
            Ok(Some(bytes)) => decode(logical_id, &bytes)?.version,
            Ok(None) => 0,
            Err(source) => {
                self.metrics.record_snapshot_event(SnapshotEvent::WriteFailed);
                return Err(SnapshotError::Store {
                    logical_id: logical_id.to_string(),
                    source,
                });
            }
        };

        let snapshot = StateSnapshot {
            logical_id: logical_id.to_string(),
            version: stored.max(*observed) + 1,
            phase: phase.to_string(),
            payload,
            taken_at_ms: unix_millis(),
        };
        let bytes = serde_json::to_vec(&snapshot).map_err(|e| SnapshotError::Corrupt {
            logical_id: logical_id.to_string(),
            reason: e.to_string(),
        })?;

        if let Err(source) = self.engine.set(&key, bytes).await {
            self.metrics.record_snapshot_event(SnapshotEvent::WriteFailed);
            return Err(SnapshotError::Store {
                logical_id: logical_id.to_string(),
                source,
            });
        }

        *observed = snapshot.version;
        self.metrics.record_snapshot_event(SnapshotEvent::Written);
        tracing::debug!(
            logical_id = %logical_id,
            version = snapshot.version,
            phase = %snapshot.phase,
            "Snapshot written"
        );
        Ok(snapshot.version)
    }

    /// Fetch the latest snapshot for a returning identity.
    pub async fn restore(&self, logical_id: &str) -> Result<RestoreOutcome, SnapshotError> {
        let cursor = self.cursor(logical_id);
        let mut observed = cursor.lock().await;
        let result = self.restore_locked(logical_id, &mut observed).await;

        // nothing written or restored for this id: keep no cursor for it
        if *observed == 0 {
            self.cursors
                .remove_if(logical_id, |_, current| Arc::ptr_eq(current, &cursor));
        }
        result
    }

    async fn restore_locked(
        &self,
        logical_id: &str,
        observed: &mut u64,
    ) -> Result<RestoreOutcome, SnapshotError> {
        let bytes = match self.engine.get(&snapshot_key(logical_id)).await {
            Ok(Some(bytes)) => bytes,
            Ok(None) => {
                self.metrics.record_snapshot_event(SnapshotEvent::NotFound);
                return Ok(RestoreOutcome::NotFound);
            }
            Err(source) if source.is_domain() => {
                return Err(SnapshotError::Store {
                    logical_id: logical_id.to_string(),
                    source,
                });
            }
            Err(source) => {
                self.metrics.record_snapshot_event(SnapshotEvent::Stale);
                tracing::warn!(logical_id = %logical_id, error = %source, "Snapshot unavailable");
                return Err(SnapshotError::StaleState {
                    logical_id: logical_id.to_string(),
                    source,
                });
            }
        };

        let snapshot = decode(logical_id, &bytes)?;
        if snapshot.version < *observed {
            self.metrics.record_snapshot_event(SnapshotEvent::Stale);
            tracing::warn!(
                logical_id = %logical_id,
                found = snapshot.version,
                observed = *observed,
                "Snapshot version regressed"
            );
            return Err(SnapshotError::VersionRegression {
                logical_id: logical_id.to_string(),
                found: snapshot.version,
                observed: *observed,
            });
        }

        *observed = snapshot.version;
        self.metrics.record_snapshot_event(SnapshotEvent::Restored);
        Ok(RestoreOutcome::Restored(snapshot))
    }

    /// Delete the stored snapshot and forget the cursor.
    pub async fn purge(&self, logical_id: &str) -> Result<bool, SnapshotError> {
        let cursor = self.cursor(logical_id);
        let _observed = cursor.lock().await;

        let existed = self
            .engine
            .delete(&snapshot_key(logical_id))
            .await
            .map_err(|source| SnapshotError::Store {
                logical_id: logical_id.to_string(),
                source,
            })?;
        self.cursors
            .remove_if(logical_id, |_, current| Arc::ptr_eq(current, &cursor));
        self.metrics.record_snapshot_event(SnapshotEvent::Purged);
        Ok(existed)
    }

    /// Identities with a version cursor.
    pub fn cursor_count(&self) -> usize {
        self.cursors.len()
    }

    /// Highest version this process wrote or restored for `logical_id`.
    pub async fn last_observed(&self, logical_id: &str) -> Option<u64> {
        let cursor = self.cursors.get(logical_id)?.value().clone();
        let observed = *cursor.lock().await;
        (observed > 0).then_some(observed)
    }
}

fn decode(logical_id: &str, bytes: &[u8]) -> Result<StateSnapshot, SnapshotError> {
    let snapshot: StateSnapshot =
        serde_json::from_slice(bytes).map_err(|e| SnapshotError::Corrupt {
            logical_id: logical_id.to_string(),
            reason: e.to_string(),
        })?;
    if snapshot.logical_id != logical_id {
        return Err(SnapshotError::Corrupt {
            logical_id: logical_id.to_string(),
            reason: format!("envelope belongs to {}", snapshot.logical_id),
        });
    }
    Ok(snapshot)
}
