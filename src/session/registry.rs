//! Session registry.
//!
//! # Responsibilities
//! - Enforce at most one Active session per logical id
//! - Probe the incumbent connection before letting a newcomer take over
//! - Keep disconnected sessions for a grace period, then reap them
//! - Persist session metadata through the engine (best effort)
//!
//! # Design Decisions
//! - One async mutex per logical id; different ids never contend
//! - A slot removed from the map is marked `retired` under its lock, so a
//!   task that raced the removal retries with a fresh slot instead of
//!   writing into an orphan
//! - The in-process registry is authoritative for liveness; a failed
//!   metadata write is logged and counted, never surfaced

use arc_swap::ArcSwap;
use dashmap::DashMap;
use std::future::Future;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tokio::time::Instant;

use crate::config::schema::SessionConfig;
use crate::observability::metrics::{MetricsCollector, SessionEvent};
use crate::resilience::ResilientStore;
use crate::session::connection::{Connection, ConnectionId};
use crate::session::liveness::LivenessProber;
use crate::session::record::{unix_millis, SessionRecord, SessionStatus};
use crate::store::session_key;

/// Errors surfaced by the registry.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SessionError {
    /// The incumbent connection answered its liveness probe.
    #[error("{logical_id} already has a live connection")]
    AlreadyConnected { logical_id: String },

    #[error("no session registered for {logical_id}")]
    NotRegistered { logical_id: String },
}

/// Successful registration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Registration {
    pub record: SessionRecord,
    /// The previous Active record, if the newcomer took over a dead connection.
    pub superseded: Option<SessionRecord>,
    /// Whether the identity had a record before (caller should `restore`).
    pub resumed: bool,
}

/// Active / disconnected totals.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize)]
pub struct SessionCounts {
    pub active: usize,
    pub disconnected: usize,
}

struct SessionEntry {
    record: SessionRecord,
    connection: Arc<dyn Connection>,
    disconnected_at: Option<Instant>,
}

#[derive(Default)]
struct Slot {
    retired: bool,
    entry: Option<SessionEntry>,
}

type SlotHandle = Arc<Mutex<Slot>>;

/// Registry of logical player sessions.
pub struct SessionRegistry {
    slots: DashMap<String, SlotHandle>,
    engine: Arc<ResilientStore>,
    config: ArcSwap<SessionConfig>,
    metrics: Arc<MetricsCollector>,
}

impl SessionRegistry {
    pub fn new(engine: Arc<ResilientStore>, config: SessionConfig, metrics: Arc<MetricsCollector>) -> Self {
        Self {
            slots: DashMap::new(),
            engine,
            config: ArcSwap::from_pointee(config),
            metrics,
        }
    }

    /// Current session timings.
    pub fn config(&self) -> Arc<SessionConfig> {
        self.config.load_full()
    }

    /// Swap session timings; takes effect on the next call.
    pub fn update_config(&self, config: SessionConfig) {
        self.config.store(Arc::new(config));
    }

    /// Lock the slot for `logical_id`, creating it if needed.
    async fn lock_slot(&self, logical_id: &str) -> OwnedMutexGuard<Slot> {
        loop {
            let slot = self
                .slots
                .entry(logical_id.to_string())
                .or_default()
                .clone();
            let guard = slot.lock_owned().await;
            if !guard.retired {
                return guard;
            }
        }
    }

    /// Lock the slot for `logical_id` only if it exists.
    async fn lock_existing(&self, logical_id: &str) -> Option<(SlotHandle, OwnedMutexGuard<Slot>)> {
        loop {
            let slot = self.slots.get(logical_id)?.value().clone();
            let guard = slot.clone().lock_owned().await;
            if !guard.retired {
                return Some((slot, guard));
            }
        }
    }

    fn retire(&self, logical_id: &str, slot: &SlotHandle, guard: &mut Slot) {
        guard.retired = true;
        self.slots.remove_if(logical_id, |_, current| Arc::ptr_eq(current, slot));
    }

    /// Register `connection` as the live connection for `logical_id`.
    ///
    /// An Active incumbent is probed first. If it answers, the call fails
    /// with `AlreadyConnected`; otherwise the incumbent is closed, marked
    /// Disconnected and replaced.
    pub async fn register(
        &self,
        logical_id: &str,
        connection: Arc<dyn Connection>,
    ) -> Result<Registration, SessionError> {
        let mut slot = self.lock_slot(logical_id).await;
        let connection_id = connection.id();
        let config = self.config();

        let mut superseded = None;
        let mut resumed = false;
        let mut snapshot_version = 0;

        if let Some(entry) = slot.entry.as_mut() {
            if entry.record.connection_id == connection_id && entry.record.is_active() {
                return Ok(Registration {
                    record: entry.record.clone(),
                    superseded: None,
                    resumed: false,
                });
            }

            if entry.record.is_active() {
                let prober = LivenessProber::new(config.probe_timeout());
                let liveness = prober.probe(entry.connection.as_ref()).await;
                if liveness.is_alive() {
                    tracing::info!(
                        logical_id = %logical_id,
                        incumbent = %entry.record.connection_id,
                        rejected = %connection_id,
                        "Session conflict, incumbent is alive"
                    );
                    self.metrics.record_session_event(SessionEvent::Conflict);
                    return Err(SessionError::AlreadyConnected {
                        logical_id: logical_id.to_string(),
                    });
                }

                tracing::info!(
                    logical_id = %logical_id,
                    incumbent = %entry.record.connection_id,
                    replacement = %connection_id,
                    liveness = liveness.as_str(),
                    "Superseding stale session"
                );
                if entry.connection.is_open() {
                    let _ = tokio::time::timeout(prober.deadline(), entry.connection.close()).await;
                }
                entry.record.status = SessionStatus::Disconnected;
                entry.disconnected_at = Some(Instant::now());
                superseded = Some(entry.record.clone());
                self.metrics.record_session_event(SessionEvent::Takeover);
            }

            resumed = true;
            snapshot_version = entry.record.snapshot_version;
        }

        let record = SessionRecord::active(logical_id, connection_id, snapshot_version);
        slot.entry = Some(SessionEntry {
            record: record.clone(),
            connection,
            disconnected_at: None,
        });
        self.persist(&record).await;
        drop(slot);

        self.metrics.record_session_event(SessionEvent::Registered);
        tracing::debug!(logical_id = %logical_id, connection_id = %connection_id, resumed, "Session registered");
        Ok(Registration {
            record,
            superseded,
            resumed,
        })
    }

    /// Move the session to Disconnected and start its grace period.
    pub async fn mark_disconnected(&self, logical_id: &str) -> Result<(), SessionError> {
        let Some((_, mut slot)) = self.lock_existing(logical_id).await else {
            return Err(SessionError::NotRegistered {
                logical_id: logical_id.to_string(),
            });
        };
        let Some(entry) = slot.entry.as_mut() else {
            return Err(SessionError::NotRegistered {
                logical_id: logical_id.to_string(),
            });
        };
        if let Some(record) = Self::disconnect(entry) {
            self.metrics.record_session_event(SessionEvent::Disconnected);
            self.persist(&record).await;
        }
        Ok(())
    }

    /// Transport variant of `mark_disconnected`: only acts if the session
    /// still belongs to `connection_id`. Returns whether it did.
    pub async fn mark_connection_closed(&self, logical_id: &str, connection_id: ConnectionId) -> bool {
        let Some((_, mut slot)) = self.lock_existing(logical_id).await else {
            return false;
        };
        let Some(entry) = slot.entry.as_mut() else {
            return false;
        };
        if entry.record.connection_id != connection_id {
            return false;
        }
        match Self::disconnect(entry) {
            Some(record) => {
                self.metrics.record_session_event(SessionEvent::Disconnected);
                self.persist(&record).await;
                true
            }
            None => false,
        }
    }

    fn disconnect(entry: &mut SessionEntry) -> Option<SessionRecord> {
        if !entry.record.is_active() {
            return None;
        }
        entry.record.status = SessionStatus::Disconnected;
        entry.record.last_seen_ms = unix_millis();
        entry.disconnected_at = Some(Instant::now());
        Some(entry.record.clone())
    }

    /// Explicit leave: close the connection and purge the record now.
    pub async fn terminate(&self, logical_id: &str) -> Option<SessionRecord> {
        self.terminate_with(logical_id, |_| async {}).await
    }

    /// `terminate`, running `purge` for the identity before its slot is
    /// released, so a returning player can't register in between.
    pub async fn terminate_with<F, Fut>(&self, logical_id: &str, purge: F) -> Option<SessionRecord>
    where
        F: FnOnce(String) -> Fut,
        Fut: Future<Output = ()>,
    {
        let (handle, mut slot) = self.lock_existing(logical_id).await?;
        let Some(mut entry) = slot.entry.take() else {
            self.retire(logical_id, &handle, &mut slot);
            return None;
        };

        if entry.connection.is_open() {
            let timeout = self.config().probe_timeout();
            let _ = tokio::time::timeout(timeout, entry.connection.close()).await;
        }
        entry.record.status = SessionStatus::Expired;
        self.forget(logical_id).await;
        purge(logical_id.to_string()).await;
        self.retire(logical_id, &handle, &mut slot);
        drop(slot);

        self.metrics.record_session_event(SessionEvent::Terminated);
        tracing::info!(logical_id = %logical_id, "Session terminated");
        Some(entry.record)
    }

    /// Refresh `last_seen` for an Active session.
    pub async fn touch(&self, logical_id: &str) -> bool {
        let Some((_, mut slot)) = self.lock_existing(logical_id).await else {
            return false;
        };
        match slot.entry.as_mut() {
            Some(entry) if entry.record.is_active() => {
                entry.record.last_seen_ms = unix_millis();
                true
            }
            _ => false,
        }
    }

    /// Remember the latest snapshot version on the record.
    pub async fn note_snapshot(&self, logical_id: &str, version: u64) {
        let Some((_, mut slot)) = self.lock_existing(logical_id).await else {
            return;
        };
        let Some(entry) = slot.entry.as_mut() else {
            return;
        };
        if version <= entry.record.snapshot_version {
            return;
        }
        entry.record.snapshot_version = version;
        let record = entry.record.clone();
        self.persist(&record).await;
    }

    pub async fn get(&self, logical_id: &str) -> Option<SessionRecord> {
        let (_, slot) = self.lock_existing(logical_id).await?;
        slot.entry.as_ref().map(|entry| entry.record.clone())
    }

    /// Purge sessions disconnected longer than the grace period.
    ///
    /// Slots busy with a registration are skipped until the next round.
    /// Returns the logical ids that expired.
    pub async fn reap(&self) -> Vec<String> {
        self.reap_with(|_| async {}).await
    }

    /// `reap`, running `purge` for every expired identity while its slot is
    /// still locked. A registration racing the reaper waits, then starts a
    /// fresh session.
    pub async fn reap_with<F, Fut>(&self, purge: F) -> Vec<String>
    where
        F: Fn(String) -> Fut,
        Fut: Future<Output = ()>,
    {
        let grace = self.config().grace_period();
        let candidates: Vec<(String, SlotHandle)> = self
            .slots
            .iter()
            .map(|slot| (slot.key().clone(), slot.value().clone()))
            .collect();

        let mut expired = Vec::new();
        for (logical_id, handle) in candidates {
            let Ok(mut slot) = handle.clone().try_lock_owned() else {
                continue;
            };
            if slot.retired {
                continue;
            }
            let due = match &slot.entry {
                None => true,
                Some(entry) => entry
                    .disconnected_at
                    .map(|at| at.elapsed() >= grace && !entry.record.is_active())
                    .unwrap_or(false),
            };
            if !due {
                continue;
            }

            if slot.entry.take().is_some() {
                self.forget(&logical_id).await;
                purge(logical_id.clone()).await;
                self.metrics.record_session_event(SessionEvent::Expired);
                tracing::info!(logical_id = %logical_id, "Session expired");
                expired.push(logical_id.clone());
            }
            self.retire(&logical_id, &handle, &mut slot);
        }
        expired
    }

    /// Active and disconnected sessions. Busy slots are counted as they
    /// were last seen by whoever holds them, i.e. skipped.
    pub fn counts(&self) -> SessionCounts {
        let mut counts = SessionCounts::default();
        for slot in self.slots.iter() {
            let Ok(slot) = slot.value().try_lock() else {
                continue;
            };
            match slot.entry.as_ref().map(|entry| entry.record.status) {
                Some(SessionStatus::Active) => counts.active += 1,
                Some(SessionStatus::Disconnected) => counts.disconnected += 1,
                _ => {}
            }
        }
        counts
    }

    async fn persist(&self, record: &SessionRecord) {
        let bytes = match serde_json::to_vec(record) {
            Ok(bytes) => bytes,
            Err(e) => {
                tracing::warn!(logical_id = %record.logical_id, error = %e, "Failed to encode session record");
                self.metrics.record_session_event(SessionEvent::PersistFailed);
                return;
            }
        };
        if let Err(e) = self.engine.set(&session_key(&record.logical_id), bytes).await {
            tracing::warn!(logical_id = %record.logical_id, error = %e, "Failed to persist session record");
            self.metrics.record_session_event(SessionEvent::PersistFailed);
        }
    }

    async fn forget(&self, logical_id: &str) {
        if let Err(e) = self.engine.delete(&session_key(logical_id)).await {
            tracing::warn!(logical_id = %logical_id, error = %e, "Failed to delete session record");
            self.metrics.record_session_event(SessionEvent::PersistFailed);
        }
    }
}
