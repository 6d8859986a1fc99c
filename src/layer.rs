//! The data-access and session recovery layer as one object.
//!
//! # Responsibilities
//! - Wire one engine, one registry, one snapshot protocol and the metrics
//!   collector over a single `DataStore`
//! - Expose the operations the game layer and transport call
//! - Own the cross-component sequences (terminate, reap, snapshot bookkeeping)
//!
//! # Design Decisions
//! - No globals: the binary builds one `SessionLayer` and shares it by `Arc`
//! - Only the session section of the config is hot-reloadable; breakers
//!   and the cache are sized once at startup

use arc_swap::ArcSwap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;

use crate::cache::FallbackCache;
use crate::config::schema::LayerConfig;
use crate::health::{CacheOccupancy, HealthReport};
use crate::lifecycle::maintenance::{run_cache_sweeper, run_reaper};
use crate::lifecycle::Shutdown;
use crate::observability::metrics::MetricsCollector;
use crate::resilience::{Fallback, OperationClass, ResilienceError, ResilientStore};
use crate::session::{Connection, ConnectionId, Registration, SessionError, SessionRecord, SessionRegistry};
use crate::snapshot::{RestoreOutcome, SnapshotError, SnapshotProtocol};
use crate::store::{DataStore, StoreError};

pub struct SessionLayer {
    engine: Arc<ResilientStore>,
    registry: SessionRegistry,
    snapshots: SnapshotProtocol,
    metrics: Arc<MetricsCollector>,
    config: ArcSwap<LayerConfig>,
}

impl SessionLayer {
    pub fn new(store: Arc<dyn DataStore>, config: &LayerConfig) -> Self {
        let metrics = Arc::new(MetricsCollector::new());
        let cache = Arc::new(FallbackCache::from_config(
            &config.fallback_cache,
            metrics.clone(),
        ));
        let engine = Arc::new(ResilientStore::new(store, config, cache, metrics.clone()));
        let registry = SessionRegistry::new(engine.clone(), config.session.clone(), metrics.clone());
        let snapshots = SnapshotProtocol::new(engine.clone(), metrics.clone());

        Self {
            engine,
            registry,
            snapshots,
            metrics,
            config: ArcSwap::from_pointee(config.clone()),
        }
    }

    /// Run any protected backing-store operation.
    pub async fn execute<T, F, Fut>(
        &self,
        class: OperationClass,
        operation: F,
        fallback: Option<Fallback<'_, T>>,
        timeout: Duration,
    ) -> Result<T, ResilienceError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, StoreError>>,
    {
        self.engine.execute(class, operation, fallback, timeout).await
    }

    pub async fn register(
        &self,
        logical_id: &str,
        connection: Arc<dyn Connection>,
    ) -> Result<Registration, SessionError> {
        self.registry.register(logical_id, connection).await
    }

    pub async fn mark_disconnected(&self, logical_id: &str) -> Result<(), SessionError> {
        self.registry.mark_disconnected(logical_id).await
    }

    pub async fn mark_connection_closed(&self, logical_id: &str, connection_id: ConnectionId) -> bool {
        self.registry.mark_connection_closed(logical_id, connection_id).await
    }

    /// Explicit leave: close, drop the session record and the snapshot.
    pub async fn terminate(&self, logical_id: &str) -> Option<SessionRecord> {
        self.registry
            .terminate_with(logical_id, |id| async move { self.purge_snapshot(&id).await })
            .await
    }

    pub async fn touch(&self, logical_id: &str) -> bool {
        self.registry.touch(logical_id).await
    }

    pub async fn get_session(&self, logical_id: &str) -> Option<SessionRecord> {
        self.registry.get(logical_id).await
    }

    /// Persist a new snapshot and note its version on the session record.
    pub async fn snapshot(
        &self,
        logical_id: &str,
        phase: &str,
        payload: serde_json::Value,
    ) -> Result<u64, SnapshotError> {
        let version = self.snapshots.snapshot(logical_id, phase, payload).await?;
        self.registry.note_snapshot(logical_id, version).await;
        Ok(version)
    }

    pub async fn restore(&self, logical_id: &str) -> Result<RestoreOutcome, SnapshotError> {
        self.snapshots.restore(logical_id).await
    }

    /// Expire sessions past their grace period and purge their snapshots.
    pub async fn reap(&self) -> Vec<String> {
        self.registry
            .reap_with(|id| async move { self.purge_snapshot(&id).await })
            .await
    }

    async fn purge_snapshot(&self, logical_id: &str) {
        if let Err(e) = self.snapshots.purge(logical_id).await {
            tracing::warn!(logical_id = %logical_id, error = %e, "Failed to purge snapshot");
        }
    }

    pub fn health(&self) -> HealthReport {
        let cache = self.engine.cache();
        HealthReport::new(
            self.engine.breaker_snapshots(),
            CacheOccupancy {
                entries: cache.len(),
                capacity: cache.capacity(),
            },
            self.registry.counts(),
            self.metrics.snapshot(),
        )
    }

    /// Apply a reloaded configuration.
    pub fn reload(&self, config: &LayerConfig) {
        let current = self.config.load_full();
        if current.breakers != config.breakers
            || current.fallback_cache != config.fallback_cache
            || current.operations != config.operations
        {
            tracing::warn!("Breaker, cache and operation settings require a restart; ignoring those changes");
        }
        if current.session != config.session {
            tracing::info!(
                probe_timeout_ms = config.session.probe_timeout_ms,
                grace_period_secs = config.session.grace_period_secs,
                reap_interval_secs = config.session.reap_interval_secs,
                "Session settings reloaded"
            );
        }
        self.registry.update_config(config.session.clone());

        let mut applied = (*current).clone();
        applied.session = config.session.clone();
        self.config.store(Arc::new(applied));
    }

    /// Start the session reaper and the fallback cache sweeper.
    pub fn spawn_maintenance(self: &Arc<Self>, shutdown: &Shutdown) -> Vec<JoinHandle<()>> {
        let sweep_interval = self.config.load().fallback_cache.sweep_interval();
        vec![
            tokio::spawn(run_reaper(self.clone(), shutdown.subscribe())),
            tokio::spawn(run_cache_sweeper(
                self.engine.cache().clone(),
                sweep_interval,
                shutdown.subscribe(),
            )),
        ]
    }

    pub fn engine(&self) -> &Arc<ResilientStore> {
        &self.engine
    }

    pub fn registry(&self) -> &SessionRegistry {
        &self.registry
    }

    pub fn snapshots(&self) -> &SnapshotProtocol {
        &self.snapshots
    }

    pub fn metrics(&self) -> &Arc<MetricsCollector> {
        &self.metrics
    }

    /// Configuration in effect (session section reflects the last reload).
    pub fn config(&self) -> Arc<LayerConfig> {
        self.config.load_full()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::schema::SessionConfig;
    use crate::store::MemoryStore;

    #[tokio::test]
    async fn test_reload_applies_session_section_only() {
        let layer = SessionLayer::new(Arc::new(MemoryStore::new()), &LayerConfig::default());

        let mut changed = LayerConfig::default();
        changed.session = SessionConfig {
            grace_period_secs: 5,
            ..SessionConfig::default()
        };
        changed.breakers.read.failure_threshold = 1;
        layer.reload(&changed);

        assert_eq!(layer.registry().config().grace_period_secs, 5);
        assert_eq!(layer.config().session.grace_period_secs, 5);
        assert_eq!(layer.config().breakers.read.failure_threshold, 5);
        assert_eq!(
            layer.engine().breaker(OperationClass::Read).config().failure_threshold,
            5
        );
    }

    #[tokio::test]
    async fn test_health_of_fresh_layer() {
        let layer = SessionLayer::new(Arc::new(MemoryStore::new()), &LayerConfig::default());
        let report = layer.health();
        assert!(!report.is_degraded());
        assert_eq!(report.breakers.len(), 3);
        assert_eq!(report.cache.capacity, 10_000);
        assert_eq!(report.sessions.active, 0);
    }
}
