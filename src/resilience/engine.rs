//! Circuit breaker engine.
//!
//! # Responsibilities
//! - Wrap every backing-store call with admission, deadline, retry and
//!   breaker accounting
//! - Serve fallbacks when the store is unavailable
//! - Keep the fallback cache in step with the store for `get`/`set`/`delete`
//!
//! # Data Flow
//! ```text
//! execute(class, op, fallback, timeout)
//!   ├─ breaker rejects  → fallback() or CircuitOpen
//!   ├─ Closed permit    → retries (Transient only) → settle permit
//!   ├─ HalfOpen trial   → single attempt          → settle permit
//!   └─ failure          → Domain: propagate as-is
//!                         else:   fallback() or the classified error
//! ```

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

use crate::cache::FallbackCache;
use crate::config::schema::LayerConfig;
use crate::observability::metrics::{MetricsCollector, OperationEvent, OperationOutcome};
use crate::resilience::circuit_breaker::{BreakerSnapshot, CircuitBreaker, CircuitState};
use crate::resilience::classifier::{Classify, ErrorClass};
use crate::resilience::retries::RetryCoordinator;
use crate::resilience::timeouts::with_deadline;
use crate::resilience::{OperationClass, ResilienceError};
use crate::store::{DataStore, StoreError};

/// Value producer used when the store cannot answer. `None` means the
/// fallback has nothing either and the failure is propagated.
pub type Fallback<'a, T> = Box<dyn FnOnce() -> Option<T> + Send + 'a>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ServedBy {
    Primary,
    Trial,
    Fallback,
}

/// The protected access path to a [`DataStore`].
pub struct ResilientStore {
    store: Arc<dyn DataStore>,
    breakers: [CircuitBreaker; 3],
    retries: [RetryCoordinator; 3],
    cache: Arc<FallbackCache>,
    metrics: Arc<MetricsCollector>,
    default_timeout: Duration,
}

impl ResilientStore {
    pub fn new(
        store: Arc<dyn DataStore>,
        config: &LayerConfig,
        cache: Arc<FallbackCache>,
        metrics: Arc<MetricsCollector>,
    ) -> Self {
        let breaker = |class: OperationClass| {
            CircuitBreaker::new(
                class,
                config.breakers.for_class(class).clone(),
                metrics.clone(),
            )
        };
        let retry = |class: OperationClass| {
            RetryCoordinator::new(class, config.breakers.for_class(class).retry_policy())
        };

        Self {
            store,
            breakers: OperationClass::ALL.map(breaker),
            retries: OperationClass::ALL.map(retry),
            cache,
            metrics: metrics.clone(),
            default_timeout: config.operations.timeout(),
        }
    }

    /// Build with a fresh cache and metrics collector.
    pub fn from_config(store: Arc<dyn DataStore>, config: &LayerConfig) -> Self {
        let metrics = Arc::new(MetricsCollector::new());
        let cache = Arc::new(FallbackCache::from_config(
            &config.fallback_cache,
            metrics.clone(),
        ));
        Self::new(store, config, cache, metrics)
    }

    pub fn breaker(&self, class: OperationClass) -> &CircuitBreaker {
        &self.breakers[class.index()]
    }

    pub fn breaker_snapshots(&self) -> Vec<BreakerSnapshot> {
        self.breakers.iter().map(CircuitBreaker::snapshot).collect()
    }

    pub fn cache(&self) -> &Arc<FallbackCache> {
        &self.cache
    }

    pub fn metrics(&self) -> &Arc<MetricsCollector> {
        &self.metrics
    }

    pub fn default_timeout(&self) -> Duration {
        self.default_timeout
    }

    /// Run `operation` through the breaker for `class`.
    ///
    /// Each attempt gets `timeout`. Transient failures are retried while the
    /// breaker is Closed. When the breaker rejects the call, or the final
    /// failure is Transient or Persistent, `fallback` is consulted before the
    /// error is returned. Domain failures are returned immediately.
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
        self.run(class, operation, fallback, timeout)
            .await
            .map(|(value, _)| value)
    }

    async fn run<T, F, Fut>(
        &self,
        class: OperationClass,
        mut operation: F,
        fallback: Option<Fallback<'_, T>>,
        timeout: Duration,
    ) -> Result<(T, ServedBy), ResilienceError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, StoreError>>,
    {
        let started = Instant::now();

        let Some(permit) = self.breaker(class).try_acquire() else {
            self.metrics.record_rejection(class);
            return self.fall_back(class, fallback, started, ResilienceError::CircuitOpen { class });
        };

        let trial = permit.is_trial();
        let retry = if trial {
            self.retries[class.index()].single_shot()
        } else {
            self.retries[class.index()]
        };

        // an Open (or otherwise changed) breaker admits no further attempts
        let (result, retries) = retry
            .run_while(|| with_deadline(timeout, operation()), || permit.is_current())
            .await;
        self.metrics.record_retries(class, retries);

        match result {
            Ok(value) => {
                permit.succeed();
                self.metrics.record_outcome(OperationEvent::now(
                    class,
                    OperationOutcome::Success,
                    started.elapsed(),
                ));
                let served = if trial { ServedBy::Trial } else { ServedBy::Primary };
                Ok((value, served))
            }
            Err(err) => {
                let kind = err.error_class();
                permit.fail(kind);
                let err = ResilienceError::from_attempt(class, err);
                if kind == ErrorClass::Domain {
                    self.metrics.record_outcome(OperationEvent::now(
                        class,
                        OperationOutcome::Failure(kind),
                        started.elapsed(),
                    ));
                    return Err(err);
                }
                tracing::debug!(class = %class, kind = %kind, error = %err, "Store operation failed");
                self.fall_back(class, fallback, started, err)
            }
        }
    }

    fn fall_back<T>(
        &self,
        class: OperationClass,
        fallback: Option<Fallback<'_, T>>,
        started: Instant,
        err: ResilienceError,
    ) -> Result<(T, ServedBy), ResilienceError> {
        if let Some(value) = fallback.and_then(|produce| produce()) {
            self.metrics.record_outcome(OperationEvent::now(
                class,
                OperationOutcome::FallbackServed,
                started.elapsed(),
            ));
            return Ok((value, ServedBy::Fallback));
        }
        // rejections were already counted
        if let Some(kind) = err.error_class() {
            self.metrics.record_outcome(OperationEvent::now(
                class,
                OperationOutcome::Failure(kind),
                started.elapsed(),
            ));
        }
        Err(err)
    }

    /// Protected read. Served from the fallback cache only while the read
    /// breaker is Open.
    pub async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, ResilienceError> {
        let store = &self.store;
        let fallback: Fallback<'_, Option<Vec<u8>>> = Box::new(move || {
            if self.breaker(OperationClass::Read).state() != CircuitState::Open {
                return None;
            }
            self.cache.get(key).map(Some)
        });

        let (value, served) = self
            .run(
                OperationClass::Read,
                move || store.get(key),
                Some(fallback),
                self.default_timeout,
            )
            .await?;

        match (&value, served) {
            (Some(bytes), ServedBy::Primary) => self.cache.put_default(key, bytes.clone()),
            (None, ServedBy::Primary | ServedBy::Trial) => {
                self.cache.invalidate(key);
            }
            _ => {}
        }
        Ok(value)
    }

    /// Read that never consults the fallback cache.
    pub async fn get_fresh(&self, key: &str) -> Result<Option<Vec<u8>>, ResilienceError> {
        let store = &self.store;
        self.execute(
            OperationClass::Read,
            move || store.get(key),
            None,
            self.default_timeout,
        )
        .await
    }

    /// Protected write. A successful write drops the key's fallback entry.
    pub async fn set(&self, key: &str, value: Vec<u8>) -> Result<(), ResilienceError> {
        let store = &self.store;
        self.execute(
            OperationClass::Write,
            move || store.set(key, value.clone()),
            None,
            self.default_timeout,
        )
        .await?;
        self.cache.invalidate(key);
        Ok(())
    }

    /// Protected delete. A successful delete drops the key's fallback entry.
    pub async fn delete(&self, key: &str) -> Result<bool, ResilienceError> {
        let store = &self.store;
        let existed = self
            .execute(
                OperationClass::Delete,
                move || store.delete(key),
                None,
                self.default_timeout,
            )
            .await?;
        self.cache.invalidate(key);
        Ok(existed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::schema::BreakerConfig;
    use crate::store::MemoryStore;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

    /// Memory store that can be switched into a connection outage.
    #[derive(Default)]
    struct SwitchableStore {
        inner: MemoryStore,
        down: AtomicBool,
    }

    impl SwitchableStore {
        fn check(&self) -> Result<(), StoreError> {
            if self.down.load(Ordering::SeqCst) {
                Err(StoreError::Connection("refused".into()))
            } else {
                Ok(())
            }
        }
    }

    #[async_trait]
    impl DataStore for SwitchableStore {
        async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
            self.check()?;
            self.inner.get(key).await
        }

        async fn set(&self, key: &str, value: Vec<u8>) -> Result<(), StoreError> {
            self.check()?;
            self.inner.set(key, value).await
        }

        async fn delete(&self, key: &str) -> Result<bool, StoreError> {
            self.check()?;
            self.inner.delete(key).await
        }
    }

    fn config() -> LayerConfig {
        let breaker = BreakerConfig {
            failure_threshold: 2,
            success_threshold: 1,
            timeout_secs: 10,
            max_retry_attempts: 0,
            ..BreakerConfig::default()
        };
        let mut config = LayerConfig::default();
        config.breakers.read = breaker.clone();
        config.breakers.write = breaker.clone();
        config.breakers.delete = breaker;
        config
    }

    fn engine(store: Arc<dyn DataStore>) -> ResilientStore {
        ResilientStore::from_config(store, &config())
    }

    #[tokio::test(start_paused = true)]
    async fn test_open_breaker_skips_operation_and_serves_fallback() {
        let engine = engine(Arc::new(MemoryStore::new()));
        let calls = AtomicU32::new(0);
        let calls = &calls;

        for _ in 0..2 {
            let result: Result<u32, _> = engine
                .execute(
                    OperationClass::Read,
                    move || async move {
                        calls.fetch_add(1, Ordering::SeqCst);
                        Err(StoreError::Timeout("slow".into()))
                    },
                    None,
                    Duration::from_secs(1),
                )
                .await;
            assert!(matches!(result, Err(ResilienceError::Store { kind: ErrorClass::Transient, .. })));
        }
        assert_eq!(engine.breaker(OperationClass::Read).state(), CircuitState::Open);

        let value = engine
            .execute(
                OperationClass::Read,
                move || async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Ok(1)
                },
                Some(Box::new(|| Some(99))),
                Duration::from_secs(1),
            )
            .await
            .unwrap();
        assert_eq!(value, 99);
        assert_eq!(calls.load(Ordering::SeqCst), 2);

        let rejected: Result<u32, _> = engine
            .execute(OperationClass::Read, || async { Ok(1) }, None, Duration::from_secs(1))
            .await;
        assert_eq!(
            rejected.unwrap_err(),
            ResilienceError::CircuitOpen { class: OperationClass::Read }
        );
        // other classes are unaffected
        assert_eq!(engine.breaker(OperationClass::Write).state(), CircuitState::Closed);
    }

    #[tokio::test]
    async fn test_domain_error_propagates_without_fallback() {
        let engine = engine(Arc::new(MemoryStore::new()));
        for _ in 0..5 {
            let result: Result<u32, _> = engine
                .execute(
                    OperationClass::Write,
                    || async { Err(StoreError::Constraint("duplicate".into())) },
                    Some(Box::new(|| Some(0))),
                    Duration::from_secs(1),
                )
                .await;
            assert!(result.unwrap_err().is_domain());
        }
        assert_eq!(engine.breaker(OperationClass::Write).failure_count(), 0);
        assert_eq!(engine.metrics().class_metrics(OperationClass::Write).domain_errors, 5);
    }

    #[tokio::test(start_paused = true)]
    async fn test_deadline_maps_to_operation_timeout() {
        let engine = engine(Arc::new(MemoryStore::new()));
        let result: Result<(), _> = engine
            .execute(
                OperationClass::Delete,
                || async {
                    tokio::time::sleep(Duration::from_secs(30)).await;
                    Ok(())
                },
                None,
                Duration::from_millis(200),
            )
            .await;
        assert_eq!(
            result.unwrap_err(),
            ResilienceError::OperationTimeout {
                class: OperationClass::Delete,
                deadline: Duration::from_millis(200),
            }
        );
        assert_eq!(engine.breaker(OperationClass::Delete).failure_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_get_serves_cache_only_while_open() {
        let store = Arc::new(SwitchableStore::default());
        let engine = engine(store.clone());

        engine.set("k", b"v1".to_vec()).await.unwrap();
        assert_eq!(engine.get("k").await.unwrap(), Some(b"v1".to_vec()));
        assert_eq!(engine.cache().len(), 1);

        store.down.store(true, Ordering::SeqCst);
        // still Closed after one failure: the cache is not consulted
        assert!(engine.get("k").await.is_err());
        // the second failure opens the breaker, so the cache answers
        assert_eq!(engine.get("k").await.unwrap(), Some(b"v1".to_vec()));
        assert_eq!(engine.breaker(OperationClass::Read).state(), CircuitState::Open);

        assert_eq!(engine.get("k").await.unwrap(), Some(b"v1".to_vec()));
        assert!(matches!(
            engine.get("missing").await,
            Err(ResilienceError::CircuitOpen { .. })
        ));
        assert!(engine.get_fresh("k").await.is_err());
    }

    #[tokio::test]
    async fn test_write_and_delete_invalidate_cache() {
        let engine = engine(Arc::new(MemoryStore::new()));
        engine.set("k", b"v1".to_vec()).await.unwrap();
        engine.get("k").await.unwrap();
        assert_eq!(engine.cache().len(), 1);

        engine.set("k", b"v2".to_vec()).await.unwrap();
        assert!(engine.cache().is_empty());

        engine.get("k").await.unwrap();
        assert!(engine.delete("k").await.unwrap());
        assert!(engine.cache().is_empty());
        assert_eq!(engine.get("k").await.unwrap(), None);
    }
}
