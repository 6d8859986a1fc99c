//! Metrics collection and exposition.
//!
//! # Responsibilities
//! - Record every store outcome, retry, rejection and breaker transition
//! - Record session and snapshot lifecycle events
//! - Keep cheap in-process counters for `health()`
//! - Mirror everything into the `metrics` facade for Prometheus scraping
//!
//! # Metrics
//! - `resilience_operations_total` (counter): by class, outcome
//! - `resilience_operation_duration_seconds` (histogram): by class
//! - `resilience_retries_total` (counter): by class
//! - `resilience_breaker_transitions_total` (counter): by class, from, to
//! - `resilience_breaker_state` (gauge): 0=closed, 1=half_open, 2=open
//! - `fallback_cache_entries` (gauge), `fallback_cache_lookups_total` (counter)
//! - `session_events_total` (counter): by event
//! - `snapshot_events_total` (counter): by event

use metrics_exporter_prometheus::{BuildError, PrometheusBuilder};
use serde::Serialize;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, SystemTime};

use crate::resilience::{CircuitState, ErrorClass, OperationClass};

/// Install the Prometheus exporter on `addr`.
pub fn init_metrics(addr: SocketAddr) -> Result<(), BuildError> {
    PrometheusBuilder::new().with_http_listener(addr).install()?;
    tracing::info!(address = %addr, "Metrics exporter listening");
    Ok(())
}

/// Result of one `execute` call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperationOutcome {
    Success,
    Failure(ErrorClass),
    FallbackServed,
}

impl OperationOutcome {
    fn label(self) -> &'static str {
        match self {
            OperationOutcome::Success => "success",
            OperationOutcome::Failure(kind) => kind.as_str(),
            OperationOutcome::FallbackServed => "fallback",
        }
    }
}

/// An outcome event as fed to the collector.
#[derive(Debug, Clone, Copy)]
pub struct OperationEvent {
    pub class: OperationClass,
    pub outcome: OperationOutcome,
    pub latency: Duration,
    pub timestamp: SystemTime,
}

impl OperationEvent {
    pub fn now(class: OperationClass, outcome: OperationOutcome, latency: Duration) -> Self {
        Self {
            class,
            outcome,
            latency,
            timestamp: SystemTime::now(),
        }
    }
}

/// Session registry events.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEvent {
    Registered,
    Conflict,
    Takeover,
    Disconnected,
    Terminated,
    Expired,
    PersistFailed,
}

impl SessionEvent {
    fn label(self) -> &'static str {
        match self {
            SessionEvent::Registered => "registered",
            SessionEvent::Conflict => "conflict",
            SessionEvent::Takeover => "takeover",
            SessionEvent::Disconnected => "disconnected",
            SessionEvent::Terminated => "terminated",
            SessionEvent::Expired => "expired",
            SessionEvent::PersistFailed => "persist_failed",
        }
    }
}

/// Snapshot protocol events.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SnapshotEvent {
    Written,
    WriteFailed,
    Restored,
    NotFound,
    Stale,
    Purged,
}

impl SnapshotEvent {
    fn label(self) -> &'static str {
        match self {
            SnapshotEvent::Written => "written",
            SnapshotEvent::WriteFailed => "write_failed",
            SnapshotEvent::Restored => "restored",
            SnapshotEvent::NotFound => "not_found",
            SnapshotEvent::Stale => "stale",
            SnapshotEvent::Purged => "purged",
        }
    }
}

#[derive(Debug, Default)]
struct ClassCounters {
    successes: AtomicU64,
    transient_failures: AtomicU64,
    persistent_failures: AtomicU64,
    domain_errors: AtomicU64,
    fallbacks_served: AtomicU64,
    rejections: AtomicU64,
    retries: AtomicU64,
    transitions: AtomicU64,
    latency_micros: AtomicU64,
    timed_calls: AtomicU64,
}

impl ClassCounters {
    fn snapshot(&self, class: OperationClass) -> ClassMetrics {
        let timed = self.timed_calls.load(Ordering::Relaxed);
        let total_micros = self.latency_micros.load(Ordering::Relaxed);
        ClassMetrics {
            class,
            successes: self.successes.load(Ordering::Relaxed),
            transient_failures: self.transient_failures.load(Ordering::Relaxed),
            persistent_failures: self.persistent_failures.load(Ordering::Relaxed),
            domain_errors: self.domain_errors.load(Ordering::Relaxed),
            fallbacks_served: self.fallbacks_served.load(Ordering::Relaxed),
            rejections: self.rejections.load(Ordering::Relaxed),
            retries: self.retries.load(Ordering::Relaxed),
            transitions: self.transitions.load(Ordering::Relaxed),
            mean_latency_micros: if timed > 0 { total_micros / timed } else { 0 },
        }
    }
}

#[derive(Debug)]
struct EventCounters<const N: usize> {
    counts: [AtomicU64; N],
}

impl<const N: usize> Default for EventCounters<N> {
    fn default() -> Self {
        Self {
            counts: std::array::from_fn(|_| AtomicU64::new(0)),
        }
    }
}

/// Records counts, latencies and state changes for the whole layer.
#[derive(Debug, Default)]
pub struct MetricsCollector {
    classes: [ClassCounters; 3],
    sessions: EventCounters<7>,
    snapshots: EventCounters<6>,
    cache_hits: AtomicU64,
    cache_misses: AtomicU64,
    cache_evictions: AtomicU64,
}

impl MetricsCollector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the final outcome of an `execute` call.
    pub fn record_outcome(&self, event: OperationEvent) {
        let counters = &self.classes[event.class.index()];
        let counter = match event.outcome {
            OperationOutcome::Success => &counters.successes,
            OperationOutcome::Failure(ErrorClass::Transient) => &counters.transient_failures,
            OperationOutcome::Failure(ErrorClass::Persistent) => &counters.persistent_failures,
            OperationOutcome::Failure(ErrorClass::Domain) => &counters.domain_errors,
            OperationOutcome::FallbackServed => &counters.fallbacks_served,
        };
        counter.fetch_add(1, Ordering::Relaxed);
        counters
            .latency_micros
            .fetch_add(event.latency.as_micros() as u64, Ordering::Relaxed);
        counters.timed_calls.fetch_add(1, Ordering::Relaxed);

        metrics::counter!(
            "resilience_operations_total",
            "class" => event.class.as_str(),
            "outcome" => event.outcome.label()
        )
        .increment(1);
        metrics::histogram!(
            "resilience_operation_duration_seconds",
            "class" => event.class.as_str()
        )
        .record(event.latency.as_secs_f64());
    }

    /// Record retries spent inside one call.
    pub fn record_retries(&self, class: OperationClass, retries: u32) {
        if retries == 0 {
            return;
        }
        self.classes[class.index()]
            .retries
            .fetch_add(u64::from(retries), Ordering::Relaxed);
        metrics::counter!("resilience_retries_total", "class" => class.as_str())
            .increment(u64::from(retries));
    }

    /// Record a call refused because the breaker is open.
    pub fn record_rejection(&self, class: OperationClass) {
        self.classes[class.index()]
            .rejections
            .fetch_add(1, Ordering::Relaxed);
        metrics::counter!(
            "resilience_operations_total",
            "class" => class.as_str(),
            "outcome" => "rejected"
        )
        .increment(1);
    }

    /// Record a breaker state transition.
    pub fn record_transition(&self, class: OperationClass, from: CircuitState, to: CircuitState) {
        self.classes[class.index()]
            .transitions
            .fetch_add(1, Ordering::Relaxed);
        metrics::counter!(
            "resilience_breaker_transitions_total",
            "class" => class.as_str(),
            "from" => from.as_str(),
            "to" => to.as_str()
        )
        .increment(1);
        metrics::gauge!("resilience_breaker_state", "class" => class.as_str())
            .set(to.gauge_value());
    }

    pub fn record_session_event(&self, event: SessionEvent) {
        self.sessions.counts[event as usize].fetch_add(1, Ordering::Relaxed);
        metrics::counter!("session_events_total", "event" => event.label()).increment(1);
    }

    pub fn record_snapshot_event(&self, event: SnapshotEvent) {
        self.snapshots.counts[event as usize].fetch_add(1, Ordering::Relaxed);
        metrics::counter!("snapshot_events_total", "event" => event.label()).increment(1);
    }

    pub fn record_cache_lookup(&self, hit: bool) {
        let (counter, label) = if hit {
            (&self.cache_hits, "hit")
        } else {
            (&self.cache_misses, "miss")
        };
        counter.fetch_add(1, Ordering::Relaxed);
        metrics::counter!("fallback_cache_lookups_total", "result" => label).increment(1);
    }

    pub fn record_cache_eviction(&self) {
        self.cache_evictions.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_cache_size(&self, entries: usize) {
        metrics::gauge!("fallback_cache_entries").set(entries as f64);
    }

    /// Number of times a session event was recorded.
    pub fn session_count(&self, event: SessionEvent) -> u64 {
        self.sessions.counts[event as usize].load(Ordering::Relaxed)
    }

    /// Number of times a snapshot event was recorded.
    pub fn snapshot_count(&self, event: SnapshotEvent) -> u64 {
        self.snapshots.counts[event as usize].load(Ordering::Relaxed)
    }

    /// Counters for one operation class.
    pub fn class_metrics(&self, class: OperationClass) -> ClassMetrics {
        self.classes[class.index()].snapshot(class)
    }

    /// Read-only copy of every counter.
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            operations: OperationClass::ALL
                .iter()
                .map(|class| self.class_metrics(*class))
                .collect(),
            sessions: SessionMetrics {
                registered: self.session_count(SessionEvent::Registered),
                conflicts: self.session_count(SessionEvent::Conflict),
                takeovers: self.session_count(SessionEvent::Takeover),
                disconnected: self.session_count(SessionEvent::Disconnected),
                terminated: self.session_count(SessionEvent::Terminated),
                expired: self.session_count(SessionEvent::Expired),
                persist_failures: self.session_count(SessionEvent::PersistFailed),
            },
            snapshots: SnapshotMetrics {
                written: self.snapshot_count(SnapshotEvent::Written),
                write_failures: self.snapshot_count(SnapshotEvent::WriteFailed),
                restored: self.snapshot_count(SnapshotEvent::Restored),
                not_found: self.snapshot_count(SnapshotEvent::NotFound),
                stale: self.snapshot_count(SnapshotEvent::Stale),
                purged: self.snapshot_count(SnapshotEvent::Purged),
            },
            cache_hits: self.cache_hits.load(Ordering::Relaxed),
            cache_misses: self.cache_misses.load(Ordering::Relaxed),
            cache_evictions: self.cache_evictions.load(Ordering::Relaxed),
        }
    }
}

/// Per-class counters.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct ClassMetrics {
    pub class: OperationClass,
    pub successes: u64,
    pub transient_failures: u64,
    pub persistent_failures: u64,
    pub domain_errors: u64,
    pub fallbacks_served: u64,
    pub rejections: u64,
    pub retries: u64,
    pub transitions: u64,
    pub mean_latency_micros: u64,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct SessionMetrics {
    pub registered: u64,
    pub conflicts: u64,
    pub takeovers: u64,
    pub disconnected: u64,
    pub terminated: u64,
    pub expired: u64,
    pub persist_failures: u64,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct SnapshotMetrics {
    pub written: u64,
    pub write_failures: u64,
    pub restored: u64,
    pub not_found: u64,
    pub stale: u64,
    pub purged: u64,
}

/// Everything the collector knows, as plain numbers.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct MetricsSnapshot {
    pub operations: Vec<ClassMetrics>,
    pub sessions: SessionMetrics,
    pub snapshots: SnapshotMetrics,
    pub cache_hits: u64,
    pub cache_misses: u64,
    pub cache_evictions: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_outcomes_are_counted_per_class() {
        let metrics = MetricsCollector::new();
        metrics.record_outcome(OperationEvent::now(
            OperationClass::Read,
            OperationOutcome::Success,
            Duration::from_micros(100),
        ));
        metrics.record_outcome(OperationEvent::now(
            OperationClass::Read,
            OperationOutcome::Failure(ErrorClass::Domain),
            Duration::from_micros(300),
        ));
        metrics.record_outcome(OperationEvent::now(
            OperationClass::Write,
            OperationOutcome::FallbackServed,
            Duration::ZERO,
        ));
        metrics.record_retries(OperationClass::Read, 2);
        metrics.record_rejection(OperationClass::Delete);

        let read = metrics.class_metrics(OperationClass::Read);
        assert_eq!(read.successes, 1);
        assert_eq!(read.domain_errors, 1);
        assert_eq!(read.retries, 2);
        assert_eq!(read.mean_latency_micros, 200);

        assert_eq!(metrics.class_metrics(OperationClass::Write).fallbacks_served, 1);
        assert_eq!(metrics.class_metrics(OperationClass::Delete).rejections, 1);
    }

    #[test]
    fn test_lifecycle_events() {
        let metrics = MetricsCollector::new();
        metrics.record_session_event(SessionEvent::Registered);
        metrics.record_session_event(SessionEvent::Registered);
        metrics.record_session_event(SessionEvent::Conflict);
        metrics.record_snapshot_event(SnapshotEvent::Stale);
        metrics.record_cache_lookup(true);
        metrics.record_cache_lookup(false);

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.sessions.registered, 2);
        assert_eq!(snapshot.sessions.conflicts, 1);
        assert_eq!(snapshot.snapshots.stale, 1);
        assert_eq!(snapshot.cache_hits, 1);
        assert_eq!(snapshot.cache_misses, 1);
        assert_eq!(snapshot.operations.len(), 3);
    }
}
