//! Read-only health report.
//!
//! # Data Flow
//! ```text
//! SessionLayer::health()
//!     → ResilientStore (breaker snapshots, cache occupancy)
//!     → SessionRegistry (active / disconnected counts)
//!     → MetricsCollector (counters)
//!     → HealthReport (JSON via /admin/health)
//! ```
//!
//! # Design Decisions
//! - Building a report never mutates breaker state (no Open → HalfOpen
//!   promotion as a side effect of looking)
//! - Degraded means at least one breaker is not Closed

use serde::Serialize;

use crate::observability::metrics::MetricsSnapshot;
use crate::resilience::{BreakerSnapshot, CircuitState};
use crate::session::SessionCounts;

/// Overall status derived from breaker states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthStatus {
    Healthy,
    Degraded,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CacheOccupancy {
    pub entries: usize,
    pub capacity: usize,
}

/// Everything `health()` exposes.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HealthReport {
    pub status: HealthStatus,
    pub breakers: Vec<BreakerSnapshot>,
    pub cache: CacheOccupancy,
    pub sessions: SessionCounts,
    pub metrics: MetricsSnapshot,
}

impl HealthReport {
    pub fn new(
        breakers: Vec<BreakerSnapshot>,
        cache: CacheOccupancy,
        sessions: SessionCounts,
        metrics: MetricsSnapshot,
    ) -> Self {
        let status = if breakers.iter().all(|b| b.state == CircuitState::Closed) {
            HealthStatus::Healthy
        } else {
            HealthStatus::Degraded
        };
        Self {
            status,
            breakers,
            cache,
            sessions,
            metrics,
        }
    }

    pub fn is_degraded(&self) -> bool {
        self.status == HealthStatus::Degraded
    }
}
