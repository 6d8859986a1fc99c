//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! Engine, breakers, cache, registry, snapshots produce:
//!     → logging.rs (structured log events)
//!     → metrics.rs (in-process counters + metrics facade)
//!
//! Consumers:
//!     → stdout (pretty or JSON)
//!     → Metrics endpoint (Prometheus scrape)
//!     → health() / admin API (MetricsSnapshot)
//! ```
//!
//! # Design Decisions
//! - Structured fields, never values interpolated into messages
//! - Metrics are cheap (atomic increments)

pub mod logging;
pub mod metrics;
