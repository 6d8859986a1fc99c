//! Resilient data-access and session recovery layer.
//!
//! A circuit-breaker protected path to a volatile backing store, with
//! classification-aware retry and a bounded fallback cache, plus a session
//! registry that keeps one live connection per player and hands state over
//! through versioned snapshots.

pub mod admin;
pub mod cache;
pub mod config;
pub mod health;
pub mod http;
pub mod layer;
pub mod lifecycle;
pub mod net;
pub mod observability;
pub mod resilience;
pub mod session;
pub mod snapshot;
pub mod store;

pub use config::schema::LayerConfig;
pub use health::HealthReport;
pub use http::HttpServer;
pub use layer::SessionLayer;
pub use lifecycle::Shutdown;
pub use resilience::{OperationClass, ResilienceError, ResilientStore};
pub use session::{Connection, ConnectionId, SessionError};
pub use snapshot::{RestoreOutcome, SnapshotError, StateSnapshot};
pub use store::{DataStore, MemoryStore, StoreError};
