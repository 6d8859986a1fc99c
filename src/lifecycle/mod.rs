//! Lifecycle management subsystem.
//!
//! # Data Flow
//! ```text
//! Signals (signals.rs):
//!     SIGTERM/SIGINT → Shutdown::trigger
//!
//! Shutdown (shutdown.rs):
//!     broadcast → HTTP server stops accepting, drains sockets
//!               → maintenance loops exit
//!
//! Maintenance (maintenance.rs):
//!     reap_interval  → SessionLayer::reap
//!     sweep_interval → FallbackCache::sweep
//! ```

pub mod maintenance;
pub mod shutdown;
pub mod signals;

pub use shutdown::Shutdown;
pub use signals::wait_for_signal;
