//! Network layer subsystem.
//!
//! # Data Flow
//! ```text
//! WebSocket upgrade (http::websocket)
//!     → connection.rs (admission against max_connections, RAII guard)
//!     → socket task runs
//!     → guard dropped on close
//!
//! Shutdown:
//!     → connection.rs wait_for_drain (bounded)
//! ```

pub mod connection;

pub use connection::{ConnectionGuard, ConnectionTracker};
