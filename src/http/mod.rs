//! HTTP protocol handling subsystem.
//!
//! # Data Flow
//! ```text
//! TCP connection
//!     → server.rs (Axum router, TraceLayer)
//!     → /ws        → websocket.rs (player sessions)
//!     → /admin/*   → admin (bearer auth, read-only views)
//! ```

pub mod server;
pub mod websocket;

pub use server::{AppState, HttpServer};
pub use websocket::{ClientFrame, ServerFrame};
