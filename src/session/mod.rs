//! Session subsystem.
//!
//! # Data Flow
//! ```text
//! Transport connect(logical_id)
//!     → registry.rs register (per-id lock)
//!         → liveness.rs probe incumbent (deadline)
//!         → supersede or reject
//!         → ResilientStore::set("session:{id}")
//! Transport close        → registry.rs mark_connection_closed
//! Explicit leave         → registry.rs terminate
//! lifecycle maintenance  → registry.rs reap
//! ```
//!
//! # Design Decisions
//! - `Connection` is a trait so any transport (WebSocket here, test doubles
//!   elsewhere) can be registered
//! - Disconnect and terminate are separate events: the first keeps the
//!   record for a grace period, the second purges it

pub mod connection;
pub mod liveness;
pub mod record;
pub mod registry;

pub use connection::{Connection, ConnectionId, ProbeError};
pub use liveness::{Liveness, LivenessProber};
pub use record::{SessionRecord, SessionStatus};
pub use registry::{Registration, SessionCounts, SessionError, SessionRegistry};
