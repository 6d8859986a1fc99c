//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! config file (TOML)
//!     → loader.rs (parse & deserialize)
//!     → validation.rs (semantic checks)
//!     → LayerConfig (validated)
//!     → SessionLayer::new
//!
//! On file change:
//!     watcher.rs detects change
//!     → loader.rs loads + validates
//!     → SessionLayer::reload (session section swapped atomically)
//! ```
//!
//! # Design Decisions
//! - All fields have defaults to allow minimal configs
//! - Validation separates syntactic (serde) from semantic checks
//! - Only session timings are hot-reloadable

pub mod loader;
pub mod schema;
pub mod validation;
pub mod watcher;

pub use loader::{load_config, parse_config, ConfigError};
pub use schema::{BreakerConfig, LayerConfig, SessionConfig};
pub use validation::ValidationError;
pub use watcher::ConfigWatcher;
