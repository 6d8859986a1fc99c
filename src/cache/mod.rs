//! Degraded-mode caching.
//!
//! # Data Flow
//! ```text
//! ResilientStore::get (Closed, primary hit)  → FallbackCache::put
//! ResilientStore::get (read breaker Open)    → FallbackCache::get
//! ResilientStore::set / delete (success)     → FallbackCache::invalidate
//! lifecycle::maintenance sweeper             → FallbackCache::sweep
//! ```

pub mod fallback;

pub use fallback::{FallbackCache, FallbackEntry};
