//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the layer.
//! All types derive Serde traits for deserialization from config files.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::resilience::{OperationClass, RetryPolicy};

/// Root configuration.
#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq)]
#[serde(default)]
pub struct LayerConfig {
    /// HTTP / WebSocket listener.
    pub server: ServerConfig,

    /// One breaker per operation class.
    pub breakers: BreakersConfig,

    /// Degraded-mode read cache.
    pub fallback_cache: FallbackCacheConfig,

    /// Session registry timings (hot reloadable).
    pub session: SessionConfig,

    /// Defaults for protected store operations.
    pub operations: OperationsConfig,

    /// Logging and metrics.
    pub observability: ObservabilityConfig,

    /// Admin API.
    pub admin: AdminConfig,
}

/// Listener configuration.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct ServerConfig {
    /// Bind address (e.g., "0.0.0.0:8080").
    pub bind_address: String,

    /// Maximum concurrent player connections.
    pub max_connections: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:8080".to_string(),
            max_connections: 10_000,
        }
    }
}

/// Per-class breaker configuration.
#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq)]
#[serde(default)]
pub struct BreakersConfig {
    pub read: BreakerConfig,
    pub write: BreakerConfig,
    pub delete: BreakerConfig,
}

impl BreakersConfig {
    /// Configuration for the given class.
    pub fn for_class(&self, class: OperationClass) -> &BreakerConfig {
        match class {
            OperationClass::Read => &self.read,
            OperationClass::Write => &self.write,
            OperationClass::Delete => &self.delete,
        }
    }
}

/// Circuit breaker and retry settings.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct BreakerConfig {
    /// Failures within `time_window_secs` that open the breaker.
    pub failure_threshold: u32,

    /// Consecutive half-open successes that close it again.
    pub success_threshold: u32,

    /// Seconds the breaker stays open before allowing a trial call.
    pub timeout_secs: u64,

    /// Window in which failures accumulate toward the threshold.
    pub time_window_secs: u64,

    /// Retries after the first attempt (Transient failures only).
    pub max_retry_attempts: u32,

    /// Base delay for exponential backoff in milliseconds.
    pub base_delay_ms: u64,

    /// Maximum delay for exponential backoff in milliseconds.
    pub max_delay_ms: u64,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            success_threshold: 3,
            timeout_secs: 60,
            time_window_secs: 60,
            max_retry_attempts: 3,
            base_delay_ms: 100,
            max_delay_ms: 2000,
        }
    }
}

impl BreakerConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn time_window(&self) -> Duration {
        Duration::from_secs(self.time_window_secs)
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.max_retry_attempts,
            base_delay: Duration::from_millis(self.base_delay_ms),
            max_delay: Duration::from_millis(self.max_delay_ms),
        }
    }
}

/// Fallback cache configuration.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct FallbackCacheConfig {
    /// Maximum number of entries.
    pub capacity: usize,

    /// Time-to-live for entries written on successful reads.
    pub ttl_secs: u64,

    /// Interval of the background expiry sweep.
    pub sweep_interval_secs: u64,
}

impl Default for FallbackCacheConfig {
    fn default() -> Self {
        Self {
            capacity: 10_000,
            ttl_secs: 300,
            sweep_interval_secs: 30,
        }
    }
}

impl FallbackCacheConfig {
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_secs)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }
}

/// Session registry configuration.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct SessionConfig {
    /// Deadline for a liveness probe in milliseconds.
    pub probe_timeout_ms: u64,

    /// How long a disconnected session is kept for reconnection.
    pub grace_period_secs: u64,

    /// Interval of the background reaper.
    pub reap_interval_secs: u64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            probe_timeout_ms: 2000,
            grace_period_secs: 120,
            reap_interval_secs: 15,
        }
    }
}

impl SessionConfig {
    pub fn probe_timeout(&self) -> Duration {
        Duration::from_millis(self.probe_timeout_ms)
    }

    pub fn grace_period(&self) -> Duration {
        Duration::from_secs(self.grace_period_secs)
    }

    pub fn reap_interval(&self) -> Duration {
        Duration::from_secs(self.reap_interval_secs)
    }
}

/// Defaults for protected store operations.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct OperationsConfig {
    /// Per-attempt deadline in milliseconds.
    pub timeout_ms: u64,
}

impl Default for OperationsConfig {
    fn default() -> Self {
        Self { timeout_ms: 1000 }
    }
}

impl OperationsConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

/// Log output format.
#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Human readable, for development.
    #[default]
    Pretty,
    /// One JSON object per line, for production.
    Json,
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Log output format.
    pub log_format: LogFormat,

    /// Enable metrics endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_format: LogFormat::Pretty,
            metrics_enabled: true,
            metrics_address: "0.0.0.0:9090".to_string(),
        }
    }
}

/// Admin API configuration.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct AdminConfig {
    /// Mount the admin routes.
    pub enabled: bool,

    /// API key for authentication (Bearer token).
    pub api_key: String,
}

impl Default for AdminConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            // WARNING: This is a placeholder! Change this in production.
            api_key: "CHANGE_ME_IN_PRODUCTION".to_string(),
        }
    }
}
