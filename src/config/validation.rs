//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Validate value ranges (thresholds > 0, timeouts > 0, delays ordered)
//! - Validate addresses parse
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Pure function: LayerConfig → Result<(), Vec<ValidationError>>
//! - Runs before config is accepted into the system (startup and reload)

use std::fmt;
use std::net::SocketAddr;

use crate::config::schema::{BreakerConfig, LayerConfig};
use crate::resilience::OperationClass;

/// One rejected field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    pub field: String,
    pub message: String,
}

impl ValidationError {
    fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

const LOG_LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];

pub fn validate_config(config: &LayerConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if config.server.bind_address.parse::<SocketAddr>().is_err() {
        errors.push(ValidationError::new(
            "server.bind_address",
            format!("'{}' is not a socket address", config.server.bind_address),
        ));
    }
    if config.server.max_connections == 0 {
        errors.push(ValidationError::new("server.max_connections", "must be > 0"));
    }

    for class in OperationClass::ALL {
        validate_breaker(class, config.breakers.for_class(class), &mut errors);
    }

    if config.fallback_cache.capacity == 0 {
        errors.push(ValidationError::new("fallback_cache.capacity", "must be > 0"));
    }
    if config.fallback_cache.ttl_secs == 0 {
        errors.push(ValidationError::new("fallback_cache.ttl_secs", "must be > 0"));
    }
    if config.fallback_cache.sweep_interval_secs == 0 {
        errors.push(ValidationError::new("fallback_cache.sweep_interval_secs", "must be > 0"));
    }

    if config.session.probe_timeout_ms == 0 {
        errors.push(ValidationError::new("session.probe_timeout_ms", "must be > 0"));
    }
    if config.session.reap_interval_secs == 0 {
        errors.push(ValidationError::new("session.reap_interval_secs", "must be > 0"));
    }

    if config.operations.timeout_ms == 0 {
        errors.push(ValidationError::new("operations.timeout_ms", "must be > 0"));
    }

    let level = config.observability.log_level.to_ascii_lowercase();
    if !LOG_LEVELS.contains(&level.as_str()) {
        errors.push(ValidationError::new(
            "observability.log_level",
            format!("unknown level '{}'", config.observability.log_level),
        ));
    }
    if config.observability.metrics_enabled
        && config.observability.metrics_address.parse::<SocketAddr>().is_err()
    {
        errors.push(ValidationError::new(
            "observability.metrics_address",
            format!("'{}' is not a socket address", config.observability.metrics_address),
        ));
    }

    if config.admin.enabled && config.admin.api_key.trim().is_empty() {
        errors.push(ValidationError::new("admin.api_key", "must not be empty when admin is enabled"));
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

fn validate_breaker(class: OperationClass, breaker: &BreakerConfig, errors: &mut Vec<ValidationError>) {
    let field = |name: &str| format!("breakers.{class}.{name}");

    if breaker.failure_threshold == 0 {
        errors.push(ValidationError::new(field("failure_threshold"), "must be > 0"));
    }
    if breaker.success_threshold == 0 {
        errors.push(ValidationError::new(field("success_threshold"), "must be > 0"));
    }
    if breaker.timeout_secs == 0 {
        errors.push(ValidationError::new(field("timeout_secs"), "must be > 0"));
    }
    if breaker.time_window_secs == 0 {
        errors.push(ValidationError::new(field("time_window_secs"), "must be > 0"));
    }
    if breaker.base_delay_ms > breaker.max_delay_ms {
        errors.push(ValidationError::new(
            field("base_delay_ms"),
            format!(
                "base delay {}ms exceeds max delay {}ms",
                breaker.base_delay_ms, breaker.max_delay_ms
            ),
        ));
    }
}
