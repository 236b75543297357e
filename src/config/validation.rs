//! Configuration validation.
//!
//! Serde handles syntax; this module checks value ranges and cross-field
//! constraints. Every violation is reported, not just the first.

use std::net::SocketAddr;

use thiserror::Error;

use crate::config::schema::AppConfig;

const KNOWN_ENVS: &[&str] = &["development", "staging", "production"];

/// A single semantic problem with a configuration.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{field}: {message}")]
pub struct ValidationError {
    pub field: &'static str,
    pub message: String,
}

impl ValidationError {
    fn new(field: &'static str, message: impl Into<String>) -> Self {
        Self {
            field,
            message: message.into(),
        }
    }
}

/// Validate a configuration, returning all errors found.
pub fn validate_config(config: &AppConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if config.server.bind_address.parse::<SocketAddr>().is_err() {
        errors.push(ValidationError::new(
            "server.bind_address",
            format!("'{}' is not a socket address", config.server.bind_address),
        ));
    }

    if !KNOWN_ENVS.contains(&config.server.env.as_str()) {
        errors.push(ValidationError::new(
            "server.env",
            format!("must be one of {}", KNOWN_ENVS.join(", ")),
        ));
    }

    if config.server.shutdown_timeout_secs == 0 {
        errors.push(ValidationError::new("server.shutdown_timeout_secs", "must be greater than zero"));
    }

    let rps = config.limiter.requests_per_second;
    if !rps.is_finite() || rps <= 0.0 {
        errors.push(ValidationError::new("limiter.requests_per_second", "must be a positive number"));
    }

    if config.limiter.burst == 0 {
        errors.push(ValidationError::new("limiter.burst", "must be at least 1"));
    }

    if config.auth.lookup_timeout_ms == 0 {
        errors.push(ValidationError::new("auth.lookup_timeout_ms", "must be greater than zero"));
    }

    if config.observability.metrics_enabled
        && config.observability.metrics_address.parse::<SocketAddr>().is_err()
    {
        errors.push(ValidationError::new(
            "observability.metrics_address",
            format!("'{}' is not a socket address", config.observability.metrics_address),
        ));
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}
