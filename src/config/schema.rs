//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the API server.
//! All types derive Serde traits for deserialization from config files.

use serde::{Deserialize, Serialize};

/// Root configuration for the API server.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct AppConfig {
    /// Listener and lifecycle settings.
    pub server: ServerConfig,

    /// Per-client rate limiting.
    pub limiter: RateLimitConfig,

    /// Cross-origin resource sharing.
    pub cors: CorsConfig,

    /// Authentication lookups.
    pub auth: AuthConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,
}

/// Server configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Bind address (e.g., "0.0.0.0:4000").
    pub bind_address: String,

    /// Deployment environment (development, staging, production).
    pub env: String,

    /// How long in-flight requests may run after a termination signal, in seconds.
    pub shutdown_timeout_secs: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:4000".to_string(),
            env: "development".to_string(),
            shutdown_timeout_secs: 30,
        }
    }
}

/// Rate limiting configuration.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct RateLimitConfig {
    /// Enable rate limiting.
    pub enabled: bool,

    /// Token refill rate per client, in requests per second.
    pub requests_per_second: f64,

    /// Burst capacity per client.
    pub burst: u32,

    /// Derive the client key from `X-Forwarded-For` / `X-Real-IP` when present.
    pub trust_forwarded_headers: bool,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            requests_per_second: 2.0,
            burst: 4,
            trust_forwarded_headers: false,
        }
    }
}

/// CORS configuration.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct CorsConfig {
    /// Origins allowed to make cross-origin requests (exact match).
    pub trusted_origins: Vec<String>,
}

/// Authentication configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct AuthConfig {
    /// Deadline for each token or permission lookup, in milliseconds.
    pub lookup_timeout_ms: u64,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            lookup_timeout_ms: 3_000,
        }
    }
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Log output format ("pretty" or "json").
    pub log_format: String,

    /// Enable the Prometheus metrics endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_format: "pretty".to_string(),
            metrics_enabled: false,
            metrics_address: "0.0.0.0:9090".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_config_uses_defaults() {
        let config: AppConfig = toml::from_str(
            r#"
            [limiter]
            burst = 10
            "#,
        )
        .unwrap();

        assert_eq!(config.limiter.burst, 10);
        assert_eq!(config.limiter.requests_per_second, 2.0);
        assert!(config.limiter.enabled);
        assert_eq!(config.server.shutdown_timeout_secs, 30);
        assert_eq!(config.auth.lookup_timeout_ms, 3_000);
    }

    #[test]
    fn test_cors_origins() {
        let config: AppConfig = toml::from_str(
            r#"
            [cors]
            trusted_origins = ["https://a.example", "https://b.example"]
            "#,
        )
        .unwrap();

        assert_eq!(config.cors.trusted_origins.len(), 2);
    }
}
