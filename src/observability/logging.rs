//! Structured logging.
//!
//! `RUST_LOG` wins over the configured level when set. JSON output is meant
//! for production log shipping, pretty output for development.

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::config::ObservabilityConfig;

/// Install the global tracing subscriber.
pub fn init_logging(config: &ObservabilityConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| format!("marquee={0},tower_http={0}", config.log_level).into());

    let registry = tracing_subscriber::registry().with(filter);

    if config.log_format == "json" {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}
