//! Command-line flags for the server binary.
//!
//! Flags override values from the config file, which in turn override the
//! built-in defaults. Overrides are re-applied to every hot-reloaded config so
//! a flag keeps winning after the file changes.

use std::net::SocketAddr;
use std::path::PathBuf;

use clap::Parser;

use crate::config::schema::AppConfig;

#[derive(Parser, Debug, Clone, Default)]
#[command(name = "marquee", version, about = "Movie catalog API server")]
pub struct CliArgs {
    /// Path to a TOML config file; watched for changes when given
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// API server port
    #[arg(long)]
    pub port: Option<u16>,

    /// Environment (development|staging|production)
    #[arg(long)]
    pub env: Option<String>,

    /// Rate limiter maximum requests per second
    #[arg(long)]
    pub limiter_rps: Option<f64>,

    /// Rate limiter maximum burst
    #[arg(long)]
    pub limiter_burst: Option<u32>,

    /// Enable rate limiter
    #[arg(long)]
    pub limiter_enabled: Option<bool>,

    /// Trusted CORS origins (space separated)
    #[arg(long, value_delimiter = ' ', num_args = 1..)]
    pub cors_trusted_origins: Option<Vec<String>>,
}

impl CliArgs {
    /// Overwrite every field of `config` that was given on the command line.
    pub fn apply(&self, config: &mut AppConfig) {
        if let Some(port) = self.port {
            config.server.bind_address = match config.server.bind_address.parse::<SocketAddr>() {
                Ok(mut addr) => {
                    addr.set_port(port);
                    addr.to_string()
                }
                Err(_) => format!("0.0.0.0:{port}"),
            };
        }
        if let Some(env) = &self.env {
            config.server.env = env.clone();
        }
        if let Some(rps) = self.limiter_rps {
            config.limiter.requests_per_second = rps;
        }
        if let Some(burst) = self.limiter_burst {
            config.limiter.burst = burst;
        }
        if let Some(enabled) = self.limiter_enabled {
            config.limiter.enabled = enabled;
        }
        if let Some(origins) = &self.cors_trusted_origins {
            config.cors.trusted_origins = origins.iter().filter(|o| !o.is_empty()).cloned().collect();
        }
    }
}
