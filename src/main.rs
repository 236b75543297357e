//! Marquee API server.
//!
//! ```text
//!     Client Request
//!     ──▶ request id / trace ──▶ catch panic ──▶ CORS
//!         ──▶ rate limit ──▶ authenticate ──▶ route
//!             ──▶ gates ──▶ metrics ──▶ handler
//!
//!     SIGINT / SIGTERM ──▶ Shutdown (Running → Draining → Stopped)
//! ```

use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tokio::sync::mpsc;

use marquee::config::validation::validate_config;
use marquee::config::watcher::ConfigWatcher;
use marquee::config::{load_config, AppConfig, CliArgs, ConfigError};
use marquee::http::server::bind;
use marquee::lifecycle::signals::spawn_signal_listener;
use marquee::observability::{logging, metrics};
use marquee::store::{MemoryStore, MovieCatalog, TokenScope};
use marquee::{HttpServer, Shutdown, Stores};

const DEMO_PERMISSIONS: [&str; 2] = ["movies:read", "movies:write"];
const DEMO_TOKEN_TTL: Duration = Duration::from_secs(24 * 60 * 60);
const ACTIVATION_TOKEN_TTL: Duration = Duration::from_secs(3 * 24 * 60 * 60);

#[tokio::main]
async fn main() -> ExitCode {
    let args = CliArgs::parse();

    let config = match resolve_config(&args) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("marquee: {e}");
            return ExitCode::FAILURE;
        }
    };

    logging::init_logging(&config.observability);
    tracing::info!(version = env!("CARGO_PKG_VERSION"), "marquee starting");

    if config.observability.metrics_enabled {
        match config.observability.metrics_address.parse() {
            Ok(addr) => metrics::init_metrics(addr),
            Err(e) => tracing::error!(
                metrics_address = %config.observability.metrics_address,
                error = %e,
                "Failed to parse metrics address"
            ),
        }
    }

    let store = MemoryStore::new();
    if config.server.env == "development" {
        seed_demo_users(&store);
    }
    let store = Arc::new(store);
    let stores = Stores {
        users: store.clone(),
        accounts: store.clone(),
        permissions: store,
        movies: Arc::new(MovieCatalog::new()),
    };

    let listener = match bind(&config.server.bind_address).await {
        Ok(listener) => listener,
        Err(e) => {
            tracing::error!(error = %e, "Failed to start server");
            return ExitCode::FAILURE;
        }
    };

    let shutdown = Shutdown::new();
    spawn_signal_listener(shutdown.clone());

    let (config_updates, _watcher) = match &args.config {
        Some(path) => {
            let (watcher, raw_updates) = ConfigWatcher::new(path);
            match watcher.run() {
                Ok(handle) => (forward_with_overrides(raw_updates, args.clone()), Some(handle)),
                Err(e) => {
                    tracing::warn!(error = %e, "Config hot reload disabled");
                    (mpsc::unbounded_channel().1, None)
                }
            }
        }
        None => (mpsc::unbounded_channel().1, None),
    };

    let server = HttpServer::new(config, stores);
    match server.run(listener, config_updates, shutdown).await {
        Ok(()) => {
            tracing::info!("Shutdown complete");
            ExitCode::SUCCESS
        }
        Err(e) => {
            tracing::error!(error = %e, "Server exited with error");
            ExitCode::FAILURE
        }
    }
}

/// Defaults, then the config file, then command-line flags.
fn resolve_config(args: &CliArgs) -> Result<AppConfig, ConfigError> {
    let mut config = match &args.config {
        Some(path) => load_config(path)?,
        None => AppConfig::default(),
    };
    args.apply(&mut config);
    validate_config(&config).map_err(ConfigError::Validation)?;
    Ok(config)
}

/// Re-apply command-line flags to every reloaded config before the server sees it.
fn forward_with_overrides(
    mut raw: mpsc::UnboundedReceiver<AppConfig>,
    args: CliArgs,
) -> mpsc::UnboundedReceiver<AppConfig> {
    let (tx, rx) = mpsc::unbounded_channel();
    tokio::spawn(async move {
        while let Some(mut config) = raw.recv().await {
            args.apply(&mut config);
            if let Err(errors) = validate_config(&config) {
                tracing::error!(
                    error = %ConfigError::Validation(errors),
                    "Reloaded config invalid after applying flags, keeping current configuration"
                );
                continue;
            }
            if tx.send(config).is_err() {
                break;
            }
        }
    });
    rx
}

fn seed_demo_users(store: &MemoryStore) {
    let user = store.insert_user("Demo User", "demo@example.com", true);
    store.add_permissions(user.id, DEMO_PERMISSIONS);
    match store.issue_token(user.id, TokenScope::Authentication, DEMO_TOKEN_TTL) {
        Ok(token) => tracing::info!(
            user_id = user.id,
            email = %user.email,
            token = %token,
            "Seeded demo user"
        ),
        Err(e) => tracing::warn!(error = %e, "Failed to issue demo token"),
    }

    let pending = store.insert_user("Pending User", "pending@example.com", false);
    store.add_permissions(pending.id, DEMO_PERMISSIONS);
    let tokens = store
        .issue_token(pending.id, TokenScope::Authentication, DEMO_TOKEN_TTL)
        .and_then(|auth| {
            store
                .issue_token(pending.id, TokenScope::Activation, ACTIVATION_TOKEN_TTL)
                .map(|activation| (auth, activation))
        });
    match tokens {
        Ok((token, activation_token)) => tracing::info!(
            user_id = pending.id,
            email = %pending.email,
            token = %token,
            activation_token = %activation_token,
            "Seeded inactive demo user, activate with PUT /v1/users/activated"
        ),
        Err(e) => tracing::warn!(error = %e, "Failed to issue demo tokens"),
    }
}
