//! HTTP server setup and lifecycle.
//!
//! # Responsibilities
//! - Assemble shared state and the router from configuration and stores
//! - Run the rate limiter sweep and apply hot-reloaded limiter settings
//! - Serve until shutdown, drain in-flight requests within the deadline
//! - Wait for background tasks, then mark the server stopped

use std::future::IntoFuture;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use thiserror::Error;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::config::AppConfig;
use crate::http::handlers::AppState;
use crate::http::router::build_router;
use crate::lifecycle::{Shutdown, TaskTracker};
use crate::observability::RequestMetrics;
use crate::security::RateLimiter;
use crate::store::{AccountStore, MovieCatalog, PermissionStore, UserStore};

#[derive(Debug, Error)]
pub enum ServerError {
    #[error("failed to bind {address}: {source}")]
    Bind {
        address: String,
        #[source]
        source: io::Error,
    },

    #[error("server error: {0}")]
    Serve(#[from] io::Error),

    #[error("in-flight requests did not complete within {0:?}")]
    ShutdownTimeout(Duration),
}

/// External capabilities the server is built on.
#[derive(Clone)]
pub struct Stores {
    pub users: Arc<dyn UserStore>,
    pub accounts: Arc<dyn AccountStore>,
    pub permissions: Arc<dyn PermissionStore>,
    pub movies: Arc<MovieCatalog>,
}

/// Bind a TCP listener on `address`.
pub async fn bind(address: &str) -> Result<TcpListener, ServerError> {
    TcpListener::bind(address)
        .await
        .map_err(|source| ServerError::Bind {
            address: address.to_string(),
            source,
        })
}

pub struct HttpServer {
    router: Router,
    state: AppState,
    config: AppConfig,
}

impl HttpServer {
    pub fn new(config: AppConfig, stores: Stores) -> Self {
        let state = AppState {
            users: stores.users,
            accounts: stores.accounts,
            permissions: stores.permissions,
            movies: stores.movies,
            metrics: Arc::new(RequestMetrics::new()),
            limiter: Arc::new(RateLimiter::new(config.limiter.clone())),
            tasks: TaskTracker::new(),
            env: config.server.env.clone(),
            lookup_timeout: Duration::from_millis(config.auth.lookup_timeout_ms),
        };

        let router = build_router(state.clone(), &config);
        Self {
            router,
            state,
            config,
        }
    }

    /// A copy of the application router, for driving requests without a listener.
    pub fn router(&self) -> Router {
        self.router.clone()
    }

    pub fn state(&self) -> &AppState {
        &self.state
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    /// Serve on `listener` until `shutdown` is triggered.
    ///
    /// Returns `Ok` once in-flight requests and background tasks have finished.
    /// If requests are still running when the drain deadline passes the
    /// result is [`ServerError::ShutdownTimeout`]; background tasks are still
    /// waited for.
    pub async fn run(
        self,
        listener: TcpListener,
        config_updates: mpsc::UnboundedReceiver<AppConfig>,
        shutdown: Shutdown,
    ) -> Result<(), ServerError> {
        let addr = listener.local_addr()?;
        tracing::info!(
            address = %addr,
            env = %self.config.server.env,
            "Starting server"
        );

        let sweeper = self.state.limiter.spawn_sweeper(shutdown.clone());
        let reloader = spawn_config_reload(self.state.limiter.clone(), config_updates, shutdown.clone());

        let app = self.router.into_make_service_with_connect_info::<SocketAddr>();
        let graceful = {
            let shutdown = shutdown.clone();
            async move { shutdown.wait().await }
        };
        let serve = axum::serve(listener, app)
            .with_graceful_shutdown(graceful)
            .into_future();

        let drain_timeout = Duration::from_secs(self.config.server.shutdown_timeout_secs);
        let deadline = {
            let shutdown = shutdown.clone();
            async move {
                shutdown.wait().await;
                tracing::info!(timeout = ?drain_timeout, "Draining in-flight requests");
                tokio::time::sleep(drain_timeout).await;
            }
        };

        let result = tokio::select! {
            served = serve => served.map_err(ServerError::from),
            () = deadline => Err(ServerError::ShutdownTimeout(drain_timeout)),
        };

        // A listener failure ends serving without a signal; stop the helpers too.
        shutdown.trigger();

        tracing::info!(
            outstanding = self.state.tasks.outstanding(),
            "Completing background tasks"
        );
        self.state.tasks.wait().await;

        join_helper("rate limiter sweep", sweeper).await;
        join_helper("config reload", reloader).await;

        shutdown.mark_stopped();
        tracing::info!(address = %addr, "Stopped server");
        result
    }
}

/// Await a helper task, logging it if it panicked. Returns whether it exited cleanly.
async fn join_helper(name: &'static str, handle: JoinHandle<()>) -> bool {
    match handle.await {
        Ok(()) => true,
        Err(e) => {
            tracing::error!(task = name, error = %e, "Server helper task failed");
            false
        }
    }
}

fn spawn_config_reload(
    limiter: Arc<RateLimiter>,
    mut updates: mpsc::UnboundedReceiver<AppConfig>,
    shutdown: Shutdown,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            tokio::select! {
                update = updates.recv() => match update {
                    Some(config) => limiter.update_settings(config.limiter),
                    None => break,
                },
                _ = shutdown.wait() => break,
            }
        }
    })
}
