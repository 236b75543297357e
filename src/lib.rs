//! Marquee: a movie catalog API built on Tokio and Axum.
//!
//! The interesting part is the request pipeline wrapped around every route:
//! panic containment, per-client rate limiting, bearer-token authentication,
//! composable authorization gates and request metrics, plus a graceful
//! shutdown that drains requests and background work.

// Core subsystems
pub mod config;
pub mod http;
pub mod store;

// Cross-cutting concerns
pub mod lifecycle;
pub mod observability;
pub mod security;

pub use config::AppConfig;
pub use http::{HttpServer, ServerError, Stores};
pub use lifecycle::Shutdown;
