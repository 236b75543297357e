//! Security subsystem.
//!
//! # Data Flow
//! ```text
//! Incoming request:
//!     → cors.rs (trusted origins, preflight)
//!     → rate_limit.rs (per-client token bucket)
//!     → auth.rs (Authorization header → Identity)
//!     → Router
//!         → gates.rs (authenticated / activated / permission, per route)
//!         → handler
//! ```
//!
//! # Design Decisions
//! - Fail closed: a store error or timeout during a check is a 500, never a pass
//! - Authentication never rejects a missing header; gates decide what needs a user
//! - Rejections are uniform so clients learn nothing about why a token failed

pub mod auth;
pub mod cors;
pub mod gates;
pub mod rate_limit;

pub use auth::{AuthState, Identity};
pub use gates::{require_activated, require_authenticated, require_permission, PermissionGate};
pub use rate_limit::RateLimiter;
