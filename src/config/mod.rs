//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! config file (TOML) + command-line flags
//!     → loader.rs (parse & deserialize)
//!     → validation.rs (semantic checks)
//!     → AppConfig (validated, immutable)
//!     → shared with subsystems at startup
//!
//! On file change:
//!     watcher.rs detects change
//!     → loader.rs loads new config
//!     → validation.rs validates
//!     → server applies the new limiter settings (atomic swap)
//! ```
//!
//! # Design Decisions
//! - All fields have defaults to allow minimal configs
//! - Only limiter settings are hot-reloadable; the rest needs a restart
//! - Validation separates syntactic (serde) from semantic checks

pub mod cli;
pub mod loader;
pub mod schema;
pub mod validation;
pub mod watcher;

pub use cli::CliArgs;
pub use loader::{load_config, ConfigError};
pub use schema::{AppConfig, AuthConfig, CorsConfig, ObservabilityConfig, RateLimitConfig, ServerConfig};
