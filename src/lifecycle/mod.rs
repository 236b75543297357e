//! Lifecycle management subsystem.
//!
//! # Data Flow
//! ```text
//! Signals (signals.rs):
//!     SIGTERM/SIGINT → Shutdown::trigger
//!
//! Shutdown (shutdown.rs):
//!     Running → Draining: stop accepting, finish in-flight requests (bounded)
//!     → tasks.rs: wait for background work (unbounded)
//!     → Stopped
//! ```
//!
//! # Design Decisions
//! - Transitions are one-way; a second signal does nothing
//! - Listener drain has a deadline, background work does not
//! - Background work is launched only by request handlers, which stop before
//!   the tracker is waited on

pub mod shutdown;
pub mod signals;
pub mod tasks;

pub use shutdown::{Shutdown, ShutdownState};
pub use tasks::TaskTracker;
