//! HTTP protocol handling subsystem.
//!
//! # Data Flow
//! ```text
//! TCP connection
//!     → server.rs (axum::serve, graceful drain)
//!     → router.rs (global pipeline, route table)
//!     → request.rs (request ID, trace span)
//!     → handlers.rs
//!     → response.rs (JSON envelope, opaque server errors)
//!     → Send to client
//! ```

pub mod handlers;
pub mod request;
pub mod response;
pub mod router;
pub mod server;

pub use handlers::AppState;
pub use request::X_REQUEST_ID;
pub use response::ApiError;
pub use router::{build_router, with_pipeline};
pub use server::{HttpServer, ServerError, Stores};
