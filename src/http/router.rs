//! Route table and the global request pipeline.
//!
//! # Layer order (outermost first)
//! ```text
//! request id → trace span → panic containment → CORS
//!     → rate limit → authenticate → route
//!         → gates → metrics → handler
//! ```
//! Admission control runs before authentication so a rejected client never
//! costs a store lookup.

use std::any::Any;
use std::sync::Arc;

use axum::{
    middleware,
    response::Response,
    routing::{delete, get, patch, post, put, MethodRouter},
    Router,
};
use tower_http::{catch_panic::CatchPanicLayer, trace::TraceLayer};

use crate::config::AppConfig;
use crate::http::handlers::{self, AppState};
use crate::http::request::{request_id_layers, request_span};
use crate::http::response::panic_response;
use crate::lifecycle::tasks::panic_message;
use crate::observability::metrics::track_metrics;
use crate::security::auth::{authenticate, AuthState};
use crate::security::cors::cors_layer;
use crate::security::rate_limit::rate_limit_middleware;
use crate::security::{require_authenticated, require_permission, PermissionGate};

pub const MOVIES_READ: &str = "movies:read";
pub const MOVIES_WRITE: &str = "movies:write";

/// Build the full application: routes wrapped in the global pipeline.
pub fn build_router(state: AppState, config: &AppConfig) -> Router {
    with_pipeline(routes(&state).with_state(state.clone()), &state, config)
}

fn routes(state: &AppState) -> Router<AppState> {
    let read = || PermissionGate::new(MOVIES_READ, state.permissions.clone(), state.lookup_timeout);
    let write = || PermissionGate::new(MOVIES_WRITE, state.permissions.clone(), state.lookup_timeout);

    Router::new()
        .route("/v1/healthcheck", metered(get(handlers::healthcheck), state))
        .route("/debug/vars", metered(get(handlers::debug_vars), state))
        .route(
            "/v1/users/me",
            require_authenticated(metered(get(handlers::show_current_user), state)),
        )
        .route("/v1/users/activated", metered(put(handlers::activate_user), state))
        .route(
            "/v1/movies",
            require_permission(read(), metered(get(handlers::list_movies), state))
                .merge(require_permission(write(), metered(post(handlers::create_movie), state))),
        )
        .route(
            "/v1/movies/{id}",
            require_permission(read(), metered(get(handlers::show_movie), state))
                .merge(require_permission(write(), metered(patch(handlers::update_movie), state)))
                .merge(require_permission(write(), metered(delete(handlers::delete_movie), state))),
        )
        .fallback(handlers::not_found)
        .method_not_allowed_fallback(handlers::method_not_allowed)
}

/// Count every request that reaches the handler.
fn metered(route: MethodRouter<AppState>, state: &AppState) -> MethodRouter<AppState> {
    route.route_layer(middleware::from_fn_with_state(state.metrics.clone(), track_metrics))
}

/// Wrap `routes` in the global middleware stack.
///
/// Layers added later run earlier, so the list below reads innermost first.
/// There is no per-request deadline: a handler runs to completion unless the
/// shutdown drain deadline passes first.
pub fn with_pipeline(routes: Router, state: &AppState, config: &AppConfig) -> Router {
    let auth = AuthState {
        users: state.users.clone(),
        lookup_timeout: state.lookup_timeout,
    };
    let (set_request_id, propagate_request_id) = request_id_layers();

    routes
        .layer(middleware::from_fn_with_state(auth, authenticate))
        .layer(middleware::from_fn_with_state(
            Arc::clone(&state.limiter),
            rate_limit_middleware,
        ))
        .layer(cors_layer(&config.cors))
        .layer(CatchPanicLayer::custom(handle_panic))
        .layer(propagate_request_id)
        .layer(TraceLayer::new_for_http().make_span_with(request_span))
        .layer(set_request_id)
}

fn handle_panic(panic: Box<dyn Any + Send + 'static>) -> Response {
    panic_response(&panic_message(&panic))
}
