//! Per-route authorization gates.
//!
//! Each gate wraps a route and checks one precondition against the
//! [`Identity`] attached by the authentication middleware:
//!
//! ```text
//! require_authenticated(h) = authenticated? → h
//! require_activated(h)     = require_authenticated(activated? → h)
//! require_permission(c, h) = require_activated(has permission c? → h)
//! ```
//!
//! Gates only read the identity; a failed check short-circuits with its own
//! rejection and the wrapped route never runs.

use std::sync::Arc;
use std::time::Duration;

use axum::{
    body::Body,
    extract::State,
    http::Request,
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::MethodRouter,
};

use crate::http::response::ApiError;
use crate::security::auth::Identity;
use crate::store::{PermissionStore, StoreError};

/// Reject anonymous callers.
pub fn require_authenticated<S>(route: MethodRouter<S>) -> MethodRouter<S>
where
    S: Clone + Send + Sync + 'static,
{
    route.route_layer(middleware::from_fn(check_authenticated))
}

/// Reject anonymous callers, then callers whose account is not activated.
pub fn require_activated<S>(route: MethodRouter<S>) -> MethodRouter<S>
where
    S: Clone + Send + Sync + 'static,
{
    require_authenticated(route.route_layer(middleware::from_fn(check_activated)))
}

/// Reject callers that are not activated or lack the permission `gate.code`.
pub fn require_permission<S>(gate: PermissionGate, route: MethodRouter<S>) -> MethodRouter<S>
where
    S: Clone + Send + Sync + 'static,
{
    require_activated(route.route_layer(middleware::from_fn_with_state(gate, check_permission)))
}

/// A required permission code and where to look it up.
#[derive(Clone)]
pub struct PermissionGate {
    pub code: &'static str,
    pub store: Arc<dyn PermissionStore>,
    pub lookup_timeout: Duration,
}

impl PermissionGate {
    pub fn new(code: &'static str, store: Arc<dyn PermissionStore>, lookup_timeout: Duration) -> Self {
        Self {
            code,
            store,
            lookup_timeout,
        }
    }
}

static ANONYMOUS: Identity = Identity::Anonymous;

fn identity_of(request: &Request<Body>) -> &Identity {
    request.extensions().get::<Identity>().unwrap_or(&ANONYMOUS)
}

async fn check_authenticated(request: Request<Body>, next: Next) -> Response {
    if identity_of(&request).is_anonymous() {
        return ApiError::AuthenticationRequired.into_response();
    }
    next.run(request).await
}

async fn check_activated(request: Request<Body>, next: Next) -> Response {
    match identity_of(&request).user() {
        Some(user) if user.activated => next.run(request).await,
        _ => ApiError::InactiveAccount.into_response(),
    }
}

async fn check_permission(
    State(gate): State<PermissionGate>,
    request: Request<Body>,
    next: Next,
) -> Response {
    let Some(user_id) = identity_of(&request).user().map(|user| user.id) else {
        return ApiError::AuthenticationRequired.into_response();
    };

    let lookup = gate.store.get_all_for_user(user_id);
    let permissions = match tokio::time::timeout(gate.lookup_timeout, lookup)
        .await
        .unwrap_or(Err(StoreError::Timeout))
    {
        Ok(permissions) => permissions,
        Err(e) => {
            return ApiError::Internal(format!("permission lookup for user {user_id} failed: {e}"))
                .into_response()
        }
    };

    if !permissions.include(gate.code) {
        tracing::debug!(user_id, code = gate.code, "Permission denied");
        return ApiError::NotPermitted.into_response();
    }

    next.run(request).await
}
