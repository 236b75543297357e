//! Request authentication.
//!
//! Resolves the caller's [`Identity`] from the `Authorization` header and
//! attaches it to the request extensions for the rest of the pipeline.
//!
//! Wrong scheme, malformed token, and unknown or expired token all produce the
//! same `InvalidAuthenticationToken` rejection, so a client cannot tell which
//! check failed.

use std::sync::Arc;
use std::time::Duration;

use axum::{
    body::Body,
    extract::{FromRequestParts, State},
    http::{header, request::Parts, HeaderValue, Request},
    middleware::Next,
    response::{IntoResponse, Response},
};

use crate::http::response::ApiError;
use crate::store::token::is_valid_plaintext;
use crate::store::{StoreError, TokenScope, User, UserStore};

/// Scheme literal expected in the `Authorization` header.
pub const AUTH_SCHEME: &str = "Bearer";

/// Who is making the request. Set once per request, never mutated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Identity {
    Anonymous,
    User(User),
}

impl Identity {
    pub fn is_anonymous(&self) -> bool {
        matches!(self, Identity::Anonymous)
    }

    pub fn user(&self) -> Option<&User> {
        match self {
            Identity::Anonymous => None,
            Identity::User(user) => Some(user),
        }
    }
}

impl<S: Send + Sync> FromRequestParts<S> for Identity {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<Identity>()
            .cloned()
            .ok_or_else(|| ApiError::Internal("identity missing from request context".to_string()))
    }
}

/// State for the authentication middleware.
#[derive(Clone)]
pub struct AuthState {
    pub users: Arc<dyn UserStore>,
    pub lookup_timeout: Duration,
}

/// Resolve the identity for a request.
///
/// An absent or empty `Authorization` header means an anonymous caller.
async fn resolve_identity(state: &AuthState, header_value: Option<&HeaderValue>) -> Result<Identity, ApiError> {
    let Some(value) = header_value.filter(|value| !value.is_empty()) else {
        return Ok(Identity::Anonymous);
    };

    let value = value.to_str().map_err(|_| ApiError::InvalidAuthenticationToken)?;
    let token = match value.split(' ').collect::<Vec<_>>().as_slice() {
        [scheme, token] if *scheme == AUTH_SCHEME => *token,
        _ => return Err(ApiError::InvalidAuthenticationToken),
    };

    if !is_valid_plaintext(token) {
        return Err(ApiError::InvalidAuthenticationToken);
    }

    let lookup = state.users.get_for_token(TokenScope::Authentication, token);
    let result = tokio::time::timeout(state.lookup_timeout, lookup)
        .await
        .unwrap_or(Err(StoreError::Timeout));

    match result {
        Ok(user) => Ok(Identity::User(user)),
        Err(StoreError::RecordNotFound) => Err(ApiError::InvalidAuthenticationToken),
        Err(e) => Err(ApiError::Internal(format!("token lookup failed: {e}"))),
    }
}

/// Middleware attaching an [`Identity`] to every request.
pub async fn authenticate(
    State(state): State<AuthState>,
    mut request: Request<Body>,
    next: Next,
) -> Response {
    let resolved = resolve_identity(&state, request.headers().get(header::AUTHORIZATION)).await;

    let mut response = match resolved {
        Ok(identity) => {
            request.extensions_mut().insert(identity);
            next.run(request).await
        }
        Err(e) => e.into_response(),
    };

    response
        .headers_mut()
        .append(header::VARY, HeaderValue::from_static("Authorization"));
    response
}
