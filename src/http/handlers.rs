//! Route handlers.
//!
//! Handlers assume the pipeline has already run: the caller is admitted,
//! authenticated and, for gated routes, authorized.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::{rejection::JsonRejection, Path, State},
    http::{header, HeaderMap, HeaderName, HeaderValue, StatusCode},
    response::IntoResponse,
    Json,
};
use serde::Deserialize;
use serde_json::{json, Value};

use crate::http::response::ApiError;
use crate::lifecycle::TaskTracker;
use crate::observability::{MetricsSnapshot, RequestMetrics};
use crate::security::{Identity, RateLimiter};
use crate::store::token::is_valid_plaintext;
use crate::store::{
    AccountStore, MovieCatalog, MoviePatch, NewMovie, PermissionStore, StoreError, TokenScope, UserStore,
};

pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Optional precondition on updates: the version the client last saw.
pub static X_EXPECTED_VERSION: HeaderName = HeaderName::from_static("x-expected-version");

/// Shared state for handlers and the request pipeline.
#[derive(Clone)]
pub struct AppState {
    pub users: Arc<dyn UserStore>,
    pub accounts: Arc<dyn AccountStore>,
    pub permissions: Arc<dyn PermissionStore>,
    pub movies: Arc<MovieCatalog>,
    pub metrics: Arc<RequestMetrics>,
    pub limiter: Arc<RateLimiter>,
    pub tasks: TaskTracker,
    pub env: String,
    pub lookup_timeout: Duration,
}

pub async fn healthcheck(State(state): State<AppState>) -> Json<Value> {
    Json(json!({
        "status": "available",
        "system_info": {
            "environment": state.env,
            "version": VERSION,
        }
    }))
}

pub async fn debug_vars(State(state): State<AppState>) -> Json<MetricsSnapshot> {
    Json(state.metrics.snapshot())
}

pub async fn show_current_user(identity: Identity) -> Result<Json<Value>, ApiError> {
    let user = identity.user().ok_or(ApiError::AuthenticationRequired)?;
    Ok(Json(json!({ "user": user })))
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ActivationRequest {
    pub token: String,
}

/// Redeem an activation token for the account that holds it.
pub async fn activate_user(
    State(state): State<AppState>,
    payload: Result<Json<ActivationRequest>, JsonRejection>,
) -> Result<Json<Value>, ApiError> {
    let Json(input) = payload.map_err(|rejection| ApiError::BadRequest(rejection.body_text()))?;

    let token_error = |message| ApiError::FailedValidation(BTreeMap::from([("token", message)]));
    if input.token.is_empty() {
        return Err(token_error("must be provided"));
    }
    if !is_valid_plaintext(&input.token) {
        return Err(token_error("must be 26 bytes long"));
    }

    let lookup = state.users.get_for_token(TokenScope::Activation, &input.token);
    let user = match tokio::time::timeout(state.lookup_timeout, lookup)
        .await
        .unwrap_or(Err(StoreError::Timeout))
    {
        Ok(user) => user,
        Err(StoreError::RecordNotFound) => return Err(token_error("invalid or expired activation token")),
        Err(e) => return Err(e.into()),
    };

    let user = state.accounts.activate(user.id).await?;
    state.accounts.delete_all_tokens(TokenScope::Activation, user.id).await?;
    tracing::info!(user_id = user.id, "User activated");

    Ok(Json(json!({ "user": user })))
}

pub async fn list_movies(State(state): State<AppState>) -> Result<Json<Value>, ApiError> {
    let movies = state.movies.list()?;
    Ok(Json(json!({ "movies": movies })))
}

pub async fn show_movie(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    let movie = state.movies.get(parse_id(&id)?)?;
    Ok(Json(json!({ "movie": movie })))
}

pub async fn create_movie(
    State(state): State<AppState>,
    identity: Identity,
    payload: Result<Json<NewMovie>, JsonRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let Json(input) = payload.map_err(|rejection| ApiError::BadRequest(rejection.body_text()))?;

    let errors = input.validate();
    if !errors.is_empty() {
        return Err(ApiError::FailedValidation(errors));
    }

    let movie = state.movies.insert(input)?;

    let mut headers = HeaderMap::new();
    let location = format!("/v1/movies/{}", movie.id);
    if let Ok(value) = HeaderValue::from_str(&location) {
        headers.insert(header::LOCATION, value);
    }

    let created_by = identity.user().map(|user| user.id);
    let (movie_id, title) = (movie.id, movie.title.clone());
    state.tasks.launch(async move {
        tracing::info!(movie_id, title = %title, created_by, "Announcing new catalog entry");
    });

    Ok((StatusCode::CREATED, headers, Json(json!({ "movie": movie }))))
}

/// Apply a partial update. The write fails with an edit conflict if the
/// record changed after it was read here, or if `X-Expected-Version` names a
/// different version than the current one.
pub async fn update_movie(
    State(state): State<AppState>,
    Path(id): Path<String>,
    headers: HeaderMap,
    payload: Result<Json<MoviePatch>, JsonRejection>,
) -> Result<Json<Value>, ApiError> {
    let mut movie = state.movies.get(parse_id(&id)?)?;

    if let Some(expected) = headers.get(&X_EXPECTED_VERSION) {
        if expected.as_bytes() != movie.version.to_string().as_bytes() {
            return Err(ApiError::EditConflict);
        }
    }

    let Json(patch) = payload.map_err(|rejection| ApiError::BadRequest(rejection.body_text()))?;
    patch.apply_to(&mut movie);

    let errors = movie.validate();
    if !errors.is_empty() {
        return Err(ApiError::FailedValidation(errors));
    }

    let movie = state.movies.update(&movie)?;
    Ok(Json(json!({ "movie": movie })))
}

pub async fn delete_movie(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    state.movies.delete(parse_id(&id)?)?;
    Ok(Json(json!({ "message": "movie successfully deleted" })))
}

pub async fn not_found() -> ApiError {
    ApiError::NotFound
}

pub async fn method_not_allowed() -> ApiError {
    ApiError::MethodNotAllowed
}

/// Ids are positive integers; anything else names no resource.
fn parse_id(raw: &str) -> Result<i64, ApiError> {
    raw.parse::<i64>()
        .ok()
        .filter(|id| *id >= 1)
        .ok_or(ApiError::NotFound)
}
