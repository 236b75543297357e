//! Error responses.
//!
//! Every rejection produced by the pipeline or a handler is an [`ApiError`],
//! rendered as a JSON envelope `{"error": ...}`. Server-side failures are
//! logged in full and reduced to a fixed message for the client.

use std::collections::BTreeMap;

use axum::{
    http::{header, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

use crate::store::StoreError;

const SERVER_ERROR_MESSAGE: &str = "the server encountered a problem and could not process your request";

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("rate limit exceeded")]
    RateLimitExceeded,

    #[error("invalid or missing authentication token")]
    InvalidAuthenticationToken,

    #[error("you must be authenticated to access this resource")]
    AuthenticationRequired,

    #[error("your user account must be activated to access this resource")]
    InactiveAccount,

    #[error("your user account doesn't have the necessary permissions to access this resource")]
    NotPermitted,

    #[error("the requested resource could not be found")]
    NotFound,

    #[error("the requested method is not supported for this resource")]
    MethodNotAllowed,

    #[error("unable to update the record due to an edit conflict, please try again")]
    EditConflict,

    #[error("{0}")]
    BadRequest(String),

    #[error("validation failed")]
    FailedValidation(BTreeMap<&'static str, &'static str>),

    #[error("internal error: {0}")]
    Internal(String),
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::RateLimitExceeded => StatusCode::TOO_MANY_REQUESTS,
            ApiError::InvalidAuthenticationToken | ApiError::AuthenticationRequired => {
                StatusCode::UNAUTHORIZED
            }
            ApiError::InactiveAccount | ApiError::NotPermitted => StatusCode::FORBIDDEN,
            ApiError::NotFound => StatusCode::NOT_FOUND,
            ApiError::MethodNotAllowed => StatusCode::METHOD_NOT_ALLOWED,
            ApiError::EditConflict => StatusCode::CONFLICT,
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::FailedValidation(_) => StatusCode::UNPROCESSABLE_ENTITY,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<StoreError> for ApiError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::RecordNotFound => ApiError::NotFound,
            StoreError::EditConflict => ApiError::EditConflict,
            other => ApiError::Internal(other.to_string()),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let body = match &self {
            ApiError::Internal(detail) => {
                tracing::error!(error = %detail, "Request failed with server error");
                json!({ "error": SERVER_ERROR_MESSAGE })
            }
            ApiError::FailedValidation(fields) => json!({ "error": fields }),
            other => json!({ "error": other.to_string() }),
        };

        let mut response = (status, Json(body)).into_response();
        if matches!(self, ApiError::InvalidAuthenticationToken) {
            response
                .headers_mut()
                .insert(header::WWW_AUTHENTICATE, HeaderValue::from_static("Bearer"));
        }
        response
    }
}

/// Response for a panic caught at the pipeline boundary.
///
/// The connection is closed after the response is written.
pub fn panic_response(detail: &str) -> Response {
    tracing::error!(panic = %detail, "Request handler panicked");
    let mut response = (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(json!({ "error": SERVER_ERROR_MESSAGE })),
    )
        .into_response();
    response
        .headers_mut()
        .insert(header::CONNECTION, HeaderValue::from_static("close"));
    response
}
