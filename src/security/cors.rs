//! Cross-origin resource sharing for trusted origins.
//!
//! Only origins listed in `cors.trusted_origins` are echoed back in
//! `Access-Control-Allow-Origin`; matching is exact. Every response carries
//! `Vary: Origin` so caches never mix responses across origins.

use axum::http::{header, HeaderValue, Method};
use tower_http::cors::{AllowOrigin, CorsLayer};

use crate::config::CorsConfig;

/// Methods a preflight request may ask for.
pub const PREFLIGHT_METHODS: [Method; 4] = [Method::OPTIONS, Method::PUT, Method::PATCH, Method::DELETE];

/// Build the CORS layer for the configured origins.
///
/// Origins that are not valid header values are skipped with a warning.
pub fn cors_layer(config: &CorsConfig) -> CorsLayer {
    let origins: Vec<HeaderValue> = config
        .trusted_origins
        .iter()
        .filter_map(|origin| match HeaderValue::from_str(origin) {
            Ok(value) => Some(value),
            Err(_) => {
                tracing::warn!(origin = %origin, "Ignoring invalid trusted origin");
                None
            }
        })
        .collect();

    CorsLayer::new()
        .allow_origin(AllowOrigin::list(origins))
        .allow_methods(PREFLIGHT_METHODS.to_vec())
        .allow_headers([header::AUTHORIZATION, header::CONTENT_TYPE])
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{body::Body, http::Request, http::StatusCode, routing::get, Router};
    use tower::ServiceExt;

    fn app(origins: &[&str]) -> Router {
        let config = CorsConfig {
            trusted_origins: origins.iter().map(|o| o.to_string()).collect(),
        };
        Router::new()
            .route("/", get(|| async { "ok" }).put(|| async { "ok" }))
            .layer(cors_layer(&config))
    }

    fn vary_values(response: &axum::response::Response) -> Vec<String> {
        response
            .headers()
            .get_all(header::VARY)
            .iter()
            .filter_map(|v| v.to_str().ok())
            .flat_map(|v| v.split(',').map(|s| s.trim().to_ascii_lowercase()))
            .collect()
    }

    #[tokio::test]
    async fn test_trusted_origin_is_echoed() {
        let response = app(&["https://www.example.com"])
            .oneshot(
                Request::builder()
                    .uri("/")
                    .header(header::ORIGIN, "https://www.example.com")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers()[header::ACCESS_CONTROL_ALLOW_ORIGIN],
            "https://www.example.com"
        );
        assert!(vary_values(&response).contains(&"origin".to_string()));
    }

    #[tokio::test]
    async fn test_untrusted_origin_gets_no_allow_header() {
        let response = app(&["https://www.example.com"])
            .oneshot(
                Request::builder()
                    .uri("/")
                    .header(header::ORIGIN, "https://evil.example.com")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert!(response.headers().get(header::ACCESS_CONTROL_ALLOW_ORIGIN).is_none());
        assert!(vary_values(&response).contains(&"origin".to_string()));
    }

    #[tokio::test]
    async fn test_preflight() {
        let response = app(&["https://www.example.com"])
            .oneshot(
                Request::builder()
                    .method(Method::OPTIONS)
                    .uri("/")
                    .header(header::ORIGIN, "https://www.example.com")
                    .header(header::ACCESS_CONTROL_REQUEST_METHOD, "PUT")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let methods = response.headers()[header::ACCESS_CONTROL_ALLOW_METHODS]
            .to_str()
            .unwrap()
            .to_string();
        for method in ["OPTIONS", "PUT", "PATCH", "DELETE"] {
            assert!(methods.contains(method), "{methods}");
        }
        let headers = response.headers()[header::ACCESS_CONTROL_ALLOW_HEADERS]
            .to_str()
            .unwrap()
            .to_ascii_lowercase();
        assert!(headers.contains("authorization"));
        assert!(headers.contains("content-type"));
    }
}
