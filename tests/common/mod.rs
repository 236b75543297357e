//! Shared utilities for integration tests.
#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::body::{to_bytes, Body};
use axum::extract::connect_info::MockConnectInfo;
use axum::http::{header, HeaderMap, Method, Request, StatusCode};
use axum::Router;
use serde_json::Value;
use tower::ServiceExt;

use marquee::config::AppConfig;
use marquee::store::{MemoryStore, MovieCatalog, TokenScope, UserStore};
use marquee::{HttpServer, Stores};

pub const CLIENT_ADDR: ([u8; 4], u16) = ([203, 0, 113, 7], 41000);

/// Config for in-process tests: limiter off unless a test turns it on.
pub fn test_config() -> AppConfig {
    let mut config = AppConfig::default();
    config.server.bind_address = "127.0.0.1:0".to_string();
    config.limiter.enabled = false;
    config
}

/// A server plus the store behind it.
pub struct TestApp {
    pub server: HttpServer,
    pub store: MemoryStore,
}

impl TestApp {
    pub fn new(config: AppConfig) -> Self {
        let store = MemoryStore::new();
        Self::with_user_store(config, store.clone(), Arc::new(store))
    }

    pub fn with_user_store(config: AppConfig, store: MemoryStore, users: Arc<dyn UserStore>) -> Self {
        let stores = Stores {
            users,
            accounts: Arc::new(store.clone()),
            permissions: Arc::new(store.clone()),
            movies: Arc::new(MovieCatalog::new()),
        };
        Self {
            server: HttpServer::new(config, stores),
            store,
        }
    }

    /// The application router as seen from a fixed client address.
    pub fn router(&self) -> Router {
        self.server
            .router()
            .layer(MockConnectInfo(SocketAddr::from(CLIENT_ADDR)))
    }

    /// Issue an activation token for the user holding `auth_token`.
    pub async fn activation_token(&self, auth_token: &str) -> String {
        let user = self
            .store
            .get_for_token(TokenScope::Authentication, auth_token)
            .await
            .unwrap();
        self.store
            .issue_token(user.id, TokenScope::Activation, Duration::from_secs(3600))
            .unwrap()
    }

    /// Register a user and return a fresh authentication token for them.
    pub fn seed_user(&self, email: &str, activated: bool, permissions: &[&str]) -> String {
        let user = self.store.insert_user("Test User", email, activated);
        self.store.add_permissions(user.id, permissions.iter().copied());
        self.store
            .issue_token(user.id, TokenScope::Authentication, Duration::from_secs(3600))
            .unwrap()
    }
}

pub struct TestResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Value,
}

/// Send one request through `router`.
pub async fn send(
    router: &Router,
    method: Method,
    uri: &str,
    token: Option<&str>,
    body: Option<&str>,
) -> TestResponse {
    let mut builder = Request::builder().method(method).uri(uri);
    if let Some(token) = token {
        builder = builder.header(header::AUTHORIZATION, format!("Bearer {token}"));
    }
    let request = match body {
        Some(body) => builder
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    };

    let response = router.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let headers = response.headers().clone();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let body = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap_or_else(|_| Value::String(String::from_utf8_lossy(&bytes).into_owned()))
    };

    TestResponse { status, headers, body }
}

pub async fn get(router: &Router, uri: &str, token: Option<&str>) -> TestResponse {
    send(router, Method::GET, uri, token, None).await
}
