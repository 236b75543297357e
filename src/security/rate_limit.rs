//! Per-client rate limiting.
//!
//! Each client key owns a token bucket. Buckets are created lazily on the
//! first request and evicted by a periodic sweep once the client has been idle
//! for [`EVICTION_AGE`].

use std::collections::HashMap;
use std::net::{IpAddr, SocketAddr};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use arc_swap::ArcSwap;
use axum::{
    body::Body,
    extract::{rejection::ExtensionRejection, ConnectInfo, State},
    http::{HeaderMap, Request},
    middleware::Next,
    response::{IntoResponse, Response},
};
use tokio::task::JoinHandle;
use tokio::time::{self, Instant};

use crate::config::RateLimitConfig;
use crate::http::response::ApiError;
use crate::lifecycle::Shutdown;
use crate::observability::metrics;

/// How often idle clients are swept.
pub const SWEEP_INTERVAL: Duration = Duration::from_secs(60);

/// Idle time after which a client's state is dropped.
pub const EVICTION_AGE: Duration = Duration::from_secs(5 * 60);

/// A token bucket. Capacity and refill rate are passed per call so a config
/// reload applies to existing buckets.
#[derive(Debug)]
struct TokenBucket {
    tokens: f64,
    last_refill: Instant,
}

impl TokenBucket {
    fn new(capacity: f64, now: Instant) -> Self {
        Self {
            tokens: capacity,
            last_refill: now,
        }
    }

    fn try_acquire(&mut self, capacity: f64, refill_rate: f64, now: Instant) -> bool {
        let elapsed = now.saturating_duration_since(self.last_refill).as_secs_f64();

        self.tokens = (self.tokens + elapsed * refill_rate).min(capacity);
        self.last_refill = now;

        if self.tokens >= 1.0 {
            self.tokens -= 1.0;
            true
        } else {
            false
        }
    }
}

#[derive(Debug)]
struct ClientState {
    bucket: TokenBucket,
    last_seen: Instant,
}

/// Admission control keyed by client.
pub struct RateLimiter {
    clients: Mutex<HashMap<String, ClientState>>,
    settings: ArcSwap<RateLimitConfig>,
}

impl RateLimiter {
    pub fn new(config: RateLimitConfig) -> Self {
        Self {
            clients: Mutex::new(HashMap::new()),
            settings: ArcSwap::from_pointee(config),
        }
    }

    /// Consume one token for `key`, returning whether the request is admitted.
    ///
    /// When the limiter is disabled every call is admitted and no state is kept.
    pub fn allow(&self, key: &str) -> bool {
        let settings = self.settings.load();
        if !settings.enabled {
            return true;
        }

        let capacity = f64::from(settings.burst);
        let now = Instant::now();

        let mut clients = self.lock_clients();
        let client = clients.entry(key.to_string()).or_insert_with(|| ClientState {
            bucket: TokenBucket::new(capacity, now),
            last_seen: now,
        });
        client.last_seen = now;
        client
            .bucket
            .try_acquire(capacity, settings.requests_per_second, now)
    }

    /// Drop every client idle for longer than [`EVICTION_AGE`].
    ///
    /// Returns the number of evicted clients.
    pub fn evict_idle(&self) -> usize {
        let now = Instant::now();
        let mut clients = self.lock_clients();
        let before = clients.len();
        clients.retain(|_, client| now.saturating_duration_since(client.last_seen) <= EVICTION_AGE);
        before - clients.len()
    }

    /// Swap in new settings; existing buckets use them on their next request.
    pub fn update_settings(&self, config: RateLimitConfig) {
        tracing::info!(
            enabled = config.enabled,
            requests_per_second = config.requests_per_second,
            burst = config.burst,
            "Rate limiter settings updated"
        );
        self.settings.store(Arc::new(config));
    }

    pub fn settings(&self) -> Arc<RateLimitConfig> {
        self.settings.load_full()
    }

    /// Number of clients currently tracked.
    pub fn client_count(&self) -> usize {
        self.lock_clients().len()
    }

    /// Start the periodic sweep. The task exits when `shutdown` begins.
    pub fn spawn_sweeper(self: &Arc<Self>, shutdown: Shutdown) -> JoinHandle<()> {
        let limiter = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = time::interval_at(Instant::now() + SWEEP_INTERVAL, SWEEP_INTERVAL);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let evicted = limiter.evict_idle();
                        if evicted > 0 {
                            tracing::debug!(evicted, "Evicted idle rate limiter clients");
                        }
                    }
                    _ = shutdown.wait() => {
                        tracing::debug!("Rate limiter sweep stopping");
                        break;
                    }
                }
            }
        })
    }

    fn lock_clients(&self) -> MutexGuard<'_, HashMap<String, ClientState>> {
        // Critical sections never panic midway, so a poisoned map is still consistent.
        self.clients.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Derive the client key for a request.
///
/// `None` when there is no trusted forwarding header and the peer address is
/// unknown, as happens when the router is driven without a listener.
pub fn client_key(headers: &HeaderMap, peer: Option<SocketAddr>, trust_forwarded: bool) -> Option<String> {
    if trust_forwarded {
        let forwarded = headers
            .get("x-forwarded-for")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.split(',').next())
            .and_then(|ip| ip.trim().parse::<IpAddr>().ok());
        let real_ip = || {
            headers
                .get("x-real-ip")
                .and_then(|v| v.to_str().ok())
                .and_then(|ip| ip.trim().parse::<IpAddr>().ok())
        };
        if let Some(ip) = forwarded.or_else(real_ip) {
            return Some(ip.to_string());
        }
    }
    peer.map(|addr| addr.ip().to_string())
}

/// Middleware rejecting clients that have exhausted their bucket.
///
/// Requests with no identifiable client are admitted.
pub async fn rate_limit_middleware(
    connect_info: Result<ConnectInfo<SocketAddr>, ExtensionRejection>,
    State(limiter): State<Arc<RateLimiter>>,
    request: Request<Body>,
    next: Next,
) -> Response {
    let settings = limiter.settings();
    if !settings.enabled {
        return next.run(request).await;
    }

    let peer = connect_info.ok().map(|ConnectInfo(addr)| addr);
    let Some(key) = client_key(request.headers(), peer, settings.trust_forwarded_headers) else {
        tracing::debug!("No client address for request, skipping rate limit");
        return next.run(request).await;
    };

    if limiter.allow(&key) {
        next.run(request).await
    } else {
        tracing::warn!(client = %key, "Rate limit exceeded");
        metrics::record_rate_limited();
        ApiError::RateLimitExceeded.into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    fn config(rps: f64, burst: u32) -> RateLimitConfig {
        RateLimitConfig {
            enabled: true,
            requests_per_second: rps,
            burst,
            trust_forwarded_headers: false,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_burst_then_reject() {
        let limiter = RateLimiter::new(config(2.0, 4));
        for _ in 0..4 {
            assert!(limiter.allow("10.0.0.1"));
        }
        assert!(!limiter.allow("10.0.0.1"));
        // Other clients have their own bucket.
        assert!(limiter.allow("10.0.0.2"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_refill_over_time() {
        let limiter = RateLimiter::new(config(2.0, 4));
        for _ in 0..4 {
            assert!(limiter.allow("c"));
        }
        assert!(!limiter.allow("c"));

        time::advance(Duration::from_millis(500)).await;
        assert!(limiter.allow("c"));
        assert!(!limiter.allow("c"));

        // Refill is capped at the burst size.
        time::advance(Duration::from_secs(60)).await;
        for _ in 0..4 {
            assert!(limiter.allow("c"));
        }
        assert!(!limiter.allow("c"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_spaced_requests_always_admitted() {
        let limiter = RateLimiter::new(config(2.0, 1));
        for _ in 0..20 {
            assert!(limiter.allow("c"));
            time::advance(Duration::from_millis(500)).await;
        }
    }

    #[tokio::test]
    async fn test_disabled_admits_everything_without_state() {
        let mut cfg = config(1.0, 1);
        cfg.enabled = false;
        let limiter = RateLimiter::new(cfg);
        for i in 0..1000 {
            assert!(limiter.allow(&format!("client-{}", i % 3)));
        }
        assert_eq!(limiter.client_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_idle_clients_evicted_and_recreated_fresh() {
        let limiter = RateLimiter::new(config(0.001, 3));
        for _ in 0..3 {
            assert!(limiter.allow("idle"));
        }
        assert!(!limiter.allow("idle"));

        time::advance(Duration::from_secs(4 * 60)).await;
        assert!(limiter.allow("active"));
        assert_eq!(limiter.evict_idle(), 0);

        time::advance(Duration::from_secs(61 + 60)).await;
        assert!(limiter.allow("active"));
        assert_eq!(limiter.evict_idle(), 1);
        assert_eq!(limiter.client_count(), 1);

        // Full burst again, as if never seen.
        for _ in 0..3 {
            assert!(limiter.allow("idle"));
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_sweeper_evicts_in_background() {
        let limiter = Arc::new(RateLimiter::new(config(2.0, 4)));
        let shutdown = Shutdown::new();
        let handle = limiter.spawn_sweeper(shutdown.clone());

        limiter.allow("gone");
        time::sleep(Duration::from_secs(7 * 60)).await;
        assert_eq!(limiter.client_count(), 0);

        shutdown.trigger();
        handle.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_settings_reload_applies_to_existing_buckets() {
        let limiter = RateLimiter::new(config(1.0, 1));
        assert!(limiter.allow("c"));
        assert!(!limiter.allow("c"));

        limiter.update_settings(config(1000.0, 10));
        time::advance(Duration::from_millis(10)).await;
        for _ in 0..10 {
            assert!(limiter.allow("c"));
        }

        let mut disabled = config(1.0, 1);
        disabled.enabled = false;
        limiter.update_settings(disabled);
        assert!(limiter.allow("c"));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_clients_do_not_corrupt_map() {
        let limiter = Arc::new(RateLimiter::new(config(0.0001, 5)));
        let mut handles = Vec::new();
        for client in 0..100 {
            let limiter = limiter.clone();
            handles.push(tokio::spawn(async move {
                let key = format!("192.0.2.{client}");
                let mut admitted = 0;
                for _ in 0..10 {
                    if limiter.allow(&key) {
                        admitted += 1;
                    }
                    tokio::task::yield_now().await;
                }
                (key, admitted)
            }));
        }

        let mut keys = HashSet::new();
        for handle in handles {
            let (key, admitted) = handle.await.unwrap();
            assert_eq!(admitted, 5, "client {key} admitted {admitted}");
            keys.insert(key);
        }
        assert_eq!(keys.len(), 100);
        assert_eq!(limiter.client_count(), 100);
    }

    #[test]
    fn test_client_key_from_headers() {
        let peer: SocketAddr = "198.51.100.7:5555".parse().unwrap();
        let mut headers = HeaderMap::new();
        headers.insert("x-forwarded-for", "203.0.113.9, 10.0.0.1".parse().unwrap());

        assert_eq!(client_key(&headers, Some(peer), false).as_deref(), Some("198.51.100.7"));
        assert_eq!(client_key(&headers, Some(peer), true).as_deref(), Some("203.0.113.9"));

        let mut headers = HeaderMap::new();
        headers.insert("x-real-ip", "203.0.113.10".parse().unwrap());
        assert_eq!(client_key(&headers, Some(peer), true).as_deref(), Some("203.0.113.10"));

        let mut headers = HeaderMap::new();
        headers.insert("x-forwarded-for", "not-an-ip".parse().unwrap());
        assert_eq!(client_key(&headers, Some(peer), true).as_deref(), Some("198.51.100.7"));
    }

    #[test]
    fn test_client_key_without_peer() {
        let mut headers = HeaderMap::new();
        assert_eq!(client_key(&headers, None, true), None);

        headers.insert("x-forwarded-for", "203.0.113.9".parse().unwrap());
        assert_eq!(client_key(&headers, None, false), None);
        assert_eq!(client_key(&headers, None, true).as_deref(), Some("203.0.113.9"));
    }

    #[tokio::test]
    async fn test_middleware_admits_requests_without_peer() {
        use axum::{middleware, routing::get, Router};
        use tower::ServiceExt;

        let limiter = Arc::new(RateLimiter::new(config(0.001, 1)));
        let app = Router::new()
            .route("/", get(|| async { "ok" }))
            .layer(middleware::from_fn_with_state(limiter.clone(), rate_limit_middleware));

        for _ in 0..3 {
            let request = Request::builder().uri("/").body(Body::empty()).unwrap();
            let response = app.clone().oneshot(request).await.unwrap();
            assert_eq!(response.status(), axum::http::StatusCode::OK);
        }
        assert_eq!(limiter.client_count(), 0);
    }
}
