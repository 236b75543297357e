//! Metrics collection and exposition.
//!
//! # Responsibilities
//! - Count requests, responses by status and processing time per request
//! - Expose an in-process snapshot (`/debug/vars`)
//! - Mirror the same events into the `metrics` facade for Prometheus
//!
//! # Metrics
//! - `marquee_requests_total` (counter): responses by status
//! - `marquee_request_duration_seconds` (histogram): latency distribution
//! - `marquee_rate_limited_total` (counter): admission rejections
//!
//! # Design Decisions
//! - [`RequestMetrics`] is created once by the server and injected; there is
//!   no global registry lookup, so tests build isolated instances
//! - Each counter is independently atomic; counters may transiently disagree
//! - Counters only ever increase

use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use axum::{body::Body, extract::State, http::Request, middleware::Next, response::Response};
use dashmap::DashMap;
use metrics_exporter_prometheus::PrometheusBuilder;
use serde::Serialize;

/// Process-wide request counters.
#[derive(Debug, Default)]
pub struct RequestMetrics {
    requests_received: AtomicU64,
    responses_sent: AtomicU64,
    processing_time_us: AtomicU64,
    responses_by_status: DashMap<u16, AtomicU64>,
}

/// Read-only view of [`RequestMetrics`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MetricsSnapshot {
    pub total_requests_received: u64,
    pub total_responses_sent: u64,
    pub total_processing_time_us: u64,
    pub total_responses_sent_by_status: BTreeMap<u16, u64>,
}

impl RequestMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_received(&self) {
        self.requests_received.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_sent(&self, status: u16, elapsed_us: u64) {
        self.responses_sent.fetch_add(1, Ordering::Relaxed);
        self.responses_by_status
            .entry(status)
            .or_default()
            .fetch_add(1, Ordering::Relaxed);
        self.processing_time_us.fetch_add(elapsed_us, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            total_requests_received: self.requests_received.load(Ordering::Relaxed),
            total_responses_sent: self.responses_sent.load(Ordering::Relaxed),
            total_processing_time_us: self.processing_time_us.load(Ordering::Relaxed),
            total_responses_sent_by_status: self
                .responses_by_status
                .iter()
                .map(|entry| (*entry.key(), entry.value().load(Ordering::Relaxed)))
                .collect(),
        }
    }
}

/// Middleware recording every request that reaches a route handler.
///
/// The response passes through untouched; only its status is observed.
pub async fn track_metrics(
    State(metrics): State<Arc<RequestMetrics>>,
    request: Request<Body>,
    next: Next,
) -> Response {
    let start = Instant::now();
    metrics.record_received();
    let method = request.method().to_string();

    let response = next.run(request).await;

    let status = response.status().as_u16();
    let elapsed_us = u64::try_from(start.elapsed().as_micros()).unwrap_or(u64::MAX);
    metrics.record_sent(status, elapsed_us);
    record_request(&method, status, start);

    response
}

/// Install the Prometheus exporter on `addr`.
pub fn init_metrics(addr: SocketAddr) {
    match PrometheusBuilder::new().with_http_listener(addr).install() {
        Ok(()) => tracing::info!(address = %addr, "Prometheus exporter listening"),
        Err(e) => tracing::error!(address = %addr, error = %e, "Failed to install Prometheus exporter"),
    }
}

pub fn record_request(method: &str, status: u16, start: Instant) {
    metrics::counter!(
        "marquee_requests_total",
        "method" => method.to_string(),
        "status" => status.to_string()
    )
    .increment(1);
    metrics::histogram!("marquee_request_duration_seconds", "method" => method.to_string())
        .record(start.elapsed().as_secs_f64());
}

pub fn record_rate_limited() {
    metrics::counter!("marquee_rate_limited_total").increment(1);
}

pub fn record_background_panic() {
    metrics::counter!("marquee_background_task_panics_total").increment(1);
}
