//! # HTTP Request Metrics
//!
//! Request counts and latency per route template, recorded by
//! [`metrics_middleware`]. Engine metrics (decisions, cache, conflicts,
//! compilation) live in [`cgov_engine::EngineMetrics`]; `/metrics` serves
//! both registries.

use std::sync::Arc;
use std::time::Instant;

use axum::extract::{MatchedPath, Request};
use axum::middleware::Next;
use axum::response::Response;
use prometheus::core::Collector;
use prometheus::{Encoder, HistogramOpts, HistogramVec, IntCounterVec, Opts, Registry, TextEncoder};

/// Path label for requests that matched no route.
const UNMATCHED: &str = "unmatched";

/// Shared HTTP metrics.
#[derive(Clone)]
pub struct ApiMetrics {
    inner: Arc<Inner>,
}

struct Inner {
    registry: Registry,
    http_requests_total: IntCounterVec,
    http_request_duration_seconds: HistogramVec,
}

impl std::fmt::Debug for ApiMetrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ApiMetrics").field("requests", &self.requests()).finish()
    }
}

impl ApiMetrics {
    /// Metrics on a fresh registry.
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new();
        let http_requests_total = IntCounterVec::new(
            Opts::new("cgov_http_requests_total", "HTTP requests by route and status"),
            &["method", "path", "status"],
        )?;
        let http_request_duration_seconds = HistogramVec::new(
            HistogramOpts::new("cgov_http_request_duration_seconds", "HTTP request duration in seconds")
                .buckets(vec![0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5]),
            &["method", "path"],
        )?;
        registry.register(Box::new(http_requests_total.clone()))?;
        registry.register(Box::new(http_request_duration_seconds.clone()))?;
        Ok(Self {
            inner: Arc::new(Inner {
                registry,
                http_requests_total,
                http_request_duration_seconds,
            }),
        })
    }

    /// Requests recorded so far, across all labels.
    pub fn requests(&self) -> u64 {
        self.inner
            .http_requests_total
            .collect()
            .iter()
            .flat_map(|mf| mf.get_metric())
            .map(|m| m.get_counter().get_value() as u64)
            .sum()
    }

    fn record_request(&self, method: &str, path: &str, status: u16, duration_secs: f64) {
        self.inner
            .http_requests_total
            .with_label_values(&[method, path, &status.to_string()])
            .inc();
        self.inner
            .http_request_duration_seconds
            .with_label_values(&[method, path])
            .observe(duration_secs);
    }

    /// Prometheus text exposition.
    pub fn encode(&self) -> Result<String, prometheus::Error> {
        let mut buffer = Vec::new();
        TextEncoder::new().encode(&self.inner.registry.gather(), &mut buffer)?;
        String::from_utf8(buffer).map_err(|e| prometheus::Error::Msg(e.to_string()))
    }
}

/// Record method, route template, status and duration of every request.
pub async fn metrics_middleware(request: Request, next: Next) -> Response {
    let metrics = request.extensions().get::<ApiMetrics>().cloned();
    let method = request.method().to_string();
    let path = request
        .extensions()
        .get::<MatchedPath>()
        .map_or(UNMATCHED, |p| p.as_str())
        .to_string();
    let start = Instant::now();

    let response = next.run(request).await;

    if let Some(m) = metrics {
        m.record_request(&method, &path, response.status().as_u16(), start.elapsed().as_secs_f64());
    }
    response
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn starts_at_zero() {
        assert_eq!(ApiMetrics::new().unwrap().requests(), 0);
    }

    #[test]
    fn clones_share_counters() {
        let m = ApiMetrics::new().unwrap();
        let clone = m.clone();
        m.record_request("POST", "/v1/namespaces/:ns/enforce", 200, 0.002);
        clone.record_request("POST", "/v1/namespaces/:ns/enforce", 503, 0.2);
        assert_eq!(m.requests(), 2);
        let text = m.encode().unwrap();
        assert!(text.contains("cgov_http_requests_total"));
        assert!(text.contains("/v1/namespaces/:ns/enforce"));
    }
}
