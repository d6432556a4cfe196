//! Prometheus Metrics Definitions
//!
//! Every metric lives in a registry owned by [`OrderMetrics`], so each
//! service instance (and each test) gets an isolated set. Exposed at
//! `/metrics` in the Prometheus text format.

use axum::{extract::State, http::StatusCode, response::IntoResponse};
use orderhub_storage::CacheStats;
use prometheus::{
    core::Collector, Encoder, HistogramOpts, HistogramVec, IntCounterVec, IntGauge, Opts,
    Registry, TextEncoder,
};

use crate::error::{ApiError, ApiResult};
use crate::state::AppState;

/// HTTP request latency buckets (seconds)
const HTTP_LATENCY_BUCKETS: &[f64] = &[
    0.001, 0.005, 0.010, 0.025, 0.050, 0.100, 0.250, 0.500, 1.0, 2.5, 5.0, 10.0,
];

/// Store operation latency buckets (seconds)
const STORE_LATENCY_BUCKETS: &[f64] =
    &[0.001, 0.005, 0.010, 0.025, 0.050, 0.100, 0.250, 0.500, 1.0, 2.5, 5.0];

/// Result of handling one inbound queue message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IngestOutcome {
    Persisted,
    DecodeFailed,
    HandlerFailed,
}

impl IngestOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            IngestOutcome::Persisted => "persisted",
            IngestOutcome::DecodeFailed => "decode_failed",
            IngestOutcome::HandlerFailed => "handler_failed",
        }
    }
}

/// Container for all orderhub metrics.
pub struct OrderMetrics {
    registry: Registry,

    /// HTTP request counter - labels: method, path, status
    pub http_requests_total: IntCounterVec,

    /// HTTP request duration histogram - labels: method, path
    pub http_request_duration_seconds: HistogramVec,

    /// Ingested message counter - labels: outcome
    pub ingested_messages_total: IntCounterVec,

    /// Aggregate store latency - labels: operation, status
    pub store_operation_duration_seconds: HistogramVec,

    /// Cache counters, sampled from `CacheStats` at scrape time
    pub cache_hits: IntGauge,
    pub cache_misses: IntGauge,
    pub cache_evictions: IntGauge,
    pub cache_entries: IntGauge,
    pub cache_capacity: IntGauge,
}

fn register<C>(registry: &Registry, collector: C, name: &str) -> ApiResult<C>
where
    C: Collector + Clone + 'static,
{
    registry
        .register(Box::new(collector.clone()))
        .map_err(|e| ApiError::internal_error(format!("Failed to register {}: {}", name, e)))?;
    Ok(collector)
}

fn metric_error(name: &str, e: prometheus::Error) -> ApiError {
    ApiError::internal_error(format!("Failed to create {}: {}", name, e))
}

fn gauge(registry: &Registry, name: &str, help: &str) -> ApiResult<IntGauge> {
    let g = IntGauge::new(name, help).map_err(|e| metric_error(name, e))?;
    register(registry, g, name)
}

impl OrderMetrics {
    /// Create a registry under the `orderhub` namespace and register all
    /// metrics with it.
    pub fn new() -> ApiResult<Self> {
        let registry = Registry::new_custom(Some("orderhub".to_string()), None)
            .map_err(|e| metric_error("registry", e))?;

        let http_requests_total = IntCounterVec::new(
            Opts::new("http_requests_total", "Total number of HTTP requests"),
            &["method", "path", "status"],
        )
        .map_err(|e| metric_error("http_requests_total", e))?;

        let http_request_duration_seconds = HistogramVec::new(
            HistogramOpts::new(
                "http_request_duration_seconds",
                "HTTP request duration in seconds",
            )
            .buckets(HTTP_LATENCY_BUCKETS.to_vec()),
            &["method", "path"],
        )
        .map_err(|e| metric_error("http_request_duration_seconds", e))?;

        let ingested_messages_total = IntCounterVec::new(
            Opts::new(
                "ingested_messages_total",
                "Inbound queue messages by handling outcome",
            ),
            &["outcome"],
        )
        .map_err(|e| metric_error("ingested_messages_total", e))?;

        let store_operation_duration_seconds = HistogramVec::new(
            HistogramOpts::new(
                "store_operation_duration_seconds",
                "Aggregate store operation duration in seconds",
            )
            .buckets(STORE_LATENCY_BUCKETS.to_vec()),
            &["operation", "status"],
        )
        .map_err(|e| metric_error("store_operation_duration_seconds", e))?;

        Ok(Self {
            http_requests_total: register(&registry, http_requests_total, "http_requests_total")?,
            http_request_duration_seconds: register(
                &registry,
                http_request_duration_seconds,
                "http_request_duration_seconds",
            )?,
            ingested_messages_total: register(
                &registry,
                ingested_messages_total,
                "ingested_messages_total",
            )?,
            store_operation_duration_seconds: register(
                &registry,
                store_operation_duration_seconds,
                "store_operation_duration_seconds",
            )?,
            cache_hits: gauge(&registry, "cache_hits", "Recency cache hits since startup")?,
            cache_misses: gauge(&registry, "cache_misses", "Recency cache misses since startup")?,
            cache_evictions: gauge(
                &registry,
                "cache_evictions",
                "Recency cache evictions since startup",
            )?,
            cache_entries: gauge(&registry, "cache_entries", "Orders currently cached")?,
            cache_capacity: gauge(&registry, "cache_capacity", "Fixed recency cache capacity")?,
            registry,
        })
    }

    /// Record an HTTP request.
    pub fn record_http_request(&self, method: &str, path: &str, status: u16, duration_secs: f64) {
        let status_str = status.to_string();
        self.http_requests_total
            .with_label_values(&[method, path, status_str.as_str()])
            .inc();
        self.http_request_duration_seconds
            .with_label_values(&[method, path])
            .observe(duration_secs);
    }

    /// Record an aggregate store call.
    pub fn record_store_operation(&self, operation: &str, success: bool, duration_secs: f64) {
        let status = if success { "success" } else { "error" };
        self.store_operation_duration_seconds
            .with_label_values(&[operation, status])
            .observe(duration_secs);
    }

    pub fn record_ingest(&self, outcome: IngestOutcome) {
        self.ingested_messages_total
            .with_label_values(&[outcome.as_str()])
            .inc();
    }

    /// Copy the cache's own counters into the exported gauges.
    pub fn observe_cache(&self, stats: &CacheStats) {
        self.cache_hits.set(saturating_i64(stats.hits));
        self.cache_misses.set(saturating_i64(stats.misses));
        self.cache_evictions.set(saturating_i64(stats.evictions));
        self.cache_entries.set(saturating_i64(stats.len as u64));
        self.cache_capacity.set(saturating_i64(stats.capacity as u64));
    }

    /// Encode every registered metric in the Prometheus text format.
    pub fn encode(&self) -> Result<Vec<u8>, prometheus::Error> {
        let mut buffer = Vec::new();
        TextEncoder::new().encode(&self.registry.gather(), &mut buffer)?;
        Ok(buffer)
    }
}

fn saturating_i64(value: u64) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}

/// Handler for GET /metrics.
pub async fn metrics_handler(State(state): State<AppState>) -> impl IntoResponse {
    state.metrics.observe_cache(&state.orders.cache().stats());

    match state.metrics.encode() {
        Ok(buffer) => (
            StatusCode::OK,
            [("content-type", "text/plain; version=0.0.4; charset=utf-8")],
            buffer,
        ),
        Err(e) => {
            tracing::error!(error = %e, "Failed to encode metrics");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                [("content-type", "text/plain")],
                format!("Failed to encode metrics: {}", e).into_bytes(),
            )
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn encoded(metrics: &OrderMetrics) -> String {
        String::from_utf8(metrics.encode().unwrap()).unwrap()
    }

    #[test]
    fn test_instances_are_isolated() {
        let a = OrderMetrics::new().unwrap();
        let b = OrderMetrics::new().unwrap();

        a.record_ingest(IngestOutcome::Persisted);

        assert!(encoded(&a).contains("orderhub_ingested_messages_total{outcome=\"persisted\"} 1"));
        assert!(!encoded(&b).contains("outcome=\"persisted\""));
    }

    #[test]
    fn test_record_http_request() {
        let metrics = OrderMetrics::new().unwrap();
        metrics.record_http_request("GET", "/order/:uid", 404, 0.002);

        let text = encoded(&metrics);
        assert!(text.contains("orderhub_http_requests_total"));
        assert!(text.contains("status=\"404\""));
        assert!(text.contains("orderhub_http_request_duration_seconds_bucket"));
    }

    #[test]
    fn test_observe_cache() {
        let metrics = OrderMetrics::new().unwrap();
        metrics.observe_cache(&CacheStats {
            hits: 3,
            misses: 2,
            evictions: 1,
            len: 4,
            capacity: 8,
        });

        assert_eq!(metrics.cache_hits.get(), 3);
        assert_eq!(metrics.cache_capacity.get(), 8);
        assert!(encoded(&metrics).contains("orderhub_cache_entries 4"));
    }

    #[test]
    fn test_store_operation_labels() {
        let metrics = OrderMetrics::new().unwrap();
        metrics.record_store_operation("save", false, 0.01);
        assert!(encoded(&metrics).contains("status=\"error\""));
    }
}
