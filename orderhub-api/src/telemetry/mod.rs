//! orderhub Telemetry - Observability Infrastructure
//!
//! Structured logging through tracing-subscriber and Prometheus metrics for
//! the HTTP surface, the cache and the ingestion path.

pub mod metrics;
pub mod middleware;
pub mod tracer;

pub use metrics::{metrics_handler, IngestOutcome, OrderMetrics};
pub use middleware::track_http_metrics;
pub use tracer::{init_tracing, LogFormat, TelemetryConfig};
