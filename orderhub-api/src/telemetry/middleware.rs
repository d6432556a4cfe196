//! Axum Middleware for HTTP Request Metrics
//!
//! Requests are labelled by their matched route template (`/order/:uid`),
//! never by the raw path, to keep label cardinality bounded.

use std::sync::Arc;
use std::time::Instant;

use axum::{
    extract::{MatchedPath, Request, State},
    middleware::Next,
    response::Response,
};

use super::metrics::OrderMetrics;

/// Label used for requests that matched no route.
const UNMATCHED_PATH: &str = "unmatched";

pub async fn track_http_metrics(
    State(metrics): State<Arc<OrderMetrics>>,
    request: Request,
    next: Next,
) -> Response {
    let start = Instant::now();
    let method = request.method().to_string();
    let path = request
        .extensions()
        .get::<MatchedPath>()
        .map(|p| p.as_str().to_string())
        .unwrap_or_else(|| UNMATCHED_PATH.to_string());

    let response = next.run(request).await;

    metrics.record_http_request(
        &method,
        &path,
        response.status().as_u16(),
        start.elapsed().as_secs_f64(),
    );
    response
}
