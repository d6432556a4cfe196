//! REST API Routes Module
//!
//! - `GET /order/:uid` - order lookup through the read-through cache
//! - `POST /queue/orders` - publish a raw order payload for ingestion
//! - `/health/*` - liveness and readiness probes
//! - `GET /metrics` - Prometheus exposition
//!
//! Every request is bounded by `AppState::request_timeout`; an expired
//! request answers 504 with the usual error body.

pub mod health;
pub mod order;
pub mod queue;

use std::time::Duration;

use axum::{
    extract::{Request, State},
    middleware::{from_fn_with_state, Next},
    response::{IntoResponse, Response},
    routing::get,
    Router,
};
use tower_http::trace::TraceLayer;

use crate::error::ApiError;
use crate::state::AppState;
use crate::telemetry::{metrics_handler, track_http_metrics};

pub use health::create_router as health_router;
pub use order::create_router as order_router;
pub use queue::create_router as queue_router;

/// Assemble the full service router with request tracing and HTTP metrics.
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .merge(order_router())
        .merge(queue_router())
        .nest("/health", health_router())
        .route("/metrics", get(metrics_handler))
        .layer(from_fn_with_state(
            state.request_timeout,
            enforce_request_timeout,
        ))
        .layer(from_fn_with_state(
            state.metrics.clone(),
            track_http_metrics,
        ))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Abandon the request once `limit` elapses. The inner future is dropped,
/// which cancels any store call it was awaiting.
async fn enforce_request_timeout(
    State(limit): State<Duration>,
    request: Request,
    next: Next,
) -> Response {
    let path = request.uri().path().to_string();
    match tokio::time::timeout(limit, next.run(request)).await {
        Ok(response) => response,
        Err(_) => {
            tracing::warn!(%path, timeout_ms = limit.as_millis() as u64, "Request timed out");
            ApiError::timeout("request").into_response()
        }
    }
}
