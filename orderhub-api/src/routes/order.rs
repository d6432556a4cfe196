//! Order Lookup Endpoint
//!
//! `GET /order/:uid` serves an aggregate through the read-through facade.
//! Every failure surfaces to the client as 404; failures other than a plain
//! miss are logged with their stage chain.

use std::time::Instant;

use axum::{
    extract::{Path, State},
    routing::get,
    Json, Router,
};
use orderhub_core::OrderAggregate;
use tracing::{debug, error};

use crate::error::{ApiError, ApiResult};
use crate::state::AppState;

/// GET /order/:uid
pub async fn get_order(
    State(state): State<AppState>,
    Path(order_uid): Path<String>,
) -> ApiResult<Json<OrderAggregate>> {
    let token = state.shutdown.child();
    let start = Instant::now();
    let result = state.orders.get(&token, &order_uid).await;
    state
        .metrics
        .record_store_operation("get", result.is_ok(), start.elapsed().as_secs_f64());

    match result {
        Ok(order) => Ok(Json(order)),
        Err(e) if e.is_not_found() => {
            debug!(order_uid = %order_uid, "Order not found");
            Err(ApiError::order_not_found(&order_uid))
        }
        Err(e) => {
            error!(
                order_uid = %order_uid,
                stage = ?e.failing_stage(),
                error = %e,
                "Failed to load order"
            );
            Err(ApiError::order_not_found(&order_uid))
        }
    }
}

pub fn create_router() -> Router<AppState> {
    Router::new().route("/order/:uid", get(get_order))
}
