//! Queue Publish Endpoint
//!
//! `POST /queue/orders` accepts a raw order payload and enqueues it for the
//! ingestion consumer. The body is not decoded here; malformed payloads are
//! dropped by the consumer like any other undecodable message.

use axum::{body::Bytes, extract::State, http::StatusCode, routing::post, Json, Router};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{ApiError, ApiResult};
use crate::ingest::QueueProducer;
use crate::state::AppState;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublishResponse {
    pub topic: String,
    pub offset: u64,
}

/// POST /queue/orders
pub async fn publish_order(
    State(producer): State<QueueProducer>,
    body: Bytes,
) -> ApiResult<(StatusCode, Json<PublishResponse>)> {
    if body.is_empty() {
        return Err(ApiError::invalid_input("Request body is empty"));
    }

    let offset = producer.publish(body).await?;
    debug!(topic = producer.topic(), offset, "Message enqueued");

    Ok((
        StatusCode::ACCEPTED,
        Json(PublishResponse {
            topic: producer.topic().to_string(),
            offset,
        }),
    ))
}

pub fn create_router() -> Router<AppState> {
    Router::new().route("/queue/orders", post(publish_order))
}
