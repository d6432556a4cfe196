//! Publish one fake order to a running orderhub instance.
//!
//! Reads the same configuration as the server and posts the payload to
//! `POST /queue/orders` on the configured HTTP address.

use orderhub_api::fake::fake_order;
use orderhub_api::routes::queue::PublishResponse;
use orderhub_api::{init_tracing, ApiError, ApiResult, AppConfig};

#[tokio::main]
async fn main() -> ApiResult<()> {
    let config = AppConfig::load()?;
    init_tracing(&config.telemetry)?;

    let order = fake_order(&mut rand::rng());
    let payload = serde_json::to_vec(&order)?;
    let url = format!("http://{}/queue/orders", config.http_server.address);

    let response = reqwest::Client::new()
        .post(&url)
        .header(reqwest::header::CONTENT_TYPE, "application/json")
        .body(payload)
        .send()
        .await
        .map_err(|e| ApiError::service_unavailable(format!("POST {} failed: {}", url, e)))?;

    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(ApiError::internal_error(format!(
            "POST {} returned {}: {}",
            url, status, body
        )));
    }

    let published: PublishResponse = response
        .json()
        .await
        .map_err(|e| ApiError::internal_error(format!("Unexpected response: {}", e)))?;
    tracing::info!(
        order_uid = %order.order_uid,
        items = order.item_count(),
        topic = %published.topic,
        offset = published.offset,
        "Order published"
    );
    Ok(())
}
