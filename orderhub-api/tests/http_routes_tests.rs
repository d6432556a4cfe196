//! HTTP surface tests over an in-memory backend.

#[path = "support/app.rs"]
mod app;

use std::time::Duration;

use app::{test_app, test_app_with};
use axum::http::StatusCode;
use orderhub_api::routes::queue::PublishResponse;
use orderhub_api::{ApiError, ErrorCode, MessageSource};
use orderhub_core::OrderAggregate;
use orderhub_storage::{CancelToken, FailPoint, InMemoryRowStore, OrderRepository};
use orderhub_test_utils::assertions::assert_same_order;
use orderhub_test_utils::fixtures::{reference_order, reference_payload, sample_order};

#[tokio::test]
async fn test_get_order_returns_stored_aggregate() {
    let (app, _source) = test_app(4);
    let order = sample_order("order-1", 3);
    app.state
        .orders
        .repository()
        .save(&CancelToken::new(), &order)
        .await
        .unwrap();

    let (status, body) = app.get("/order/order-1").await;

    assert_eq!(status, StatusCode::OK);
    let served: OrderAggregate = serde_json::from_slice(&body).unwrap();
    assert_same_order(&served, &order);
    assert_eq!(app.state.orders.cache().stats().len, 1);
}

#[tokio::test]
async fn test_second_get_is_served_from_cache() {
    let (app, _source) = test_app(4);
    app.state
        .orders
        .repository()
        .save(&CancelToken::new(), &reference_order())
        .await
        .unwrap();

    let (first, _) = app.get("/order/b563feb7b2b84b6test").await;
    // The backend is now unreachable; only the cache can answer.
    app.backend.fail_on(FailPoint::FetchOrder);
    let (second, body) = app.get("/order/b563feb7b2b84b6test").await;

    assert_eq!(first, StatusCode::OK);
    assert_eq!(second, StatusCode::OK);
    let served: OrderAggregate = serde_json::from_slice(&body).unwrap();
    assert_same_order(&served, &reference_order());
    let stats = app.state.orders.cache().stats();
    assert_eq!((stats.hits, stats.misses), (1, 1));
}

#[tokio::test]
async fn test_unknown_order_is_404() {
    let (app, _source) = test_app(4);

    let (status, body) = app.get("/order/missing").await;

    assert_eq!(status, StatusCode::NOT_FOUND);
    let error: ApiError = serde_json::from_slice(&body).unwrap();
    assert_eq!(error.code, ErrorCode::OrderNotFound);
    assert!(error.message.contains("missing"));
    assert_eq!(app.state.orders.cache().stats().len, 0);
}

#[tokio::test]
async fn test_backend_failure_is_reported_as_404() {
    let (app, _source) = test_app(4);
    app.state
        .orders
        .repository()
        .save(&CancelToken::new(), &sample_order("order-1", 2))
        .await
        .unwrap();
    app.backend.fail_on(FailPoint::FetchOrderItems);

    let (status, body) = app.get("/order/order-1").await;

    assert_eq!(status, StatusCode::NOT_FOUND);
    let error: ApiError = serde_json::from_slice(&body).unwrap();
    assert_eq!(error.code, ErrorCode::OrderNotFound);
    // Failures are never cached.
    assert_eq!(app.state.orders.cache().stats().len, 0);
}

#[tokio::test]
async fn test_publish_enqueues_raw_payload() {
    let (app, mut source) = test_app(4);

    let (status, body) = app.post("/queue/orders", reference_payload()).await;

    assert_eq!(status, StatusCode::ACCEPTED);
    let published: PublishResponse = serde_json::from_slice(&body).unwrap();
    assert_eq!(published.topic, "orders");
    assert_eq!(published.offset, 0);

    let message = source.recv().await.unwrap();
    assert_eq!(message.offset, 0);
    assert_eq!(message.payload.as_ref(), reference_payload().as_slice());
}

#[tokio::test]
async fn test_publish_rejects_empty_body() {
    let (app, _source) = test_app(4);

    let (status, body) = app.post("/queue/orders", Vec::new()).await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    let error: ApiError = serde_json::from_slice(&body).unwrap();
    assert_eq!(error.code, ErrorCode::InvalidInput);
}

#[tokio::test]
async fn test_slow_backend_times_out_with_504() {
    let backend = InMemoryRowStore::new().with_latency(Duration::from_millis(300));
    let (app, _source) = test_app_with(backend, 4, Duration::from_millis(50));

    let (status, body) = app.get("/order/order-1").await;

    assert_eq!(status, StatusCode::GATEWAY_TIMEOUT);
    let error: ApiError = serde_json::from_slice(&body).unwrap();
    assert_eq!(error.code, ErrorCode::Timeout);
    assert_eq!(app.state.orders.cache().stats().len, 0);
}

#[tokio::test]
async fn test_publish_to_full_queue_times_out() {
    let (app, _source) = test_app_with(InMemoryRowStore::new(), 4, Duration::from_millis(50));
    // Nothing consumes, so the 16-deep queue fills up.
    for _ in 0..16 {
        let (status, _) = app.post("/queue/orders", reference_payload()).await;
        assert_eq!(status, StatusCode::ACCEPTED);
    }

    let (status, body) = app.post("/queue/orders", reference_payload()).await;

    assert_eq!(status, StatusCode::GATEWAY_TIMEOUT);
    let error: ApiError = serde_json::from_slice(&body).unwrap();
    assert_eq!(error.code, ErrorCode::Timeout);
}

#[tokio::test]
async fn test_health_ping() {
    let (app, _source) = test_app(4);

    let (status, body) = app.get("/health/ping").await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, b"pong");
}

#[tokio::test]
async fn test_readiness_follows_backend() {
    let (app, _source) = test_app(4);

    let (ready, body) = app.get("/health/ready").await;
    assert_eq!(ready, StatusCode::OK);
    let health: serde_json::Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(health["status"], "healthy");
    assert_eq!(health["details"]["cache"]["capacity"], 4);

    app.backend.fail_on(FailPoint::Ping);
    let (down, body) = app.get("/health/ready").await;
    assert_eq!(down, StatusCode::SERVICE_UNAVAILABLE);
    let health: serde_json::Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(health["status"], "unhealthy");
    assert!(health["details"]["database"]["error"].is_string());
}

#[tokio::test]
async fn test_metrics_exposition() {
    let (app, _source) = test_app(4);
    app.get("/order/missing").await;

    let (status, body) = app.get("/metrics").await;

    assert_eq!(status, StatusCode::OK);
    let text = String::from_utf8(body).unwrap();
    assert!(text.contains("orderhub_http_requests_total"));
    assert!(text.contains("path=\"/order/:uid\""));
    assert!(text.contains("status=\"404\""));
    assert!(text.contains("orderhub_cache_misses 1"));
    assert!(text.contains("orderhub_cache_capacity 4"));
}
