use std::sync::Arc;
use std::time::Duration;

use axum::body::{to_bytes, Body};
use axum::http::{Request, StatusCode};
use axum::Router;
use orderhub_api::{channel, create_router, AppState, ChannelSource, OrderFacade, OrderMetrics};
use orderhub_core::OrderAggregate;
use orderhub_storage::{AggregateStore, CancelToken, InMemoryRowStore, RecencyCache};
use tower::ServiceExt;

pub struct TestApp {
    pub backend: Arc<InMemoryRowStore>,
    pub state: AppState,
    pub router: Router,
}

/// Service state over an in-memory backend. The returned source is the
/// consumer half of the ingestion queue; tests spawn a consumer on it or
/// read from it directly.
pub fn test_app(capacity: usize) -> (TestApp, ChannelSource) {
    test_app_with(InMemoryRowStore::new(), capacity, Duration::from_secs(10))
}

/// Like [`test_app`] over a caller-configured backend and request deadline.
pub fn test_app_with(
    backend: InMemoryRowStore,
    capacity: usize,
    request_timeout: Duration,
) -> (TestApp, ChannelSource) {
    let backend = Arc::new(backend);
    let store = Arc::new(AggregateStore::new(backend.clone()));
    let cache = Arc::new(RecencyCache::<String, OrderAggregate>::new(capacity));
    let orders = OrderFacade::new(cache, store);
    let metrics = Arc::new(OrderMetrics::new().expect("metrics registry"));
    let (producer, source) = channel("orders", 16);

    let state = AppState::new(orders, producer, metrics, CancelToken::new())
        .with_request_timeout(request_timeout);
    let router = create_router(state.clone());
    (
        TestApp {
            backend,
            state,
            router,
        },
        source,
    )
}

impl TestApp {
    pub async fn send(&self, request: Request<Body>) -> (StatusCode, Vec<u8>) {
        let response = self
            .router
            .clone()
            .oneshot(request)
            .await
            .expect("router is infallible");
        let status = response.status();
        let body = to_bytes(response.into_body(), usize::MAX)
            .await
            .expect("readable body");
        (status, body.to_vec())
    }

    pub async fn get(&self, uri: &str) -> (StatusCode, Vec<u8>) {
        let request = Request::builder()
            .uri(uri)
            .body(Body::empty())
            .expect("valid request");
        self.send(request).await
    }

    pub async fn post(&self, uri: &str, body: Vec<u8>) -> (StatusCode, Vec<u8>) {
        let request = Request::builder()
            .method("POST")
            .uri(uri)
            .header("content-type", "application/json")
            .body(Body::from(body))
            .expect("valid request");
        self.send(request).await
    }
}
