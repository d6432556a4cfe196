//! Shared application state for Axum routers.

use std::sync::Arc;
use std::time::{Duration, Instant};

use orderhub_core::OrderAggregate;
use orderhub_storage::{AggregateStore, CancelToken, ReadThroughOrders, RecencyCache};

use crate::ingest::QueueProducer;
use crate::telemetry::OrderMetrics;

/// The read-through facade served by the HTTP layer and fed by ingestion.
pub type OrderFacade = ReadThroughOrders<RecencyCache<String, OrderAggregate>, AggregateStore>;

/// Application-wide state shared across all routes.
#[derive(Clone)]
pub struct AppState {
    pub orders: OrderFacade,
    /// Producer half of the ingestion queue, exposed at `POST /queue/orders`.
    pub producer: QueueProducer,
    pub metrics: Arc<OrderMetrics>,
    pub start_time: Instant,
    /// Root token; request handlers derive their store tokens from it.
    pub shutdown: CancelToken,
    /// Deadline applied to every request by the router.
    pub request_timeout: Duration,
}

impl AppState {
    pub fn new(
        orders: OrderFacade,
        producer: QueueProducer,
        metrics: Arc<OrderMetrics>,
        shutdown: CancelToken,
    ) -> Self {
        Self {
            orders,
            producer,
            metrics,
            start_time: Instant::now(),
            shutdown,
            request_timeout: Duration::from_secs(10),
        }
    }

    pub fn with_request_timeout(mut self, request_timeout: Duration) -> Self {
        self.request_timeout = request_timeout;
        self
    }
}

macro_rules! impl_from_ref {
    ($type:ty, $field:ident) => {
        impl axum::extract::FromRef<AppState> for $type {
            fn from_ref(state: &AppState) -> Self {
                state.$field.clone()
            }
        }
    };
}

impl_from_ref!(OrderFacade, orders);
impl_from_ref!(QueueProducer, producer);
impl_from_ref!(Arc<OrderMetrics>, metrics);
