//! orderhub Server Entry Point
//!
//! Loads configuration, connects to PostgreSQL, warms the recency cache,
//! starts the ingestion consumer and serves HTTP until Ctrl-C or SIGTERM.

use std::sync::Arc;

use orderhub_api::{
    channel, create_router, init_tracing, ApiError, ApiResult, AppConfig, AppState, Consumer,
    OrderFacade, OrderMetrics, PgRowStore,
};
use orderhub_core::OrderAggregate;
use orderhub_storage::{AggregateStore, CancelToken, RecencyCache, RowStore};

#[tokio::main]
async fn main() -> ApiResult<()> {
    let config = AppConfig::load()?;
    init_tracing(&config.telemetry)?;

    let pg = PgRowStore::connect(&config.database).await?;
    let backend: Arc<dyn RowStore> = Arc::new(pg.clone());
    let store = Arc::new(AggregateStore::new(backend));
    let cache = Arc::new(RecencyCache::<String, OrderAggregate>::new(
        config.cache.capacity,
    ));
    let orders: OrderFacade = OrderFacade::new(cache, store);
    let metrics = Arc::new(OrderMetrics::new()?);
    let shutdown = CancelToken::new();

    let warmed = orders.warm(&shutdown, config.cache.capacity).await?;
    tracing::info!(warmed, capacity = config.cache.capacity, "Recency cache ready");

    let (producer, source) = channel(config.broker.topic.clone(), config.broker.queue_depth);
    let consumer = Consumer::spawn(
        source,
        Arc::new(orders.clone()),
        Arc::clone(&metrics),
        &shutdown,
    );
    tracing::info!(
        topic = %config.broker.topic,
        group_id = %config.broker.group_id,
        queue_depth = config.broker.queue_depth,
        "Order consumer subscribed"
    );

    let state = AppState::new(orders, producer, metrics, shutdown.clone())
        .with_request_timeout(config.http_server.request_timeout());
    let app = create_router(state);

    let addr = config.http_server.address.as_str();
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|e| ApiError::internal_error(format!("Failed to bind {}: {}", addr, e)))?;
    tracing::info!(%addr, "Starting orderhub HTTP server");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .map_err(|e| ApiError::internal_error(format!("Server error: {}", e)))?;

    shutdown.cancel();
    let stats = consumer.shutdown().await;
    tracing::info!(
        received = stats.received,
        persisted = stats.persisted,
        drained = stats.drained,
        "Order consumer drained"
    );
    pg.close();
    tracing::info!("Shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    tracing::info!("Shutdown signal received");
}
