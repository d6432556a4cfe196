//! orderhub API - Service Shell
//!
//! Wires the aggregate engine from `orderhub-storage` to the outside world:
//! a PostgreSQL row backend on a deadpool pool, the ingestion consumer, the
//! axum HTTP surface, configuration, and telemetry.

pub mod config;
pub mod db;
pub mod error;
pub mod fake;
pub mod ingest;
pub mod routes;
pub mod state;
pub mod telemetry;

// Re-export commonly used types
pub use config::{AppConfig, BrokerConfig, CacheConfig, ConfigError, HttpServerConfig};
pub use db::{DbConfig, PgRowStore};
pub use error::{ApiError, ApiResult, ErrorCode};
pub use ingest::{
    channel, decode_order, ChannelSource, Consumer, ConsumerHandle, ConsumerStats, DecodeError,
    MessageSource, OrderSink, QueueMessage, QueueProducer,
};
pub use routes::create_router;
pub use state::{AppState, OrderFacade};
pub use telemetry::{init_tracing, LogFormat, OrderMetrics, TelemetryConfig};
