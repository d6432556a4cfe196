//! Orderhub Storage - Aggregate Persistence Engine
//!
//! Decomposes order aggregates into normalized rows, deduplicates
//! sub-entities by content, writes and reads them through concurrent
//! fan-out groups, and fronts the result with a fixed-capacity recency
//! cache. The PostgreSQL backend lives in orderhub-api; this crate ships the
//! in-memory backend used by tests and local runs.

pub mod backend;
pub mod cache;
pub mod fanout;
pub mod memory;
pub mod store;

pub use backend::{Row, RowStore};
pub use cache::{CacheStats, OrderCache, ReadThroughOrders, RecencyCache};
pub use fanout::{CancelToken, FanOut};
pub use memory::{FailPoint, InMemoryRowStore};
pub use store::{AggregateStore, OrderRepository};
