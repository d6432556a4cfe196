//! Read-through facade over the recency cache and the aggregate store.
//!
//! Misses are not deduplicated: concurrent misses for one key each read the
//! store and each populate the cache. Failures are never cached.

use std::sync::Arc;

use orderhub_core::{OrderAggregate, StoreResult};
use tracing::{debug, info};

use super::traits::OrderCache;
use crate::fanout::CancelToken;
use crate::store::OrderRepository;

/// Cache-then-store lookups plus the write path that keeps the cache warm.
pub struct ReadThroughOrders<C, R>
where
    C: OrderCache,
    R: OrderRepository,
{
    cache: Arc<C>,
    repo: Arc<R>,
}

impl<C, R> Clone for ReadThroughOrders<C, R>
where
    C: OrderCache,
    R: OrderRepository,
{
    fn clone(&self) -> Self {
        Self {
            cache: Arc::clone(&self.cache),
            repo: Arc::clone(&self.repo),
        }
    }
}

impl<C, R> ReadThroughOrders<C, R>
where
    C: OrderCache,
    R: OrderRepository,
{
    pub fn new(cache: Arc<C>, repo: Arc<R>) -> Self {
        Self { cache, repo }
    }

    pub fn cache(&self) -> &C {
        &self.cache
    }

    pub fn repository(&self) -> &R {
        &self.repo
    }

    /// Serve from the cache, or load from the store and cache the result.
    pub async fn get(&self, token: &CancelToken, order_uid: &str) -> StoreResult<OrderAggregate> {
        if let Some(order) = self.cache.get(order_uid) {
            debug!(order_uid, "Cache hit");
            return Ok(order);
        }

        debug!(order_uid, "Cache miss, reading store");
        let order = self.repo.get_by_key(token, order_uid).await?;
        self.cache.set(order_uid, order.clone());
        Ok(order)
    }

    /// Fill the cache with the `limit` most recent orders. Orders are
    /// inserted oldest first so the newest ends up most recently used.
    pub async fn warm(&self, token: &CancelToken, limit: usize) -> StoreResult<usize> {
        let orders = self.repo.get_recent(token, limit).await?;
        if orders.is_empty() {
            info!("No stored orders, cache starts empty");
            return Ok(0);
        }

        let count = orders.len();
        for order in orders {
            let order_uid = order.order_uid.clone();
            self.cache.set(&order_uid, order);
        }
        info!(loaded = count, capacity = limit, "Cache warmed");
        Ok(count)
    }

    /// Ingestion callback: persist, then cache the delivered aggregate.
    pub async fn ingest(&self, token: &CancelToken, order: OrderAggregate) -> StoreResult<()> {
        self.repo.save(token, &order).await?;
        let order_uid = order.order_uid.clone();
        self.cache.set(&order_uid, order);
        Ok(())
    }
}

// ============================================================================
// TESTS
// ============================================================================
