//! Cache capability and statistics.

use orderhub_core::OrderAggregate;

/// Cache capability consumed by [`super::ReadThroughOrders`].
///
/// Implementations must be safe for concurrent use and hand out owned
/// copies of their values.
pub trait OrderCache: Send + Sync + 'static {
    /// Insert or overwrite `order_uid`. Always succeeds.
    fn set(&self, order_uid: &str, order: OrderAggregate) -> bool;

    /// Look up `order_uid`, counting it as a use on a hit.
    fn get(&self, order_uid: &str) -> Option<OrderAggregate>;

    fn stats(&self) -> CacheStats;
}

/// Statistics about cache usage.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CacheStats {
    /// Number of cache hits.
    pub hits: u64,
    /// Number of cache misses.
    pub misses: u64,
    /// Number of entries dropped to make room (or refused at capacity 0).
    pub evictions: u64,
    /// Number of entries currently in cache.
    pub len: usize,
    pub capacity: usize,
}

impl CacheStats {
    /// Calculate the hit rate (0.0 to 1.0).
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hit_rate() {
        assert_eq!(CacheStats::default().hit_rate(), 0.0);
        let stats = CacheStats {
            hits: 3,
            misses: 1,
            ..CacheStats::default()
        };
        assert!((stats.hit_rate() - 0.75).abs() < f64::EPSILON);
    }
}
