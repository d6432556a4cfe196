//! Recency cache and the read-through facade in front of the store.
//!
//! The cache never produces errors: absence is a miss. It holds independent
//! copies of aggregates, so mutating a returned value never touches the
//! cached one.

pub mod lru;
pub mod read_through;
pub mod traits;

pub use lru::RecencyCache;
pub use read_through::ReadThroughOrders;
pub use traits::{CacheStats, OrderCache};
