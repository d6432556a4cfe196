//! Relational backend abstraction.
//!
//! A `RowStore` speaks only in relations and ordered column values. It knows
//! the persisted layout (tables, uniqueness constraints, conflict policies)
//! but nothing about aggregate entities; the aggregate store maps entities
//! to rows through `RowMapper` and drives the backend.

use async_trait::async_trait;
use orderhub_core::{ColumnValue, Relation, RowId, StoreResult};

/// One relational row as ordered column values.
pub type Row = Vec<ColumnValue>;

/// Relational primitives the aggregate store is built from.
///
/// Root rows are the `orders` columns followed by the `delivery_id` and
/// `payment_id` references, both on insert and on fetch.
#[async_trait]
pub trait RowStore: Send + Sync + 'static {
    /// Check that the backing store is reachable.
    async fn ping(&self) -> StoreResult<()>;

    /// Whether a root row exists for `order_uid`.
    async fn order_exists(&self, order_uid: &str) -> StoreResult<bool>;

    /// Insert a content-addressed row, or look up the existing row with
    /// identical content. Returns the surrogate id either way; an existing
    /// row is never mutated.
    async fn upsert_content(&self, relation: Relation, values: Row) -> StoreResult<RowId>;

    /// Insert a root row. A conflicting `order_uid` is skipped silently and
    /// reported as `false`.
    async fn insert_order(&self, values: Row) -> StoreResult<bool>;

    /// Link an item to an order. An existing link is skipped silently and
    /// reported as `false`.
    async fn link_item(&self, order_uid: &str, item_id: RowId) -> StoreResult<bool>;

    /// Fetch one root row by natural key.
    async fn fetch_order(&self, order_uid: &str) -> StoreResult<Option<Row>>;

    /// Fetch the `limit` most recently created root rows, oldest first.
    async fn fetch_recent(&self, limit: usize) -> StoreResult<Vec<Row>>;

    /// Fetch a content-addressed row by surrogate id, without the id column.
    async fn fetch_content(&self, relation: Relation, id: RowId) -> StoreResult<Option<Row>>;

    /// Fetch every item row linked to `order_uid`.
    async fn fetch_order_items(&self, order_uid: &str) -> StoreResult<Vec<Row>>;
}
