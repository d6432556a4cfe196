//! In-memory relational backend.
//!
//! Mirrors the persisted layout and conflict policies of the Postgres
//! backend so the aggregate store can be exercised without a database.
//! Supports fault injection per call site and artificial latency, which the
//! test suites use to drive partial-failure and cancellation paths.

use std::collections::{HashMap, HashSet};
use std::sync::{Mutex, PoisonError, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use orderhub_core::{
    ColumnKind, ColumnValue, MappingError, OrderAggregate, Relation, RowId, RowMapper, StoreError,
    StoreResult, ORDER_REFERENCE_COLUMNS,
};

use crate::backend::{Row, RowStore};

/// Backend call sites that can be made to fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FailPoint {
    Ping,
    OrderExists,
    Upsert(Relation),
    InsertOrder,
    LinkItem,
    FetchOrder,
    FetchRecent,
    FetchContent(Relation),
    FetchOrderItems,
}

impl FailPoint {
    fn operation(&self) -> String {
        match self {
            FailPoint::Ping => "ping".to_string(),
            FailPoint::OrderExists => "order_exists".to_string(),
            FailPoint::Upsert(rel) => format!("upsert {}", rel.table_name()),
            FailPoint::InsertOrder => "insert orders".to_string(),
            FailPoint::LinkItem => "insert order_items".to_string(),
            FailPoint::FetchOrder => "select orders".to_string(),
            FailPoint::FetchRecent => "select recent orders".to_string(),
            FailPoint::FetchContent(rel) => format!("select {}", rel.table_name()),
            FailPoint::FetchOrderItems => "select order_items".to_string(),
        }
    }
}

#[derive(Default)]
struct ContentTable {
    by_content: HashMap<Row, RowId>,
    by_id: HashMap<RowId, Row>,
    next_id: RowId,
}

impl ContentTable {
    fn upsert(&mut self, values: Row) -> RowId {
        if let Some(id) = self.by_content.get(&values) {
            return *id;
        }
        self.next_id += 1;
        let id = self.next_id;
        self.by_id.insert(id, values.clone());
        self.by_content.insert(values, id);
        id
    }
}

struct OrderRecord {
    row: Row,
    seq: u64,
}

#[derive(Default)]
struct Tables {
    deliveries: ContentTable,
    payments: ContentTable,
    items: ContentTable,
    orders: HashMap<String, OrderRecord>,
    next_seq: u64,
    order_items: Vec<(String, RowId)>,
    links: HashSet<(String, RowId)>,
}

impl Tables {
    fn content(&self, relation: Relation) -> Option<&ContentTable> {
        match relation {
            Relation::Deliveries => Some(&self.deliveries),
            Relation::Payments => Some(&self.payments),
            Relation::Items => Some(&self.items),
            Relation::Orders | Relation::OrderItems => None,
        }
    }

    fn content_mut(&mut self, relation: Relation) -> Option<&mut ContentTable> {
        match relation {
            Relation::Deliveries => Some(&mut self.deliveries),
            Relation::Payments => Some(&mut self.payments),
            Relation::Items => Some(&mut self.items),
            Relation::Orders | Relation::OrderItems => None,
        }
    }
}

/// In-memory [`RowStore`] for tests and local runs.
#[derive(Default)]
pub struct InMemoryRowStore {
    tables: RwLock<Tables>,
    /// Remaining successful calls before a fail point starts failing.
    failures: Mutex<HashMap<FailPoint, usize>>,
    calls: Mutex<HashMap<FailPoint, usize>>,
    latency: Option<Duration>,
}

impl InMemoryRowStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Delay every backend call by `latency`.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    /// Fail every call at `point` from now on.
    pub fn fail_on(&self, point: FailPoint) {
        self.fail_after(point, 0);
    }

    /// Let `successes` calls at `point` through, then fail the rest.
    pub fn fail_after(&self, point: FailPoint, successes: usize) {
        self.failures
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(point, successes);
    }

    pub fn clear_failures(&self) {
        self.failures
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }

    /// Number of calls made at `point`, failed ones included.
    pub fn call_count(&self, point: FailPoint) -> usize {
        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&point)
            .copied()
            .unwrap_or(0)
    }

    /// Number of rows currently held by `relation`.
    pub fn row_count(&self, relation: Relation) -> usize {
        let tables = self.tables.read().unwrap_or_else(PoisonError::into_inner);
        match relation {
            Relation::Orders => tables.orders.len(),
            Relation::OrderItems => tables.order_items.len(),
            other => tables.content(other).map_or(0, |t| t.by_id.len()),
        }
    }

    async fn gate(&self, point: FailPoint) -> StoreResult<()> {
        *self
            .calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(point)
            .or_insert(0) += 1;

        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }

        let mut failures = self.failures.lock().unwrap_or_else(PoisonError::into_inner);
        match failures.get_mut(&point) {
            Some(0) => Err(StoreError::connectivity(
                point.operation(),
                "injected failure",
            )),
            Some(remaining) => {
                *remaining -= 1;
                Ok(())
            }
            None => Ok(()),
        }
    }
}

fn check_arity(record: &'static str, expected: usize, values: &[ColumnValue]) -> StoreResult<()> {
    if values.len() != expected {
        return Err(MappingError::Arity {
            record,
            expected,
            actual: values.len(),
        }
        .into());
    }
    Ok(())
}

fn root_key(values: &[ColumnValue]) -> StoreResult<String> {
    match values.first() {
        Some(ColumnValue::Text(uid)) => Ok(uid.clone()),
        other => Err(MappingError::KindMismatch {
            record: OrderAggregate::RECORD,
            column: "order_uid",
            expected: ColumnKind::Text,
            actual: other.map_or(ColumnKind::Text, ColumnValue::kind),
        }
        .into()),
    }
}

/// Position of `date_created` in a stored root row, taken from the mapping.
fn date_created_index() -> Option<usize> {
    OrderAggregate::COLUMNS
        .iter()
        .position(|c| c.name == "date_created")
}

fn date_created(row: &Row) -> Option<chrono::DateTime<chrono::Utc>> {
    match date_created_index().and_then(|idx| row.get(idx)) {
        Some(ColumnValue::Timestamp(t)) => Some(*t),
        _ => None,
    }
}

#[async_trait]
impl RowStore for InMemoryRowStore {
    async fn ping(&self) -> StoreResult<()> {
        self.gate(FailPoint::Ping).await
    }

    async fn order_exists(&self, order_uid: &str) -> StoreResult<bool> {
        self.gate(FailPoint::OrderExists).await?;
        let tables = self.tables.read().unwrap_or_else(PoisonError::into_inner);
        Ok(tables.orders.contains_key(order_uid))
    }

    async fn upsert_content(&self, relation: Relation, values: Row) -> StoreResult<RowId> {
        self.gate(FailPoint::Upsert(relation)).await?;
        check_arity(relation.table_name(), relation.columns().len(), &values)?;
        let mut tables = self.tables.write().unwrap_or_else(PoisonError::into_inner);
        let table = tables.content_mut(relation).ok_or_else(|| {
            StoreError::connectivity(
                format!("upsert {}", relation.table_name()),
                "relation is not content-addressed",
            )
        })?;
        Ok(table.upsert(values))
    }

    async fn insert_order(&self, values: Row) -> StoreResult<bool> {
        self.gate(FailPoint::InsertOrder).await?;
        check_arity(
            OrderAggregate::RECORD,
            OrderAggregate::COLUMNS.len() + ORDER_REFERENCE_COLUMNS.len(),
            &values,
        )?;
        let uid = root_key(&values)?;
        let mut tables = self.tables.write().unwrap_or_else(PoisonError::into_inner);
        if tables.orders.contains_key(&uid) {
            return Ok(false);
        }
        tables.next_seq += 1;
        let seq = tables.next_seq;
        tables.orders.insert(uid, OrderRecord { row: values, seq });
        Ok(true)
    }

    async fn link_item(&self, order_uid: &str, item_id: RowId) -> StoreResult<bool> {
        self.gate(FailPoint::LinkItem).await?;
        let mut tables = self.tables.write().unwrap_or_else(PoisonError::into_inner);
        let link = (order_uid.to_string(), item_id);
        if !tables.links.insert(link.clone()) {
            return Ok(false);
        }
        tables.order_items.push(link);
        Ok(true)
    }

    async fn fetch_order(&self, order_uid: &str) -> StoreResult<Option<Row>> {
        self.gate(FailPoint::FetchOrder).await?;
        let tables = self.tables.read().unwrap_or_else(PoisonError::into_inner);
        Ok(tables.orders.get(order_uid).map(|r| r.row.clone()))
    }

    async fn fetch_recent(&self, limit: usize) -> StoreResult<Vec<Row>> {
        self.gate(FailPoint::FetchRecent).await?;
        let tables = self.tables.read().unwrap_or_else(PoisonError::into_inner);
        let mut records: Vec<&OrderRecord> = tables.orders.values().collect();
        records.sort_by(|a, b| {
            (date_created(&b.row), b.seq).cmp(&(date_created(&a.row), a.seq))
        });
        let mut rows: Vec<Row> = records
            .into_iter()
            .take(limit)
            .map(|r| r.row.clone())
            .collect();
        rows.reverse();
        Ok(rows)
    }

    async fn fetch_content(&self, relation: Relation, id: RowId) -> StoreResult<Option<Row>> {
        self.gate(FailPoint::FetchContent(relation)).await?;
        let tables = self.tables.read().unwrap_or_else(PoisonError::into_inner);
        Ok(tables
            .content(relation)
            .and_then(|t| t.by_id.get(&id).cloned()))
    }

    async fn fetch_order_items(&self, order_uid: &str) -> StoreResult<Vec<Row>> {
        self.gate(FailPoint::FetchOrderItems).await?;
        let tables = self.tables.read().unwrap_or_else(PoisonError::into_inner);
        Ok(tables
            .order_items
            .iter()
            .filter(|(uid, _)| uid == order_uid)
            .filter_map(|(_, id)| tables.items.by_id.get(id).cloned())
            .collect())
    }
}

// ============================================================================
// TESTS
// ============================================================================
