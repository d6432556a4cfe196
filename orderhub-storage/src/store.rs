//! Aggregate persistence and hydration.
//!
//! An order is decomposed into a root row, two content-addressed rows
//! (delivery, payment) and one content-addressed row plus one join row per
//! item. Independent writes and reads run concurrently in [`FanOut`] groups.
//! There is no cross-table transaction: a failed save leaves whatever its
//! sibling tasks already wrote, and redelivery relies on the idempotency
//! gates (root lookup, content dedup, conflict-is-success inserts).

use std::sync::Arc;

use async_trait::async_trait;
use orderhub_core::{
    trailing_id, ColumnValue, Delivery, EntityKind, Item, OrderAggregate, Payment, Relation,
    RowId, RowMapper, Stage, StoreError, StoreResult,
};
use tracing::{debug, info};

use crate::backend::{Row, RowStore};
use crate::fanout::{CancelToken, FanOut};

// ============================================================================
// PERSISTENCE CAPABILITY
// ============================================================================

/// Persistence capability consumed by the read-through facade and the
/// ingestion path.
#[async_trait]
pub trait OrderRepository: Send + Sync + 'static {
    /// Persist an aggregate. Saving an `order_uid` that already exists is a
    /// silent no-op.
    async fn save(&self, token: &CancelToken, order: &OrderAggregate) -> StoreResult<()>;

    /// Load and hydrate one aggregate by natural key.
    async fn get_by_key(&self, token: &CancelToken, order_uid: &str)
        -> StoreResult<OrderAggregate>;

    /// Load and hydrate the `limit` most recently created aggregates,
    /// oldest first.
    async fn get_recent(&self, token: &CancelToken, limit: usize)
        -> StoreResult<Vec<OrderAggregate>>;

    /// Check that the backing store is reachable.
    async fn ping(&self) -> StoreResult<()>;
}

// ============================================================================
// AGGREGATE STORE
// ============================================================================

/// Orchestrates multi-relation upsert and hydration over a [`RowStore`].
#[derive(Clone)]
pub struct AggregateStore {
    backend: Arc<dyn RowStore>,
}

impl AggregateStore {
    pub fn new(backend: Arc<dyn RowStore>) -> Self {
        Self { backend }
    }

    pub fn backend(&self) -> &Arc<dyn RowStore> {
        &self.backend
    }

    async fn save_delivery_and_payment(
        &self,
        token: &CancelToken,
        order: &OrderAggregate,
    ) -> StoreResult<(RowId, RowId)> {
        let mut group = FanOut::new(Stage::SaveDeliveryAndPayment, token);

        let backend = Arc::clone(&self.backend);
        let delivery = order.delivery.to_values();
        group.spawn(move |token| async move {
            token.check().map_err(|e| e.at(Stage::UpsertDelivery))?;
            backend
                .upsert_content(Relation::Deliveries, delivery)
                .await
                .map_err(|e| e.at(Stage::UpsertDelivery))
        });

        let backend = Arc::clone(&self.backend);
        let payment = order.payment.to_values();
        group.spawn(move |token| async move {
            token.check().map_err(|e| e.at(Stage::UpsertPayment))?;
            backend
                .upsert_content(Relation::Payments, payment)
                .await
                .map_err(|e| e.at(Stage::UpsertPayment))
        });

        match group.join().await?.as_slice() {
            [delivery_id, payment_id] => Ok((*delivery_id, *payment_id)),
            other => Err(StoreError::TaskFailed {
                reason: format!("expected 2 surrogate ids, got {}", other.len()),
            }),
        }
    }

    async fn save_items(&self, token: &CancelToken, order: &OrderAggregate) -> StoreResult<()> {
        if order.items.is_empty() {
            return Ok(());
        }

        let mut group = FanOut::new(Stage::SaveItems, token);
        for item in &order.items {
            let backend = Arc::clone(&self.backend);
            let order_uid = order.order_uid.clone();
            let values = item.to_values();
            group.spawn(move |token| async move {
                token.check().map_err(|e| e.at(Stage::UpsertItem))?;
                let item_id = backend
                    .upsert_content(Relation::Items, values)
                    .await
                    .map_err(|e| e.at(Stage::UpsertItem))?;

                token.check().map_err(|e| e.at(Stage::LinkItem))?;
                backend
                    .link_item(&order_uid, item_id)
                    .await
                    .map_err(|e| e.at(Stage::LinkItem))?;
                Ok(())
            });
        }

        group.join().await.map(|_| ())
    }

    /// Reassemble a full aggregate from its root row.
    async fn hydrate(
        backend: Arc<dyn RowStore>,
        token: CancelToken,
        row: Row,
    ) -> StoreResult<OrderAggregate> {
        let (mut order, rest) =
            OrderAggregate::from_values(&row).map_err(|e| StoreError::from(e).at(Stage::Hydrate))?;
        let delivery_id = trailing_id(OrderAggregate::RECORD, "delivery_id", rest.first())
            .map_err(|e| StoreError::from(e).at(Stage::Hydrate))?;
        let payment_id = trailing_id(OrderAggregate::RECORD, "payment_id", rest.get(1))
            .map_err(|e| StoreError::from(e).at(Stage::Hydrate))?;

        let mut group = FanOut::new(Stage::Hydrate, &token);

        let b = Arc::clone(&backend);
        group.spawn(move |token| async move {
            let delivery: Delivery =
                fetch_content(&*b, &token, Relation::Deliveries, delivery_id, EntityKind::Delivery)
                    .await
                    .map_err(|e| e.at(Stage::FetchDelivery))?;
            Ok(Hydrated::Delivery(delivery))
        });

        let b = Arc::clone(&backend);
        group.spawn(move |token| async move {
            let payment: Payment =
                fetch_content(&*b, &token, Relation::Payments, payment_id, EntityKind::Payment)
                    .await
                    .map_err(|e| e.at(Stage::FetchPayment))?;
            Ok(Hydrated::Payment(payment))
        });

        let order_uid = order.order_uid.clone();
        group.spawn(move |token| async move {
            token.check().map_err(|e| e.at(Stage::FetchItems))?;
            let rows = backend
                .fetch_order_items(&order_uid)
                .await
                .map_err(|e| e.at(Stage::FetchItems))?;
            let items = rows
                .iter()
                .map(|row| Item::from_values(row).map(|(item, _)| item))
                .collect::<Result<Vec<_>, _>>()
                .map_err(|e| StoreError::from(e).at(Stage::FetchItems))?;
            Ok(Hydrated::Items(items))
        });

        for part in group.join().await? {
            match part {
                Hydrated::Delivery(delivery) => order.delivery = delivery,
                Hydrated::Payment(payment) => order.payment = payment,
                Hydrated::Items(items) => order.items = items,
            }
        }
        Ok(order)
    }
}

enum Hydrated {
    Delivery(Delivery),
    Payment(Payment),
    Items(Vec<Item>),
}

async fn fetch_content<T: RowMapper>(
    backend: &dyn RowStore,
    token: &CancelToken,
    relation: Relation,
    id: RowId,
    entity: EntityKind,
) -> StoreResult<T> {
    token.check()?;
    let row = backend
        .fetch_content(relation, id)
        .await?
        .ok_or_else(|| StoreError::not_found(entity, id))?;
    let (record, _) = T::from_values(&row)?;
    Ok(record)
}

#[async_trait]
impl OrderRepository for AggregateStore {
    async fn save(&self, token: &CancelToken, order: &OrderAggregate) -> StoreResult<()> {
        token.check().map_err(|e| e.at(Stage::CheckExisting))?;
        let exists = self
            .backend
            .order_exists(&order.order_uid)
            .await
            .map_err(|e| e.at(Stage::CheckExisting))?;
        if exists {
            debug!(order_uid = %order.order_uid, "Order already stored, skipping save");
            return Ok(());
        }

        let (delivery_id, payment_id) = self.save_delivery_and_payment(token, order).await?;

        token.check().map_err(|e| e.at(Stage::InsertOrder))?;
        let mut root = order.to_values();
        root.push(ColumnValue::BigInt(delivery_id));
        root.push(ColumnValue::BigInt(payment_id));
        let inserted = self
            .backend
            .insert_order(root)
            .await
            .map_err(|e| e.at(Stage::InsertOrder))?;
        if !inserted {
            debug!(order_uid = %order.order_uid, "Concurrent save won the root insert");
        }

        self.save_items(token, order).await?;

        info!(
            order_uid = %order.order_uid,
            items = order.item_count(),
            delivery_id,
            payment_id,
            "Order saved"
        );
        Ok(())
    }

    async fn get_by_key(
        &self,
        token: &CancelToken,
        order_uid: &str,
    ) -> StoreResult<OrderAggregate> {
        token.check().map_err(|e| e.at(Stage::FetchOrder))?;
        let row = self
            .backend
            .fetch_order(order_uid)
            .await
            .map_err(|e| e.at(Stage::FetchOrder))?
            .ok_or_else(|| StoreError::not_found(EntityKind::Order, order_uid).at(Stage::FetchOrder))?;

        Self::hydrate(Arc::clone(&self.backend), token.clone(), row).await
    }

    async fn get_recent(
        &self,
        token: &CancelToken,
        limit: usize,
    ) -> StoreResult<Vec<OrderAggregate>> {
        if limit == 0 {
            return Ok(Vec::new());
        }

        token.check().map_err(|e| e.at(Stage::FetchRecent))?;
        let rows = self
            .backend
            .fetch_recent(limit)
            .await
            .map_err(|e| e.at(Stage::FetchRecent))?;

        let mut group = FanOut::new(Stage::FetchRecent, token);
        for row in rows {
            let backend = Arc::clone(&self.backend);
            group.spawn(move |token| Self::hydrate(backend, token, row));
        }
        let orders = group.join().await?;

        debug!(requested = limit, loaded = orders.len(), "Loaded recent orders");
        Ok(orders)
    }

    async fn ping(&self) -> StoreResult<()> {
        self.backend.ping().await
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::{FailPoint, InMemoryRowStore};
    use chrono::{Duration, TimeZone, Utc};

    fn order(uid: &str, items: usize) -> OrderAggregate {
        OrderAggregate {
            order_uid: uid.to_string(),
            track_number: "WBILMTESTTRACK".to_string(),
            entry: "WBIL".to_string(),
            delivery: Delivery {
                name: "Test Testov".to_string(),
                city: "Kiryat Mozkin".to_string(),
                ..Delivery::default()
            },
            payment: Payment {
                transaction: format!("tx-{}", uid),
                currency: "USD".to_string(),
                amount: 1817,
                ..Payment::default()
            },
            items: (0..items)
                .map(|i| Item {
                    chrt_id: 1000 + i as i64,
                    name: format!("item-{}", i),
                    price: 100,
                    ..Item::default()
                })
                .collect(),
            sm_id: 99,
            date_created: Utc.with_ymd_and_hms(2021, 11, 26, 6, 22, 19).unwrap(),
            ..OrderAggregate::default()
        }
    }

    fn sorted(mut order: OrderAggregate) -> OrderAggregate {
        order.items.sort_by_key(|i| i.chrt_id);
        order
    }

    fn setup() -> (Arc<InMemoryRowStore>, AggregateStore) {
        let backend = Arc::new(InMemoryRowStore::new());
        let store = AggregateStore::new(backend.clone());
        (backend, store)
    }

    #[tokio::test]
    async fn test_save_then_get_by_key() {
        let (_, store) = setup();
        let token = CancelToken::new();
        let original = order("u1", 3);

        store.save(&token, &original).await.unwrap();
        let loaded = store.get_by_key(&token, "u1").await.unwrap();

        assert_eq!(sorted(loaded), original);
    }

    #[tokio::test]
    async fn test_zero_items_is_valid() {
        let (backend, store) = setup();
        let token = CancelToken::new();

        store.save(&token, &order("u0", 0)).await.unwrap();

        assert_eq!(backend.call_count(FailPoint::Upsert(Relation::Items)), 0);
        let loaded = store.get_by_key(&token, "u0").await.unwrap();
        assert!(loaded.items.is_empty());
    }

    #[tokio::test]
    async fn test_second_save_is_noop() {
        let (backend, store) = setup();
        let token = CancelToken::new();
        let original = order("u1", 2);

        store.save(&token, &original).await.unwrap();
        store.save(&token, &original).await.unwrap();

        assert_eq!(backend.row_count(Relation::Orders), 1);
        assert_eq!(backend.row_count(Relation::OrderItems), 2);
        assert_eq!(backend.call_count(FailPoint::InsertOrder), 1);
    }

    #[tokio::test]
    async fn test_missing_order_is_not_found() {
        let (_, store) = setup();
        let err = store
            .get_by_key(&CancelToken::new(), "missing")
            .await
            .unwrap_err();
        assert!(err.is_not_found());
        assert_eq!(err.failing_stage(), Some(Stage::FetchOrder));
    }

    #[tokio::test]
    async fn test_payment_failure_names_stage() {
        let (backend, store) = setup();
        backend.fail_on(FailPoint::Upsert(Relation::Payments));

        let err = store
            .save(&CancelToken::new(), &order("u1", 1))
            .await
            .unwrap_err();

        assert_eq!(
            err.stages(),
            vec![Stage::SaveDeliveryAndPayment, Stage::UpsertPayment]
        );
        assert_eq!(backend.row_count(Relation::Orders), 0);
    }

    #[tokio::test]
    async fn test_link_failure_after_root_written() {
        let (backend, store) = setup();
        backend.fail_on(FailPoint::LinkItem);

        let err = store
            .save(&CancelToken::new(), &order("u1", 2))
            .await
            .unwrap_err();

        assert_eq!(err.stages(), vec![Stage::SaveItems, Stage::LinkItem]);
        // No rollback: the root and the content rows stay.
        assert_eq!(backend.row_count(Relation::Orders), 1);
        assert_eq!(backend.row_count(Relation::Deliveries), 1);
    }

    #[tokio::test]
    async fn test_missing_delivery_row_fails_hydration() {
        let backend = Arc::new(InMemoryRowStore::new());
        let store = AggregateStore::new(backend.clone());
        let mut root = order("u1", 0).to_values();
        root.push(ColumnValue::BigInt(41));
        root.push(ColumnValue::BigInt(42));
        backend.insert_order(root).await.unwrap();

        let err = store
            .get_by_key(&CancelToken::new(), "u1")
            .await
            .unwrap_err();

        assert!(err.is_not_found());
        assert_eq!(err.failing_stage(), Some(Stage::Hydrate));
        let inner = err.stages();
        assert!(
            inner.contains(&Stage::FetchDelivery) || inner.contains(&Stage::FetchPayment),
            "unexpected stages {:?}",
            inner
        );
    }

    #[tokio::test]
    async fn test_get_recent_oldest_first_window() {
        let (_, store) = setup();
        let token = CancelToken::new();
        let base = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        for i in 0..5 {
            let mut o = order(&format!("u{}", i), 1);
            o.date_created = base + Duration::minutes(i);
            store.save(&token, &o).await.unwrap();
        }

        let recent = store.get_recent(&token, 3).await.unwrap();
        let uids: Vec<&str> = recent.iter().map(|o| o.order_uid.as_str()).collect();
        assert_eq!(uids, vec!["u2", "u3", "u4"]);
        assert!(recent.iter().all(|o| o.items.len() == 1));

        assert!(store.get_recent(&token, 0).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_get_recent_one_failure_fails_batch() {
        let (backend, store) = setup();
        let token = CancelToken::new();
        for i in 0..3 {
            store.save(&token, &order(&format!("u{}", i), 1)).await.unwrap();
        }
        backend.fail_after(FailPoint::FetchOrderItems, 1);

        let err = store.get_recent(&token, 3).await.unwrap_err();

        assert_eq!(err.failing_stage(), Some(Stage::FetchRecent));
        assert!(matches!(err.root_cause(), StoreError::Connectivity { .. }));
    }

    #[tokio::test]
    async fn test_cancelled_token_stops_save() {
        let (backend, store) = setup();
        let token = CancelToken::new();
        token.cancel();

        let err = store.save(&token, &order("u1", 1)).await.unwrap_err();

        assert!(err.is_cancelled());
        assert_eq!(backend.call_count(FailPoint::OrderExists), 0);
    }
}
