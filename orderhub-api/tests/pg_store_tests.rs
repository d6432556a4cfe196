//! PostgreSQL-backed store tests.
//!
//! Require a database with `sql/orderhub_init.sql` applied, reachable
//! through the `ORDERHUB_DB_*` variables. Run with `--features db-tests`.

#![cfg(feature = "db-tests")]

#[path = "support/db.rs"]
mod db;

use std::sync::Arc;

use db::test_db_config;
use orderhub_api::PgRowStore;
use orderhub_core::{OrderAggregate, Relation, RowMapper};
use orderhub_storage::{AggregateStore, CancelToken, OrderRepository, RowStore};
use orderhub_test_utils::assertions::{assert_not_found, assert_same_order};
use orderhub_test_utils::fixtures::sample_order;

async fn test_store() -> (PgRowStore, AggregateStore) {
    let pg = PgRowStore::connect(&test_db_config())
        .await
        .expect("PostgreSQL reachable");
    let store = AggregateStore::new(Arc::new(pg.clone()));
    (pg, store)
}

fn unique_uid(prefix: &str) -> String {
    format!("{}-{}", prefix, uuid::Uuid::now_v7().simple())
}

#[tokio::test]
async fn test_save_and_get_round_trip() {
    let (_pg, store) = test_store().await;
    let token = CancelToken::new();
    let order = sample_order(&unique_uid("roundtrip"), 3);

    store.save(&token, &order).await.unwrap();
    let loaded = store.get_by_key(&token, &order.order_uid).await.unwrap();

    assert_same_order(&loaded, &order);
}

#[tokio::test]
async fn test_identical_content_shares_rows() {
    let (pg, store) = test_store().await;
    let token = CancelToken::new();
    let a = sample_order(&unique_uid("dedup-a"), 0);
    let b = sample_order(&unique_uid("dedup-b"), 0);

    store.save(&token, &a).await.unwrap();
    store.save(&token, &b).await.unwrap();

    let first = pg
        .upsert_content(Relation::Deliveries, a.delivery.to_values())
        .await
        .unwrap();
    let second = pg
        .upsert_content(Relation::Deliveries, b.delivery.to_values())
        .await
        .unwrap();
    assert_eq!(first, second);
}

#[tokio::test]
async fn test_resave_is_noop() {
    let (pg, store) = test_store().await;
    let token = CancelToken::new();
    let order = sample_order(&unique_uid("resave"), 2);

    store.save(&token, &order).await.unwrap();
    store.save(&token, &order).await.unwrap();

    assert!(pg.order_exists(&order.order_uid).await.unwrap());
    assert_eq!(pg.fetch_order_items(&order.order_uid).await.unwrap().len(), 2);
}

#[tokio::test]
async fn test_missing_order_is_not_found() {
    let (_pg, store) = test_store().await;
    let result: Result<OrderAggregate, _> = store
        .get_by_key(&CancelToken::new(), &unique_uid("missing"))
        .await;
    assert_not_found(&result);
}

#[tokio::test]
async fn test_ping() {
    let (pg, _store) = test_store().await;
    pg.ping().await.unwrap();
    assert!(pg.pool_size() >= 1);
}
