//! Orderhub Test Utilities
//!
//! Shared test infrastructure for the orderhub workspace:
//! - Proptest generators for the aggregate and its sub-entities
//! - Fixtures for the reference order and simple synthetic orders
//! - Assertions for comparing hydrated aggregates and store errors

pub use orderhub_core::{
    Delivery, EntityKind, Item, OrderAggregate, Payment, Stage, StoreError, StoreResult,
};

use chrono::{DateTime, TimeZone, Utc};

// ============================================================================
// PROPTEST GENERATORS
// ============================================================================

pub mod generators {
    //! Proptest strategies for generating orderhub entity types.

    use super::*;
    use proptest::prelude::*;
    use std::collections::HashSet;

    /// Short printable text, the shape of most wire fields.
    pub fn arb_text() -> impl Strategy<Value = String> {
        "[a-zA-Z0-9 @.+-]{0,16}"
    }

    /// Natural key: non-empty and free of whitespace.
    pub fn arb_order_uid() -> impl Strategy<Value = String> {
        "[a-z0-9]{8,20}"
    }

    /// Whole-second timestamps between 2020 and 2030.
    pub fn arb_timestamp() -> impl Strategy<Value = DateTime<Utc>> {
        (1577836800i64..1893456000i64)
            .prop_map(|secs| DateTime::from_timestamp(secs, 0).unwrap_or_else(Utc::now))
    }

    pub fn arb_delivery() -> impl Strategy<Value = Delivery> {
        (
            arb_text(),
            "\\+[0-9]{10}",
            "[0-9]{6,7}",
            arb_text(),
            arb_text(),
            arb_text(),
            "[a-z]{3,8}@[a-z]{3,6}\\.com",
        )
            .prop_map(|(name, phone, zip, city, address, region, email)| Delivery {
                name,
                phone,
                zip,
                city,
                address,
                region,
                email,
            })
    }

    pub fn arb_payment() -> impl Strategy<Value = Payment> {
        (
            arb_text(),
            arb_text(),
            prop_oneof![Just("USD"), Just("EUR"), Just("RUB")],
            arb_text(),
            0i64..1_000_000,
            1_600_000_000i64..1_900_000_000,
            arb_text(),
            0i64..10_000,
            0i64..1_000_000,
            0i64..1_000,
        )
            .prop_map(
                |(
                    transaction,
                    request_id,
                    currency,
                    provider,
                    amount,
                    payment_dt,
                    bank,
                    delivery_cost,
                    goods_total,
                    custom_fee,
                )| Payment {
                    transaction,
                    request_id,
                    currency: currency.to_string(),
                    provider,
                    amount,
                    payment_dt,
                    bank,
                    delivery_cost,
                    goods_total,
                    custom_fee,
                },
            )
    }

    pub fn arb_item() -> impl Strategy<Value = Item> {
        (
            1i64..100_000_000,
            arb_text(),
            0i64..100_000,
            arb_text(),
            arb_text(),
            0i64..100,
            "[0-9]{1,2}",
            0i64..100_000,
            1i64..100_000_000,
            arb_text(),
            prop_oneof![Just(200i64), Just(202), Just(404)],
        )
            .prop_map(
                |(chrt_id, track_number, price, rid, name, sale, size, total_price, nm_id, brand, status)| {
                    Item {
                        chrt_id,
                        track_number,
                        price,
                        rid,
                        name,
                        sale,
                        size,
                        total_price,
                        nm_id,
                        brand,
                        status,
                    }
                },
            )
    }

    /// Up to `max` items with pairwise distinct `chrt_id`.
    pub fn arb_items(max: usize) -> impl Strategy<Value = Vec<Item>> {
        prop::collection::vec(arb_item(), 0..=max).prop_map(|items| {
            let mut seen = HashSet::new();
            items
                .into_iter()
                .filter(|item| seen.insert(item.chrt_id))
                .collect()
        })
    }

    /// A complete aggregate with up to `max_items` distinct items.
    pub fn arb_order(max_items: usize) -> impl Strategy<Value = OrderAggregate> {
        (
            (
                arb_order_uid(),
                arb_text(),
                arb_text(),
                arb_delivery(),
                arb_payment(),
                arb_items(max_items),
            ),
            (
                prop_oneof![Just("en"), Just("ru")],
                arb_text(),
                arb_text(),
                arb_text(),
                "[0-9]{1,2}",
                0i64..1000,
                arb_timestamp(),
                "[0-9]",
            ),
        )
            .prop_map(
                |(
                    (order_uid, track_number, entry, delivery, payment, items),
                    (locale, internal_signature, customer_id, delivery_service, shardkey, sm_id, date_created, oof_shard),
                )| OrderAggregate {
                    order_uid,
                    track_number,
                    entry,
                    delivery,
                    payment,
                    items,
                    locale: locale.to_string(),
                    internal_signature,
                    customer_id,
                    delivery_service,
                    shardkey,
                    sm_id,
                    date_created,
                    oof_shard,
                },
            )
    }
}

// ============================================================================
// TEST FIXTURES
// ============================================================================

pub mod fixtures {
    //! Pre-built aggregates for common test scenarios.

    use super::*;

    /// The reference order used throughout the documentation.
    pub fn reference_order() -> OrderAggregate {
        OrderAggregate {
            order_uid: "b563feb7b2b84b6test".to_string(),
            track_number: "WBILMTESTTRACK".to_string(),
            entry: "WBIL".to_string(),
            delivery: Delivery {
                name: "Test Testov".to_string(),
                phone: "+9720000000".to_string(),
                zip: "2639809".to_string(),
                city: "Kiryat Mozkin".to_string(),
                address: "Ploshad Mira 15".to_string(),
                region: "Kraiot".to_string(),
                email: "test@gmail.com".to_string(),
            },
            payment: Payment {
                transaction: "b563feb7b2b84b6test".to_string(),
                request_id: String::new(),
                currency: "USD".to_string(),
                provider: "wbpay".to_string(),
                amount: 1817,
                payment_dt: 1637907727,
                bank: "alpha".to_string(),
                delivery_cost: 1500,
                goods_total: 317,
                custom_fee: 0,
            },
            items: vec![Item {
                chrt_id: 9934930,
                track_number: "WBILMTESTTRACK".to_string(),
                price: 453,
                rid: "ab4219087a764ae0btest".to_string(),
                name: "Mascaras".to_string(),
                sale: 30,
                size: "0".to_string(),
                total_price: 317,
                nm_id: 2389212,
                brand: "Vivienne Sabo".to_string(),
                status: 202,
            }],
            locale: "en".to_string(),
            internal_signature: String::new(),
            customer_id: "test".to_string(),
            delivery_service: "meest".to_string(),
            shardkey: "9".to_string(),
            sm_id: 99,
            date_created: Utc
                .with_ymd_and_hms(2021, 11, 26, 6, 22, 19)
                .single()
                .unwrap_or_else(Utc::now),
            oof_shard: "1".to_string(),
        }
    }

    /// The reference order as a queue payload.
    pub fn reference_payload() -> Vec<u8> {
        serde_json::to_vec(&reference_order()).unwrap_or_default()
    }

    /// The reference order re-keyed to `order_uid` with `n_items` distinct
    /// items. Delivery and payment content is shared across calls.
    pub fn sample_order(order_uid: &str, n_items: usize) -> OrderAggregate {
        let template = reference_order();
        let items = (0..n_items)
            .map(|i| Item {
                chrt_id: template.items[0].chrt_id + i as i64,
                rid: format!("{}-rid-{}", order_uid, i),
                ..template.items[0].clone()
            })
            .collect();
        OrderAggregate {
            order_uid: order_uid.to_string(),
            items,
            ..template
        }
    }
}

// ============================================================================
// CUSTOM ASSERTIONS
// ============================================================================

pub mod assertions {
    //! Assertions for hydrated aggregates and store errors.

    use super::*;

    /// Items are a set; hydration does not preserve insertion order.
    pub fn normalized(mut order: OrderAggregate) -> OrderAggregate {
        order
            .items
            .sort_by(|a, b| (a.chrt_id, &a.rid).cmp(&(b.chrt_id, &b.rid)));
        order
    }

    /// Assert two aggregates are equal up to item order.
    pub fn assert_same_order(actual: &OrderAggregate, expected: &OrderAggregate) {
        assert_eq!(
            normalized(actual.clone()),
            normalized(expected.clone()),
            "aggregates differ for order {}",
            expected.order_uid
        );
    }

    /// Assert that a result is a not-found failure.
    pub fn assert_not_found<T: std::fmt::Debug>(result: &StoreResult<T>) {
        match result {
            Err(err) if err.is_not_found() => {}
            other => panic!("Expected not-found, got {:?}", other),
        }
    }

    /// Assert that a result failed with `stage` somewhere on its stage chain.
    pub fn assert_failed_at<T: std::fmt::Debug>(result: &StoreResult<T>, stage: Stage) {
        match result {
            Err(err) => assert!(
                err.stages().contains(&stage),
                "Expected failure at {}, got stages {:?}",
                stage,
                err.stages()
            ),
            Ok(value) => panic!("Expected failure at {}, got Ok({:?})", stage, value),
        }
    }
}

// ============================================================================
// TESTS
// ============================================================================
