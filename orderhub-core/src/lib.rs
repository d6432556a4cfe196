//! Orderhub Core - Aggregate Types
//!
//! Pure data structures with no I/O. Every other crate depends on this.
//! Holds the order aggregate and its wire shape, the row mapping contract
//! used by the storage engine, and the error taxonomy.

pub mod error;
pub mod record;

pub use error::{EntityKind, MappingError, Stage, StoreError, StoreResult};
pub use record::{
    trailing_id, Column, ColumnKind, ColumnValue, Relation, RowMapper, ORDER_ITEM_COLUMNS,
    ORDER_REFERENCE_COLUMNS,
};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Natural key of an order aggregate. Opaque to the engine.
pub type OrderUid = String;

/// Surrogate id assigned to a content-addressed row on first insert.
pub type RowId = i64;

// ============================================================================
// AGGREGATE ENTITIES
// ============================================================================

/// Root of the aggregate: an order with its delivery, payment and items.
///
/// The serde field names are the wire shape shared by the ingestion queue
/// payload and the HTTP response. Missing fields decode to their defaults.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct OrderAggregate {
    pub order_uid: OrderUid,
    pub track_number: String,
    pub entry: String,
    pub delivery: Delivery,
    pub payment: Payment,
    pub items: Vec<Item>,
    pub locale: String,
    pub internal_signature: String,
    pub customer_id: String,
    pub delivery_service: String,
    pub shardkey: String,
    pub sm_id: i64,
    pub date_created: DateTime<Utc>,
    pub oof_shard: String,
}

impl OrderAggregate {
    /// Number of line items carried by this aggregate.
    pub fn item_count(&self) -> usize {
        self.items.len()
    }
}

/// Delivery details. Content-addressed: identical content shares one row.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Delivery {
    pub name: String,
    pub phone: String,
    pub zip: String,
    pub city: String,
    pub address: String,
    pub region: String,
    pub email: String,
}

/// Payment details. Content-addressed like [`Delivery`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Payment {
    pub transaction: String,
    pub request_id: String,
    pub currency: String,
    pub provider: String,
    pub amount: i64,
    pub payment_dt: i64,
    pub bank: String,
    pub delivery_cost: i64,
    pub goods_total: i64,
    pub custom_fee: i64,
}

/// A line item. Content-addressed and linked to orders through `order_items`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Item {
    pub chrt_id: i64,
    pub track_number: String,
    pub price: i64,
    pub rid: String,
    pub name: String,
    pub sale: i64,
    pub size: String,
    pub total_price: i64,
    pub nm_id: i64,
    pub brand: String,
    pub status: i64,
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn sample() -> OrderAggregate {
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
                currency: "USD".to_string(),
                provider: "wbpay".to_string(),
                amount: 1817,
                payment_dt: 1637907727,
                bank: "alpha".to_string(),
                delivery_cost: 1500,
                goods_total: 317,
                ..Payment::default()
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
            customer_id: "test".to_string(),
            delivery_service: "meest".to_string(),
            shardkey: "9".to_string(),
            sm_id: 99,
            date_created: Utc.with_ymd_and_hms(2021, 11, 26, 6, 22, 19).unwrap(),
            oof_shard: "1".to_string(),
            ..OrderAggregate::default()
        }
    }

    #[test]
    fn test_wire_shape_field_names() {
        let json = serde_json::to_value(sample()).unwrap();
        for field in [
            "order_uid",
            "track_number",
            "entry",
            "delivery",
            "payment",
            "items",
            "locale",
            "internal_signature",
            "customer_id",
            "delivery_service",
            "shardkey",
            "sm_id",
            "date_created",
            "oof_shard",
        ] {
            assert!(json.get(field).is_some(), "missing field {}", field);
        }
        assert_eq!(json["delivery"]["zip"], "2639809");
        assert_eq!(json["payment"]["delivery_cost"], 1500);
        assert_eq!(json["items"][0]["chrt_id"], 9934930);
        assert_eq!(json["items"][0]["nm_id"], 2389212);
    }

    #[test]
    fn test_decode_reference_payload() {
        let payload = r#"{
            "order_uid": "b563feb7b2b84b6test",
            "track_number": "WBILMTESTTRACK",
            "entry": "WBIL",
            "delivery": {"name": "Test Testov", "phone": "+9720000000", "zip": "2639809",
                "city": "Kiryat Mozkin", "address": "Ploshad Mira 15", "region": "Kraiot",
                "email": "test@gmail.com"},
            "payment": {"transaction": "b563feb7b2b84b6test", "request_id": "", "currency": "USD",
                "provider": "wbpay", "amount": 1817, "payment_dt": 1637907727, "bank": "alpha",
                "delivery_cost": 1500, "goods_total": 317, "custom_fee": 0},
            "items": [{"chrt_id": 9934930, "track_number": "WBILMTESTTRACK", "price": 453,
                "rid": "ab4219087a764ae0btest", "name": "Mascaras", "sale": 30, "size": "0",
                "total_price": 317, "nm_id": 2389212, "brand": "Vivienne Sabo", "status": 202}],
            "locale": "en",
            "internal_signature": "",
            "customer_id": "test",
            "delivery_service": "meest",
            "shardkey": "9",
            "sm_id": 99,
            "date_created": "2021-11-26T06:22:19Z",
            "oof_shard": "1"
        }"#;
        let decoded: OrderAggregate = serde_json::from_str(payload).unwrap();
        assert_eq!(decoded, sample());
    }

    #[test]
    fn test_missing_fields_default() {
        let decoded: OrderAggregate = serde_json::from_str(r#"{"order_uid": "u1"}"#).unwrap();
        assert_eq!(decoded.order_uid, "u1");
        assert_eq!(decoded.item_count(), 0);
        assert_eq!(decoded.delivery, Delivery::default());
    }
}
