//! Row mapping contract between aggregate entities and relational rows.
//!
//! Each persisted entity declares its ordered column list once. Binding
//! produces values in that order; scanning consumes values in that order and
//! hands back any trailing columns (surrogate ids) to the caller. This is the
//! only place that knows field-to-column order.

use std::fmt;

use chrono::{DateTime, Utc};

use crate::error::MappingError;
use crate::{Delivery, Item, OrderAggregate, Payment};

// ============================================================================
// COLUMN TYPES
// ============================================================================

/// SQL type family of a persisted column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ColumnKind {
    Text,
    BigInt,
    Timestamp,
}

impl fmt::Display for ColumnKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ColumnKind::Text => "TEXT",
            ColumnKind::BigInt => "BIGINT",
            ColumnKind::Timestamp => "TIMESTAMPTZ",
        };
        f.write_str(name)
    }
}

/// A named, typed column.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Column {
    pub name: &'static str,
    pub kind: ColumnKind,
}

impl Column {
    pub const fn text(name: &'static str) -> Self {
        Self {
            name,
            kind: ColumnKind::Text,
        }
    }

    pub const fn bigint(name: &'static str) -> Self {
        Self {
            name,
            kind: ColumnKind::BigInt,
        }
    }

    pub const fn timestamp(name: &'static str) -> Self {
        Self {
            name,
            kind: ColumnKind::Timestamp,
        }
    }
}

/// A single bound or scanned column value.
///
/// Hashable so a whole row can serve as a content identity.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ColumnValue {
    Text(String),
    BigInt(i64),
    Timestamp(DateTime<Utc>),
}

impl ColumnValue {
    pub fn kind(&self) -> ColumnKind {
        match self {
            ColumnValue::Text(_) => ColumnKind::Text,
            ColumnValue::BigInt(_) => ColumnKind::BigInt,
            ColumnValue::Timestamp(_) => ColumnKind::Timestamp,
        }
    }
}

// ============================================================================
// ROW MAPPER CONTRACT
// ============================================================================

/// Compile-time serialization contract for a persisted entity.
pub trait RowMapper: Sized {
    /// Record name used in mapping errors.
    const RECORD: &'static str;

    /// Persistable columns, in bind and scan order.
    const COLUMNS: &'static [Column];

    /// Persistable field values in `COLUMNS` order.
    fn to_values(&self) -> Vec<ColumnValue>;

    /// Build the record from the leading `COLUMNS.len()` values and return
    /// the trailing values the caller appended to the scan.
    fn from_values(values: &[ColumnValue]) -> Result<(Self, &[ColumnValue]), MappingError>;
}

/// Sequential reader over a scanned row, checking kinds against `COLUMNS`.
struct RowReader<'a> {
    record: &'static str,
    columns: &'static [Column],
    values: &'a [ColumnValue],
    pos: usize,
}

impl<'a> RowReader<'a> {
    fn new(
        record: &'static str,
        columns: &'static [Column],
        values: &'a [ColumnValue],
    ) -> Result<Self, MappingError> {
        if values.len() < columns.len() {
            return Err(MappingError::Arity {
                record,
                expected: columns.len(),
                actual: values.len(),
            });
        }
        Ok(Self {
            record,
            columns,
            values,
            pos: 0,
        })
    }

    fn mismatch(&self, actual: ColumnKind) -> MappingError {
        let column = self.columns[self.pos];
        MappingError::KindMismatch {
            record: self.record,
            column: column.name,
            expected: column.kind,
            actual,
        }
    }

    fn text(&mut self) -> Result<String, MappingError> {
        match &self.values[self.pos] {
            ColumnValue::Text(s) => {
                self.pos += 1;
                Ok(s.clone())
            }
            other => Err(self.mismatch(other.kind())),
        }
    }

    fn bigint(&mut self) -> Result<i64, MappingError> {
        match &self.values[self.pos] {
            ColumnValue::BigInt(v) => {
                self.pos += 1;
                Ok(*v)
            }
            other => Err(self.mismatch(other.kind())),
        }
    }

    fn timestamp(&mut self) -> Result<DateTime<Utc>, MappingError> {
        match &self.values[self.pos] {
            ColumnValue::Timestamp(t) => {
                self.pos += 1;
                Ok(*t)
            }
            other => Err(self.mismatch(other.kind())),
        }
    }

    fn rest(self) -> &'a [ColumnValue] {
        &self.values[self.pos..]
    }
}

/// Read a trailing surrogate id returned alongside a scanned row.
pub fn trailing_id(
    record: &'static str,
    column: &'static str,
    value: Option<&ColumnValue>,
) -> Result<i64, MappingError> {
    match value {
        Some(ColumnValue::BigInt(id)) => Ok(*id),
        Some(other) => Err(MappingError::KindMismatch {
            record,
            column,
            expected: ColumnKind::BigInt,
            actual: other.kind(),
        }),
        None => Err(MappingError::Arity {
            record,
            expected: 1,
            actual: 0,
        }),
    }
}

// ============================================================================
// ENTITY MAPPINGS
// ============================================================================

impl RowMapper for Delivery {
    const RECORD: &'static str = "deliveries";
    const COLUMNS: &'static [Column] = &[
        Column::text("name"),
        Column::text("phone"),
        Column::text("zip"),
        Column::text("city"),
        Column::text("address"),
        Column::text("region"),
        Column::text("email"),
    ];

    fn to_values(&self) -> Vec<ColumnValue> {
        vec![
            ColumnValue::Text(self.name.clone()),
            ColumnValue::Text(self.phone.clone()),
            ColumnValue::Text(self.zip.clone()),
            ColumnValue::Text(self.city.clone()),
            ColumnValue::Text(self.address.clone()),
            ColumnValue::Text(self.region.clone()),
            ColumnValue::Text(self.email.clone()),
        ]
    }

    fn from_values(values: &[ColumnValue]) -> Result<(Self, &[ColumnValue]), MappingError> {
        let mut r = RowReader::new(Self::RECORD, Self::COLUMNS, values)?;
        let delivery = Delivery {
            name: r.text()?,
            phone: r.text()?,
            zip: r.text()?,
            city: r.text()?,
            address: r.text()?,
            region: r.text()?,
            email: r.text()?,
        };
        Ok((delivery, r.rest()))
    }
}

impl RowMapper for Payment {
    const RECORD: &'static str = "payments";
    const COLUMNS: &'static [Column] = &[
        Column::text("transaction"),
        Column::text("request_id"),
        Column::text("currency"),
        Column::text("provider"),
        Column::bigint("amount"),
        Column::bigint("payment_dt"),
        Column::text("bank"),
        Column::bigint("delivery_cost"),
        Column::bigint("goods_total"),
        Column::bigint("custom_fee"),
    ];

    fn to_values(&self) -> Vec<ColumnValue> {
        vec![
            ColumnValue::Text(self.transaction.clone()),
            ColumnValue::Text(self.request_id.clone()),
            ColumnValue::Text(self.currency.clone()),
            ColumnValue::Text(self.provider.clone()),
            ColumnValue::BigInt(self.amount),
            ColumnValue::BigInt(self.payment_dt),
            ColumnValue::Text(self.bank.clone()),
            ColumnValue::BigInt(self.delivery_cost),
            ColumnValue::BigInt(self.goods_total),
            ColumnValue::BigInt(self.custom_fee),
        ]
    }

    fn from_values(values: &[ColumnValue]) -> Result<(Self, &[ColumnValue]), MappingError> {
        let mut r = RowReader::new(Self::RECORD, Self::COLUMNS, values)?;
        let payment = Payment {
            transaction: r.text()?,
            request_id: r.text()?,
            currency: r.text()?,
            provider: r.text()?,
            amount: r.bigint()?,
            payment_dt: r.bigint()?,
            bank: r.text()?,
            delivery_cost: r.bigint()?,
            goods_total: r.bigint()?,
            custom_fee: r.bigint()?,
        };
        Ok((payment, r.rest()))
    }
}

impl RowMapper for Item {
    const RECORD: &'static str = "items";
    const COLUMNS: &'static [Column] = &[
        Column::bigint("chrt_id"),
        Column::text("track_number"),
        Column::bigint("price"),
        Column::text("rid"),
        Column::text("name"),
        Column::bigint("sale"),
        Column::text("size"),
        Column::bigint("total_price"),
        Column::bigint("nm_id"),
        Column::text("brand"),
        Column::bigint("status"),
    ];

    fn to_values(&self) -> Vec<ColumnValue> {
        vec![
            ColumnValue::BigInt(self.chrt_id),
            ColumnValue::Text(self.track_number.clone()),
            ColumnValue::BigInt(self.price),
            ColumnValue::Text(self.rid.clone()),
            ColumnValue::Text(self.name.clone()),
            ColumnValue::BigInt(self.sale),
            ColumnValue::Text(self.size.clone()),
            ColumnValue::BigInt(self.total_price),
            ColumnValue::BigInt(self.nm_id),
            ColumnValue::Text(self.brand.clone()),
            ColumnValue::BigInt(self.status),
        ]
    }

    fn from_values(values: &[ColumnValue]) -> Result<(Self, &[ColumnValue]), MappingError> {
        let mut r = RowReader::new(Self::RECORD, Self::COLUMNS, values)?;
        let item = Item {
            chrt_id: r.bigint()?,
            track_number: r.text()?,
            price: r.bigint()?,
            rid: r.text()?,
            name: r.text()?,
            sale: r.bigint()?,
            size: r.text()?,
            total_price: r.bigint()?,
            nm_id: r.bigint()?,
            brand: r.text()?,
            status: r.bigint()?,
        };
        Ok((item, r.rest()))
    }
}

/// Root columns only: delivery, payment and items are not persisted on the
/// root row and come back empty from a scan until hydrated.
impl RowMapper for OrderAggregate {
    const RECORD: &'static str = "orders";
    const COLUMNS: &'static [Column] = &[
        Column::text("order_uid"),
        Column::text("track_number"),
        Column::text("entry"),
        Column::text("locale"),
        Column::text("internal_signature"),
        Column::text("customer_id"),
        Column::text("delivery_service"),
        Column::text("shardkey"),
        Column::bigint("sm_id"),
        Column::timestamp("date_created"),
        Column::text("oof_shard"),
    ];

    fn to_values(&self) -> Vec<ColumnValue> {
        vec![
            ColumnValue::Text(self.order_uid.clone()),
            ColumnValue::Text(self.track_number.clone()),
            ColumnValue::Text(self.entry.clone()),
            ColumnValue::Text(self.locale.clone()),
            ColumnValue::Text(self.internal_signature.clone()),
            ColumnValue::Text(self.customer_id.clone()),
            ColumnValue::Text(self.delivery_service.clone()),
            ColumnValue::Text(self.shardkey.clone()),
            ColumnValue::BigInt(self.sm_id),
            ColumnValue::Timestamp(self.date_created),
            ColumnValue::Text(self.oof_shard.clone()),
        ]
    }

    fn from_values(values: &[ColumnValue]) -> Result<(Self, &[ColumnValue]), MappingError> {
        let mut r = RowReader::new(Self::RECORD, Self::COLUMNS, values)?;
        let order = OrderAggregate {
            order_uid: r.text()?,
            track_number: r.text()?,
            entry: r.text()?,
            locale: r.text()?,
            internal_signature: r.text()?,
            customer_id: r.text()?,
            delivery_service: r.text()?,
            shardkey: r.text()?,
            sm_id: r.bigint()?,
            date_created: r.timestamp()?,
            oof_shard: r.text()?,
            ..OrderAggregate::default()
        };
        Ok((order, r.rest()))
    }
}

// ============================================================================
// RELATIONS
// ============================================================================

/// The five persisted relations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Relation {
    Orders,
    Deliveries,
    Payments,
    Items,
    OrderItems,
}

/// Trailing surrogate id columns of the root row.
pub const ORDER_REFERENCE_COLUMNS: &[Column] =
    &[Column::bigint("delivery_id"), Column::bigint("payment_id")];

/// Columns of the order-item join relation.
pub const ORDER_ITEM_COLUMNS: &[Column] = &[Column::text("order_uid"), Column::bigint("item_id")];

impl Relation {
    pub fn table_name(&self) -> &'static str {
        match self {
            Relation::Orders => "orders",
            Relation::Deliveries => "deliveries",
            Relation::Payments => "payments",
            Relation::Items => "items",
            Relation::OrderItems => "order_items",
        }
    }

    /// Whether rows of this relation are deduplicated by full content.
    pub fn is_content_addressed(&self) -> bool {
        matches!(
            self,
            Relation::Deliveries | Relation::Payments | Relation::Items
        )
    }

    /// Columns bound on insert (excluding generated ids and root references).
    pub fn columns(&self) -> &'static [Column] {
        match self {
            Relation::Orders => OrderAggregate::COLUMNS,
            Relation::Deliveries => Delivery::COLUMNS,
            Relation::Payments => Payment::COLUMNS,
            Relation::Items => Item::COLUMNS,
            Relation::OrderItems => ORDER_ITEM_COLUMNS,
        }
    }

    /// Name of the uniqueness constraint backing dedup-on-write.
    pub fn unique_constraint(&self) -> &'static str {
        match self {
            Relation::Orders => "orders_pkey",
            Relation::Deliveries => "unique_deliveries",
            Relation::Payments => "unique_payments",
            Relation::Items => "unique_items",
            Relation::OrderItems => "unique_order_items",
        }
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn payment() -> Payment {
        Payment {
            transaction: "tx-1".to_string(),
            currency: "USD".to_string(),
            provider: "wbpay".to_string(),
            amount: 1817,
            payment_dt: 1637907727,
            bank: "alpha".to_string(),
            delivery_cost: 1500,
            goods_total: 317,
            ..Payment::default()
        }
    }

    #[test]
    fn test_values_follow_column_order() {
        let values = payment().to_values();
        assert_eq!(values.len(), Payment::COLUMNS.len());
        for (value, column) in values.iter().zip(Payment::COLUMNS) {
            assert_eq!(value.kind(), column.kind, "column {}", column.name);
        }
        assert_eq!(values[4], ColumnValue::BigInt(1817));
        assert_eq!(values[6], ColumnValue::Text("alpha".to_string()));
    }

    #[test]
    fn test_trailing_columns_returned() {
        let order = OrderAggregate {
            order_uid: "u1".to_string(),
            sm_id: 99,
            ..OrderAggregate::default()
        };
        let mut values = order.to_values();
        values.push(ColumnValue::BigInt(7));
        values.push(ColumnValue::BigInt(8));

        let (scanned, rest) = OrderAggregate::from_values(&values).unwrap();
        assert_eq!(scanned, order);
        assert_eq!(trailing_id("orders", "delivery_id", rest.first()).unwrap(), 7);
        assert_eq!(trailing_id("orders", "payment_id", rest.get(1)).unwrap(), 8);
    }

    #[test]
    fn test_too_few_values_is_arity_error() {
        let values = payment().to_values();
        let err = Payment::from_values(&values[..3]).unwrap_err();
        assert_eq!(
            err,
            MappingError::Arity {
                record: "payments",
                expected: 10,
                actual: 3,
            }
        );
    }

    #[test]
    fn test_wrong_kind_names_column() {
        let mut values = payment().to_values();
        values[5] = ColumnValue::Text("yesterday".to_string());
        let err = Payment::from_values(&values).unwrap_err();
        assert_eq!(
            err,
            MappingError::KindMismatch {
                record: "payments",
                column: "payment_dt",
                expected: ColumnKind::BigInt,
                actual: ColumnKind::Text,
            }
        );
    }

    #[test]
    fn test_trailing_id_rejects_text() {
        let value = ColumnValue::Text("7".to_string());
        assert!(trailing_id("orders", "delivery_id", Some(&value)).is_err());
        assert!(trailing_id("orders", "delivery_id", None).is_err());
    }

    #[test]
    fn test_relation_catalogue() {
        assert!(Relation::Items.is_content_addressed());
        assert!(!Relation::Orders.is_content_addressed());
        assert_eq!(Relation::Deliveries.columns().len(), 7);
        assert_eq!(Relation::OrderItems.table_name(), "order_items");
        assert_eq!(Relation::Payments.unique_constraint(), "unique_payments");
    }
}
