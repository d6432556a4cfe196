//! Database Connection Pool Module
//!
//! PostgreSQL connection pooling with deadpool-postgres and the relational
//! backend the aggregate store runs on in production. Statement text is
//! derived from the column lists declared by each entity's `RowMapper`, so
//! bind and scan order never drift from the mapping layer. The schema lives
//! in `sql/orderhub_init.sql` and is applied by operators.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use deadpool_postgres::{
    Config, ManagerConfig, Object, Pool, PoolConfig, RecyclingMethod, Runtime, Timeouts,
};
use orderhub_core::{
    Column, ColumnKind, ColumnValue, Item, OrderAggregate, Relation, RowId, RowMapper,
    StoreError, StoreResult, ORDER_REFERENCE_COLUMNS,
};
use orderhub_storage::{Row, RowStore};
use serde::{Deserialize, Serialize};
use tokio_postgres::types::ToSql;
use tokio_postgres::NoTls;

use crate::error::{ApiError, ApiResult};

// ============================================================================
// CONNECTION POOL CONFIGURATION
// ============================================================================

/// Database connection pool configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DbConfig {
    /// PostgreSQL host
    pub host: String,
    /// PostgreSQL port
    pub port: u16,
    /// Database name
    pub dbname: String,
    /// Database user
    pub user: String,
    /// Database password
    pub password: String,
    /// Maximum pool size
    pub max_size: usize,
    /// Checkout, connect and recycle timeout in seconds
    pub timeout_secs: u64,
}

impl Default for DbConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 5432,
            dbname: "orderhub".to_string(),
            user: "postgres".to_string(),
            password: String::new(),
            max_size: 16,
            timeout_secs: 30,
        }
    }
}

impl DbConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    /// Create a connection pool from this configuration.
    pub fn create_pool(&self) -> ApiResult<Pool> {
        let mut cfg = Config::new();
        cfg.host = Some(self.host.clone());
        cfg.port = Some(self.port);
        cfg.dbname = Some(self.dbname.clone());
        cfg.user = Some(self.user.clone());
        cfg.password = Some(self.password.clone());

        cfg.manager = Some(ManagerConfig {
            recycling_method: RecyclingMethod::Fast,
        });

        let mut pool_cfg = PoolConfig::new(self.max_size);
        pool_cfg.timeouts = Timeouts {
            wait: Some(self.timeout()),
            create: Some(self.timeout()),
            recycle: Some(self.timeout()),
        };
        cfg.pool = Some(pool_cfg);

        let pool = cfg
            .create_pool(Some(Runtime::Tokio1), NoTls)
            .map_err(|e| ApiError::database_error(format!("Failed to create pool: {}", e)))?;

        Ok(pool)
    }
}

// ============================================================================
// STATEMENTS
// ============================================================================

/// Statement text for every backend primitive, built once per store.
#[derive(Debug)]
struct Statements {
    order_exists: String,
    insert_order: String,
    link_item: String,
    fetch_order: String,
    fetch_recent: String,
    fetch_order_items: String,
    upsert_delivery: String,
    upsert_payment: String,
    upsert_item: String,
    fetch_delivery: String,
    fetch_payment: String,
    fetch_item: String,
}

fn column_list(columns: &[Column], qualifier: Option<&str>) -> String {
    columns
        .iter()
        .map(|c| match qualifier {
            Some(q) => format!("{}.{}", q, c.name),
            None => c.name.to_string(),
        })
        .collect::<Vec<_>>()
        .join(", ")
}

fn placeholders(count: usize) -> String {
    (1..=count)
        .map(|i| format!("${}", i))
        .collect::<Vec<_>>()
        .join(", ")
}

/// Root columns as stored: the mapped columns followed by the references.
fn root_columns() -> Vec<Column> {
    OrderAggregate::COLUMNS
        .iter()
        .chain(ORDER_REFERENCE_COLUMNS)
        .copied()
        .collect()
}

fn upsert_sql(relation: Relation) -> String {
    let table = relation.table_name();
    let columns = relation.columns();
    format!(
        "INSERT INTO {table} ({cols}) VALUES ({params}) \
         ON CONFLICT ON CONSTRAINT {constraint} DO UPDATE SET id = {table}.id \
         RETURNING id",
        table = table,
        cols = column_list(columns, None),
        params = placeholders(columns.len()),
        constraint = relation.unique_constraint(),
    )
}

fn fetch_content_sql(relation: Relation) -> String {
    format!(
        "SELECT {cols} FROM {table} WHERE id = $1",
        cols = column_list(relation.columns(), None),
        table = relation.table_name(),
    )
}

impl Statements {
    fn build() -> Self {
        let root = root_columns();
        let root_cols = column_list(&root, None);
        Self {
            order_exists: "SELECT 1 FROM orders WHERE order_uid = $1".to_string(),
            insert_order: format!(
                "INSERT INTO orders ({}) VALUES ({}) ON CONFLICT (order_uid) DO NOTHING",
                root_cols,
                placeholders(root.len()),
            ),
            link_item: format!(
                "INSERT INTO order_items (order_uid, item_id) VALUES ($1, $2) \
                 ON CONFLICT ON CONSTRAINT {} DO NOTHING",
                Relation::OrderItems.unique_constraint(),
            ),
            fetch_order: format!("SELECT {} FROM orders WHERE order_uid = $1", root_cols),
            fetch_recent: format!(
                "SELECT {cols} FROM (\
                 SELECT {cols} FROM orders ORDER BY date_created DESC LIMIT $1\
                 ) AS recent ORDER BY date_created ASC",
                cols = root_cols,
            ),
            fetch_order_items: format!(
                "SELECT {} FROM items i JOIN order_items oi ON i.id = oi.item_id \
                 WHERE oi.order_uid = $1",
                column_list(Item::COLUMNS, Some("i")),
            ),
            upsert_delivery: upsert_sql(Relation::Deliveries),
            upsert_payment: upsert_sql(Relation::Payments),
            upsert_item: upsert_sql(Relation::Items),
            fetch_delivery: fetch_content_sql(Relation::Deliveries),
            fetch_payment: fetch_content_sql(Relation::Payments),
            fetch_item: fetch_content_sql(Relation::Items),
        }
    }

    fn upsert(&self, relation: Relation) -> Option<&str> {
        match relation {
            Relation::Deliveries => Some(&self.upsert_delivery),
            Relation::Payments => Some(&self.upsert_payment),
            Relation::Items => Some(&self.upsert_item),
            Relation::Orders | Relation::OrderItems => None,
        }
    }

    fn fetch_content(&self, relation: Relation) -> Option<&str> {
        match relation {
            Relation::Deliveries => Some(&self.fetch_delivery),
            Relation::Payments => Some(&self.fetch_payment),
            Relation::Items => Some(&self.fetch_item),
            Relation::Orders | Relation::OrderItems => None,
        }
    }
}

// ============================================================================
// VALUE CONVERSION
// ============================================================================

fn as_param(value: &ColumnValue) -> &(dyn ToSql + Sync) {
    match value {
        ColumnValue::Text(v) => v,
        ColumnValue::BigInt(v) => v,
        ColumnValue::Timestamp(v) => v,
    }
}

fn params(values: &[ColumnValue]) -> Vec<&(dyn ToSql + Sync)> {
    values.iter().map(as_param).collect()
}

fn decode_row(
    operation: &str,
    row: &tokio_postgres::Row,
    columns: &[Column],
) -> StoreResult<Row> {
    columns
        .iter()
        .enumerate()
        .map(|(idx, column)| {
            let value = match column.kind {
                ColumnKind::Text => row.try_get::<_, String>(idx).map(ColumnValue::Text),
                ColumnKind::BigInt => row.try_get::<_, i64>(idx).map(ColumnValue::BigInt),
                ColumnKind::Timestamp => row
                    .try_get::<_, DateTime<Utc>>(idx)
                    .map(ColumnValue::Timestamp),
            };
            value.map_err(|e| StoreError::connectivity(operation, e))
        })
        .collect()
}

fn not_content_addressed(operation: &str, relation: Relation) -> StoreError {
    StoreError::connectivity(
        operation,
        format!("{} is not content-addressed", relation.table_name()),
    )
}

// ============================================================================
// POSTGRES ROW STORE
// ============================================================================

/// `RowStore` over a deadpool-postgres pool.
///
/// Every primitive checks a connection out for the duration of one
/// statement. Concurrent writers to the same content row are resolved by
/// the uniqueness constraints, never by in-process locking.
#[derive(Clone)]
pub struct PgRowStore {
    pool: Pool,
    sql: Arc<Statements>,
    root: Arc<Vec<Column>>,
}

impl PgRowStore {
    pub fn new(pool: Pool) -> Self {
        Self {
            pool,
            sql: Arc::new(Statements::build()),
            root: Arc::new(root_columns()),
        }
    }

    /// Build the pool and verify connectivity once before serving.
    pub async fn connect(config: &DbConfig) -> ApiResult<Self> {
        let pool = config.create_pool()?;
        let conn = pool.get().await?;
        conn.simple_query("SELECT 1").await?;
        tracing::info!(
            host = %config.host,
            dbname = %config.dbname,
            max_size = config.max_size,
            "Connected to PostgreSQL"
        );
        Ok(Self::new(pool))
    }

    /// Get the current pool size for observability.
    pub fn pool_size(&self) -> usize {
        self.pool.status().size
    }

    pub fn close(&self) {
        self.pool.close();
    }

    async fn get_conn(&self, operation: &str) -> StoreResult<Object> {
        self.pool
            .get()
            .await
            .map_err(|e| StoreError::connectivity(operation, e))
    }
}

#[async_trait]
impl RowStore for PgRowStore {
    async fn ping(&self) -> StoreResult<()> {
        let conn = self.get_conn("ping").await?;
        conn.simple_query("SELECT 1")
            .await
            .map_err(|e| StoreError::connectivity("ping", e))?;
        Ok(())
    }

    async fn order_exists(&self, order_uid: &str) -> StoreResult<bool> {
        const OP: &str = "order_exists";
        let conn = self.get_conn(OP).await?;
        let stmt = conn
            .prepare_cached(&self.sql.order_exists)
            .await
            .map_err(|e| StoreError::connectivity(OP, e))?;
        let row = conn
            .query_opt(&stmt, &[&order_uid])
            .await
            .map_err(|e| StoreError::connectivity(OP, e))?;
        Ok(row.is_some())
    }

    async fn upsert_content(&self, relation: Relation, values: Row) -> StoreResult<RowId> {
        let operation = format!("upsert {}", relation.table_name());
        let sql = self
            .sql
            .upsert(relation)
            .ok_or_else(|| not_content_addressed(&operation, relation))?;
        let conn = self.get_conn(&operation).await?;
        let stmt = conn
            .prepare_cached(sql)
            .await
            .map_err(|e| StoreError::connectivity(&operation, e))?;
        let row = conn
            .query_one(&stmt, &params(&values))
            .await
            .map_err(|e| StoreError::connectivity(&operation, e))?;
        row.try_get::<_, i64>(0)
            .map_err(|e| StoreError::connectivity(&operation, e))
    }

    async fn insert_order(&self, values: Row) -> StoreResult<bool> {
        const OP: &str = "insert_order";
        let conn = self.get_conn(OP).await?;
        let stmt = conn
            .prepare_cached(&self.sql.insert_order)
            .await
            .map_err(|e| StoreError::connectivity(OP, e))?;
        let inserted = conn
            .execute(&stmt, &params(&values))
            .await
            .map_err(|e| StoreError::connectivity(OP, e))?;
        Ok(inserted == 1)
    }

    async fn link_item(&self, order_uid: &str, item_id: RowId) -> StoreResult<bool> {
        const OP: &str = "link_item";
        let conn = self.get_conn(OP).await?;
        let stmt = conn
            .prepare_cached(&self.sql.link_item)
            .await
            .map_err(|e| StoreError::connectivity(OP, e))?;
        let inserted = conn
            .execute(&stmt, &[&order_uid, &item_id])
            .await
            .map_err(|e| StoreError::connectivity(OP, e))?;
        Ok(inserted == 1)
    }

    async fn fetch_order(&self, order_uid: &str) -> StoreResult<Option<Row>> {
        const OP: &str = "fetch_order";
        let conn = self.get_conn(OP).await?;
        let stmt = conn
            .prepare_cached(&self.sql.fetch_order)
            .await
            .map_err(|e| StoreError::connectivity(OP, e))?;
        let row = conn
            .query_opt(&stmt, &[&order_uid])
            .await
            .map_err(|e| StoreError::connectivity(OP, e))?;
        row.map(|r| decode_row(OP, &r, &self.root)).transpose()
    }

    async fn fetch_recent(&self, limit: usize) -> StoreResult<Vec<Row>> {
        const OP: &str = "fetch_recent";
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        let conn = self.get_conn(OP).await?;
        let stmt = conn
            .prepare_cached(&self.sql.fetch_recent)
            .await
            .map_err(|e| StoreError::connectivity(OP, e))?;
        let rows = conn
            .query(&stmt, &[&limit])
            .await
            .map_err(|e| StoreError::connectivity(OP, e))?;
        rows.iter()
            .map(|r| decode_row(OP, r, &self.root))
            .collect()
    }

    async fn fetch_content(&self, relation: Relation, id: RowId) -> StoreResult<Option<Row>> {
        let operation = format!("fetch {}", relation.table_name());
        let sql = self
            .sql
            .fetch_content(relation)
            .ok_or_else(|| not_content_addressed(&operation, relation))?;
        let conn = self.get_conn(&operation).await?;
        let stmt = conn
            .prepare_cached(sql)
            .await
            .map_err(|e| StoreError::connectivity(&operation, e))?;
        let row = conn
            .query_opt(&stmt, &[&id])
            .await
            .map_err(|e| StoreError::connectivity(&operation, e))?;
        row.map(|r| decode_row(&operation, &r, relation.columns()))
            .transpose()
    }

    async fn fetch_order_items(&self, order_uid: &str) -> StoreResult<Vec<Row>> {
        const OP: &str = "fetch_order_items";
        let conn = self.get_conn(OP).await?;
        let stmt = conn
            .prepare_cached(&self.sql.fetch_order_items)
            .await
            .map_err(|e| StoreError::connectivity(OP, e))?;
        let rows = conn
            .query(&stmt, &[&order_uid])
            .await
            .map_err(|e| StoreError::connectivity(OP, e))?;
        rows.iter()
            .map(|r| decode_row(OP, r, Item::COLUMNS))
            .collect()
    }
}
