//! Postgres-backed ledger store.
//!
//! Every mutating call runs in one transaction:
//!
//! 1. `lock_timeout` is set for the transaction from the configured lock wait
//! 2. existing stock rows are locked with `SELECT ... FOR UPDATE` in ascending key order
//! 3. the pure ledger logic decides the outcome from the locked quantities
//! 4. debits are written with a guarded `UPDATE`, credits with an upsert
//! 5. the transaction commits, or rolls back on any error
//!
//! ## Error Mapping
//!
//! | SQLx Error | PostgreSQL Error Code | StoreError | Scenario |
//! |------------|----------------------|------------|----------|
//! | Database | `55P03` | `Contention` | `lock_timeout` expired waiting for a row |
//! | Database | `40001` / `40P01` | `Contention` | Serialization failure or deadlock victim |
//! | Database | `23514` | `Unavailable` | Check constraint (`quantity >= 0`) tripped |
//! | Database (other) | Any other | `Unavailable` | Other database errors |
//! | PoolTimedOut | N/A | `Contention` | No connection free within the acquire timeout |
//! | Other | N/A | `Unavailable` | Network errors, pool closed, decode failures |

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, SubsecRound, Utc};
use sqlx::postgres::{PgPoolOptions, PgRow};
use sqlx::{PgPool, Postgres, Row, Transaction};
use tracing::{debug, instrument};
use uuid::Uuid;

use stockflow_core::{OrderId, PartyId, ProductId};
use stockflow_ledger::{
    Customer, LedgerError, LineSource, Order, OrderLine, OrderRequest, OrderStatus, Owner,
    StockAdjustment, StockEntry, StockKey, TransferReceipt, TransferRequest, allocate, order_number,
};

use super::r#trait::{LedgerStore, StoreError, clamp_lock_wait};
use crate::config::LedgerConfig;

type PgTransaction = Transaction<'static, Postgres>;

/// Reference DDL for the tables this store and `PostgresDirectory` read.
pub const SCHEMA: &str = include_str!("../../sql/schema.sql");

/// Open a connection pool sized from `config`.
pub async fn connect_pool(config: &LedgerConfig) -> Result<PgPool, StoreError> {
    let url = config
        .database_url
        .as_deref()
        .ok_or_else(|| StoreError::Unavailable("DATABASE_URL is not configured".to_string()))?;
    PgPoolOptions::new()
        .max_connections(config.max_connections)
        .connect(url)
        .await
        .map_err(|e| map_sqlx_error("connect", e))
}

/// Postgres-backed transactional ledger store.
///
/// Cloning is cheap; clones share the pool.
#[derive(Debug, Clone)]
pub struct PostgresLedgerStore {
    pool: PgPool,
    lock_wait: Duration,
}

impl PostgresLedgerStore {
    /// `lock_wait` is raised to at least [`MIN_LOCK_WAIT`](super::MIN_LOCK_WAIT)
    /// so the per-transaction `lock_timeout` is never zero.
    pub fn new(pool: PgPool, lock_wait: Duration) -> Self {
        Self {
            pool,
            lock_wait: clamp_lock_wait(lock_wait),
        }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    pub fn lock_wait(&self) -> Duration {
        self.lock_wait
    }

    fn lock_timeout_setting(&self) -> String {
        format!("{}ms", self.lock_wait.as_millis().max(1))
    }

    async fn begin(&self, operation: &str) -> Result<PgTransaction, StoreError> {
        let mut tx = self.pool.begin().await.map_err(|e| map_sqlx_error(operation, e))?;
        sqlx::query("SELECT set_config('lock_timeout', $1, true)")
            .bind(self.lock_timeout_setting())
            .execute(&mut *tx)
            .await
            .map_err(|e| map_sqlx_error(operation, e))?;
        Ok(tx)
    }

    /// Commit on success, roll back on failure.
    async fn finish<T>(
        &self,
        operation: &str,
        tx: PgTransaction,
        result: Result<T, StoreError>,
    ) -> Result<T, StoreError> {
        match result {
            Ok(value) => {
                tx.commit().await.map_err(|e| map_sqlx_error(operation, e))?;
                Ok(value)
            }
            Err(err) => {
                if let Err(rollback_err) = tx.rollback().await {
                    debug!(operation, error = %rollback_err, "rollback failed after error");
                }
                Err(err)
            }
        }
    }

    async fn load_order(&self, order_id: OrderId) -> Result<Option<Order>, StoreError> {
        let row = sqlx::query(ORDER_SELECT_BY_ID)
            .bind(order_id.as_uuid())
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| map_sqlx_error("order", e))?;
        let Some(row) = row else {
            return Ok(None);
        };
        let header = OrderRow::from_row(&row)?;
        let lines = sqlx::query(ORDER_LINES_SELECT)
            .bind(order_id.as_uuid())
            .fetch_all(&self.pool)
            .await
            .map_err(|e| map_sqlx_error("order", e))?;
        Ok(Some(header.into_order(order_lines(order_id, &lines)?)))
    }
}

const ORDER_SELECT_BY_ID: &str = r#"
    SELECT id, order_number, seller_id, distributor_id, customer_name, customer_email, total_amount, status, created_at
    FROM orders
    WHERE id = $1
"#;

const ORDER_LINES_SELECT: &str = r#"
    SELECT product_id, source, quantity, unit_price
    FROM order_lines
    WHERE order_id = $1
    ORDER BY line_no ASC
"#;

/// Lock a stock row if it exists. Absent rows are not locked; credits to
/// them go through an upsert that adds rather than overwrites.
async fn lock_quantity(tx: &mut PgTransaction, key: &StockKey) -> Result<Option<i64>, StoreError> {
    let row = sqlx::query(
        r#"
        SELECT quantity
        FROM stock_entries
        WHERE product_id = $1 AND owner_id = $2 AND owner_type = $3
        FOR UPDATE
        "#,
    )
    .bind(key.product_id.as_uuid())
    .bind(key.owner_id.as_uuid())
    .bind(key.owner_type.as_str())
    .fetch_optional(&mut **tx)
    .await
    .map_err(|e| map_sqlx_error("lock_row", e))?;

    row.map(|r| r.try_get::<i64, _>("quantity"))
        .transpose()
        .map_err(|e| StoreError::Unavailable(format!("failed to decode stock row {key}: {e}")))
}

/// Subtract `quantity` from a locked row. The guard on `quantity >= $4`
/// turns any drift into an error instead of a negative balance.
async fn debit(tx: &mut PgTransaction, key: &StockKey, quantity: i64) -> Result<i64, StoreError> {
    let row = sqlx::query(
        r#"
        UPDATE stock_entries
        SET quantity = quantity - $4, updated_at = NOW()
        WHERE product_id = $1 AND owner_id = $2 AND owner_type = $3 AND quantity >= $4
        RETURNING quantity
        "#,
    )
    .bind(key.product_id.as_uuid())
    .bind(key.owner_id.as_uuid())
    .bind(key.owner_type.as_str())
    .bind(quantity)
    .fetch_optional(&mut **tx)
    .await
    .map_err(|e| map_sqlx_error("debit", e))?;

    match row {
        Some(row) => row
            .try_get::<i64, _>("quantity")
            .map_err(|e| StoreError::Unavailable(format!("failed to decode stock row {key}: {e}"))),
        None => Err(StoreError::Unavailable(format!("stock row {key} changed while locked"))),
    }
}

/// Add `quantity` to a row, creating it when absent.
async fn credit(tx: &mut PgTransaction, key: &StockKey, quantity: i64) -> Result<i64, StoreError> {
    let row = sqlx::query(
        r#"
        INSERT INTO stock_entries (product_id, owner_id, owner_type, quantity)
        VALUES ($1, $2, $3, $4)
        ON CONFLICT (product_id, owner_id, owner_type)
        DO UPDATE SET quantity = stock_entries.quantity + EXCLUDED.quantity, updated_at = NOW()
        RETURNING quantity
        "#,
    )
    .bind(key.product_id.as_uuid())
    .bind(key.owner_id.as_uuid())
    .bind(key.owner_type.as_str())
    .bind(quantity)
    .fetch_one(&mut **tx)
    .await
    .map_err(|e| map_sqlx_error("credit", e))?;

    row.try_get::<i64, _>("quantity")
        .map_err(|e| StoreError::Unavailable(format!("failed to decode stock row {key}: {e}")))
}

fn to_db_amount(value: u64, what: &str) -> Result<i64, StoreError> {
    i64::try_from(value).map_err(|_| StoreError::Ledger(LedgerError::validation(format!("{what} exceeds storage range"))))
}

fn from_db_amount(value: i64, what: &str) -> Result<u64, StoreError> {
    u64::try_from(value).map_err(|_| StoreError::Unavailable(format!("negative {what} in storage")))
}

async fn adjust_in_tx(tx: &mut PgTransaction, adjustment: &StockAdjustment) -> Result<StockEntry, StoreError> {
    let key = adjustment.key;
    let current = lock_quantity(tx, &key).await?.unwrap_or(0);
    adjustment.apply_to(current)?;
    let quantity = if adjustment.delta > 0 {
        credit(tx, &key, adjustment.delta).await?
    } else {
        debit(tx, &key, adjustment.delta.saturating_neg()).await?
    };
    Ok(StockEntry { key, quantity })
}

async fn transfer_in_tx(tx: &mut PgTransaction, request: &TransferRequest) -> Result<TransferReceipt, StoreError> {
    let source = request.source_key();
    let destination = request.destination_key();

    let mut keys = [source, destination];
    keys.sort();
    let mut source_on_hand = 0;
    let mut destination_on_hand = 0;
    for key in &keys {
        let quantity = lock_quantity(tx, key).await?.unwrap_or(0);
        if *key == source {
            source_on_hand = quantity;
        } else {
            destination_on_hand = quantity;
        }
    }

    let plan = request.plan(source_on_hand, destination_on_hand)?;
    let mut receipt = plan.receipt();
    receipt.source_quantity = debit(tx, &source, plan.quantity).await?;
    receipt.destination_quantity = credit(tx, &destination, plan.quantity).await?;
    Ok(receipt)
}

async fn place_order_in_tx(tx: &mut PgTransaction, request: &OrderRequest) -> Result<Order, StoreError> {
    let mut on_hand = std::collections::BTreeMap::new();
    for key in request.stock_keys() {
        if let Some(quantity) = lock_quantity(tx, &key).await? {
            on_hand.insert(key, quantity);
        }
    }

    let allocation = allocate(request, &on_hand)?;
    for entry in &allocation.debits {
        debit(tx, &entry.key, entry.quantity).await?;
    }

    let id = OrderId::new();
    let created_at = Utc::now().trunc_subsecs(6);
    let number = order_number(id, created_at);

    sqlx::query(
        r#"
        INSERT INTO orders (id, order_number, seller_id, distributor_id, customer_name, customer_email, total_amount, status, created_at, updated_at)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $9)
        "#,
    )
    .bind(id.as_uuid())
    .bind(&number)
    .bind(request.seller_id.as_uuid())
    .bind(request.distributor_id.as_uuid())
    .bind(&request.customer.name)
    .bind(request.customer.email.as_deref())
    .bind(to_db_amount(allocation.total_amount, "order total")?)
    .bind(OrderStatus::Fulfilled.as_str())
    .bind(created_at)
    .execute(&mut **tx)
    .await
    .map_err(|e| map_sqlx_error("insert_order", e))?;

    let mut lines = Vec::with_capacity(allocation.lines.len());
    for (line_no, line) in allocation.lines.iter().enumerate() {
        sqlx::query(
            r#"
            INSERT INTO order_lines (order_id, line_no, product_id, source, quantity, unit_price)
            VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(id.as_uuid())
        .bind(line_no as i32)
        .bind(line.product_id.as_uuid())
        .bind(line.source.as_str())
        .bind(line.quantity)
        .bind(to_db_amount(line.unit_price, "unit price")?)
        .execute(&mut **tx)
        .await
        .map_err(|e| map_sqlx_error("insert_order_line", e))?;

        lines.push(OrderLine {
            order_id: id,
            product_id: line.product_id,
            quantity: line.quantity,
            unit_price: line.unit_price,
            source: line.source,
        });
    }

    Ok(Order {
        id,
        order_number: number,
        seller_id: request.seller_id,
        distributor_id: request.distributor_id,
        customer: request.customer.clone(),
        total_amount: allocation.total_amount,
        status: OrderStatus::Fulfilled,
        created_at,
        lines,
    })
}

#[async_trait]
impl LedgerStore for PostgresLedgerStore {
    #[instrument(skip(self), fields(row = %adjustment.key, delta = adjustment.delta), err)]
    async fn adjust(&self, adjustment: &StockAdjustment) -> Result<StockEntry, StoreError> {
        adjustment.validate()?;
        let mut tx = self.begin("adjust").await?;
        let result = adjust_in_tx(&mut tx, adjustment).await;
        self.finish("adjust", tx, result).await
    }

    #[instrument(
        skip(self, request),
        fields(product_id = %request.product_id, from = %request.from.id, to = %request.to.id, quantity = request.quantity),
        err
    )]
    async fn transfer(&self, request: &TransferRequest) -> Result<TransferReceipt, StoreError> {
        request.validate()?;
        let mut tx = self.begin("transfer").await?;
        let result = transfer_in_tx(&mut tx, request).await;
        self.finish("transfer", tx, result).await
    }

    #[instrument(skip(self, request), fields(seller_id = %request.seller_id, line_count = request.lines.len()), err)]
    async fn place_order(&self, request: &OrderRequest) -> Result<Order, StoreError> {
        request.validate()?;
        let mut tx = self.begin("place_order").await?;
        let result = place_order_in_tx(&mut tx, request).await;
        self.finish("place_order", tx, result).await
    }

    async fn quantity(&self, key: &StockKey) -> Result<i64, StoreError> {
        let row = sqlx::query(
            r#"
            SELECT quantity
            FROM stock_entries
            WHERE product_id = $1 AND owner_id = $2 AND owner_type = $3
            "#,
        )
        .bind(key.product_id.as_uuid())
        .bind(key.owner_id.as_uuid())
        .bind(key.owner_type.as_str())
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("quantity", e))?;

        match row {
            Some(row) => row
                .try_get::<i64, _>("quantity")
                .map_err(|e| StoreError::Unavailable(format!("failed to decode stock row {key}: {e}"))),
            None => Ok(0),
        }
    }

    async fn stock_of(&self, owner: Owner) -> Result<Vec<StockEntry>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT product_id, quantity
            FROM stock_entries
            WHERE owner_id = $1 AND owner_type = $2
            ORDER BY product_id ASC
            "#,
        )
        .bind(owner.id.as_uuid())
        .bind(owner.role.as_str())
        .fetch_all(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("stock_of", e))?;

        let mut entries = Vec::with_capacity(rows.len());
        for row in rows {
            let decode = |e: sqlx::Error| StoreError::Unavailable(format!("failed to decode stock row: {e}"));
            let product_id = ProductId::from_uuid(row.try_get::<Uuid, _>("product_id").map_err(decode)?);
            entries.push(StockEntry {
                key: owner.stock_key(product_id),
                quantity: row.try_get("quantity").map_err(decode)?,
            });
        }
        entries.sort_by(|a, b| a.key.cmp(&b.key));
        Ok(entries)
    }

    async fn order(&self, order_id: OrderId) -> Result<Option<Order>, StoreError> {
        self.load_order(order_id).await
    }

    async fn orders_for_seller(&self, seller_id: PartyId) -> Result<Vec<Order>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT id, order_number, seller_id, distributor_id, customer_name, customer_email, total_amount, status, created_at
            FROM orders
            WHERE seller_id = $1
            ORDER BY created_at DESC, id DESC
            "#,
        )
        .bind(seller_id.as_uuid())
        .fetch_all(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("orders_for_seller", e))?;

        let mut orders = Vec::with_capacity(rows.len());
        for row in rows {
            let header = OrderRow::from_row(&row)?;
            let lines = sqlx::query(ORDER_LINES_SELECT)
                .bind(header.id.as_uuid())
                .fetch_all(&self.pool)
                .await
                .map_err(|e| map_sqlx_error("orders_for_seller", e))?;
            let lines = order_lines(header.id, &lines)?;
            orders.push(header.into_order(lines));
        }
        Ok(orders)
    }
}

/// Order header as stored.
struct OrderRow {
    id: OrderId,
    order_number: String,
    seller_id: PartyId,
    distributor_id: PartyId,
    customer_name: String,
    customer_email: Option<String>,
    total_amount: u64,
    status: OrderStatus,
    created_at: DateTime<Utc>,
}

impl OrderRow {
    fn from_row(row: &PgRow) -> Result<Self, StoreError> {
        let decode = |e: sqlx::Error| StoreError::Unavailable(format!("failed to decode order row: {e}"));
        let status: String = row.try_get("status").map_err(decode)?;
        Ok(Self {
            id: OrderId::from_uuid(row.try_get("id").map_err(decode)?),
            order_number: row.try_get("order_number").map_err(decode)?,
            seller_id: PartyId::from_uuid(row.try_get("seller_id").map_err(decode)?),
            distributor_id: PartyId::from_uuid(row.try_get("distributor_id").map_err(decode)?),
            customer_name: row.try_get("customer_name").map_err(decode)?,
            customer_email: row.try_get("customer_email").map_err(decode)?,
            total_amount: from_db_amount(row.try_get("total_amount").map_err(decode)?, "order total")?,
            status: OrderStatus::parse(&status)
                .ok_or_else(|| StoreError::Unavailable(format!("unknown order status in storage: {status}")))?,
            created_at: row.try_get("created_at").map_err(decode)?,
        })
    }

    fn into_order(self, lines: Vec<OrderLine>) -> Order {
        Order {
            id: self.id,
            order_number: self.order_number,
            seller_id: self.seller_id,
            distributor_id: self.distributor_id,
            customer: Customer::new(self.customer_name, self.customer_email),
            total_amount: self.total_amount,
            status: self.status,
            created_at: self.created_at,
            lines,
        }
    }
}

fn order_lines(order_id: OrderId, rows: &[PgRow]) -> Result<Vec<OrderLine>, StoreError> {
    let decode = |e: sqlx::Error| StoreError::Unavailable(format!("failed to decode order line: {e}"));
    rows.iter()
        .map(|row| {
            let source: String = row.try_get("source").map_err(decode)?;
            Ok(OrderLine {
                order_id,
                product_id: ProductId::from_uuid(row.try_get("product_id").map_err(decode)?),
                quantity: row.try_get("quantity").map_err(decode)?,
                unit_price: from_db_amount(row.try_get("unit_price").map_err(decode)?, "unit price")?,
                source: LineSource::parse(&source)
                    .ok_or_else(|| StoreError::Unavailable(format!("unknown line source in storage: {source}")))?,
            })
        })
        .collect()
}

/// Map a SQLx error to a `StoreError`.
///
/// Lock waits and serialization conflicts are contention (retryable);
/// everything else means storage could not do its job.
pub(crate) fn map_sqlx_error(operation: &str, err: sqlx::Error) -> StoreError {
    match err {
        sqlx::Error::Database(db_err) => {
            let msg = format!("database error in {}: {}", operation, db_err.message());
            match db_err.code().as_deref() {
                // lock_not_available
                Some("55P03") => StoreError::Contention(msg),
                // serialization_failure, deadlock_detected
                Some("40001") | Some("40P01") => StoreError::Contention(msg),
                _ => StoreError::Unavailable(msg),
            }
        }
        sqlx::Error::PoolTimedOut => {
            StoreError::Contention(format!("timed out acquiring a connection in {}", operation))
        }
        sqlx::Error::PoolClosed => {
            StoreError::Unavailable(format!("connection pool closed in {}", operation))
        }
        other => StoreError::Unavailable(format!("database error in {}: {}", operation, other)),
    }
}
