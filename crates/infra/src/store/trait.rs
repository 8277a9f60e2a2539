use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

use stockflow_core::{OrderId, PartyId};
use stockflow_ledger::{
    LedgerError, Order, OrderRequest, Owner, StockAdjustment, StockEntry, StockKey,
    TransferReceipt, TransferRequest,
};

/// Errors surfaced by a storage backend.
///
/// Business rejections decided while the rows were locked travel as
/// `Ledger`; everything else is about the storage itself.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error(transparent)]
    Ledger(#[from] LedgerError),

    /// A row lock could not be acquired within the configured wait.
    #[error("lock contention: {0}")]
    Contention(String),

    #[error("storage unavailable: {0}")]
    Unavailable(String),
}

impl StoreError {
    pub fn is_contention(&self) -> bool {
        matches!(self, StoreError::Contention(_))
    }
}

/// Shortest row-lock wait a backend will use.
pub const MIN_LOCK_WAIT: Duration = Duration::from_millis(1);

/// Raise `lock_wait` to at least [`MIN_LOCK_WAIT`]. Postgres reads a zero
/// `lock_timeout` as "wait forever".
pub fn clamp_lock_wait(lock_wait: Duration) -> Duration {
    lock_wait.max(MIN_LOCK_WAIT)
}

/// Transactional stock storage.
///
/// Every mutating call is atomic: either all of its row changes (and order
/// records) become visible, or none do. Implementations lock the rows a call
/// touches in ascending `StockKey` order.
#[async_trait]
pub trait LedgerStore: Send + Sync {
    /// Apply a signed delta to one stock row, creating it on first credit.
    async fn adjust(&self, adjustment: &StockAdjustment) -> Result<StockEntry, StoreError>;

    /// Move stock between two rows. Route and assignment checks happen
    /// before this call; the store only enforces quantities.
    async fn transfer(&self, request: &TransferRequest) -> Result<TransferReceipt, StoreError>;

    /// Allocate and persist a fulfilled order, debiting seller stock first
    /// and the assigned distributor for any shortfall.
    async fn place_order(&self, request: &OrderRequest) -> Result<Order, StoreError>;

    /// Current quantity for a row; absent rows read as zero.
    async fn quantity(&self, key: &StockKey) -> Result<i64, StoreError>;

    /// All rows held by `owner`, ordered by key.
    async fn stock_of(&self, owner: Owner) -> Result<Vec<StockEntry>, StoreError>;

    async fn order(&self, order_id: OrderId) -> Result<Option<Order>, StoreError>;

    /// Orders placed by a seller, newest first.
    async fn orders_for_seller(&self, seller_id: PartyId) -> Result<Vec<Order>, StoreError>;
}

#[async_trait]
impl<S> LedgerStore for Arc<S>
where
    S: LedgerStore + ?Sized,
{
    async fn adjust(&self, adjustment: &StockAdjustment) -> Result<StockEntry, StoreError> {
        (**self).adjust(adjustment).await
    }

    async fn transfer(&self, request: &TransferRequest) -> Result<TransferReceipt, StoreError> {
        (**self).transfer(request).await
    }

    async fn place_order(&self, request: &OrderRequest) -> Result<Order, StoreError> {
        (**self).place_order(request).await
    }

    async fn quantity(&self, key: &StockKey) -> Result<i64, StoreError> {
        (**self).quantity(key).await
    }

    async fn stock_of(&self, owner: Owner) -> Result<Vec<StockEntry>, StoreError> {
        (**self).stock_of(owner).await
    }

    async fn order(&self, order_id: OrderId) -> Result<Option<Order>, StoreError> {
        (**self).order(order_id).await
    }

    async fn orders_for_seller(&self, seller_id: PartyId) -> Result<Vec<Order>, StoreError> {
        (**self).orders_for_seller(seller_id).await
    }
}
