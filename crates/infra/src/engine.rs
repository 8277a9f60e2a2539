//! Ledger engine: the caller-facing `adjust` / `transfer` / `place_order`
//! calls plus read queries.
//!
//! ```text
//! RequestContext + request
//!   ↓
//! 1. Validate request shape (pure, no locks)
//!   ↓
//! 2. Check identity against the RequestContext
//!   ↓
//! 3. Check routes / assignments against the Directory
//!   ↓
//! 4. Run the store transaction, retrying on lock contention
//!   ↓
//! 5. Map the outcome into EngineError / OutcomeKind and log it
//! ```
//!
//! The engine holds no state of its own; all consistency comes from the
//! store's transactions.

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{error, info, instrument, warn};

use stockflow_core::{OrderId, PartyId, PartyRole, ProductId, RequestContext};
use stockflow_directory::{Directory, DirectoryError};
use stockflow_ledger::{
    LedgerError, Order, OrderRequest, Owner, Route, StockAdjustment, StockEntry, TransferReceipt,
    TransferRequest,
};

use crate::retry::RetryPolicy;
use crate::store::{LedgerStore, StoreError};

/// Outcome tag attached to every engine call.
///
/// Each `EngineError` maps to exactly one kind, so an outer layer can map
/// kinds to status codes without losing information.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutcomeKind {
    Success,
    InsufficientStock,
    InvalidRoute,
    InvalidAssignment,
    InvalidRequest,
    NotFound,
    Unauthorized,
    Transient,
    StorageFailure,
}

impl OutcomeKind {
    pub fn of<T>(result: &Result<T, EngineError>) -> Self {
        match result {
            Ok(_) => OutcomeKind::Success,
            Err(err) => err.kind(),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            OutcomeKind::Success => "success",
            OutcomeKind::InsufficientStock => "insufficient_stock",
            OutcomeKind::InvalidRoute => "invalid_route",
            OutcomeKind::InvalidAssignment => "invalid_assignment",
            OutcomeKind::InvalidRequest => "invalid_request",
            OutcomeKind::NotFound => "not_found",
            OutcomeKind::Unauthorized => "unauthorized",
            OutcomeKind::Transient => "transient",
            OutcomeKind::StorageFailure => "storage_failure",
        }
    }
}

impl core::fmt::Display for OutcomeKind {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum EngineError {
    /// Recoverable: the caller may retry with a smaller quantity.
    #[error("insufficient stock for product {product_id}: requested {requested}, available {available}")]
    InsufficientStock {
        product_id: ProductId,
        requested: i64,
        available: i64,
    },

    #[error("invalid route: {0}")]
    InvalidRoute(String),

    #[error("invalid assignment: {0}")]
    InvalidAssignment(String),

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("unauthorized: {0}")]
    Unauthorized(String),

    /// Lock contention persisted through every retry. Safe to retry later.
    #[error("transient contention: {0}")]
    TransientContention(String),

    /// Storage could not complete the call; nothing was committed.
    #[error("storage failure: {0}")]
    StorageFailure(String),
}

impl EngineError {
    pub fn kind(&self) -> OutcomeKind {
        match self {
            EngineError::InsufficientStock { .. } => OutcomeKind::InsufficientStock,
            EngineError::InvalidRoute(_) => OutcomeKind::InvalidRoute,
            EngineError::InvalidAssignment(_) => OutcomeKind::InvalidAssignment,
            EngineError::InvalidRequest(_) => OutcomeKind::InvalidRequest,
            EngineError::NotFound(_) => OutcomeKind::NotFound,
            EngineError::Unauthorized(_) => OutcomeKind::Unauthorized,
            EngineError::TransientContention(_) => OutcomeKind::Transient,
            EngineError::StorageFailure(_) => OutcomeKind::StorageFailure,
        }
    }

    /// Only contention is worth retrying unchanged.
    pub fn is_retryable(&self) -> bool {
        matches!(self, EngineError::TransientContention(_))
    }

    fn unauthorized(msg: impl Into<String>) -> Self {
        EngineError::Unauthorized(msg.into())
    }
}

impl From<LedgerError> for EngineError {
    fn from(value: LedgerError) -> Self {
        match value {
            LedgerError::InsufficientStock {
                product_id,
                requested,
                available,
            } => EngineError::InsufficientStock {
                product_id,
                requested,
                available,
            },
            LedgerError::InvalidRoute(msg) => EngineError::InvalidRoute(msg),
            err @ LedgerError::InvalidAssignment { .. } => EngineError::InvalidAssignment(err.to_string()),
            LedgerError::Validation(msg) => EngineError::InvalidRequest(msg),
        }
    }
}

impl From<StoreError> for EngineError {
    fn from(value: StoreError) -> Self {
        match value {
            StoreError::Ledger(err) => err.into(),
            StoreError::Contention(msg) => EngineError::TransientContention(msg),
            StoreError::Unavailable(msg) => EngineError::StorageFailure(msg),
        }
    }
}

impl From<DirectoryError> for EngineError {
    fn from(value: DirectoryError) -> Self {
        match value {
            err @ DirectoryError::NotAssigned(_) => EngineError::InvalidAssignment(err.to_string()),
            err @ DirectoryError::UnknownProduct(_) => EngineError::InvalidRequest(err.to_string()),
            DirectoryError::Storage(msg) => EngineError::StorageFailure(msg),
        }
    }
}

fn record_outcome<T>(operation: &'static str, result: &Result<T, EngineError>) {
    match result {
        Ok(_) => info!(operation, outcome = %OutcomeKind::Success, "ledger call committed"),
        Err(err @ EngineError::StorageFailure(_)) => {
            error!(operation, outcome = %err.kind(), error = %err, "ledger call failed")
        }
        Err(err) => warn!(operation, outcome = %err.kind(), error = %err, "ledger call rejected"),
    }
}

/// Entry point for stock mutations and queries.
///
/// ## Generic Parameters
///
/// - `S`: storage backend (`InMemoryLedgerStore`, `PostgresLedgerStore`, or an `Arc` of either)
/// - `D`: directory of products and distributor/seller assignments
#[derive(Debug)]
pub struct LedgerEngine<S, D> {
    store: S,
    directory: D,
    retry: RetryPolicy,
}

impl<S, D> LedgerEngine<S, D>
where
    S: LedgerStore,
    D: Directory,
{
    pub fn new(store: S, directory: D) -> Self {
        Self {
            store,
            directory,
            retry: RetryPolicy::default(),
        }
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn directory(&self) -> &D {
        &self.directory
    }

    /// Apply a signed delta to the actor's own stock of a product.
    ///
    /// Manufacturers may only adjust products they make.
    #[instrument(
        skip(self, ctx),
        fields(actor = %ctx.actor, role = %ctx.role, product_id = %product_id, owner = %owner.id)
    )]
    pub async fn adjust(
        &self,
        ctx: &RequestContext,
        product_id: ProductId,
        owner: Owner,
        delta: i64,
    ) -> Result<StockEntry, EngineError> {
        let result = self.adjust_inner(ctx, product_id, owner, delta).await;
        record_outcome("adjust", &result);
        result
    }

    async fn adjust_inner(
        &self,
        ctx: &RequestContext,
        product_id: ProductId,
        owner: Owner,
        delta: i64,
    ) -> Result<StockEntry, EngineError> {
        let adjustment = StockAdjustment::new(owner.stock_key(product_id), delta);
        adjustment.validate()?;

        if !ctx.is(owner.id, owner.role) {
            return Err(EngineError::unauthorized(format!(
                "{} {} cannot adjust stock held by {} {}",
                ctx.role, ctx.actor, owner.role, owner.id
            )));
        }

        let manufacturer = self.directory.manufacturer_of(product_id).await?;
        if owner.role == PartyRole::Manufacturer && manufacturer != owner.id {
            return Err(EngineError::unauthorized(format!(
                "product {product_id} is not made by manufacturer {}",
                owner.id
            )));
        }

        Ok(self.retry.run("adjust", || self.store.adjust(&adjustment)).await?)
    }

    /// Move stock one tier down the chain.
    #[instrument(
        skip(self, ctx, request),
        fields(
            actor = %ctx.actor,
            role = %ctx.role,
            product_id = %request.product_id,
            from = %request.from.id,
            to = %request.to.id,
            quantity = request.quantity
        )
    )]
    pub async fn transfer(&self, ctx: &RequestContext, request: TransferRequest) -> Result<TransferReceipt, EngineError> {
        let result = self.transfer_inner(ctx, &request).await;
        record_outcome("transfer", &result);
        result
    }

    async fn transfer_inner(&self, ctx: &RequestContext, request: &TransferRequest) -> Result<TransferReceipt, EngineError> {
        let route = request.validate()?;

        if !ctx.is(request.from.id, request.from.role) && !ctx.is(request.to.id, request.to.role) {
            return Err(EngineError::unauthorized(format!(
                "{} {} is not a party to this transfer",
                ctx.role, ctx.actor
            )));
        }

        match route {
            Route::ManufacturerToDistributor => {
                let manufacturer = self.directory.manufacturer_of(request.product_id).await?;
                if manufacturer != request.from.id {
                    return Err(LedgerError::invalid_route(format!(
                        "product {} is not made by manufacturer {}",
                        request.product_id, request.from.id
                    ))
                    .into());
                }
            }
            Route::DistributorToSeller => {
                self.directory.product(request.product_id).await?;
                self.check_assignment(request.to.id, request.from.id).await?;
            }
        }

        Ok(self.retry.run("transfer", || self.store.transfer(request)).await?)
    }

    /// Place a customer order at a seller, sourcing each line from the
    /// seller's stock first and the assigned distributor for the rest.
    #[instrument(
        skip(self, ctx, request),
        fields(
            actor = %ctx.actor,
            seller_id = %request.seller_id,
            distributor_id = %request.distributor_id,
            line_count = request.lines.len()
        )
    )]
    pub async fn place_order(&self, ctx: &RequestContext, request: OrderRequest) -> Result<Order, EngineError> {
        let result = self.place_order_inner(ctx, &request).await;
        if let Ok(order) = &result {
            info!(order_id = %order.id, order_number = %order.order_number, total_amount = order.total_amount, "order placed");
        }
        record_outcome("place_order", &result);
        result
    }

    async fn place_order_inner(&self, ctx: &RequestContext, request: &OrderRequest) -> Result<Order, EngineError> {
        request.validate()?;

        if !ctx.is(request.seller_id, PartyRole::Seller) {
            return Err(EngineError::unauthorized(format!(
                "{} {} cannot place orders for seller {}",
                ctx.role, ctx.actor, request.seller_id
            )));
        }

        self.check_assignment(request.seller_id, request.distributor_id).await?;
        for line in &request.lines {
            self.directory.product(line.product_id).await?;
        }

        Ok(self.retry.run("place_order", || self.store.place_order(request)).await?)
    }

    async fn check_assignment(&self, seller_id: PartyId, distributor_id: PartyId) -> Result<(), EngineError> {
        let assigned = match self.directory.assigned_distributor(seller_id).await {
            Ok(assigned) => assigned,
            Err(DirectoryError::NotAssigned(_)) => {
                return Err(LedgerError::InvalidAssignment {
                    seller_id,
                    distributor_id,
                }
                .into());
            }
            Err(err) => return Err(err.into()),
        };
        if assigned != distributor_id {
            return Err(LedgerError::InvalidAssignment {
                seller_id,
                distributor_id,
            }
            .into());
        }
        Ok(())
    }

    pub async fn quantity(&self, product_id: ProductId, owner: Owner) -> Result<i64, EngineError> {
        let key = owner.stock_key(product_id);
        Ok(self.retry.run("quantity", || self.store.quantity(&key)).await?)
    }

    pub async fn stock_of(&self, owner: Owner) -> Result<Vec<StockEntry>, EngineError> {
        Ok(self.retry.run("stock_of", || self.store.stock_of(owner)).await?)
    }

    pub async fn order(&self, order_id: OrderId) -> Result<Order, EngineError> {
        self.store
            .order(order_id)
            .await?
            .ok_or_else(|| EngineError::NotFound(format!("order {order_id}")))
    }

    pub async fn orders_for_seller(&self, seller_id: PartyId) -> Result<Vec<Order>, EngineError> {
        Ok(self.store.orders_for_seller(seller_id).await?)
    }
}
