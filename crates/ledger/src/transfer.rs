use serde::{Deserialize, Serialize};

use stockflow_core::{PartyId, PartyRole, ProductId};

use crate::error::LedgerError;
use crate::stock::{StockKey, apply_delta};

/// A stock-holding party in a specific role.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Owner {
    pub id: PartyId,
    pub role: PartyRole,
}

impl Owner {
    pub fn new(id: PartyId, role: PartyRole) -> Self {
        Self { id, role }
    }

    pub fn manufacturer(id: PartyId) -> Self {
        Self::new(id, PartyRole::Manufacturer)
    }

    pub fn distributor(id: PartyId) -> Self {
        Self::new(id, PartyRole::Distributor)
    }

    pub fn seller(id: PartyId) -> Self {
        Self::new(id, PartyRole::Seller)
    }

    pub fn stock_key(&self, product_id: ProductId) -> StockKey {
        StockKey::new(product_id, self.id, self.role)
    }
}

/// Legal movements between adjacent tiers. Stock only flows downstream.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Route {
    ManufacturerToDistributor,
    DistributorToSeller,
}

impl Route {
    pub fn between(from: PartyRole, to: PartyRole) -> Result<Self, LedgerError> {
        match (from, to) {
            (PartyRole::Manufacturer, PartyRole::Distributor) => Ok(Route::ManufacturerToDistributor),
            (PartyRole::Distributor, PartyRole::Seller) => Ok(Route::DistributorToSeller),
            (from, to) => Err(LedgerError::invalid_route(format!(
                "stock cannot move from {from} to {to}"
            ))),
        }
    }
}

/// Command: move `quantity` of a product from one owner to another.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferRequest {
    pub product_id: ProductId,
    pub from: Owner,
    pub to: Owner,
    pub quantity: i64,
}

impl TransferRequest {
    pub fn new(product_id: ProductId, from: Owner, to: Owner, quantity: i64) -> Self {
        Self {
            product_id,
            from,
            to,
            quantity,
        }
    }

    /// Check the request shape and return the route it follows.
    pub fn validate(&self) -> Result<Route, LedgerError> {
        if self.quantity <= 0 {
            return Err(LedgerError::validation("transfer quantity must be positive"));
        }
        if self.from.id == self.to.id {
            return Err(LedgerError::invalid_route("source and destination are the same party"));
        }
        Route::between(self.from.role, self.to.role)
    }

    pub fn source_key(&self) -> StockKey {
        self.from.stock_key(self.product_id)
    }

    pub fn destination_key(&self) -> StockKey {
        self.to.stock_key(self.product_id)
    }

    /// Decide the quantities to write given the locked on-hand values.
    ///
    /// The source is checked first; when it cannot cover the transfer the
    /// destination is never considered.
    pub fn plan(&self, source_on_hand: i64, destination_on_hand: i64) -> Result<TransferPlan, LedgerError> {
        self.validate()?;
        let source_after = apply_delta(self.product_id, source_on_hand, -self.quantity)?;
        let destination_after = apply_delta(self.product_id, destination_on_hand, self.quantity)?;
        Ok(TransferPlan {
            source: self.source_key(),
            destination: self.destination_key(),
            quantity: self.quantity,
            source_after,
            destination_after,
        })
    }
}

/// Row values a backend must write, together, to commit a transfer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferPlan {
    pub source: StockKey,
    pub destination: StockKey,
    pub quantity: i64,
    pub source_after: i64,
    pub destination_after: i64,
}

impl TransferPlan {
    pub fn receipt(&self) -> TransferReceipt {
        TransferReceipt {
            product_id: self.source.product_id,
            from: Owner::new(self.source.owner_id, self.source.owner_type),
            to: Owner::new(self.destination.owner_id, self.destination.owner_type),
            quantity: self.quantity,
            source_quantity: self.source_after,
            destination_quantity: self.destination_after,
        }
    }
}

/// Committed transfer, with the resulting quantities on both sides.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferReceipt {
    pub product_id: ProductId,
    pub from: Owner,
    pub to: Owner,
    pub quantity: i64,
    pub source_quantity: i64,
    pub destination_quantity: i64,
}
