use thiserror::Error;

use stockflow_core::{PartyId, ProductId};

/// Deterministic business failure of a ledger operation.
///
/// Every variant means the request was rejected as a whole; nothing it
/// touched may be written.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum LedgerError {
    /// Not enough stock to cover the requested debit. Callers may retry with a
    /// smaller quantity.
    #[error("insufficient stock for product {product_id}: requested {requested}, available {available}")]
    InsufficientStock {
        product_id: ProductId,
        requested: i64,
        available: i64,
    },

    /// The transfer does not follow a legal supply-chain route.
    #[error("invalid route: {0}")]
    InvalidRoute(String),

    /// The seller does not order from the named distributor.
    #[error("seller {seller_id} is not assigned to distributor {distributor_id}")]
    InvalidAssignment {
        seller_id: PartyId,
        distributor_id: PartyId,
    },

    /// Malformed request (non-positive quantity, empty order, overflow, ...).
    #[error("validation failed: {0}")]
    Validation(String),
}

impl LedgerError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn invalid_route(msg: impl Into<String>) -> Self {
        Self::InvalidRoute(msg.into())
    }
}
