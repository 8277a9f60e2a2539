use serde::{Deserialize, Serialize};

use stockflow_core::{PartyId, PartyRole, ProductId};

use crate::error::LedgerError;

/// Address of one stock row: (product, owner id, owner type).
///
/// The derived ordering (product first, then owner) is the global order in
/// which backends acquire row locks, so two transactions touching the same
/// rows can never wait on each other in a cycle.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct StockKey {
    pub product_id: ProductId,
    pub owner_id: PartyId,
    pub owner_type: PartyRole,
}

impl StockKey {
    pub fn new(product_id: ProductId, owner_id: PartyId, owner_type: PartyRole) -> Self {
        Self {
            product_id,
            owner_id,
            owner_type,
        }
    }
}

impl core::fmt::Display for StockKey {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{}@{}:{}", self.product_id, self.owner_type, self.owner_id)
    }
}

/// Materialized stock row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockEntry {
    pub key: StockKey,
    pub quantity: i64,
}

/// Signed change to a single stock row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockAdjustment {
    pub key: StockKey,
    pub delta: i64,
}

impl StockAdjustment {
    pub fn new(key: StockKey, delta: i64) -> Self {
        Self { key, delta }
    }

    pub fn validate(&self) -> Result<(), LedgerError> {
        if self.delta == 0 {
            return Err(LedgerError::validation("delta cannot be zero"));
        }
        Ok(())
    }

    /// Quantity after applying this adjustment to `current`.
    ///
    /// A row that does not exist yet has `current == 0`; the caller upserts it.
    pub fn apply_to(&self, current: i64) -> Result<i64, LedgerError> {
        apply_delta(self.key.product_id, current, self.delta)
    }
}

/// Apply `delta` to `current`, refusing any result below zero.
///
/// The check and the arithmetic happen together so the returned value is the
/// one that must be written; callers hold the row lock across read and write.
pub fn apply_delta(product_id: ProductId, current: i64, delta: i64) -> Result<i64, LedgerError> {
    let next = current
        .checked_add(delta)
        .ok_or_else(|| LedgerError::validation("stock quantity overflow"))?;
    if next < 0 {
        return Err(LedgerError::InsufficientStock {
            product_id,
            requested: delta.saturating_neg(),
            available: current,
        });
    }
    Ok(next)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn test_key() -> StockKey {
        StockKey::new(ProductId::new(), PartyId::new(), PartyRole::Seller)
    }

    #[test]
    fn increment_creates_quantity_from_zero() {
        let adj = StockAdjustment::new(test_key(), 25);
        assert_eq!(adj.apply_to(0).unwrap(), 25);
    }

    #[test]
    fn decrement_to_exactly_zero_is_allowed() {
        let adj = StockAdjustment::new(test_key(), -7);
        assert_eq!(adj.apply_to(7).unwrap(), 0);
    }

    #[test]
    fn decrement_below_zero_is_rejected_in_full() {
        let key = test_key();
        let err = StockAdjustment::new(key, -8).apply_to(7).unwrap_err();
        assert_eq!(
            err,
            LedgerError::InsufficientStock {
                product_id: key.product_id,
                requested: 8,
                available: 7,
            }
        );
    }

    #[test]
    fn zero_delta_is_rejected() {
        let err = StockAdjustment::new(test_key(), 0).validate().unwrap_err();
        match err {
            LedgerError::Validation(msg) if msg.contains("delta cannot be zero") => {}
            _ => panic!("Expected validation error for zero delta"),
        }
    }

    #[test]
    fn overflow_is_a_validation_error() {
        let err = apply_delta(ProductId::new(), i64::MAX, 1).unwrap_err();
        assert!(matches!(err, LedgerError::Validation(_)));
    }

    #[test]
    fn lock_order_groups_rows_by_product() {
        let product = ProductId::new();
        let mut keys = vec![
            StockKey::new(ProductId::new(), PartyId::new(), PartyRole::Seller),
            StockKey::new(product, PartyId::new(), PartyRole::Distributor),
            StockKey::new(product, PartyId::new(), PartyRole::Seller),
        ];
        keys.sort();
        assert!(keys.windows(2).all(|w| w[0] <= w[1]));
        assert_eq!(keys[0].product_id, product);
        assert_eq!(keys[1].product_id, product);
    }

    proptest! {
        #![proptest_config(ProptestConfig {
            cases: 512,
            ..ProptestConfig::default()
        })]

        /// Property: for any sequence of adjustments, the committed quantity
        /// is never negative and rejected adjustments leave it unchanged.
        #[test]
        fn quantity_never_goes_negative(
            deltas in prop::collection::vec(-500i64..500i64, 1..64)
        ) {
            let product_id = ProductId::new();
            let mut quantity = 0i64;

            for delta in deltas {
                match apply_delta(product_id, quantity, delta) {
                    Ok(next) => {
                        prop_assert_eq!(next, quantity + delta);
                        quantity = next;
                    }
                    Err(LedgerError::InsufficientStock { available, .. }) => {
                        prop_assert_eq!(available, quantity);
                        prop_assert!(quantity + delta < 0);
                    }
                    Err(other) => prop_assert!(false, "unexpected error {:?}", other),
                }
                prop_assert!(quantity >= 0);
            }
        }
    }
}
