//! Order allocation: split each requested line between the seller's own
//! stock and its distributor's stock.

use std::collections::{BTreeMap, BTreeSet, HashSet};

use serde::{Deserialize, Serialize};

use stockflow_core::{PartyId, PartyRole, ProductId};

use crate::error::LedgerError;
use crate::order::LineSource;
use crate::stock::StockKey;

/// End customer the seller is selling to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Customer {
    pub name: String,
    pub email: Option<String>,
}

impl Customer {
    pub fn new(name: impl Into<String>, email: Option<String>) -> Self {
        Self {
            name: name.into(),
            email,
        }
    }
}

/// Requested line: product, quantity, unit price.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderLineRequest {
    pub product_id: ProductId,
    pub quantity: i64,
    /// Price in smallest currency unit (e.g., cents).
    pub unit_price: u64,
}

impl OrderLineRequest {
    pub fn new(product_id: ProductId, quantity: i64, unit_price: u64) -> Self {
        Self {
            product_id,
            quantity,
            unit_price,
        }
    }
}

/// Command: place a customer order on behalf of a seller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderRequest {
    pub seller_id: PartyId,
    pub distributor_id: PartyId,
    pub customer: Customer,
    pub lines: Vec<OrderLineRequest>,
}

impl OrderRequest {
    pub fn seller_key(&self, product_id: ProductId) -> StockKey {
        StockKey::new(product_id, self.seller_id, PartyRole::Seller)
    }

    pub fn distributor_key(&self, product_id: ProductId) -> StockKey {
        StockKey::new(product_id, self.distributor_id, PartyRole::Distributor)
    }

    /// Shape checks that do not depend on stock levels.
    pub fn validate(&self) -> Result<(), LedgerError> {
        if self.customer.name.trim().is_empty() {
            return Err(LedgerError::validation("customer name cannot be empty"));
        }
        if self.lines.is_empty() {
            return Err(LedgerError::validation("order must contain at least one line"));
        }

        let mut seen = HashSet::with_capacity(self.lines.len());
        for line in &self.lines {
            if line.quantity <= 0 {
                return Err(LedgerError::validation(format!(
                    "quantity for product {} must be positive",
                    line.product_id
                )));
            }
            if !seen.insert(line.product_id) {
                return Err(LedgerError::validation(format!(
                    "product {} appears more than once",
                    line.product_id
                )));
            }
        }

        self.total_amount().map(|_| ())
    }

    /// Sum of `quantity * unit_price` over the requested lines.
    pub fn total_amount(&self) -> Result<u64, LedgerError> {
        self.lines.iter().try_fold(0u64, |acc, line| {
            let quantity = u64::try_from(line.quantity)
                .map_err(|_| LedgerError::validation("quantity must be positive"))?;
            quantity
                .checked_mul(line.unit_price)
                .and_then(|amount| acc.checked_add(amount))
                .ok_or_else(|| LedgerError::validation("order total overflow"))
        })
    }

    /// Every stock row the allocation may debit, in lock order.
    pub fn stock_keys(&self) -> Vec<StockKey> {
        self.lines
            .iter()
            .flat_map(|l| [self.seller_key(l.product_id), self.distributor_key(l.product_id)])
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect()
    }
}

/// A single row debit decided by the allocator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Debit {
    pub key: StockKey,
    pub quantity: i64,
    /// Quantity left on the row once the debit is written.
    pub remaining: i64,
}

/// Allocated order line, before the storage layer assigns the order id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AllocatedLine {
    pub product_id: ProductId,
    pub quantity: i64,
    pub unit_price: u64,
    pub source: LineSource,
}

/// Everything a backend writes to commit an order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Allocation {
    pub debits: Vec<Debit>,
    pub lines: Vec<AllocatedLine>,
    pub total_amount: u64,
}

impl Allocation {
    /// Final quantity per debited row (the values to write).
    pub fn final_quantities(&self) -> BTreeMap<StockKey, i64> {
        self.debits.iter().map(|d| (d.key, d.remaining)).collect()
    }
}

/// Allocate an order against locked on-hand quantities.
///
/// Lines are processed in submission order. Each line drains the seller's
/// row first and takes any shortfall from the distributor's row. Rows missing
/// from `on_hand` hold zero. The first line that cannot be covered fails the
/// whole allocation; nothing is returned for earlier lines.
pub fn allocate(request: &OrderRequest, on_hand: &BTreeMap<StockKey, i64>) -> Result<Allocation, LedgerError> {
    request.validate()?;

    let mut balances = on_hand.clone();
    let mut debits = Vec::new();
    let mut lines = Vec::new();

    for line in &request.lines {
        let seller_key = request.seller_key(line.product_id);
        let distributor_key = request.distributor_key(line.product_id);
        let seller_available = balances.get(&seller_key).copied().unwrap_or(0).max(0);
        let distributor_available = balances.get(&distributor_key).copied().unwrap_or(0).max(0);

        let available = seller_available.saturating_add(distributor_available);
        if available < line.quantity {
            return Err(LedgerError::InsufficientStock {
                product_id: line.product_id,
                requested: line.quantity,
                available,
            });
        }

        let from_seller = line.quantity.min(seller_available);
        let from_distributor = line.quantity - from_seller;

        for (key, row_available, quantity, source) in [
            (seller_key, seller_available, from_seller, LineSource::SellerStock),
            (distributor_key, distributor_available, from_distributor, LineSource::DistributorStock),
        ] {
            if quantity == 0 {
                continue;
            }
            let remaining = row_available - quantity;
            balances.insert(key, remaining);
            debits.push(Debit {
                key,
                quantity,
                remaining,
            });
            lines.push(AllocatedLine {
                product_id: line.product_id,
                quantity,
                unit_price: line.unit_price,
                source,
            });
        }
    }

    let total_amount = request.total_amount()?;
    Ok(Allocation {
        debits,
        lines,
        total_amount,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    struct Fixture {
        seller: PartyId,
        distributor: PartyId,
    }

    impl Fixture {
        fn new() -> Self {
            Self {
                seller: PartyId::new(),
                distributor: PartyId::new(),
            }
        }

        fn request(&self, lines: Vec<OrderLineRequest>) -> OrderRequest {
            OrderRequest {
                seller_id: self.seller,
                distributor_id: self.distributor,
                customer: Customer::new("Jane Doe", Some("jane@example.com".to_string())),
                lines,
            }
        }

        fn stock(&self, product: ProductId, seller: i64, distributor: i64) -> BTreeMap<StockKey, i64> {
            let mut on_hand = BTreeMap::new();
            on_hand.insert(StockKey::new(product, self.seller, PartyRole::Seller), seller);
            on_hand.insert(StockKey::new(product, self.distributor, PartyRole::Distributor), distributor);
            on_hand
        }
    }

    #[test]
    fn seller_stock_alone_covers_the_line() {
        let fx = Fixture::new();
        let product = ProductId::new();
        let req = fx.request(vec![OrderLineRequest::new(product, 4, 4599)]);

        let allocation = allocate(&req, &fx.stock(product, 10, 50)).unwrap();
        assert_eq!(allocation.lines.len(), 1);
        assert_eq!(allocation.lines[0].source, LineSource::SellerStock);
        assert_eq!(allocation.debits[0].remaining, 6);
        assert_eq!(allocation.total_amount, 4 * 4599);
    }

    #[test]
    fn shortfall_is_split_onto_distributor_stock() {
        let fx = Fixture::new();
        let product = ProductId::new();
        let req = fx.request(vec![OrderLineRequest::new(product, 10, 2999)]);

        let allocation = allocate(&req, &fx.stock(product, 3, 20)).unwrap();

        let sources: Vec<_> = allocation.lines.iter().map(|l| (l.source, l.quantity)).collect();
        assert_eq!(
            sources,
            vec![(LineSource::SellerStock, 3), (LineSource::DistributorStock, 7)]
        );

        let finals = allocation.final_quantities();
        assert_eq!(finals[&req.seller_key(product)], 0);
        assert_eq!(finals[&req.distributor_key(product)], 13);
        assert_eq!(allocation.total_amount, 10 * 2999);
    }

    #[test]
    fn missing_seller_row_draws_everything_from_distributor() {
        let fx = Fixture::new();
        let product = ProductId::new();
        let req = fx.request(vec![OrderLineRequest::new(product, 5, 100)]);
        let mut on_hand = BTreeMap::new();
        on_hand.insert(req.distributor_key(product), 5);

        let allocation = allocate(&req, &on_hand).unwrap();
        assert_eq!(allocation.lines.len(), 1);
        assert_eq!(allocation.lines[0].source, LineSource::DistributorStock);
        assert_eq!(allocation.debits[0].remaining, 0);
    }

    #[test]
    fn insufficient_combined_stock_fails_the_order() {
        let fx = Fixture::new();
        let product = ProductId::new();
        let req = fx.request(vec![OrderLineRequest::new(product, 10, 100)]);

        let err = allocate(&req, &fx.stock(product, 3, 4)).unwrap_err();
        assert_eq!(
            err,
            LedgerError::InsufficientStock {
                product_id: product,
                requested: 10,
                available: 7,
            }
        );
    }

    #[test]
    fn a_later_failing_line_fails_the_whole_order() {
        let fx = Fixture::new();
        let covered = ProductId::new();
        let short = ProductId::new();
        let req = fx.request(vec![
            OrderLineRequest::new(covered, 2, 100),
            OrderLineRequest::new(short, 9, 100),
        ]);
        let mut on_hand = fx.stock(covered, 5, 5);
        on_hand.extend(fx.stock(short, 1, 1));

        let err = allocate(&req, &on_hand).unwrap_err();
        assert!(matches!(err, LedgerError::InsufficientStock { product_id, .. } if product_id == short));
    }

    #[test]
    fn duplicate_products_are_rejected() {
        let fx = Fixture::new();
        let product = ProductId::new();
        let req = fx.request(vec![
            OrderLineRequest::new(product, 1, 100),
            OrderLineRequest::new(product, 1, 100),
        ]);
        assert!(matches!(req.validate(), Err(LedgerError::Validation(_))));
    }

    #[test]
    fn empty_orders_and_blank_customers_are_rejected() {
        let fx = Fixture::new();
        assert!(matches!(fx.request(vec![]).validate(), Err(LedgerError::Validation(_))));

        let mut req = fx.request(vec![OrderLineRequest::new(ProductId::new(), 1, 1)]);
        req.customer.name = "   ".to_string();
        assert!(matches!(req.validate(), Err(LedgerError::Validation(_))));
    }

    #[test]
    fn total_overflow_is_rejected() {
        let fx = Fixture::new();
        let req = fx.request(vec![OrderLineRequest::new(ProductId::new(), 2, u64::MAX)]);
        assert!(matches!(req.total_amount(), Err(LedgerError::Validation(_))));
    }

    #[test]
    fn stock_keys_are_sorted_and_cover_both_owners() {
        let fx = Fixture::new();
        let a = ProductId::new();
        let b = ProductId::new();
        let req = fx.request(vec![OrderLineRequest::new(b, 1, 1), OrderLineRequest::new(a, 1, 1)]);

        let keys = req.stock_keys();
        assert_eq!(keys.len(), 4);
        assert!(keys.windows(2).all(|w| w[0] < w[1]));
        assert!(keys.contains(&req.seller_key(a)));
        assert!(keys.contains(&req.distributor_key(b)));
    }

    proptest! {
        #![proptest_config(ProptestConfig {
            cases: 256,
            ..ProptestConfig::default()
        })]

        /// Property: a successful allocation debits exactly the requested
        /// quantities, never overdraws a row, and its total equals the sum of
        /// recorded line amounts.
        #[test]
        fn allocation_is_exact_and_balanced(
            lines in prop::collection::vec((1i64..50, 1u64..10_000, 0i64..60, 0i64..60), 1..8)
        ) {
            let fx = Fixture::new();
            let mut on_hand = BTreeMap::new();
            let mut requests = Vec::new();
            for (quantity, price, seller, distributor) in &lines {
                let product = ProductId::new();
                on_hand.extend(fx.stock(product, *seller, *distributor));
                requests.push(OrderLineRequest::new(product, *quantity, *price));
            }
            let req = fx.request(requests);

            match allocate(&req, &on_hand) {
                Ok(allocation) => {
                    for line in &req.lines {
                        let recorded: i64 = allocation
                            .lines
                            .iter()
                            .filter(|l| l.product_id == line.product_id)
                            .map(|l| l.quantity)
                            .sum();
                        prop_assert_eq!(recorded, line.quantity);
                    }
                    for debit in &allocation.debits {
                        prop_assert!(debit.remaining >= 0);
                        prop_assert_eq!(on_hand[&debit.key] - debit.quantity, debit.remaining);
                    }
                    let lines_total: u64 = allocation
                        .lines
                        .iter()
                        .map(|l| l.quantity as u64 * l.unit_price)
                        .sum();
                    prop_assert_eq!(lines_total, allocation.total_amount);
                }
                Err(LedgerError::InsufficientStock { .. }) => {
                    let uncovered = lines.iter().any(|(q, _, s, d)| s + d < *q);
                    prop_assert!(uncovered);
                }
                Err(other) => prop_assert!(false, "unexpected error {:?}", other),
            }
        }
    }
}
