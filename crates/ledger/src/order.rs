use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use stockflow_core::{Entity, OrderId, PartyId, ProductId};

use crate::allocation::Customer;

/// Which owner's stock a recorded order line was debited from.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LineSource {
    SellerStock,
    DistributorStock,
}

impl LineSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            LineSource::SellerStock => "seller_stock",
            LineSource::DistributorStock => "distributor_stock",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "seller_stock" => Some(LineSource::SellerStock),
            "distributor_stock" => Some(LineSource::DistributorStock),
            _ => None,
        }
    }
}

/// Order status. The allocator commits orders as `Fulfilled`, which is
/// terminal; `Pending` and `Cancelled` exist for records written elsewhere.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderStatus {
    Pending,
    Fulfilled,
    Cancelled,
}

impl OrderStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderStatus::Pending => "pending",
            OrderStatus::Fulfilled => "fulfilled",
            OrderStatus::Cancelled => "cancelled",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(OrderStatus::Pending),
            "fulfilled" => Some(OrderStatus::Fulfilled),
            "cancelled" => Some(OrderStatus::Cancelled),
            _ => None,
        }
    }
}

impl core::fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Recorded order line. One requested line yields one or two of these,
/// depending on how many owners were debited.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderLine {
    pub order_id: OrderId,
    pub product_id: ProductId,
    pub quantity: i64,
    /// Price in smallest currency unit (e.g., cents).
    pub unit_price: u64,
    pub source: LineSource,
}

impl OrderLine {
    pub fn amount(&self) -> Option<u64> {
        u64::try_from(self.quantity).ok()?.checked_mul(self.unit_price)
    }
}

/// Committed customer order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Order {
    pub id: OrderId,
    pub order_number: String,
    pub seller_id: PartyId,
    pub distributor_id: PartyId,
    pub customer: Customer,
    /// Total in smallest currency unit; always equals the sum of line amounts.
    pub total_amount: u64,
    pub status: OrderStatus,
    pub created_at: DateTime<Utc>,
    pub lines: Vec<OrderLine>,
}

impl Order {
    /// Sum of `quantity * unit_price` across recorded lines.
    pub fn lines_total(&self) -> Option<u64> {
        self.lines
            .iter()
            .try_fold(0u64, |acc, line| acc.checked_add(line.amount()?))
    }

    /// Total quantity of a product debited from a given source.
    pub fn quantity_from(&self, product_id: ProductId, source: LineSource) -> i64 {
        self.lines
            .iter()
            .filter(|l| l.product_id == product_id && l.source == source)
            .map(|l| l.quantity)
            .sum()
    }
}

impl Entity for Order {
    type Id = OrderId;

    fn id(&self) -> &Self::Id {
        &self.id
    }
}

/// Human-readable order number, e.g.
/// `ORD-20261019-0192a3b4c5d67e8f9a0b1c2d3e4f5061`.
///
/// The suffix is the whole id in simple hex form, so two orders share a
/// number only if they share an id.
pub fn order_number(id: OrderId, created_at: DateTime<Utc>) -> String {
    format!("ORD-{}-{}", created_at.format("%Y%m%d"), id.as_uuid().simple())
}
