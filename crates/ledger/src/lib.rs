//! Stock ledger domain module.
//!
//! Business rules for moving stock between supply-chain tiers and allocating
//! customer orders, implemented purely as deterministic decision logic (no IO,
//! no locking, no storage). Storage backends lock the rows a request touches,
//! read their quantities, and ask this crate what to write.

pub mod allocation;
pub mod error;
pub mod order;
pub mod stock;
pub mod transfer;

pub use allocation::{AllocatedLine, Allocation, Customer, Debit, OrderLineRequest, OrderRequest, allocate};
pub use error::LedgerError;
pub use order::{LineSource, Order, OrderLine, OrderStatus, order_number};
pub use stock::{StockAdjustment, StockEntry, StockKey, apply_delta};
pub use transfer::{Owner, Route, TransferPlan, TransferReceipt, TransferRequest};
