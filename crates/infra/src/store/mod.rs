//! Transactional stock storage.
//!
//! A backend owns the transaction boundary: it locks every row a request
//! touches, hands the locked quantities to the pure decision logic in
//! `stockflow-ledger`, and writes the outcome or nothing at all.

pub mod in_memory;
pub mod postgres;
pub mod r#trait;

pub use in_memory::InMemoryLedgerStore;
pub use postgres::PostgresLedgerStore;
pub use r#trait::{LedgerStore, MIN_LOCK_WAIT, StoreError, clamp_lock_wait};
