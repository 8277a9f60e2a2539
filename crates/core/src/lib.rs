//! `stockflow-core`: shared building blocks for the supply-chain ledger.
//!
//! This crate contains **pure domain** primitives (no infrastructure concerns).

pub mod context;
pub mod entity;
pub mod error;
pub mod id;

pub use context::{PartyRole, RequestContext};
pub use entity::Entity;
pub use error::{DomainError, DomainResult};
pub use id::{OrderId, PartyId, ProductId};
