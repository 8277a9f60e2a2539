//! Directory module: static supply-chain relationships.
//!
//! Answers two questions for the ledger: which distributor a seller orders
//! from, and which manufacturer owns a product. Lookups are read-only.

pub mod directory;
pub mod product;

pub use directory::{Assignment, Directory, DirectoryError, InMemoryDirectory};
pub use product::{Product, ProductAttributes};
