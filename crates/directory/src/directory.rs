use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use stockflow_core::{Entity, PartyId, ProductId};

use crate::product::Product;

/// Seller → distributor relationship.
///
/// Storage allows a seller to appear under several distributors; the earliest
/// assignment is the one the seller orders from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Assignment {
    pub distributor_id: PartyId,
    pub seller_id: PartyId,
    pub assigned_at: DateTime<Utc>,
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DirectoryError {
    #[error("seller {0} is not assigned to a distributor")]
    NotAssigned(PartyId),

    #[error("unknown product {0}")]
    UnknownProduct(ProductId),

    #[error("directory unavailable: {0}")]
    Storage(String),
}

/// Read-only relationship lookups consumed by the transfer engine and the
/// order allocator.
#[async_trait]
pub trait Directory: Send + Sync {
    /// The distributor a seller places orders against.
    async fn assigned_distributor(&self, seller_id: PartyId) -> Result<PartyId, DirectoryError>;

    /// The manufacturer owning a product.
    async fn manufacturer_of(&self, product_id: ProductId) -> Result<PartyId, DirectoryError>;

    /// Full catalogue record for a product.
    async fn product(&self, product_id: ProductId) -> Result<Product, DirectoryError>;
}

#[async_trait]
impl<D> Directory for Arc<D>
where
    D: Directory + ?Sized,
{
    async fn assigned_distributor(&self, seller_id: PartyId) -> Result<PartyId, DirectoryError> {
        (**self).assigned_distributor(seller_id).await
    }

    async fn manufacturer_of(&self, product_id: ProductId) -> Result<PartyId, DirectoryError> {
        (**self).manufacturer_of(product_id).await
    }

    async fn product(&self, product_id: ProductId) -> Result<Product, DirectoryError> {
        (**self).product(product_id).await
    }
}

/// In-memory directory for tests/dev. Populated up front by seeding code.
#[derive(Debug, Default)]
pub struct InMemoryDirectory {
    products: RwLock<HashMap<ProductId, Product>>,
    assignments: RwLock<Vec<Assignment>>,
}

impl InMemoryDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert_product(&self, product: Product) -> Result<(), DirectoryError> {
        let mut products = self
            .products
            .write()
            .map_err(|_| DirectoryError::Storage("lock poisoned".to_string()))?;
        products.insert(*product.id(), product);
        Ok(())
    }

    /// Record an assignment. Re-assigning an existing pair is a no-op.
    pub fn assign(&self, distributor_id: PartyId, seller_id: PartyId) -> Result<(), DirectoryError> {
        let mut assignments = self
            .assignments
            .write()
            .map_err(|_| DirectoryError::Storage("lock poisoned".to_string()))?;
        let exists = assignments
            .iter()
            .any(|a| a.distributor_id == distributor_id && a.seller_id == seller_id);
        if !exists {
            assignments.push(Assignment {
                distributor_id,
                seller_id,
                assigned_at: Utc::now(),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl Directory for InMemoryDirectory {
    async fn assigned_distributor(&self, seller_id: PartyId) -> Result<PartyId, DirectoryError> {
        let assignments = self
            .assignments
            .read()
            .map_err(|_| DirectoryError::Storage("lock poisoned".to_string()))?;
        assignments
            .iter()
            .find(|a| a.seller_id == seller_id)
            .map(|a| a.distributor_id)
            .ok_or(DirectoryError::NotAssigned(seller_id))
    }

    async fn manufacturer_of(&self, product_id: ProductId) -> Result<PartyId, DirectoryError> {
        self.product(product_id).await.map(|p| p.manufacturer_id)
    }

    async fn product(&self, product_id: ProductId) -> Result<Product, DirectoryError> {
        let products = self
            .products
            .read()
            .map_err(|_| DirectoryError::Storage("lock poisoned".to_string()))?;
        products
            .get(&product_id)
            .cloned()
            .ok_or(DirectoryError::UnknownProduct(product_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn blanket(manufacturer: PartyId) -> Product {
        Product::new(ProductId::new(), "Ultra Soft Fleece Blanket", "USF-001", 4599, manufacturer)
    }

    #[tokio::test]
    async fn manufacturer_of_returns_owning_manufacturer() {
        let directory = InMemoryDirectory::new();
        let manufacturer = PartyId::new();
        let product = blanket(manufacturer);
        directory.insert_product(product.clone()).unwrap();

        assert_eq!(directory.manufacturer_of(product.id).await.unwrap(), manufacturer);
        assert_eq!(directory.product(product.id).await.unwrap(), product);
    }

    #[tokio::test]
    async fn unknown_product_is_reported() {
        let directory = InMemoryDirectory::new();
        let missing = ProductId::new();
        assert_eq!(
            directory.manufacturer_of(missing).await.unwrap_err(),
            DirectoryError::UnknownProduct(missing)
        );
    }

    #[tokio::test]
    async fn unassigned_seller_is_reported() {
        let directory = InMemoryDirectory::new();
        let seller = PartyId::new();
        assert_eq!(
            directory.assigned_distributor(seller).await.unwrap_err(),
            DirectoryError::NotAssigned(seller)
        );
    }

    #[tokio::test]
    async fn earliest_assignment_is_the_primary_distributor() {
        let directory = InMemoryDirectory::new();
        let seller = PartyId::new();
        let first = PartyId::new();
        let second = PartyId::new();
        directory.assign(first, seller).unwrap();
        directory.assign(second, seller).unwrap();
        directory.assign(first, seller).unwrap();

        assert_eq!(directory.assigned_distributor(seller).await.unwrap(), first);
    }

    #[tokio::test]
    async fn works_through_a_shared_handle() {
        let directory = Arc::new(InMemoryDirectory::new());
        let seller = PartyId::new();
        let distributor = PartyId::new();
        directory.assign(distributor, seller).unwrap();

        let shared: Arc<dyn Directory> = directory;
        assert_eq!(shared.assigned_distributor(seller).await.unwrap(), distributor);
    }
}
