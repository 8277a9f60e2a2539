//! Sample supply chain used by the demo binary and the integration tests.
//!
//! Cozy Comfort MFG supplies Metro Distribution, which supplies The Comfort
//! Store; three blanket products are stocked across the tiers.

use sqlx::PgPool;

use stockflow_core::{PartyId, PartyRole, ProductId, RequestContext};
use stockflow_directory::{Directory, DirectoryError, InMemoryDirectory, Product, ProductAttributes};
use stockflow_ledger::Owner;

use crate::engine::{EngineError, LedgerEngine};
use crate::store::postgres::map_sqlx_error;
use crate::store::{LedgerStore, StoreError};

#[derive(Debug, Clone)]
pub struct SampleChain {
    pub manufacturer: PartyId,
    pub distributor: PartyId,
    pub seller: PartyId,
    pub products: Vec<Product>,
}

/// (model, manufacturer, distributor, seller) opening stock.
const OPENING_STOCK: [(&str, i64, i64, i64); 3] = [
    ("USF-001", 500, 50, 10),
    ("PWB-002", 300, 30, 5),
    ("CCT-003", 750, 0, 0),
];

impl SampleChain {
    pub fn new() -> Self {
        let manufacturer = PartyId::new();
        let blanket = |name: &str, model: &str, price: u64, material: &str, size: &str, color: &str| {
            Product::new(ProductId::new(), name, model, price, manufacturer).with_attributes(ProductAttributes {
                material: Some(material.to_string()),
                size: Some(size.to_string()),
                color: Some(color.to_string()),
            })
        };
        Self {
            manufacturer,
            distributor: PartyId::new(),
            seller: PartyId::new(),
            products: vec![
                blanket("Ultra Soft Fleece Blanket", "USF-001", 4599, "Fleece", "Queen", "Blue"),
                blanket("Premium Wool Blanket", "PWB-002", 8999, "Wool", "King", "Gray"),
                blanket("Cotton Comfort Throw", "CCT-003", 2999, "Cotton", "Throw", "Beige"),
            ],
        }
    }

    pub fn product(&self, model: &str) -> Option<&Product> {
        self.products.iter().find(|p| p.model == model)
    }

    pub fn manufacturer_ctx(&self) -> RequestContext {
        RequestContext::new(self.manufacturer, PartyRole::Manufacturer)
    }

    pub fn distributor_ctx(&self) -> RequestContext {
        RequestContext::new(self.distributor, PartyRole::Distributor)
    }

    pub fn seller_ctx(&self) -> RequestContext {
        RequestContext::new(self.seller, PartyRole::Seller)
    }

    /// Register products and the distributor/seller assignment.
    pub fn install(&self, directory: &InMemoryDirectory) -> Result<(), DirectoryError> {
        for product in &self.products {
            directory.insert_product(product.clone())?;
        }
        directory.assign(self.distributor, self.seller)
    }

    /// Write products and the assignment into the Postgres directory tables.
    pub async fn install_postgres(&self, pool: &PgPool) -> Result<(), StoreError> {
        for product in &self.products {
            let price = i64::try_from(product.price)
                .map_err(|_| StoreError::Unavailable(format!("price out of range for {}", product.model)))?;
            sqlx::query(
                r#"
                INSERT INTO products (id, name, model, material, size, color, price, manufacturer_id)
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
                ON CONFLICT (id) DO NOTHING
                "#,
            )
            .bind(product.id.as_uuid())
            .bind(&product.name)
            .bind(&product.model)
            .bind(product.attributes.material.as_deref())
            .bind(product.attributes.size.as_deref())
            .bind(product.attributes.color.as_deref())
            .bind(price)
            .bind(product.manufacturer_id.as_uuid())
            .execute(pool)
            .await
            .map_err(|e| map_sqlx_error("install_products", e))?;
        }

        sqlx::query(
            r#"
            INSERT INTO distributor_sellers (distributor_id, seller_id)
            VALUES ($1, $2)
            ON CONFLICT (distributor_id, seller_id) DO NOTHING
            "#,
        )
        .bind(self.distributor.as_uuid())
        .bind(self.seller.as_uuid())
        .execute(pool)
        .await
        .map_err(|e| map_sqlx_error("install_assignment", e))?;
        Ok(())
    }

    /// Book the opening stock at every tier, each owner adjusting its own rows.
    pub async fn stock<S, D>(&self, engine: &LedgerEngine<S, D>) -> Result<(), EngineError>
    where
        S: LedgerStore,
        D: Directory,
    {
        for (model, manufacturer_qty, distributor_qty, seller_qty) in OPENING_STOCK {
            let Some(product) = self.product(model) else {
                continue;
            };
            for (ctx, owner, quantity) in [
                (self.manufacturer_ctx(), Owner::manufacturer(self.manufacturer), manufacturer_qty),
                (self.distributor_ctx(), Owner::distributor(self.distributor), distributor_qty),
                (self.seller_ctx(), Owner::seller(self.seller), seller_qty),
            ] {
                if quantity > 0 {
                    engine.adjust(&ctx, product.id, owner, quantity).await?;
                }
            }
        }
        Ok(())
    }
}

impl Default for SampleChain {
    fn default() -> Self {
        Self::new()
    }
}
