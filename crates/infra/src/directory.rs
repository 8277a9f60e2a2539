//! Postgres-backed directory lookups.

use async_trait::async_trait;
use sqlx::{PgPool, Row};
use uuid::Uuid;

use stockflow_core::{PartyId, ProductId};
use stockflow_directory::{Directory, DirectoryError, Product, ProductAttributes};

/// Reads products and distributor/seller assignments maintained outside
/// the ledger.
#[derive(Debug, Clone)]
pub struct PostgresDirectory {
    pool: PgPool,
}

impl PostgresDirectory {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn storage(operation: &str, err: sqlx::Error) -> DirectoryError {
    DirectoryError::Storage(format!("database error in {}: {}", operation, err))
}

#[async_trait]
impl Directory for PostgresDirectory {
    /// A seller with several assignments resolves to the earliest one.
    async fn assigned_distributor(&self, seller_id: PartyId) -> Result<PartyId, DirectoryError> {
        let row = sqlx::query(
            r#"
            SELECT distributor_id
            FROM distributor_sellers
            WHERE seller_id = $1
            ORDER BY assigned_at ASC, distributor_id ASC
            LIMIT 1
            "#,
        )
        .bind(seller_id.as_uuid())
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| storage("assigned_distributor", e))?
        .ok_or(DirectoryError::NotAssigned(seller_id))?;

        let id: Uuid = row
            .try_get("distributor_id")
            .map_err(|e| storage("assigned_distributor", e))?;
        Ok(PartyId::from_uuid(id))
    }

    async fn manufacturer_of(&self, product_id: ProductId) -> Result<PartyId, DirectoryError> {
        let row = sqlx::query("SELECT manufacturer_id FROM products WHERE id = $1")
            .bind(product_id.as_uuid())
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| storage("manufacturer_of", e))?
            .ok_or(DirectoryError::UnknownProduct(product_id))?;

        let id: Uuid = row
            .try_get("manufacturer_id")
            .map_err(|e| storage("manufacturer_of", e))?;
        Ok(PartyId::from_uuid(id))
    }

    async fn product(&self, product_id: ProductId) -> Result<Product, DirectoryError> {
        let row = sqlx::query(
            r#"
            SELECT id, name, model, material, size, color, price, manufacturer_id
            FROM products
            WHERE id = $1
            "#,
        )
        .bind(product_id.as_uuid())
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| storage("product", e))?
        .ok_or(DirectoryError::UnknownProduct(product_id))?;

        let decode = |e: sqlx::Error| storage("product", e);
        let price: i64 = row.try_get("price").map_err(decode)?;
        let price = u64::try_from(price)
            .map_err(|_| DirectoryError::Storage(format!("negative price for product {product_id}")))?;

        Ok(Product::new(
            ProductId::from_uuid(row.try_get("id").map_err(decode)?),
            row.try_get::<String, _>("name").map_err(decode)?,
            row.try_get::<String, _>("model").map_err(decode)?,
            price,
            PartyId::from_uuid(row.try_get("manufacturer_id").map_err(decode)?),
        )
        .with_attributes(ProductAttributes {
            material: row.try_get("material").map_err(decode)?,
            size: row.try_get("size").map_err(decode)?,
            color: row.try_get("color").map_err(decode)?,
        }))
    }
}
