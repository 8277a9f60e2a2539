use serde::{Deserialize, Serialize};

use stockflow_core::{Entity, PartyId, ProductId};

/// Descriptive attributes carried over from the catalogue.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProductAttributes {
    pub material: Option<String>,
    pub size: Option<String>,
    pub color: Option<String>,
}

/// Catalogue product owned by exactly one manufacturer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Product {
    pub id: ProductId,
    pub name: String,
    pub model: String,
    /// List price in smallest currency unit (e.g., cents).
    pub price: u64,
    pub manufacturer_id: PartyId,
    #[serde(default)]
    pub attributes: ProductAttributes,
}

impl Product {
    pub fn new(
        id: ProductId,
        name: impl Into<String>,
        model: impl Into<String>,
        price: u64,
        manufacturer_id: PartyId,
    ) -> Self {
        Self {
            id,
            name: name.into(),
            model: model.into(),
            price,
            manufacturer_id,
            attributes: ProductAttributes::default(),
        }
    }

    pub fn with_attributes(mut self, attributes: ProductAttributes) -> Self {
        self.attributes = attributes;
        self
    }
}

impl Entity for Product {
    type Id = ProductId;

    fn id(&self) -> &Self::Id {
        &self.id
    }
}
