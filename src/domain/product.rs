use crate::library::cache::KeyspaceEntity;
use serde::{Deserialize, Serialize};

/// Cache name under which product lookups are memoized
pub const PRODUCT_CACHE: &str = "products";

/// Unique identifier of a [`Product`]
pub type ProductIdentifier = String;

/// Item offered in the storefront
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Product {
    /// Unique identifier
    pub id: ProductIdentifier,

    /// Human readable name
    pub name: String,

    /// Price in the smallest currency unit, if known
    pub price: Option<u64>,
}

impl Product {
    /// Creates a product without a price
    pub fn new(id: impl Into<ProductIdentifier>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            price: None,
        }
    }

    /// Sets the price
    pub fn with_price(mut self, price: u64) -> Self {
        self.price = Some(price);
        self
    }
}

impl KeyspaceEntity for Product {
    const KEYSPACE: &'static str = "products";
    type Id = ProductIdentifier;

    fn id(&self) -> &Self::Id {
        &self.id
    }
}
