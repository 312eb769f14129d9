//! Item catalog trait and in-memory implementation.

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

use async_trait::async_trait;
use domain::{CatalogItemId, ItemSnapshot, Money};
use serde::{Deserialize, Serialize};

use crate::error::FulfillmentError;

/// Current catalog data for one item.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CatalogItem {
    pub id: CatalogItemId,
    pub code: String,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub category: Option<String>,
    pub unit: String,
    pub unit_price_cents: i64,
}

impl CatalogItem {
    /// Copies the fields an order line keeps.
    pub fn snapshot(&self) -> ItemSnapshot {
        ItemSnapshot {
            code: self.code.clone(),
            name: self.name.clone(),
            description: self.description.clone(),
            category: self.category.clone(),
            unit: self.unit.clone(),
            unit_price: Money::from_cents(self.unit_price_cents),
        }
    }
}

/// Trait for item master lookups.
///
/// Consulted only when a line is created, to fill its snapshot.
#[async_trait]
pub trait Catalog: Send + Sync {
    /// Returns the item, or `None` if the catalog does not know it.
    async fn lookup(&self, id: &CatalogItemId) -> Result<Option<CatalogItem>, FulfillmentError>;
}

/// In-memory catalog, seeded at startup or by tests.
#[derive(Debug, Clone, Default)]
pub struct InMemoryCatalog {
    items: Arc<RwLock<HashMap<CatalogItemId, CatalogItem>>>,
}

impl InMemoryCatalog {
    /// Creates a new empty catalog.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a catalog holding `items`.
    pub fn with_items(items: impl IntoIterator<Item = CatalogItem>) -> Self {
        let catalog = Self::new();
        for item in items {
            catalog.upsert(item);
        }
        catalog
    }

    /// Parses a JSON array of catalog items.
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        let items: Vec<CatalogItem> = serde_json::from_str(json)?;
        Ok(Self::with_items(items))
    }

    /// Inserts or replaces an item.
    pub fn upsert(&self, item: CatalogItem) {
        self.items
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(item.id.clone(), item);
    }

    /// Returns the number of items.
    pub fn len(&self) -> usize {
        self.items.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl Catalog for InMemoryCatalog {
    async fn lookup(&self, id: &CatalogItemId) -> Result<Option<CatalogItem>, FulfillmentError> {
        let items = self.items.read().unwrap_or_else(PoisonError::into_inner);
        Ok(items.get(id).cloned())
    }
}
