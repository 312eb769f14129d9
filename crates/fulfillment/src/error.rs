//! Fulfillment error types.

use common::{ItemId, OrderId};
use domain::{CatalogItemId, ErrorKind, OrderError};
use order_store::StoreError;
use thiserror::Error;

/// Errors that can occur during fulfillment operations.
#[derive(Debug, Error)]
pub enum FulfillmentError {
    /// The aggregate rejected the operation.
    #[error(transparent)]
    Order(#[from] OrderError),

    /// Order store error.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// Order not found.
    #[error("Order not found: {0}")]
    OrderNotFound(OrderId),

    /// No order owns this item.
    #[error("Item not found: {0}")]
    ItemNotFound(ItemId),

    /// The catalog does not know this item.
    #[error("Unknown catalog item: {0}")]
    UnknownCatalogItem(CatalogItemId),

    /// The order has no delivery to report.
    #[error("Order {0} has not been delivered")]
    NotDelivered(OrderId),

    /// Every order number tried was taken by a concurrent creation.
    #[error("Could not allocate an order number after {attempts} attempts")]
    OrderNumberExhausted { attempts: u32 },

    /// Catalog service error.
    #[error("Catalog service error: {0}")]
    Catalog(String),

    /// Delivery sink error.
    #[error("Delivery sink error: {0}")]
    DeliverySink(String),
}

impl FulfillmentError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            FulfillmentError::Order(err) => err.kind(),
            FulfillmentError::Store(err) => err.kind(),
            FulfillmentError::OrderNotFound(_)
            | FulfillmentError::ItemNotFound(_)
            | FulfillmentError::NotDelivered(_) => ErrorKind::NotFound,
            FulfillmentError::UnknownCatalogItem(_) => ErrorKind::Validation,
            FulfillmentError::OrderNumberExhausted { .. }
            | FulfillmentError::Catalog(_)
            | FulfillmentError::DeliverySink(_) => ErrorKind::Internal,
        }
    }
}

/// Convenience type alias for fulfillment results.
pub type Result<T> = std::result::Result<T, FulfillmentError>;
