use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::{ItemId, OrderId, Version};
use domain::{HistoryEntry, Order};

use crate::{OrderQuery, Result, StoreError};

/// Core trait for order aggregate persistence.
///
/// Each order is stored as a whole: header, lines, stamps and version.
/// Every write is atomic together with the history entry it carries, and
/// all implementations must be thread-safe (Send + Sync).
#[async_trait]
pub trait OrderStore: Send + Sync {
    /// Inserts a newly created order together with its creation entry.
    ///
    /// Fails with `DuplicateOrderNumber` if the order number is taken.
    async fn insert(&self, order: &Order, entry: &HistoryEntry) -> Result<()>;

    /// Replaces a stored order, appending `entry` to its ledger if given.
    ///
    /// The write happens only if the stored version equals `expected`;
    /// otherwise it fails with `ConcurrencyConflict` and nothing changes.
    async fn save(&self, order: &Order, expected: Version, entry: Option<&HistoryEntry>)
    -> Result<()>;

    /// Retrieves an order by ID.
    async fn get(&self, order_id: OrderId) -> Result<Option<Order>>;

    /// Retrieves the order owning a line.
    async fn find_by_item(&self, item_id: ItemId) -> Result<Option<Order>>;

    /// Retrieves orders matching a query.
    async fn list(&self, query: &OrderQuery) -> Result<Vec<Order>>;

    /// Counts orders created at or after `since`.
    async fn count_created_since(&self, since: DateTime<Utc>) -> Result<u64>;
}

/// Read side of the append-only history ledger.
///
/// Entries are written only through [`OrderStore::insert`] and
/// [`OrderStore::save`]; there is no operation to edit or delete one.
#[async_trait]
pub trait HistoryLedger: Send + Sync {
    /// Entries for an order, ordered by timestamp then sequence, ascending.
    async fn list_for_order(&self, order_id: OrderId) -> Result<Vec<HistoryEntry>>;
}

/// Extension trait providing convenience methods for order stores.
#[async_trait]
pub trait OrderStoreExt: OrderStore {
    /// Loads an order, failing with `OrderNotFound` if it does not exist.
    async fn load(&self, order_id: OrderId) -> Result<Order> {
        self.get(order_id)
            .await?
            .ok_or(StoreError::OrderNotFound(order_id))
    }

    /// Checks if an order exists.
    async fn exists(&self, order_id: OrderId) -> Result<bool> {
        Ok(self.get(order_id).await?.is_some())
    }
}

// Blanket implementation for all OrderStore implementations
impl<T: OrderStore + ?Sized> OrderStoreExt for T {}
