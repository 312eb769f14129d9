use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::{ItemId, OrderId, Version};
use domain::{HistoryEntry, Order};
use tokio::sync::RwLock;

use crate::{
    OrderQuery, Result, SortOrder, StoreError,
    store::{HistoryLedger, OrderStore},
};

#[derive(Default)]
struct Tables {
    orders: HashMap<OrderId, Order>,
    history: HashMap<OrderId, Vec<HistoryEntry>>,
}

/// In-memory order store for tests and single-node development.
///
/// Orders and ledger live behind one lock, so an order write and its
/// history entry are applied together and a version check cannot race the
/// write it guards.
#[derive(Clone, Default)]
pub struct InMemoryOrderStore {
    tables: Arc<RwLock<Tables>>,
}

impl InMemoryOrderStore {
    /// Creates a new empty in-memory store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the total number of orders stored.
    pub async fn order_count(&self) -> usize {
        self.tables.read().await.orders.len()
    }

    /// Returns the total number of history entries stored.
    pub async fn history_count(&self) -> usize {
        self.tables.read().await.history.values().map(Vec::len).sum()
    }

    /// Clears all orders and history.
    pub async fn clear(&self) {
        let mut tables = self.tables.write().await;
        tables.orders.clear();
        tables.history.clear();
    }
}

#[async_trait]
impl OrderStore for InMemoryOrderStore {
    async fn insert(&self, order: &Order, entry: &HistoryEntry) -> Result<()> {
        let mut tables = self.tables.write().await;

        if let Some(existing) = tables.orders.get(&order.id()) {
            return Err(StoreError::ConcurrencyConflict {
                order_id: order.id(),
                expected: Version::initial(),
                actual: existing.version(),
            });
        }
        // Unique constraint simulation
        if tables
            .orders
            .values()
            .any(|o| o.order_number() == order.order_number())
        {
            return Err(StoreError::DuplicateOrderNumber(order.order_number()));
        }

        tables.orders.insert(order.id(), order.clone());
        tables
            .history
            .entry(order.id())
            .or_default()
            .push(entry.clone());

        Ok(())
    }

    async fn save(
        &self,
        order: &Order,
        expected: Version,
        entry: Option<&HistoryEntry>,
    ) -> Result<()> {
        let mut tables = self.tables.write().await;

        let current = tables
            .orders
            .get(&order.id())
            .map(Order::version)
            .ok_or(StoreError::OrderNotFound(order.id()))?;

        if current != expected {
            return Err(StoreError::ConcurrencyConflict {
                order_id: order.id(),
                expected,
                actual: current,
            });
        }

        tables.orders.insert(order.id(), order.clone());
        if let Some(entry) = entry {
            tables
                .history
                .entry(order.id())
                .or_default()
                .push(entry.clone());
        }

        Ok(())
    }

    async fn get(&self, order_id: OrderId) -> Result<Option<Order>> {
        Ok(self.tables.read().await.orders.get(&order_id).cloned())
    }

    async fn find_by_item(&self, item_id: ItemId) -> Result<Option<Order>> {
        let tables = self.tables.read().await;
        Ok(tables
            .orders
            .values()
            .find(|order| order.item(item_id).is_some())
            .cloned())
    }

    async fn list(&self, query: &OrderQuery) -> Result<Vec<Order>> {
        let tables = self.tables.read().await;
        let mut orders: Vec<_> = tables
            .orders
            .values()
            .filter(|order| query.matches(order))
            .cloned()
            .collect();

        orders.sort_by(|a, b| {
            a.created_at()
                .cmp(&b.created_at())
                .then(a.order_number().cmp(&b.order_number()))
        });
        if query.sort == SortOrder::NewestFirst {
            orders.reverse();
        }

        // Apply offset and limit
        let orders = orders
            .into_iter()
            .skip(query.offset.unwrap_or(0))
            .take(query.limit.unwrap_or(usize::MAX))
            .collect();

        Ok(orders)
    }

    async fn count_created_since(&self, since: DateTime<Utc>) -> Result<u64> {
        let tables = self.tables.read().await;
        let count = tables
            .orders
            .values()
            .filter(|order| order.created_at() >= since)
            .count();
        Ok(count as u64)
    }
}

#[async_trait]
impl HistoryLedger for InMemoryOrderStore {
    async fn list_for_order(&self, order_id: OrderId) -> Result<Vec<HistoryEntry>> {
        let tables = self.tables.read().await;
        let mut entries = tables.history.get(&order_id).cloned().unwrap_or_default();
        entries.sort_by(|a, b| {
            a.changed_at
                .cmp(&b.changed_at)
                .then(a.sequence.cmp(&b.sequence))
        });
        Ok(entries)
    }
}
