//! Fulfillment service: the operations behind the public API.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use common::{ItemId, OrderId};
use domain::{
    DeliveredFact, HistoryEntry, ItemSnapshot, ItemUpdate, NewItem, NewOrder, Order, OrderError,
    OrderEvent, OrderHeader, OrderItem, OrderNumber, OrderStatus, TransitionCommand, year_start,
};
use order_store::{HistoryLedger, OrderQuery, OrderStore, StoreError};

use crate::catalog::Catalog;
use crate::delivery::DeliverySink;
use crate::error::{FulfillmentError, Result};

/// Tunables of the fulfillment service.
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    /// Extra attempts after an order number collision.
    pub order_number_max_retries: u32,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            order_number_max_retries: 5,
        }
    }
}

/// Result of a persisted change.
#[derive(Debug)]
pub struct CommandResult {
    /// The order after applying the event.
    pub order: Order,

    /// The event that was decided and persisted.
    pub event: OrderEvent,

    /// Ledger entry written with the change, for status transitions.
    pub history: Option<HistoryEntry>,
}

/// Service for managing supply orders.
///
/// Every mutation follows the same path: load the order, let the aggregate
/// decide, then persist order and ledger entry in one write guarded by the
/// version the decision was made against. Notifications leave only after
/// that write committed.
pub struct FulfillmentService<S> {
    store: S,
    catalog: Arc<dyn Catalog>,
    delivery: Arc<dyn DeliverySink>,
    config: ServiceConfig,
}

impl<S> FulfillmentService<S>
where
    S: OrderStore + HistoryLedger,
{
    /// Creates a new service with default configuration.
    pub fn new(store: S, catalog: Arc<dyn Catalog>, delivery: Arc<dyn DeliverySink>) -> Self {
        Self {
            store,
            catalog,
            delivery,
            config: ServiceConfig::default(),
        }
    }

    pub fn with_config(mut self, config: ServiceConfig) -> Self {
        self.config = config;
        self
    }

    /// Returns a reference to the underlying store.
    pub fn store(&self) -> &S {
        &self.store
    }

    /// Creates a new order in `PENDING`.
    pub async fn create_order(&self, input: NewOrder) -> Result<Order> {
        self.create_order_at(input, Utc::now()).await
    }

    /// Creates a new order as of `now`, which also picks the numbering year.
    #[tracing::instrument(skip(self, input), fields(department_id = %input.header.department_id))]
    pub async fn create_order_at(&self, input: NewOrder, now: DateTime<Utc>) -> Result<Order> {
        input.check_items()?;
        let header = input.header.validated()?;

        let mut lines = Vec::with_capacity(input.items.len());
        for item in &input.items {
            lines.push((item, self.snapshot_for(item).await?));
        }

        let attempts = self.config.order_number_max_retries + 1;
        for attempt in 1..=attempts {
            let created_this_year = self.store.count_created_since(year_start(now)).await?;
            let order_number = OrderNumber::next(now, created_this_year);

            let order_id = OrderId::new();
            let items = lines
                .iter()
                .map(|(item, snapshot)| {
                    OrderItem::new(
                        order_id,
                        item.catalog_item_id.clone(),
                        snapshot.clone(),
                        item.quantity_requested,
                        item.notes.clone(),
                        now,
                    )
                })
                .collect::<std::result::Result<Vec<_>, _>>()?;
            let order = Order::create(
                order_id,
                order_number,
                header.clone(),
                items,
                input.created_by.clone(),
                now,
            )?;

            match self.store.insert(&order, &order.creation_entry()).await {
                Ok(()) => {
                    metrics::counter!("fulfillment_orders_created_total").increment(1);
                    tracing::info!(
                        order_id = %order.id(),
                        order_number = %order.order_number(),
                        lines = order.items().len(),
                        "order created"
                    );
                    return Ok(order);
                }
                Err(StoreError::DuplicateOrderNumber(taken)) => {
                    metrics::counter!("fulfillment_order_number_retries_total").increment(1);
                    tracing::debug!(%taken, attempt, "order number taken, recounting");
                }
                Err(err) => return Err(err.into()),
            }
        }

        Err(FulfillmentError::OrderNumberExhausted { attempts })
    }

    /// Retrieves an order by ID.
    pub async fn get_order(&self, order_id: OrderId) -> Result<Order> {
        self.load(order_id).await
    }

    /// Retrieves orders matching a query.
    pub async fn list_orders(&self, query: &OrderQuery) -> Result<Vec<Order>> {
        Ok(self.store.list(query).await?)
    }

    /// Ledger of an order, oldest entry first.
    pub async fn history(&self, order_id: OrderId) -> Result<Vec<HistoryEntry>> {
        self.load(order_id).await?;
        Ok(self.store.list_for_order(order_id).await?)
    }

    /// The delivery fact of a delivered order, for polling consumers.
    pub async fn delivery_fact(&self, order_id: OrderId) -> Result<DeliveredFact> {
        let order = self.load(order_id).await?;
        order
            .delivered_fact()
            .ok_or(FulfillmentError::NotDelivered(order_id))
    }

    /// Replaces the header of a pending order.
    #[tracing::instrument(skip(self, header))]
    pub async fn replace_header(&self, order_id: OrderId, header: OrderHeader) -> Result<Order> {
        let result = self
            .execute(order_id, |order, now| order.replace_header(header, now))
            .await?;
        Ok(result.order)
    }

    /// Appends a line to a pending order.
    #[tracing::instrument(skip(self, item), fields(catalog_item_id = %item.catalog_item_id))]
    pub async fn add_item(&self, order_id: OrderId, item: NewItem) -> Result<OrderItem> {
        let order = self.load(order_id).await?;
        if !order.status().can_modify_items() {
            return Err(FulfillmentError::Order(OrderError::Locked {
                status: order.status(),
                action: "add item",
            }));
        }

        let snapshot = self.snapshot_for(&item).await?;
        let line = OrderItem::new(
            order_id,
            item.catalog_item_id,
            snapshot,
            item.quantity_requested,
            item.notes,
            Utc::now(),
        )?;
        let item_id = line.id;

        let result = self
            .execute(order_id, |order, _| order.add_item(line))
            .await?;

        result
            .order
            .item(item_id)
            .cloned()
            .ok_or(FulfillmentError::ItemNotFound(item_id))
    }

    /// Removes a line from a pending order.
    #[tracing::instrument(skip(self))]
    pub async fn remove_item(&self, item_id: ItemId) -> Result<Order> {
        let order_id = self.owner_of(item_id).await?;
        let result = self
            .execute(order_id, |order, now| order.remove_item(item_id, now))
            .await?;
        Ok(result.order)
    }

    /// Changes quantities and/or notes of one line.
    #[tracing::instrument(skip(self, update))]
    pub async fn update_item(&self, item_id: ItemId, update: ItemUpdate) -> Result<OrderItem> {
        let order_id = self.owner_of(item_id).await?;
        let result = self
            .execute(order_id, |order, now| order.update_item(item_id, update, now))
            .await?;

        result
            .order
            .item(item_id)
            .cloned()
            .ok_or(FulfillmentError::ItemNotFound(item_id))
    }

    /// Moves an order to another status.
    #[tracing::instrument(
        skip(self, command),
        fields(actor = %command.actor, to = %command.transition.target())
    )]
    pub async fn transition(&self, order_id: OrderId, command: TransitionCommand) -> Result<Order> {
        let result = self
            .execute(order_id, |order, now| order.transition(&command, now))
            .await?;

        let Some(change) = result.event.status_change() else {
            return Ok(result.order);
        };

        metrics::counter!("fulfillment_transitions_total", "to" => change.to.as_str())
            .increment(1);
        tracing::info!(
            order_id = %order_id,
            order_number = %result.order.order_number(),
            from = %change.from,
            to = %change.to,
            actor = %change.actor,
            "order status changed"
        );

        if change.to == OrderStatus::Delivered
            && let Some(fact) = result.order.delivered_fact()
        {
            self.publish_delivery(&fact).await;
        }

        Ok(result.order)
    }

    /// Cancels an order; shorthand for a transition to `CANCELLED`.
    pub async fn cancel(
        &self,
        order_id: OrderId,
        actor: impl Into<String>,
        notes: Option<String>,
    ) -> Result<Order> {
        let mut command = TransitionCommand::cancel(actor);
        command.notes = notes;
        self.transition(order_id, command).await
    }

    /// Loads an order, decides, and persists the resulting event together
    /// with its ledger entry.
    async fn execute<F>(&self, order_id: OrderId, decide: F) -> Result<CommandResult>
    where
        F: FnOnce(&Order, DateTime<Utc>) -> std::result::Result<OrderEvent, OrderError>,
    {
        let mut order = self.load(order_id).await?;
        let expected = order.version();

        let event = decide(&order, Utc::now())?;
        order.apply(event.clone());

        let history = event
            .status_change()
            .map(|change| HistoryEntry::for_status_change(order.id(), order.version(), change));

        // Persist with optimistic concurrency
        self.store.save(&order, expected, history.as_ref()).await?;

        tracing::debug!(
            order_id = %order_id,
            event_type = event.event_type(),
            version = %order.version(),
            "order change persisted"
        );

        Ok(CommandResult {
            order,
            event,
            history,
        })
    }

    async fn load(&self, order_id: OrderId) -> Result<Order> {
        self.store
            .get(order_id)
            .await?
            .ok_or(FulfillmentError::OrderNotFound(order_id))
    }

    async fn owner_of(&self, item_id: ItemId) -> Result<OrderId> {
        self.store
            .find_by_item(item_id)
            .await?
            .map(|order| order.id())
            .ok_or(FulfillmentError::ItemNotFound(item_id))
    }

    async fn snapshot_for(&self, item: &NewItem) -> Result<ItemSnapshot> {
        let catalog_item = self
            .catalog
            .lookup(&item.catalog_item_id)
            .await?
            .ok_or_else(|| FulfillmentError::UnknownCatalogItem(item.catalog_item_id.clone()))?;
        Ok(catalog_item.snapshot())
    }

    async fn publish_delivery(&self, fact: &DeliveredFact) {
        if let Err(err) = self.delivery.publish(fact).await {
            // The transition is committed; the fact stays pollable.
            metrics::counter!("fulfillment_delivery_publish_failures_total").increment(1);
            tracing::warn!(
                order_id = %fact.order_id,
                error = %err,
                "failed to publish delivery fact"
            );
        }
    }
}
