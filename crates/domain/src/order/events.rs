//! Order domain events and the outbound delivery fact.

use chrono::{DateTime, Utc};
use common::{ItemId, OrderId};
use serde::{Deserialize, Serialize};

use super::{CatalogItemId, ItemQuantity, ItemUpdate, OrderHeader, OrderItem, OrderNumber, OrderStatus};

/// Changes an order can undergo after creation.
///
/// Produced by the decision methods on [`super::Order`] and applied with
/// [`super::Order::apply`]; every event bumps the order version.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum OrderEvent {
    /// Header fields were replaced while pending.
    HeaderReplaced(HeaderReplacedData),

    /// A line was appended while pending.
    ItemAdded(ItemAddedData),

    /// A line was removed while pending.
    ItemRemoved(ItemRemovedData),

    /// Quantities or notes of a line changed.
    ItemUpdated(ItemUpdatedData),

    /// The order moved to another status.
    StatusChanged(StatusChangedData),
}

impl OrderEvent {
    /// Returns the event type name, used for logs and metrics.
    pub fn event_type(&self) -> &'static str {
        match self {
            OrderEvent::HeaderReplaced(_) => "HeaderReplaced",
            OrderEvent::ItemAdded(_) => "ItemAdded",
            OrderEvent::ItemRemoved(_) => "ItemRemoved",
            OrderEvent::ItemUpdated(_) => "ItemUpdated",
            OrderEvent::StatusChanged(_) => "StatusChanged",
        }
    }

    /// Returns the status change carried by this event, if any.
    pub fn status_change(&self) -> Option<&StatusChangedData> {
        match self {
            OrderEvent::StatusChanged(data) => Some(data),
            _ => None,
        }
    }

    /// When the change was decided.
    pub fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            OrderEvent::HeaderReplaced(data) => data.replaced_at,
            OrderEvent::ItemAdded(data) => data.item.created_at,
            OrderEvent::ItemRemoved(data) => data.removed_at,
            OrderEvent::ItemUpdated(data) => data.updated_at,
            OrderEvent::StatusChanged(data) => data.changed_at,
        }
    }
}

/// Data for HeaderReplaced event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HeaderReplacedData {
    pub header: OrderHeader,
    pub replaced_at: DateTime<Utc>,
}

/// Data for ItemAdded event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemAddedData {
    pub item: OrderItem,
}

/// Data for ItemRemoved event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemRemovedData {
    pub item_id: ItemId,
    pub removed_at: DateTime<Utc>,
}

/// Data for ItemUpdated event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemUpdatedData {
    pub item_id: ItemId,
    pub update: ItemUpdate,
    pub updated_at: DateTime<Utc>,
}

/// Data for StatusChanged event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusChangedData {
    pub from: OrderStatus,
    pub to: OrderStatus,

    /// Who requested the transition.
    pub actor: String,

    /// Stage-specific actor stored on the order: `approved_by`, `packed_by`,
    /// `sent_by` or `delivered_to`. Equals `actor` for cancellation.
    pub stage_actor: String,

    pub delivery_notes: Option<String>,
    pub notes: Option<String>,

    /// Quantities for the stage being entered, applied with the transition.
    pub quantities: Vec<ItemQuantity>,

    pub changed_at: DateTime<Utc>,
}

/// Fact emitted once an order is delivered, for the stock collaborator.
///
/// Delivery is at-least-once; consumers de-duplicate on `order_id`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeliveredFact {
    pub order_id: OrderId,
    pub order_number: OrderNumber,
    pub delivered_to: String,
    pub delivered_at: DateTime<Utc>,
    pub items: Vec<DeliveredLine>,
}

/// One delivered line of a [`DeliveredFact`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeliveredLine {
    pub item_id: ItemId,
    pub catalog_item_id: CatalogItemId,
    pub item_code: String,
    pub quantity_delivered: u32,
}
