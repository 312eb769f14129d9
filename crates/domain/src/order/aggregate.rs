//! Order aggregate implementation.

use std::collections::HashSet;

use chrono::{DateTime, Utc};
use common::{ItemId, OrderId, Version};
use serde::{Deserialize, Serialize};

use crate::history::HistoryEntry;

use super::item::normalize_text;
use super::{
    DeliveredFact, DeliveredLine, HeaderReplacedData, ItemAddedData, ItemRemovedData, ItemUpdate,
    ItemUpdatedData, Money, OrderError, OrderEvent, OrderHeader, OrderItem, OrderNumber,
    OrderStatus, QuantityStage, Stamp, StatusChangedData, Transition, TransitionCommand,
};

/// Order aggregate root.
///
/// Holds the header, the lines and the lifecycle stamps of one supply order.
/// Commands are decided against `&self` and return an [`OrderEvent`]; the
/// event is applied with [`Order::apply`] only once it has been accepted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Order {
    id: OrderId,
    order_number: OrderNumber,

    /// Current version for optimistic concurrency.
    version: Version,

    status: OrderStatus,
    header: OrderHeader,

    /// Lines in insertion order.
    items: Vec<OrderItem>,

    created_by: String,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,

    approved: Option<Stamp>,
    packed: Option<Stamp>,
    sent: Option<Stamp>,
    /// `by` is the recipient (`delivered_to`).
    delivered: Option<Stamp>,
    delivery_notes: Option<String>,
    cancelled: Option<Stamp>,
}

impl Order {
    /// Creates a pending order at version 1.
    ///
    /// `items` must have been built for `id`. `created_by` defaults to the
    /// requester name.
    pub fn create(
        id: OrderId,
        order_number: OrderNumber,
        header: OrderHeader,
        items: Vec<OrderItem>,
        created_by: Option<String>,
        now: DateTime<Utc>,
    ) -> Result<Self, OrderError> {
        let header = header.validated()?;

        if items.is_empty() {
            return Err(OrderError::NoItems);
        }
        if items.iter().any(|item| item.order_id != id) {
            return Err(OrderError::InvalidField {
                field: "items",
                reason: "item belongs to another order".to_string(),
            });
        }

        let created_by = normalize_text(created_by).unwrap_or_else(|| header.requester_name.clone());

        Ok(Self {
            id,
            order_number,
            version: Version::first(),
            status: OrderStatus::Pending,
            header,
            items,
            created_by,
            created_at: now,
            updated_at: now,
            approved: None,
            packed: None,
            sent: None,
            delivered: None,
            delivery_notes: None,
            cancelled: None,
        })
    }

    /// The `(null → PENDING)` ledger entry written with the order.
    pub fn creation_entry(&self) -> HistoryEntry {
        HistoryEntry::append(
            self.id,
            Version::first(),
            None,
            OrderStatus::Pending,
            self.created_by.clone(),
            None,
            self.created_at,
        )
    }
}

// Query methods
impl Order {
    pub fn id(&self) -> OrderId {
        self.id
    }

    pub fn order_number(&self) -> OrderNumber {
        self.order_number
    }

    pub fn version(&self) -> Version {
        self.version
    }

    pub fn status(&self) -> OrderStatus {
        self.status
    }

    pub fn header(&self) -> &OrderHeader {
        &self.header
    }

    pub fn items(&self) -> &[OrderItem] {
        &self.items
    }

    /// Returns a line by ID.
    pub fn item(&self, item_id: ItemId) -> Option<&OrderItem> {
        self.items.iter().find(|item| item.id == item_id)
    }

    pub fn created_by(&self) -> &str {
        &self.created_by
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }

    pub fn approved(&self) -> Option<&Stamp> {
        self.approved.as_ref()
    }

    pub fn packed(&self) -> Option<&Stamp> {
        self.packed.as_ref()
    }

    pub fn sent(&self) -> Option<&Stamp> {
        self.sent.as_ref()
    }

    pub fn delivered(&self) -> Option<&Stamp> {
        self.delivered.as_ref()
    }

    pub fn delivery_notes(&self) -> Option<&str> {
        self.delivery_notes.as_deref()
    }

    pub fn cancelled(&self) -> Option<&Stamp> {
        self.cancelled.as_ref()
    }

    /// Sum of the line totals fixed at creation.
    pub fn total_price(&self) -> Money {
        self.items
            .iter()
            .fold(Money::zero(), |total, item| total + item.total_price)
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Re-checks the quantity chain of every line.
    pub fn check_invariants(&self) -> Result<(), OrderError> {
        self.items.iter().try_for_each(|item| item.check_update(&ItemUpdate::default()))
    }

    /// The fact handed to the stock collaborator, once delivered.
    pub fn delivered_fact(&self) -> Option<DeliveredFact> {
        let delivered = self.delivered.as_ref()?;
        if self.status != OrderStatus::Delivered {
            return None;
        }

        Some(DeliveredFact {
            order_id: self.id,
            order_number: self.order_number,
            delivered_to: delivered.by.clone(),
            delivered_at: delivered.at,
            items: self
                .items
                .iter()
                .map(|item| DeliveredLine {
                    item_id: item.id,
                    catalog_item_id: item.catalog_item_id.clone(),
                    item_code: item.snapshot.code.clone(),
                    quantity_delivered: item.quantity_delivered.unwrap_or(0),
                })
                .collect(),
        })
    }
}

// Command methods (return events)
impl Order {
    /// Replaces the mutable header fields.
    pub fn replace_header(
        &self,
        header: OrderHeader,
        now: DateTime<Utc>,
    ) -> Result<OrderEvent, OrderError> {
        self.ensure_pending("replace header")?;
        let header = header.validated()?;

        Ok(OrderEvent::HeaderReplaced(HeaderReplacedData {
            header,
            replaced_at: now,
        }))
    }

    /// Appends a line built for this order.
    pub fn add_item(&self, item: OrderItem) -> Result<OrderEvent, OrderError> {
        self.ensure_pending("add item")?;

        if item.order_id != self.id {
            return Err(OrderError::InvalidField {
                field: "order_id",
                reason: format!("item was built for order {}", item.order_id),
            });
        }
        if item.quantity_requested == 0 {
            return Err(OrderError::InvalidQuantity {
                field: "quantity_requested",
                quantity: 0,
            });
        }

        Ok(OrderEvent::ItemAdded(ItemAddedData { item }))
    }

    /// Removes a line. The last line cannot be removed.
    pub fn remove_item(&self, item_id: ItemId, now: DateTime<Utc>) -> Result<OrderEvent, OrderError> {
        self.ensure_pending("remove item")?;

        if self.item(item_id).is_none() {
            return Err(OrderError::ItemNotFound { item_id });
        }
        if self.items.len() == 1 {
            return Err(OrderError::LastItem);
        }

        Ok(OrderEvent::ItemRemoved(ItemRemovedData {
            item_id,
            removed_at: now,
        }))
    }

    /// Changes quantities and/or notes of one line.
    ///
    /// The whole update is rejected if any quantity is outside its edit
    /// window or would break the quantity chain.
    pub fn update_item(
        &self,
        item_id: ItemId,
        update: ItemUpdate,
        now: DateTime<Utc>,
    ) -> Result<OrderEvent, OrderError> {
        let item = self
            .item(item_id)
            .ok_or(OrderError::ItemNotFound { item_id })?;

        if update.is_empty() {
            return Err(OrderError::EmptyUpdate);
        }
        if self.status.is_terminal() {
            return Err(OrderError::Locked {
                status: self.status,
                action: "update item",
            });
        }
        if let Some(stage) = update.stages().find(|stage| !stage.editable_in(self.status)) {
            return Err(OrderError::QuantityNotEditable {
                field: stage.field(),
                status: self.status,
            });
        }

        item.check_update(&update)?;

        Ok(OrderEvent::ItemUpdated(ItemUpdatedData {
            item_id,
            update,
            updated_at: now,
        }))
    }

    /// Moves the order to the transition's target status.
    pub fn transition(
        &self,
        command: &TransitionCommand,
        now: DateTime<Utc>,
    ) -> Result<OrderEvent, OrderError> {
        let actor = normalize_text(Some(command.actor.clone()))
            .ok_or(OrderError::MissingField { field: "actor" })?;
        let to = command.transition.target();

        if !self.status.can_transition_to(to) {
            return Err(OrderError::InvalidTransition {
                from: self.status,
                to,
            });
        }

        let (stage_actor, delivery_notes) = match &command.transition {
            Transition::Approve { approved_by, .. } => {
                (normalize_text(approved_by.clone()).unwrap_or_else(|| actor.clone()), None)
            }
            Transition::Pack { packed_by, .. } => {
                (normalize_text(packed_by.clone()).unwrap_or_else(|| actor.clone()), None)
            }
            Transition::Send { sent_by } => {
                (normalize_text(sent_by.clone()).unwrap_or_else(|| actor.clone()), None)
            }
            Transition::Deliver {
                delivered_to,
                delivery_notes,
                ..
            } => {
                let delivered_to = normalize_text(Some(delivered_to.clone()))
                    .ok_or(OrderError::MissingField {
                        field: "delivered_to",
                    })?;
                (delivered_to, normalize_text(delivery_notes.clone()))
            }
            Transition::Cancel => (actor.clone(), None),
        };

        let quantities = command.transition.quantities();
        if let Some(stage) = QuantityStage::entered_by(to) {
            let mut seen = HashSet::new();
            for entry in quantities {
                if !seen.insert(entry.item_id) {
                    return Err(OrderError::DuplicateItem {
                        item_id: entry.item_id,
                    });
                }
                let item = self.item(entry.item_id).ok_or(OrderError::ItemNotFound {
                    item_id: entry.item_id,
                })?;
                item.check_update(&ItemUpdate::quantity(stage, entry.quantity))?;
            }
        }

        Ok(OrderEvent::StatusChanged(StatusChangedData {
            from: self.status,
            to,
            actor,
            stage_actor,
            delivery_notes,
            notes: normalize_text(command.notes.clone()),
            quantities: quantities.to_vec(),
            changed_at: now,
        }))
    }

    fn ensure_pending(&self, action: &'static str) -> Result<(), OrderError> {
        if self.status.can_modify_items() {
            Ok(())
        } else {
            Err(OrderError::Locked {
                status: self.status,
                action,
            })
        }
    }
}

// Apply event helpers
impl Order {
    /// Applies an accepted event and bumps the version.
    pub fn apply(&mut self, event: OrderEvent) {
        self.version = self.version.next();
        self.updated_at = event.occurred_at();

        match event {
            OrderEvent::HeaderReplaced(data) => self.header = data.header,
            OrderEvent::ItemAdded(data) => self.items.push(data.item),
            OrderEvent::ItemRemoved(data) => self.items.retain(|item| item.id != data.item_id),
            OrderEvent::ItemUpdated(data) => {
                if let Some(item) = self.item_mut(data.item_id) {
                    item.apply_update(&data.update);
                }
            }
            OrderEvent::StatusChanged(data) => self.apply_status_changed(data),
        }
    }

    fn apply_status_changed(&mut self, data: StatusChangedData) {
        if let Some(stage) = QuantityStage::entered_by(data.to) {
            for entry in &data.quantities {
                if let Some(item) = self.item_mut(entry.item_id) {
                    item.apply_update(&ItemUpdate::quantity(stage, entry.quantity));
                }
            }
        }

        let stamp = Some(Stamp::new(data.stage_actor, data.changed_at));
        match data.to {
            OrderStatus::Approved => self.approved = stamp,
            OrderStatus::Packed => self.packed = stamp,
            OrderStatus::Sent => self.sent = stamp,
            OrderStatus::Delivered => {
                self.delivered = stamp;
                self.delivery_notes = data.delivery_notes;
            }
            OrderStatus::Cancelled => self.cancelled = stamp,
            OrderStatus::Pending => {}
        }
        self.status = data.to;
    }

    fn item_mut(&mut self, item_id: ItemId) -> Option<&mut OrderItem> {
        self.items.iter_mut().find(|item| item.id == item_id)
    }
}
