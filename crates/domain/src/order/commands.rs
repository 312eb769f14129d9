//! Order commands.

use common::ItemId;
use serde::{Deserialize, Serialize};

use super::item::{QuantityStage, normalize_text};
use super::{CatalogItemId, OrderError, OrderStatus, Priority};

/// Mutable header fields of an order.
///
/// Replaced as a whole while the order is pending; never touches status or
/// quantities.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderHeader {
    pub department_id: String,
    pub department_name: String,
    pub requester_name: String,
    pub requester_email: Option<String>,
    pub delivery_location: String,
    #[serde(default)]
    pub priority: Priority,
    pub notes: Option<String>,
}

impl OrderHeader {
    /// Trims text fields and rejects missing required ones.
    pub fn validated(self) -> Result<Self, OrderError> {
        let required = |field: &'static str, value: String| {
            let value = value.trim().to_string();
            if value.is_empty() {
                Err(OrderError::MissingField { field })
            } else {
                Ok(value)
            }
        };

        let header = Self {
            department_id: required("department_id", self.department_id)?,
            department_name: required("department_name", self.department_name)?,
            requester_name: required("requester_name", self.requester_name)?,
            requester_email: normalize_text(self.requester_email),
            delivery_location: required("delivery_location", self.delivery_location)?,
            priority: self.priority,
            notes: normalize_text(self.notes),
        };

        if let Some(email) = &header.requester_email
            && !email.contains('@')
        {
            return Err(OrderError::InvalidField {
                field: "requester_email",
                reason: format!("'{email}' is not an email address"),
            });
        }

        Ok(header)
    }
}

/// A line requested at order creation or appended while pending.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewItem {
    pub catalog_item_id: CatalogItemId,
    pub quantity_requested: u32,
    pub notes: Option<String>,
}

impl NewItem {
    pub fn new(catalog_item_id: impl Into<CatalogItemId>, quantity_requested: u32) -> Self {
        Self {
            catalog_item_id: catalog_item_id.into(),
            quantity_requested,
            notes: None,
        }
    }
}

/// Command to create a new order.
#[derive(Debug, Clone)]
pub struct NewOrder {
    pub header: OrderHeader,
    pub items: Vec<NewItem>,
    /// Actor recorded on the creation history entry; defaults to the requester.
    pub created_by: Option<String>,
}

impl NewOrder {
    pub fn new(header: OrderHeader, items: Vec<NewItem>) -> Self {
        Self {
            header,
            items,
            created_by: None,
        }
    }

    /// Rejects orders with no lines or a non-positive requested quantity.
    pub fn check_items(&self) -> Result<(), OrderError> {
        if self.items.is_empty() {
            return Err(OrderError::NoItems);
        }
        if let Some(item) = self.items.iter().find(|i| i.quantity_requested == 0) {
            return Err(OrderError::InvalidQuantity {
                field: "quantity_requested",
                quantity: item.quantity_requested,
            });
        }
        Ok(())
    }
}

/// Quantity for one line, carried by a transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemQuantity {
    pub item_id: ItemId,
    pub quantity: u32,
}

/// A status change, carrying only the fields meaningful for its target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Transition {
    Approve {
        approved_by: Option<String>,
        quantities: Vec<ItemQuantity>,
    },
    Pack {
        packed_by: Option<String>,
        quantities: Vec<ItemQuantity>,
    },
    Send {
        sent_by: Option<String>,
    },
    Deliver {
        delivered_to: String,
        delivery_notes: Option<String>,
        quantities: Vec<ItemQuantity>,
    },
    Cancel,
}

impl Transition {
    /// The status this transition moves the order into.
    pub fn target(&self) -> OrderStatus {
        match self {
            Transition::Approve { .. } => OrderStatus::Approved,
            Transition::Pack { .. } => OrderStatus::Packed,
            Transition::Send { .. } => OrderStatus::Sent,
            Transition::Deliver { .. } => OrderStatus::Delivered,
            Transition::Cancel => OrderStatus::Cancelled,
        }
    }

    /// Per-line quantities carried by this transition.
    pub fn quantities(&self) -> &[ItemQuantity] {
        match self {
            Transition::Approve { quantities, .. }
            | Transition::Pack { quantities, .. }
            | Transition::Deliver { quantities, .. } => quantities,
            Transition::Send { .. } | Transition::Cancel => &[],
        }
    }
}

/// Command to move an order to another status.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransitionCommand {
    /// Caller-supplied identity, trusted and recorded verbatim.
    pub actor: String,
    pub notes: Option<String>,
    pub transition: Transition,
}

impl TransitionCommand {
    pub fn new(actor: impl Into<String>, transition: Transition) -> Self {
        Self {
            actor: actor.into(),
            notes: None,
            transition,
        }
    }

    pub fn cancel(actor: impl Into<String>) -> Self {
        Self::new(actor, Transition::Cancel)
    }

    pub fn with_notes(mut self, notes: impl Into<String>) -> Self {
        self.notes = Some(notes.into());
        self
    }
}

/// Loosely typed transition input, as it arrives over the wire.
///
/// [`TransitionRequest::into_command`] narrows it to a [`Transition`]
/// variant and rejects fields that do not belong to the target status.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct TransitionRequest {
    pub status: Option<OrderStatus>,
    pub actor: Option<String>,
    pub notes: Option<String>,
    pub approved_by: Option<String>,
    pub packed_by: Option<String>,
    pub sent_by: Option<String>,
    pub delivered_to: Option<String>,
    pub delivery_notes: Option<String>,
    #[serde(default)]
    pub items: Vec<ItemQuantity>,
}

impl TransitionRequest {
    pub fn into_command(self) -> Result<TransitionCommand, OrderError> {
        let target = self.status.ok_or(OrderError::MissingField { field: "status" })?;
        let actor = normalize_text(self.actor).ok_or(OrderError::MissingField { field: "actor" })?;

        let stray = [
            ("approved_by", self.approved_by.is_some(), OrderStatus::Approved),
            ("packed_by", self.packed_by.is_some(), OrderStatus::Packed),
            ("sent_by", self.sent_by.is_some(), OrderStatus::Sent),
            ("delivered_to", self.delivered_to.is_some(), OrderStatus::Delivered),
            (
                "delivery_notes",
                self.delivery_notes.is_some(),
                OrderStatus::Delivered,
            ),
        ]
        .into_iter()
        .find(|(_, present, owner)| *present && *owner != target);
        if let Some((field, _, _)) = stray {
            return Err(OrderError::FieldNotAccepted { field, status: target });
        }

        if QuantityStage::entered_by(target).is_none() && !self.items.is_empty() {
            return Err(OrderError::FieldNotAccepted {
                field: "items",
                status: target,
            });
        }

        let transition = match target {
            OrderStatus::Approved => Transition::Approve {
                approved_by: normalize_text(self.approved_by),
                quantities: self.items,
            },
            OrderStatus::Packed => Transition::Pack {
                packed_by: normalize_text(self.packed_by),
                quantities: self.items,
            },
            OrderStatus::Sent => Transition::Send {
                sent_by: normalize_text(self.sent_by),
            },
            OrderStatus::Delivered => Transition::Deliver {
                delivered_to: normalize_text(self.delivered_to)
                    .ok_or(OrderError::MissingField { field: "delivered_to" })?,
                delivery_notes: normalize_text(self.delivery_notes),
                quantities: self.items,
            },
            OrderStatus::Cancelled => Transition::Cancel,
            OrderStatus::Pending => {
                return Err(OrderError::InvalidField {
                    field: "status",
                    reason: "an order cannot be moved back to PENDING".to_string(),
                });
            }
        };

        Ok(TransitionCommand {
            actor,
            notes: normalize_text(self.notes),
            transition,
        })
    }
}
