//! Supply order aggregate and related types.

mod aggregate;
mod commands;
mod events;
mod item;
mod numbering;
mod state;
mod value_objects;

pub use aggregate::Order;
pub use commands::{
    ItemQuantity, NewItem, NewOrder, OrderHeader, Transition, TransitionCommand, TransitionRequest,
};
pub use events::{
    DeliveredFact, DeliveredLine, HeaderReplacedData, ItemAddedData, ItemRemovedData,
    ItemUpdatedData, OrderEvent, StatusChangedData,
};
pub use item::{ItemStatus, ItemUpdate, OrderItem, QuantityStage, check_quantities};
pub use numbering::{OrderNumber, year_start};
pub use state::OrderStatus;
pub use value_objects::{CatalogItemId, ItemSnapshot, Money, Priority, Stamp};

use common::ItemId;
use thiserror::Error;

use crate::error::ErrorKind;

/// Errors that can occur during order operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum OrderError {
    /// A required field is missing or blank.
    #[error("Missing required field: {field}")]
    MissingField { field: &'static str },

    /// A field is present but malformed.
    #[error("Invalid {field}: {reason}")]
    InvalidField { field: &'static str, reason: String },

    /// Order has no items.
    #[error("Order must contain at least one item")]
    NoItems,

    /// Removing the line would leave the order empty.
    #[error("Cannot remove the last item of an order")]
    LastItem,

    /// Invalid quantity.
    #[error("Invalid {field}: {quantity} (must be greater than 0)")]
    InvalidQuantity { field: &'static str, quantity: u32 },

    /// Catalog price is negative.
    #[error("Invalid unit price: {cents} cents")]
    InvalidPrice { cents: i64 },

    /// Unit price times quantity does not fit the money range.
    #[error("Line total overflows: {unit_cents} cents x {quantity}")]
    LineTotalOverflow { unit_cents: i64, quantity: u32 },

    /// A stage field was sent for a transition that does not use it.
    #[error("Field {field} is not accepted when moving to {status}")]
    FieldNotAccepted {
        field: &'static str,
        status: OrderStatus,
    },

    /// The same line appears twice in one request.
    #[error("Item {item_id} appears more than once")]
    DuplicateItem { item_id: ItemId },

    /// An item update carried nothing to change.
    #[error("Item update contains no changes")]
    EmptyUpdate,

    /// Status change not permitted from the current status.
    #[error("Invalid transition: cannot move from {from} to {to}")]
    InvalidTransition { from: OrderStatus, to: OrderStatus },

    /// Header or item list mutation on an order that is no longer editable.
    #[error("Cannot {action} while the order is {status}")]
    Locked {
        status: OrderStatus,
        action: &'static str,
    },

    /// Stage quantity edited outside of its window.
    #[error("{field} cannot be changed while the order is {status}")]
    QuantityNotEditable {
        field: &'static str,
        status: OrderStatus,
    },

    /// Update would break requested ≥ approved ≥ packed ≥ delivered.
    #[error("{field} {quantity} exceeds {limit_field} {limit} on item {item_id}")]
    QuantityInvariant {
        item_id: ItemId,
        field: &'static str,
        quantity: u32,
        limit_field: &'static str,
        limit: u32,
    },

    /// Item not found in order.
    #[error("Item not found: {item_id}")]
    ItemNotFound { item_id: ItemId },
}

impl OrderError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            OrderError::MissingField { .. }
            | OrderError::InvalidField { .. }
            | OrderError::NoItems
            | OrderError::LastItem
            | OrderError::InvalidQuantity { .. }
            | OrderError::InvalidPrice { .. }
            | OrderError::LineTotalOverflow { .. }
            | OrderError::FieldNotAccepted { .. }
            | OrderError::DuplicateItem { .. }
            | OrderError::EmptyUpdate => ErrorKind::Validation,
            OrderError::InvalidTransition { .. }
            | OrderError::Locked { .. }
            | OrderError::QuantityNotEditable { .. } => ErrorKind::InvalidTransition,
            OrderError::QuantityInvariant { .. } => ErrorKind::InvariantViolation,
            OrderError::ItemNotFound { .. } => ErrorKind::NotFound,
        }
    }
}
