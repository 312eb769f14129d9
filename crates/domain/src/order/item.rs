//! Order lines and their fulfillment quantities.

use chrono::{DateTime, Utc};
use common::{ItemId, OrderId};
use serde::{Deserialize, Serialize};

use super::{CatalogItemId, ItemSnapshot, Money, OrderError, OrderStatus};

/// Fulfillment status of a line, derived from its quantities.
///
/// Never stored; see [`OrderItem::status`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ItemStatus {
    Pending,
    PartiallyFulfilled,
    Fulfilled,
    Cancelled,
}

impl ItemStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ItemStatus::Pending => "PENDING",
            ItemStatus::PartiallyFulfilled => "PARTIALLY_FULFILLED",
            ItemStatus::Fulfilled => "FULFILLED",
            ItemStatus::Cancelled => "CANCELLED",
        }
    }
}

impl std::fmt::Display for ItemStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One of the reconciled quantities tracked after `quantity_requested`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum QuantityStage {
    Approved,
    Packed,
    Delivered,
}

impl QuantityStage {
    /// Field name used in messages and on the wire.
    pub fn field(&self) -> &'static str {
        match self {
            QuantityStage::Approved => "quantity_approved",
            QuantityStage::Packed => "quantity_packed",
            QuantityStage::Delivered => "quantity_delivered",
        }
    }

    /// The stage whose quantity a transition into `target` may carry.
    pub fn entered_by(target: OrderStatus) -> Option<QuantityStage> {
        match target {
            OrderStatus::Approved => Some(QuantityStage::Approved),
            OrderStatus::Packed => Some(QuantityStage::Packed),
            OrderStatus::Delivered => Some(QuantityStage::Delivered),
            _ => None,
        }
    }

    /// Returns true if this quantity may be edited directly while the order
    /// is in `status`.
    ///
    /// Approval figures are editable only once approved, packing figures
    /// while packing is under way, delivery figures while goods are packed
    /// or on the way.
    pub fn editable_in(&self, status: OrderStatus) -> bool {
        match self {
            QuantityStage::Approved => matches!(status, OrderStatus::Approved),
            QuantityStage::Packed => matches!(status, OrderStatus::Approved | OrderStatus::Packed),
            QuantityStage::Delivered => matches!(status, OrderStatus::Packed | OrderStatus::Sent),
        }
    }
}

/// Partial update of one line. `None` fields are left unchanged.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemUpdate {
    pub quantity_approved: Option<u32>,
    pub quantity_packed: Option<u32>,
    pub quantity_delivered: Option<u32>,
    pub notes: Option<String>,
}

impl ItemUpdate {
    /// Sets a single stage quantity.
    pub fn quantity(stage: QuantityStage, quantity: u32) -> Self {
        let mut update = Self::default();
        update.set(stage, quantity);
        update
    }

    pub fn set(&mut self, stage: QuantityStage, quantity: u32) {
        match stage {
            QuantityStage::Approved => self.quantity_approved = Some(quantity),
            QuantityStage::Packed => self.quantity_packed = Some(quantity),
            QuantityStage::Delivered => self.quantity_delivered = Some(quantity),
        }
    }

    /// Stage quantities present in this update.
    pub fn stages(&self) -> impl Iterator<Item = QuantityStage> + '_ {
        [
            (QuantityStage::Approved, self.quantity_approved),
            (QuantityStage::Packed, self.quantity_packed),
            (QuantityStage::Delivered, self.quantity_delivered),
        ]
        .into_iter()
        .filter_map(|(stage, quantity)| quantity.map(|_| stage))
    }

    pub fn is_empty(&self) -> bool {
        self.stages().next().is_none() && self.notes.is_none()
    }
}

/// A line of a supply order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderItem {
    pub id: ItemId,
    pub order_id: OrderId,
    pub catalog_item_id: CatalogItemId,
    pub snapshot: ItemSnapshot,
    pub quantity_requested: u32,
    pub quantity_approved: Option<u32>,
    pub quantity_packed: Option<u32>,
    pub quantity_delivered: Option<u32>,
    /// `quantity_requested × unit_price`, fixed when the line is created.
    pub total_price: Money,
    pub notes: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl OrderItem {
    /// Creates a new line for `order_id` from a catalog snapshot.
    pub fn new(
        order_id: OrderId,
        catalog_item_id: CatalogItemId,
        snapshot: ItemSnapshot,
        quantity_requested: u32,
        notes: Option<String>,
        now: DateTime<Utc>,
    ) -> Result<Self, OrderError> {
        if quantity_requested == 0 {
            return Err(OrderError::InvalidQuantity {
                field: "quantity_requested",
                quantity: 0,
            });
        }
        if snapshot.unit_price.is_negative() {
            return Err(OrderError::InvalidPrice {
                cents: snapshot.unit_price.cents(),
            });
        }

        let total_price = snapshot.unit_price.multiply(quantity_requested).ok_or(
            OrderError::LineTotalOverflow {
                unit_cents: snapshot.unit_price.cents(),
                quantity: quantity_requested,
            },
        )?;
        Ok(Self {
            id: ItemId::new(),
            order_id,
            catalog_item_id,
            snapshot,
            quantity_requested,
            quantity_approved: None,
            quantity_packed: None,
            quantity_delivered: None,
            total_price,
            notes: normalize_text(notes),
            created_at: now,
        })
    }

    /// Current value of a stage quantity, if it was ever set.
    pub fn quantity(&self, stage: QuantityStage) -> Option<u32> {
        match stage {
            QuantityStage::Approved => self.quantity_approved,
            QuantityStage::Packed => self.quantity_packed,
            QuantityStage::Delivered => self.quantity_delivered,
        }
    }

    /// Fulfillment status derived from the quantities.
    pub fn status(&self) -> ItemStatus {
        let delivered = self.quantity_delivered.unwrap_or(0);
        if self.quantity_approved == Some(0) {
            ItemStatus::Cancelled
        } else if delivered >= self.quantity_requested {
            ItemStatus::Fulfilled
        } else if delivered > 0 {
            ItemStatus::PartiallyFulfilled
        } else {
            ItemStatus::Pending
        }
    }

    /// Checks that applying `update` keeps the quantity chain intact.
    pub fn check_update(&self, update: &ItemUpdate) -> Result<(), OrderError> {
        let approved = update.quantity_approved.or(self.quantity_approved);
        let packed = update.quantity_packed.or(self.quantity_packed);
        let delivered = update.quantity_delivered.or(self.quantity_delivered);
        check_quantities(self.id, self.quantity_requested, approved, packed, delivered)
    }

    pub(crate) fn apply_update(&mut self, update: &ItemUpdate) {
        if let Some(q) = update.quantity_approved {
            self.quantity_approved = Some(q);
        }
        if let Some(q) = update.quantity_packed {
            self.quantity_packed = Some(q);
        }
        if let Some(q) = update.quantity_delivered {
            self.quantity_delivered = Some(q);
        }
        if update.notes.is_some() {
            self.notes = normalize_text(update.notes.clone());
        }
    }
}

/// Verifies `requested ≥ approved ≥ packed ≥ delivered`, unset counting as 0.
pub fn check_quantities(
    item_id: ItemId,
    requested: u32,
    approved: Option<u32>,
    packed: Option<u32>,
    delivered: Option<u32>,
) -> Result<(), OrderError> {
    let chain = [
        ("quantity_requested", requested),
        ("quantity_approved", approved.unwrap_or(0)),
        ("quantity_packed", packed.unwrap_or(0)),
        ("quantity_delivered", delivered.unwrap_or(0)),
    ];

    for pair in chain.windows(2) {
        let (limit_field, limit) = pair[0];
        let (field, quantity) = pair[1];
        if quantity > limit {
            return Err(OrderError::QuantityInvariant {
                item_id,
                field,
                quantity,
                limit_field,
                limit,
            });
        }
    }
    Ok(())
}

/// Trims free text; blank becomes `None`.
pub(crate) fn normalize_text(text: Option<String>) -> Option<String> {
    text.map(|t| t.trim().to_string()).filter(|t| !t.is_empty())
}
