//! Domain layer for the supply order fulfillment engine.
//!
//! This crate provides:
//! - The `Order` aggregate with its lines, quantity invariants and state machine
//! - Order numbering (`ORD-<year>-<sequence>`)
//! - History ledger entries and their replay
//! - The error taxonomy shared by every layer
//!
//! Everything here is pure; persistence lives in `order-store`.

pub mod error;
pub mod history;
pub mod order;

pub use error::{ErrorKind, ParseError};
pub use history::{HistoryEntry, ReplayError, replay};
pub use order::{
    CatalogItemId, DeliveredFact, DeliveredLine, ItemQuantity, ItemSnapshot, ItemStatus,
    ItemUpdate, Money, NewItem, NewOrder, Order, OrderError, OrderEvent, OrderHeader, OrderItem,
    OrderNumber, OrderStatus, Priority, QuantityStage, Stamp, StatusChangedData, Transition,
    TransitionCommand, TransitionRequest, check_quantities, year_start,
};
