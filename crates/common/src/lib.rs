//! Shared types for the supply order fulfillment engine.

pub mod types;

pub use types::{HistoryEntryId, ItemId, OrderId, Version};
