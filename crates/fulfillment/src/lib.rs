//! Fulfillment service for internal supply orders.
//!
//! Orchestrates every operation on an order: validation, the aggregate's
//! decision, one atomic write of order plus ledger entry, and the
//! post-commit delivery notification. Also owns order numbering and the
//! collaborator traits for the item catalog and the stock-side delivery sink.

pub mod catalog;
pub mod delivery;
pub mod error;
pub mod service;

pub use catalog::{Catalog, CatalogItem, InMemoryCatalog};
pub use delivery::{DeliverySink, InMemoryDeliverySink, LoggingDeliverySink};
pub use error::{FulfillmentError, Result};
pub use service::{CommandResult, FulfillmentService, ServiceConfig};
