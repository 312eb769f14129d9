pub mod error;
pub mod memory;
pub mod postgres;
pub mod query;
pub mod store;

pub use error::{Result, StoreError};
pub use memory::InMemoryOrderStore;
pub use postgres::PostgresOrderStore;
pub use query::{OrderQuery, SortOrder};
pub use store::{HistoryLedger, OrderStore, OrderStoreExt};
