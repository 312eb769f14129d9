//! Delivery sink trait and implementations.
//!
//! A sink receives the [`DeliveredFact`] once a `DELIVERED` transition has
//! committed. Publication is at-least-once: consumers de-duplicate on
//! `order_id`.

use std::sync::{Arc, PoisonError, RwLock};

use async_trait::async_trait;
use domain::DeliveredFact;

use crate::error::FulfillmentError;

/// Trait for the stock-side consumer of delivered orders.
#[async_trait]
pub trait DeliverySink: Send + Sync {
    /// Hands over a delivered order.
    async fn publish(&self, fact: &DeliveredFact) -> Result<(), FulfillmentError>;
}

/// Sink that only logs the fact; the server default when no stock
/// collaborator is wired in. Consumers poll `GET /orders/{id}/delivery`.
#[derive(Debug, Clone, Copy, Default)]
pub struct LoggingDeliverySink;

#[async_trait]
impl DeliverySink for LoggingDeliverySink {
    async fn publish(&self, fact: &DeliveredFact) -> Result<(), FulfillmentError> {
        tracing::info!(
            order_id = %fact.order_id,
            order_number = %fact.order_number,
            lines = fact.items.len(),
            "order delivered"
        );
        Ok(())
    }
}

#[derive(Debug, Default)]
struct InMemoryDeliveryState {
    published: Vec<DeliveredFact>,
    fail_on_publish: bool,
}

/// In-memory delivery sink for testing.
#[derive(Debug, Clone, Default)]
pub struct InMemoryDeliverySink {
    state: Arc<RwLock<InMemoryDeliveryState>>,
}

impl InMemoryDeliverySink {
    /// Creates a new in-memory delivery sink.
    pub fn new() -> Self {
        Self::default()
    }

    /// Configures the sink to fail every publish call.
    pub fn set_fail_on_publish(&self, fail: bool) {
        self.state
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .fail_on_publish = fail;
    }

    /// Returns the facts published so far.
    pub fn published(&self) -> Vec<DeliveredFact> {
        self.state
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .published
            .clone()
    }
}

#[async_trait]
impl DeliverySink for InMemoryDeliverySink {
    async fn publish(&self, fact: &DeliveredFact) -> Result<(), FulfillmentError> {
        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);

        if state.fail_on_publish {
            return Err(FulfillmentError::DeliverySink(
                "stock service unavailable".to_string(),
            ));
        }

        state.published.push(fact.clone());
        Ok(())
    }
}
