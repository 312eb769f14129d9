//! Integration tests for the fulfillment service.
//!
//! The service runs against the in-memory store, catalog and delivery sink,
//! so these tests exercise the full command path: validation, the
//! aggregate's decision, the versioned write and post-commit notification.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Datelike, TimeZone, Utc};
use common::{ItemId, OrderId, Version};
use domain::{
    CatalogItemId, ErrorKind, HistoryEntry, ItemQuantity, ItemStatus, ItemUpdate, NewItem,
    NewOrder, Order, OrderError, OrderHeader, OrderStatus, Priority, QuantityStage, Transition,
    TransitionCommand, replay,
};
use fulfillment::{
    CatalogItem, FulfillmentError, FulfillmentService, InMemoryCatalog, InMemoryDeliverySink,
    ServiceConfig,
};
use order_store::{
    HistoryLedger, InMemoryOrderStore, OrderQuery, OrderStore, Result as StoreResult,
};

fn catalog() -> InMemoryCatalog {
    InMemoryCatalog::with_items([
        CatalogItem {
            id: CatalogItemId::new("I1"),
            code: "GLV-M".to_string(),
            name: "Nitrile gloves (M)".to_string(),
            description: Some("Powder free".to_string()),
            category: Some("Consumables".to_string()),
            unit: "box".to_string(),
            unit_price_cents: 500,
        },
        CatalogItem {
            id: CatalogItemId::new("I2"),
            code: "SYR-5".to_string(),
            name: "Syringe 5 ml".to_string(),
            description: None,
            category: Some("Consumables".to_string()),
            unit: "pack".to_string(),
            unit_price_cents: 1250,
        },
    ])
}

fn header() -> OrderHeader {
    OrderHeader {
        department_id: "ward-3".to_string(),
        department_name: "Ward 3".to_string(),
        requester_name: "Nurse Joy".to_string(),
        requester_email: None,
        delivery_location: "Ward 3 store room".to_string(),
        priority: Priority::High,
        notes: None,
    }
}

fn new_order(lines: &[(&str, u32)]) -> NewOrder {
    NewOrder::new(
        header(),
        lines
            .iter()
            .map(|(id, quantity)| NewItem::new(*id, *quantity))
            .collect(),
    )
}

struct Harness {
    service: Arc<FulfillmentService<InMemoryOrderStore>>,
    store: InMemoryOrderStore,
    catalog: InMemoryCatalog,
    delivery: InMemoryDeliverySink,
}

impl Harness {
    fn new() -> Self {
        let store = InMemoryOrderStore::new();
        let catalog = catalog();
        let delivery = InMemoryDeliverySink::new();
        let service = FulfillmentService::new(
            store.clone(),
            Arc::new(catalog.clone()),
            Arc::new(delivery.clone()),
        );
        Self {
            service: Arc::new(service),
            store,
            catalog,
            delivery,
        }
    }

    async fn history(&self, order_id: OrderId) -> Vec<HistoryEntry> {
        self.store.list_for_order(order_id).await.unwrap()
    }

    async fn approve(&self, order: &Order, quantity: u32) -> Order {
        let item_id = order.items()[0].id;
        self.service
            .transition(
                order.id(),
                TransitionCommand::new(
                    "mgr1",
                    Transition::Approve {
                        approved_by: None,
                        quantities: vec![ItemQuantity { item_id, quantity }],
                    },
                ),
            )
            .await
            .unwrap()
    }
}

fn notes_update(notes: &str) -> ItemUpdate {
    ItemUpdate {
        notes: Some(notes.to_string()),
        ..Default::default()
    }
}

fn deliver(item_id: ItemId, quantity: u32) -> TransitionCommand {
    TransitionCommand::new(
        "driver7",
        Transition::Deliver {
            delivered_to: "Nurse Joy".to_string(),
            delivery_notes: Some("left at the desk".to_string()),
            quantities: vec![ItemQuantity { item_id, quantity }],
        },
    )
}

mod lifecycle {
    use super::*;

    #[tokio::test]
    async fn create_order_starts_pending_with_one_history_entry() {
        let h = Harness::new();
        let now = Utc::now();

        let order = h
            .service
            .create_order_at(new_order(&[("I1", 10)]), now)
            .await
            .unwrap();

        assert_eq!(order.status(), OrderStatus::Pending);
        assert_eq!(order.version(), Version::first());
        assert_eq!(
            order.order_number().to_string(),
            format!("ORD-{}-00001", now.year())
        );
        assert_eq!(order.created_by(), "Nurse Joy");

        let item = &order.items()[0];
        assert_eq!(item.snapshot.code, "GLV-M");
        assert_eq!(item.total_price.cents(), 5000);
        assert_eq!(order.total_price().cents(), 5000);

        let history = h.history(order.id()).await;
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].previous_status, None);
        assert_eq!(history[0].new_status, OrderStatus::Pending);
    }

    #[tokio::test]
    async fn order_numbers_count_up_within_a_year() {
        let h = Harness::new();
        let now = Utc::now();

        for expected in 1..=3 {
            let order = h
                .service
                .create_order_at(new_order(&[("I1", 1)]), now)
                .await
                .unwrap();
            assert_eq!(order.order_number().sequence(), expected);
            assert_eq!(order.order_number().year(), now.year());
        }
    }

    #[tokio::test]
    async fn approve_records_quantity_and_second_history_entry() {
        let h = Harness::new();
        let order = h
            .service
            .create_order(new_order(&[("I1", 10)]))
            .await
            .unwrap();

        let order = h.approve(&order, 8).await;

        assert_eq!(order.status(), OrderStatus::Approved);
        assert_eq!(order.items()[0].quantity_approved, Some(8));
        assert_eq!(order.approved().unwrap().by, "mgr1");

        let history = h.history(order.id()).await;
        assert_eq!(history.len(), 2);
        assert_eq!(history[1].previous_status, Some(OrderStatus::Pending));
        assert_eq!(history[1].new_status, OrderStatus::Approved);
        assert_eq!(history[1].changed_by, "mgr1");
    }

    #[tokio::test]
    async fn full_path_publishes_delivery_fact() {
        let h = Harness::new();
        let order = h
            .service
            .create_order(new_order(&[("I1", 10)]))
            .await
            .unwrap();
        let item_id = order.items()[0].id;
        let order = h.approve(&order, 8).await;

        let order = h
            .service
            .transition(
                order.id(),
                TransitionCommand::new(
                    "store1",
                    Transition::Pack {
                        packed_by: Some("picker2".to_string()),
                        quantities: vec![ItemQuantity {
                            item_id,
                            quantity: 8,
                        }],
                    },
                ),
            )
            .await
            .unwrap();
        assert_eq!(order.packed().unwrap().by, "picker2");

        let order = h
            .service
            .transition(
                order.id(),
                TransitionCommand::new("store1", Transition::Send { sent_by: None }),
            )
            .await
            .unwrap();
        assert_eq!(order.sent().unwrap().by, "store1");

        let order = h
            .service
            .transition(order.id(), deliver(item_id, 6))
            .await
            .unwrap();
        assert_eq!(order.status(), OrderStatus::Delivered);
        assert_eq!(order.items()[0].status(), ItemStatus::PartiallyFulfilled);

        let published = h.delivery.published();
        assert_eq!(published.len(), 1);
        assert_eq!(published[0].order_id, order.id());
        assert_eq!(published[0].delivered_to, "Nurse Joy");
        assert_eq!(published[0].items[0].quantity_delivered, 6);
        assert_eq!(published[0].items[0].item_code, "GLV-M");

        let fact = h.service.delivery_fact(order.id()).await.unwrap();
        assert_eq!(fact, published[0]);

        let history = h.history(order.id()).await;
        assert_eq!(history.len(), 5);
        assert_eq!(replay(&history).unwrap(), Some(OrderStatus::Delivered));
    }

    #[tokio::test]
    async fn cancel_is_terminal() {
        let h = Harness::new();
        let order = h
            .service
            .create_order(new_order(&[("I1", 10)]))
            .await
            .unwrap();
        let order = h.approve(&order, 8).await;

        let order = h
            .service
            .cancel(order.id(), "mgr1", Some("budget freeze".to_string()))
            .await
            .unwrap();
        assert_eq!(order.status(), OrderStatus::Cancelled);
        assert_eq!(order.cancelled().unwrap().by, "mgr1");

        let history = h.history(order.id()).await;
        assert_eq!(history.len(), 3);
        assert_eq!(history[2].notes.as_deref(), Some("budget freeze"));

        let err = h
            .service
            .transition(
                order.id(),
                TransitionCommand::new("store1", Transition::Send { sent_by: None }),
            )
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidTransition);

        let err = h.service.cancel(order.id(), "mgr1", None).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidTransition);
        assert_eq!(h.history(order.id()).await.len(), 3);
    }

    #[tokio::test]
    async fn list_filters_by_status() {
        let h = Harness::new();
        let first = h
            .service
            .create_order(new_order(&[("I1", 10)]))
            .await
            .unwrap();
        h.service
            .create_order(new_order(&[("I2", 1)]))
            .await
            .unwrap();
        h.approve(&first, 10).await;

        let approved = h
            .service
            .list_orders(&OrderQuery::new().status(OrderStatus::Approved))
            .await
            .unwrap();
        assert_eq!(approved.len(), 1);
        assert_eq!(approved[0].id(), first.id());

        let all = h.service.list_orders(&OrderQuery::new()).await.unwrap();
        assert_eq!(all.len(), 2);
    }
}

mod rejections {
    use super::*;

    #[tokio::test]
    async fn packed_above_approved_is_an_invariant_violation() {
        let h = Harness::new();
        let order = h
            .service
            .create_order(new_order(&[("I1", 10)]))
            .await
            .unwrap();
        let order = h.approve(&order, 8).await;
        let item_id = order.items()[0].id;

        let err = h
            .service
            .update_item(item_id, ItemUpdate::quantity(QuantityStage::Packed, 9))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvariantViolation);

        let stored = h.service.get_order(order.id()).await.unwrap();
        assert_eq!(stored.items()[0].quantity_packed, None);
        assert_eq!(stored.version(), order.version());
    }

    #[tokio::test]
    async fn skipping_stages_is_an_invalid_transition() {
        let h = Harness::new();
        let order = h
            .service
            .create_order(new_order(&[("I1", 10)]))
            .await
            .unwrap();
        let order = h.approve(&order, 8).await;
        let item_id = order.items()[0].id;

        let err = h
            .service
            .transition(order.id(), deliver(item_id, 8))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            FulfillmentError::Order(OrderError::InvalidTransition {
                from: OrderStatus::Approved,
                to: OrderStatus::Delivered,
            })
        ));

        let stored = h.service.get_order(order.id()).await.unwrap();
        assert_eq!(stored.status(), OrderStatus::Approved);
        assert_eq!(h.history(order.id()).await.len(), 2);
        assert!(h.delivery.published().is_empty());
    }

    #[tokio::test]
    async fn unknown_catalog_item_is_a_validation_error() {
        let h = Harness::new();

        let err = h
            .service
            .create_order(new_order(&[("I1", 1), ("NOPE", 2)]))
            .await
            .unwrap_err();
        assert!(matches!(err, FulfillmentError::UnknownCatalogItem(_)));
        assert_eq!(err.kind(), ErrorKind::Validation);
        assert_eq!(h.store.order_count().await, 0);
    }

    #[tokio::test]
    async fn empty_order_and_zero_quantity_are_rejected() {
        let h = Harness::new();

        let err = h.service.create_order(new_order(&[])).await.unwrap_err();
        assert!(matches!(err, FulfillmentError::Order(OrderError::NoItems)));

        let err = h
            .service
            .create_order(new_order(&[("I1", 0)]))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);
        assert_eq!(h.store.history_count().await, 0);
    }

    #[tokio::test]
    async fn missing_order_and_item_are_not_found() {
        let h = Harness::new();

        let err = h.service.get_order(OrderId::new()).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);

        let err = h.service.history(OrderId::new()).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);

        let err = h
            .service
            .update_item(ItemId::new(), notes_update("x"))
            .await
            .unwrap_err();
        assert!(matches!(err, FulfillmentError::ItemNotFound(_)));
    }

    #[tokio::test]
    async fn delivery_fact_requires_delivery() {
        let h = Harness::new();
        let order = h
            .service
            .create_order(new_order(&[("I1", 10)]))
            .await
            .unwrap();

        let err = h.service.delivery_fact(order.id()).await.unwrap_err();
        assert!(matches!(err, FulfillmentError::NotDelivered(_)));
    }
}

mod pending_edits {
    use super::*;

    #[tokio::test]
    async fn add_and_remove_lines_while_pending() {
        let h = Harness::new();
        let order = h
            .service
            .create_order(new_order(&[("I1", 10)]))
            .await
            .unwrap();

        let added = h
            .service
            .add_item(order.id(), NewItem::new("I2", 4))
            .await
            .unwrap();
        assert_eq!(added.order_id, order.id());
        assert_eq!(added.snapshot.code, "SYR-5");
        assert_eq!(added.total_price.cents(), 5000);

        let order = h.service.remove_item(order.items()[0].id).await.unwrap();
        assert_eq!(order.items().len(), 1);
        assert_eq!(order.items()[0].id, added.id);

        let err = h.service.remove_item(added.id).await.unwrap_err();
        assert!(matches!(err, FulfillmentError::Order(OrderError::LastItem)));
        assert_eq!(err.kind(), ErrorKind::Validation);
    }

    #[tokio::test]
    async fn item_list_is_locked_after_approval() {
        let h = Harness::new();
        let order = h
            .service
            .create_order(new_order(&[("I1", 10), ("I2", 2)]))
            .await
            .unwrap();
        let order = h.approve(&order, 8).await;

        let err = h
            .service
            .add_item(order.id(), NewItem::new("I2", 1))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidTransition);

        let err = h
            .service
            .remove_item(order.items()[1].id)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidTransition);

        let mut changed = header();
        changed.priority = Priority::Urgent;
        let err = h
            .service
            .replace_header(order.id(), changed)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidTransition);
    }

    #[tokio::test]
    async fn snapshot_survives_catalog_price_change() {
        let h = Harness::new();
        let order = h
            .service
            .create_order(new_order(&[("I1", 2)]))
            .await
            .unwrap();

        h.catalog.upsert(CatalogItem {
            id: CatalogItemId::new("I1"),
            code: "GLV-M".to_string(),
            name: "Nitrile gloves (M)".to_string(),
            description: None,
            category: None,
            unit: "box".to_string(),
            unit_price_cents: 900,
        });

        let stored = h.service.get_order(order.id()).await.unwrap();
        assert_eq!(stored.items()[0].snapshot.unit_price.cents(), 500);
        assert_eq!(stored.total_price().cents(), 1000);
    }

    #[tokio::test]
    async fn header_replacement_keeps_status_and_history() {
        let h = Harness::new();
        let order = h
            .service
            .create_order(new_order(&[("I1", 2)]))
            .await
            .unwrap();

        let mut changed = header();
        changed.delivery_location = "  Ward 3 nurses' station ".to_string();
        let order = h.service.replace_header(order.id(), changed).await.unwrap();

        assert_eq!(order.header().delivery_location, "Ward 3 nurses' station");
        assert_eq!(order.status(), OrderStatus::Pending);
        assert_eq!(order.version(), Version::new(2));
        assert_eq!(h.history(order.id()).await.len(), 1);
    }
}

mod concurrency {
    use super::*;

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn concurrent_approvals_commit_exactly_once() {
        let h = Harness::new();
        let order = h
            .service
            .create_order(new_order(&[("I1", 10)]))
            .await
            .unwrap();
        let item_id = order.items()[0].id;

        let approve = |quantity: u32| {
            let service = Arc::clone(&h.service);
            let order_id = order.id();
            tokio::spawn(async move {
                service
                    .transition(
                        order_id,
                        TransitionCommand::new(
                            "mgr1",
                            Transition::Approve {
                                approved_by: None,
                                quantities: vec![ItemQuantity { item_id, quantity }],
                            },
                        ),
                    )
                    .await
            })
        };

        let (first, second) = tokio::join!(approve(8), approve(5));
        let results = [first.unwrap(), second.unwrap()];

        let succeeded = results.iter().filter(|r| r.is_ok()).count();
        assert_eq!(succeeded, 1);

        // The loser either lost the version check or saw the committed status.
        let err = results.into_iter().find_map(Result::err).unwrap();
        assert!(matches!(
            err.kind(),
            ErrorKind::Conflict | ErrorKind::InvalidTransition
        ));

        let history = h.history(order.id()).await;
        assert_eq!(history.len(), 2);
        let stored = h.service.get_order(order.id()).await.unwrap();
        assert_eq!(stored.version(), Version::new(2));
    }

    #[tokio::test]
    async fn stale_write_is_a_conflict() {
        let h = Harness::new();
        let order = h
            .service
            .create_order(new_order(&[("I1", 10)]))
            .await
            .unwrap();

        // Someone else changes the order between our read and our write
        h.service
            .update_item(order.items()[0].id, notes_update("urgent"))
            .await
            .unwrap();

        let mut stale = order.clone();
        let event = stale
            .transition(&TransitionCommand::cancel("mgr1"), Utc::now())
            .unwrap();
        stale.apply(event);
        let err = h
            .store
            .save(&stale, order.version(), None)
            .await
            .unwrap_err();
        assert_eq!(FulfillmentError::from(err).kind(), ErrorKind::Conflict);
    }
}

mod delivery {
    use super::*;

    async fn ready_to_deliver(h: &Harness) -> (Order, ItemId) {
        let order = h
            .service
            .create_order(new_order(&[("I1", 4)]))
            .await
            .unwrap();
        let item_id = order.items()[0].id;
        let order = h.approve(&order, 4).await;
        for transition in [
            Transition::Pack {
                packed_by: None,
                quantities: vec![ItemQuantity {
                    item_id,
                    quantity: 4,
                }],
            },
            Transition::Send { sent_by: None },
        ] {
            h.service
                .transition(order.id(), TransitionCommand::new("store1", transition))
                .await
                .unwrap();
        }
        (order, item_id)
    }

    #[tokio::test]
    async fn publish_failure_does_not_roll_back() {
        let h = Harness::new();
        let (order, item_id) = ready_to_deliver(&h).await;
        h.delivery.set_fail_on_publish(true);

        let delivered = h
            .service
            .transition(order.id(), deliver(item_id, 4))
            .await
            .unwrap();
        assert_eq!(delivered.status(), OrderStatus::Delivered);
        assert!(h.delivery.published().is_empty());

        let fact = h.service.delivery_fact(order.id()).await.unwrap();
        assert_eq!(fact.items[0].quantity_delivered, 4);
    }

    #[tokio::test]
    async fn delivered_to_is_required() {
        let h = Harness::new();
        let (order, item_id) = ready_to_deliver(&h).await;

        let mut command = deliver(item_id, 4);
        command.transition = Transition::Deliver {
            delivered_to: "   ".to_string(),
            delivery_notes: None,
            quantities: vec![ItemQuantity {
                item_id,
                quantity: 4,
            }],
        };
        let err = h
            .service
            .transition(order.id(), command)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);
        assert_eq!(
            h.service.get_order(order.id()).await.unwrap().status(),
            OrderStatus::Sent
        );
    }
}

/// Store whose next count lags one order behind, as a concurrent creation
/// that has not committed yet would make it.
#[derive(Clone)]
struct LaggingCount {
    inner: InMemoryOrderStore,
    lag_next: Arc<AtomicBool>,
}

#[async_trait]
impl OrderStore for LaggingCount {
    async fn insert(&self, order: &Order, entry: &HistoryEntry) -> StoreResult<()> {
        self.inner.insert(order, entry).await
    }

    async fn save(
        &self,
        order: &Order,
        expected: Version,
        entry: Option<&HistoryEntry>,
    ) -> StoreResult<()> {
        self.inner.save(order, expected, entry).await
    }

    async fn get(&self, order_id: OrderId) -> StoreResult<Option<Order>> {
        self.inner.get(order_id).await
    }

    async fn find_by_item(&self, item_id: ItemId) -> StoreResult<Option<Order>> {
        self.inner.find_by_item(item_id).await
    }

    async fn list(&self, query: &OrderQuery) -> StoreResult<Vec<Order>> {
        self.inner.list(query).await
    }

    async fn count_created_since(&self, since: DateTime<Utc>) -> StoreResult<u64> {
        let count = self.inner.count_created_since(since).await?;
        if self.lag_next.swap(false, Ordering::SeqCst) {
            return Ok(count.saturating_sub(1));
        }
        Ok(count)
    }
}

#[async_trait]
impl HistoryLedger for LaggingCount {
    async fn list_for_order(&self, order_id: OrderId) -> StoreResult<Vec<HistoryEntry>> {
        self.inner.list_for_order(order_id).await
    }
}

mod numbering {
    use super::*;

    fn service_with(store: LaggingCount, retries: u32) -> FulfillmentService<LaggingCount> {
        FulfillmentService::new(
            store,
            Arc::new(catalog()),
            Arc::new(InMemoryDeliverySink::new()),
        )
        .with_config(ServiceConfig {
            order_number_max_retries: retries,
        })
    }

    #[tokio::test]
    async fn number_collision_is_retried_with_a_fresh_count() {
        let store = LaggingCount {
            inner: InMemoryOrderStore::new(),
            lag_next: Arc::new(AtomicBool::new(false)),
        };
        let service = service_with(store.clone(), 5);

        let first = service
            .create_order(new_order(&[("I1", 1)]))
            .await
            .unwrap();
        store.lag_next.store(true, Ordering::SeqCst);
        let second = service
            .create_order(new_order(&[("I1", 1)]))
            .await
            .unwrap();

        assert_eq!(first.order_number().sequence(), 1);
        assert_eq!(second.order_number().sequence(), 2);
        assert_eq!(store.inner.order_count().await, 2);
    }

    #[tokio::test]
    async fn retries_are_bounded() {
        let inner = InMemoryOrderStore::new();
        let now = Utc::now();

        // An order carrying this year's first number but created last year
        // is never counted, so every attempt collides with it.
        let last_year = Utc
            .with_ymd_and_hms(now.year() - 1, 12, 31, 12, 0, 0)
            .unwrap();
        let seed = service_with(
            LaggingCount {
                inner: inner.clone(),
                lag_next: Arc::new(AtomicBool::new(false)),
            },
            0,
        );
        let squatter = seed
            .create_order_at(new_order(&[("I1", 1)]), last_year)
            .await
            .unwrap();
        assert_eq!(squatter.order_number().year(), now.year() - 1);

        // Renumber the squatter into this year
        let mut json = serde_json::to_value(&squatter).unwrap();
        json["order_number"] = serde_json::json!(format!("ORD-{}-00001", now.year()));
        json["id"] = serde_json::json!(OrderId::new());
        let squatter: Order = serde_json::from_value(json).unwrap();
        inner
            .insert(&squatter, &squatter.creation_entry())
            .await
            .unwrap();

        let service = service_with(
            LaggingCount {
                inner: inner.clone(),
                lag_next: Arc::new(AtomicBool::new(false)),
            },
            2,
        );
        let err = service
            .create_order_at(new_order(&[("I1", 1)]), now)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            FulfillmentError::OrderNumberExhausted { attempts: 3 }
        ));
        assert_eq!(err.kind(), ErrorKind::Internal);
    }
}
