//! Order endpoints: creation, listing, header edits, transitions and the ledger.

use std::str::FromStr;
use std::sync::Arc;

use axum::Json;
use axum::extract::rejection::{JsonRejection, QueryRejection};
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use chrono::{DateTime, Utc};
use domain::{
    DeliveredFact, HistoryEntry, NewItem, NewOrder, Order, OrderError, OrderHeader, OrderItem,
    OrderStatus, Priority, Stamp, TransitionRequest,
};
use fulfillment::FulfillmentService;
use order_store::{HistoryLedger, OrderQuery, OrderStore, SortOrder};
use serde::{Deserialize, Serialize};

use super::parse_order_id;
use crate::error::ApiError;

/// Shared application state accessible from all handlers.
pub struct AppState<S> {
    pub service: FulfillmentService<S>,
}

// -- Request types --

/// Header fields as sent by clients. Required text fields default to empty
/// so that a missing one is reported by name.
#[derive(Deserialize)]
pub struct HeaderRequest {
    #[serde(default)]
    pub department_id: String,
    #[serde(default)]
    pub department_name: String,
    #[serde(default)]
    pub requester_name: String,
    pub requester_email: Option<String>,
    #[serde(default)]
    pub delivery_location: String,
    #[serde(default)]
    pub priority: Priority,
    pub notes: Option<String>,
}

impl From<HeaderRequest> for OrderHeader {
    fn from(req: HeaderRequest) -> Self {
        OrderHeader {
            department_id: req.department_id,
            department_name: req.department_name,
            requester_name: req.requester_name,
            requester_email: req.requester_email,
            delivery_location: req.delivery_location,
            priority: req.priority,
            notes: req.notes,
        }
    }
}

#[derive(Deserialize)]
pub struct CreateOrderRequest {
    #[serde(flatten)]
    pub header: HeaderRequest,
    pub created_by: Option<String>,
    #[serde(default)]
    pub items: Vec<NewItemRequest>,
}

/// A line to create. Prices come from the catalog, never from the client.
#[derive(Deserialize)]
pub struct NewItemRequest {
    #[serde(alias = "item_id")]
    pub catalog_item_id: String,
    pub quantity_requested: u32,
    pub notes: Option<String>,
}

impl From<NewItemRequest> for NewItem {
    fn from(req: NewItemRequest) -> Self {
        NewItem {
            catalog_item_id: req.catalog_item_id.into(),
            quantity_requested: req.quantity_requested,
            notes: req.notes,
        }
    }
}

#[derive(Deserialize)]
pub struct ListParams {
    pub status: Option<String>,
    pub department_id: Option<String>,
    pub priority: Option<String>,
    pub search: Option<String>,
    pub limit: Option<usize>,
    pub offset: Option<usize>,
    pub sort: Option<String>,
}

impl ListParams {
    fn into_query(self) -> Result<OrderQuery, ApiError> {
        let mut query = OrderQuery::new();
        if let Some(status) = non_blank(self.status) {
            let status = OrderStatus::from_str(&status)
                .map_err(|e| ApiError::BadRequest(e.to_string()))?;
            query = query.status(status);
        }
        if let Some(department_id) = non_blank(self.department_id) {
            query = query.department_id(department_id);
        }
        if let Some(priority) = non_blank(self.priority) {
            let priority =
                Priority::from_str(&priority).map_err(|e| ApiError::BadRequest(e.to_string()))?;
            query = query.priority(priority);
        }
        if let Some(search) = self.search {
            query = query.search(search);
        }
        if let Some(limit) = self.limit {
            query = query.limit(page_bound("limit", limit)?);
        }
        if let Some(offset) = self.offset {
            query = query.offset(page_bound("offset", offset)?);
        }
        match non_blank(self.sort).as_deref() {
            None | Some("newest") => {}
            Some("oldest") => query = query.sort(SortOrder::OldestFirst),
            Some(other) => {
                return Err(ApiError::BadRequest(format!(
                    "Unknown sort '{other}', expected 'oldest' or 'newest'"
                )));
            }
        }
        Ok(query)
    }
}

/// Paging values must fit a signed 64-bit SQL bound.
fn page_bound(name: &str, value: usize) -> Result<usize, ApiError> {
    i64::try_from(value)
        .map(|_| value)
        .map_err(|_| ApiError::BadRequest(format!("{name} must be at most {}", i64::MAX)))
}

#[derive(Deserialize)]
pub struct CancelParams {
    pub actor: Option<String>,
    pub notes: Option<String>,
}

// -- Response types --

#[derive(Serialize)]
pub struct OrderResponse {
    pub id: String,
    pub order_number: String,
    pub status: OrderStatus,
    pub version: i64,
    pub department_id: String,
    pub department_name: String,
    pub requester_name: String,
    pub requester_email: Option<String>,
    pub delivery_location: String,
    pub priority: Priority,
    pub notes: Option<String>,
    pub created_by: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub approved_by: Option<String>,
    pub approved_at: Option<DateTime<Utc>>,
    pub packed_by: Option<String>,
    pub packed_at: Option<DateTime<Utc>>,
    pub sent_by: Option<String>,
    pub sent_at: Option<DateTime<Utc>>,
    pub delivered_to: Option<String>,
    pub delivered_at: Option<DateTime<Utc>>,
    pub delivery_notes: Option<String>,
    pub cancelled_by: Option<String>,
    pub cancelled_at: Option<DateTime<Utc>>,
    pub total_price_cents: i64,
    pub items: Vec<ItemResponse>,
}

impl From<&Order> for OrderResponse {
    fn from(order: &Order) -> Self {
        let header = order.header();
        let by = |stamp: Option<&Stamp>| stamp.map(|s| s.by.clone());
        let at = |stamp: Option<&Stamp>| stamp.map(|s| s.at);

        OrderResponse {
            id: order.id().to_string(),
            order_number: order.order_number().to_string(),
            status: order.status(),
            version: order.version().as_i64(),
            department_id: header.department_id.clone(),
            department_name: header.department_name.clone(),
            requester_name: header.requester_name.clone(),
            requester_email: header.requester_email.clone(),
            delivery_location: header.delivery_location.clone(),
            priority: header.priority,
            notes: header.notes.clone(),
            created_by: order.created_by().to_string(),
            created_at: order.created_at(),
            updated_at: order.updated_at(),
            approved_by: by(order.approved()),
            approved_at: at(order.approved()),
            packed_by: by(order.packed()),
            packed_at: at(order.packed()),
            sent_by: by(order.sent()),
            sent_at: at(order.sent()),
            delivered_to: by(order.delivered()),
            delivered_at: at(order.delivered()),
            delivery_notes: order.delivery_notes().map(String::from),
            cancelled_by: by(order.cancelled()),
            cancelled_at: at(order.cancelled()),
            total_price_cents: order.total_price().cents(),
            items: order.items().iter().map(ItemResponse::from).collect(),
        }
    }
}

#[derive(Serialize)]
pub struct ItemResponse {
    pub id: String,
    pub order_id: String,
    pub catalog_item_id: String,
    pub item_code: String,
    pub item_name: String,
    pub item_description: Option<String>,
    pub item_category: Option<String>,
    pub unit: String,
    pub unit_price_cents: i64,
    pub quantity_requested: u32,
    pub quantity_approved: Option<u32>,
    pub quantity_packed: Option<u32>,
    pub quantity_delivered: Option<u32>,
    pub total_price_cents: i64,
    pub item_status: &'static str,
    pub notes: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl From<&OrderItem> for ItemResponse {
    fn from(item: &OrderItem) -> Self {
        ItemResponse {
            id: item.id.to_string(),
            order_id: item.order_id.to_string(),
            catalog_item_id: item.catalog_item_id.to_string(),
            item_code: item.snapshot.code.clone(),
            item_name: item.snapshot.name.clone(),
            item_description: item.snapshot.description.clone(),
            item_category: item.snapshot.category.clone(),
            unit: item.snapshot.unit.clone(),
            unit_price_cents: item.snapshot.unit_price.cents(),
            quantity_requested: item.quantity_requested,
            quantity_approved: item.quantity_approved,
            quantity_packed: item.quantity_packed,
            quantity_delivered: item.quantity_delivered,
            total_price_cents: item.total_price.cents(),
            item_status: item.status().as_str(),
            notes: item.notes.clone(),
            created_at: item.created_at,
        }
    }
}

#[derive(Serialize)]
pub struct HistoryEntryResponse {
    pub id: String,
    pub order_id: String,
    pub sequence: i64,
    pub previous_status: Option<OrderStatus>,
    pub new_status: OrderStatus,
    pub changed_by: String,
    pub notes: Option<String>,
    pub changed_at: DateTime<Utc>,
}

impl From<HistoryEntry> for HistoryEntryResponse {
    fn from(entry: HistoryEntry) -> Self {
        HistoryEntryResponse {
            id: entry.id.to_string(),
            order_id: entry.order_id.to_string(),
            sequence: entry.sequence.as_i64(),
            previous_status: entry.previous_status,
            new_status: entry.new_status,
            changed_by: entry.changed_by,
            notes: entry.notes,
            changed_at: entry.changed_at,
        }
    }
}

// -- Handlers --

/// POST /orders: create a new order with its initial lines.
#[tracing::instrument(skip(state, payload))]
pub async fn create<S: OrderStore + HistoryLedger + 'static>(
    State(state): State<Arc<AppState<S>>>,
    payload: Result<Json<CreateOrderRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<OrderResponse>), ApiError> {
    let Json(req) = payload?;
    let input = NewOrder {
        header: req.header.into(),
        items: req.items.into_iter().map(NewItem::from).collect(),
        created_by: req.created_by,
    };

    let order = state.service.create_order(input).await?;
    Ok((StatusCode::CREATED, Json(OrderResponse::from(&order))))
}

/// GET /orders: list orders, newest first unless `sort=oldest`.
#[tracing::instrument(skip(state, params))]
pub async fn list<S: OrderStore + HistoryLedger + 'static>(
    State(state): State<Arc<AppState<S>>>,
    params: Result<Query<ListParams>, QueryRejection>,
) -> Result<Json<Vec<OrderResponse>>, ApiError> {
    let Query(params) = params?;
    let query = params.into_query()?;

    let orders = state.service.list_orders(&query).await?;
    Ok(Json(orders.iter().map(OrderResponse::from).collect()))
}

/// GET /orders/{id}: load an order with its lines.
#[tracing::instrument(skip(state))]
pub async fn get<S: OrderStore + HistoryLedger + 'static>(
    State(state): State<Arc<AppState<S>>>,
    Path(id): Path<String>,
) -> Result<Json<OrderResponse>, ApiError> {
    let order_id = parse_order_id(&id)?;
    let order = state.service.get_order(order_id).await?;
    Ok(Json(OrderResponse::from(&order)))
}

/// PUT /orders/{id}: replace the header of a pending order.
#[tracing::instrument(skip(state, payload))]
pub async fn replace_header<S: OrderStore + HistoryLedger + 'static>(
    State(state): State<Arc<AppState<S>>>,
    Path(id): Path<String>,
    payload: Result<Json<HeaderRequest>, JsonRejection>,
) -> Result<Json<OrderResponse>, ApiError> {
    let order_id = parse_order_id(&id)?;
    let Json(req) = payload?;

    let order = state.service.replace_header(order_id, req.into()).await?;
    Ok(Json(OrderResponse::from(&order)))
}

/// DELETE /orders/{id}?actor=&notes=: cancel an order.
///
/// Orders are never physically deleted; the ledger keeps the cancellation.
#[tracing::instrument(skip(state, params))]
pub async fn cancel<S: OrderStore + HistoryLedger + 'static>(
    State(state): State<Arc<AppState<S>>>,
    Path(id): Path<String>,
    params: Result<Query<CancelParams>, QueryRejection>,
) -> Result<Json<OrderResponse>, ApiError> {
    let order_id = parse_order_id(&id)?;
    let Query(params) = params?;
    let actor = non_blank(params.actor)
        .ok_or_else(|| ApiError::from(OrderError::MissingField { field: "actor" }))?;

    let order = state.service.cancel(order_id, actor, params.notes).await?;
    Ok(Json(OrderResponse::from(&order)))
}

/// PATCH /orders/{id}/status: move an order to another status.
#[tracing::instrument(skip(state, payload))]
pub async fn transition<S: OrderStore + HistoryLedger + 'static>(
    State(state): State<Arc<AppState<S>>>,
    Path(id): Path<String>,
    payload: Result<Json<TransitionRequest>, JsonRejection>,
) -> Result<Json<OrderResponse>, ApiError> {
    let order_id = parse_order_id(&id)?;
    let Json(req) = payload?;
    let command = req.into_command()?;

    let order = state.service.transition(order_id, command).await?;
    Ok(Json(OrderResponse::from(&order)))
}

/// GET /orders/{id}/history: the order's ledger, oldest entry first.
#[tracing::instrument(skip(state))]
pub async fn history<S: OrderStore + HistoryLedger + 'static>(
    State(state): State<Arc<AppState<S>>>,
    Path(id): Path<String>,
) -> Result<Json<Vec<HistoryEntryResponse>>, ApiError> {
    let order_id = parse_order_id(&id)?;
    let entries = state.service.history(order_id).await?;
    Ok(Json(
        entries.into_iter().map(HistoryEntryResponse::from).collect(),
    ))
}

/// GET /orders/{id}/delivery: the delivery fact of a delivered order.
#[tracing::instrument(skip(state))]
pub async fn delivery<S: OrderStore + HistoryLedger + 'static>(
    State(state): State<Arc<AppState<S>>>,
    Path(id): Path<String>,
) -> Result<Json<DeliveredFact>, ApiError> {
    let order_id = parse_order_id(&id)?;
    let fact = state.service.delivery_fact(order_id).await?;
    Ok(Json(fact))
}

fn non_blank(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}
