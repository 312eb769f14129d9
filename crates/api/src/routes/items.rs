//! Order line endpoints.

use std::sync::Arc;

use axum::Json;
use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use domain::ItemUpdate;
use order_store::{HistoryLedger, OrderStore};

use super::orders::{AppState, ItemResponse, NewItemRequest};
use super::{parse_item_id, parse_order_id};
use crate::error::ApiError;

/// POST /orders/{id}/items: append a line to a pending order.
#[tracing::instrument(skip(state, payload))]
pub async fn add<S: OrderStore + HistoryLedger + 'static>(
    State(state): State<Arc<AppState<S>>>,
    Path(id): Path<String>,
    payload: Result<Json<NewItemRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<ItemResponse>), ApiError> {
    let order_id = parse_order_id(&id)?;
    let Json(req) = payload?;

    let item = state.service.add_item(order_id, req.into()).await?;
    Ok((StatusCode::CREATED, Json(ItemResponse::from(&item))))
}

/// PUT|PATCH /items/{item_id}: change quantities and/or notes of a line.
#[tracing::instrument(skip(state, payload))]
pub async fn update<S: OrderStore + HistoryLedger + 'static>(
    State(state): State<Arc<AppState<S>>>,
    Path(item_id): Path<String>,
    payload: Result<Json<ItemUpdate>, JsonRejection>,
) -> Result<Json<ItemResponse>, ApiError> {
    let item_id = parse_item_id(&item_id)?;
    let Json(update) = payload?;

    let item = state.service.update_item(item_id, update).await?;
    Ok(Json(ItemResponse::from(&item)))
}

/// DELETE /items/{item_id}: remove a line from a pending order.
#[tracing::instrument(skip(state))]
pub async fn remove<S: OrderStore + HistoryLedger + 'static>(
    State(state): State<Arc<AppState<S>>>,
    Path(item_id): Path<String>,
) -> Result<StatusCode, ApiError> {
    let item_id = parse_item_id(&item_id)?;
    state.service.remove_item(item_id).await?;
    Ok(StatusCode::NO_CONTENT)
}
