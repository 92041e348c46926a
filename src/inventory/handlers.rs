use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use serde::{Deserialize, Serialize};
use tracing::info;
use uuid::Uuid;
use validator::Validate;

use super::models::{InventoryRecord, InventoryTransaction};
use crate::actor::Actor;
use crate::api::handler::AppState;
use crate::error::{AppError, AppResult};
use crate::middleware::ValidatedJson;
use crate::orders::models::{ItemKind, ItemRef};

#[derive(Debug, Deserialize, Validate)]
pub struct ReceiveStockRequest {
    pub item_id: Uuid,
    pub warehouse_id: Uuid,
    #[validate(range(min = 1, message = "quantity must be positive"))]
    pub quantity: i32,
    /// Makes the receipt idempotent, e.g. a purchase order id
    pub reference_id: Option<Uuid>,
    #[validate(length(max = 500))]
    pub note: Option<String>,
}

#[derive(Debug, Deserialize, Validate)]
pub struct AdjustStockRequest {
    pub item_id: Uuid,
    pub warehouse_id: Uuid,
    pub delta: i32,
    pub reference_id: Option<Uuid>,
    #[validate(length(min = 1, max = 500, message = "a reason is required"))]
    pub note: String,
}

#[derive(Serialize)]
pub struct StockLevelResponse {
    pub record: InventoryRecord,
    pub history: Vec<InventoryTransaction>,
}

/// Stock changes are open to privileged actors and to the supplier that
/// sells the material.
async fn authorize_stock_change(state: &AppState, actor: &Actor, item_id: Uuid) -> AppResult<()> {
    if actor.is_privileged() {
        return Ok(());
    }

    let item = state
        .catalog
        .resolve_item(ItemRef::new(ItemKind::Material, item_id))
        .await?
        .ok_or_else(|| AppError::NotFound(format!("material {}", item_id)))?;

    if actor.is_user(item.seller_user_id) {
        Ok(())
    } else {
        Err(AppError::Forbidden(format!("not the supplier of material {}", item_id)))
    }
}

/// POST /api/v1/inventory/receive
pub async fn receive_stock(
    State(state): State<AppState>,
    actor: Actor,
    ValidatedJson(request): ValidatedJson<ReceiveStockRequest>,
) -> AppResult<(StatusCode, Json<InventoryTransaction>)> {
    authorize_stock_change(&state, &actor, request.item_id).await?;
    info!(
        "Receiving {} of {} into {}",
        request.quantity, request.item_id, request.warehouse_id
    );

    let row = state
        .inventory
        .receive_stock(
            request.item_id,
            request.warehouse_id,
            request.quantity,
            request.reference_id,
            actor.user_id(),
            request.note,
        )
        .await?;
    Ok((StatusCode::CREATED, Json(row)))
}

/// POST /api/v1/inventory/adjust
pub async fn adjust_stock(
    State(state): State<AppState>,
    actor: Actor,
    ValidatedJson(request): ValidatedJson<AdjustStockRequest>,
) -> AppResult<(StatusCode, Json<InventoryTransaction>)> {
    authorize_stock_change(&state, &actor, request.item_id).await?;

    let row = state
        .inventory
        .adjust_stock(
            request.item_id,
            request.warehouse_id,
            request.delta,
            request.reference_id,
            actor.user_id(),
            Some(request.note),
        )
        .await?;
    Ok((StatusCode::CREATED, Json(row)))
}

/// GET /api/v1/inventory/:item_id/:warehouse_id
pub async fn get_stock_level(
    State(state): State<AppState>,
    Path((item_id, warehouse_id)): Path<(Uuid, Uuid)>,
) -> AppResult<Json<StockLevelResponse>> {
    let record = state.inventory.on_hand(item_id, warehouse_id).await?;
    let history = state.inventory.history(item_id, warehouse_id).await?;
    Ok(Json(StockLevelResponse { record, history }))
}
