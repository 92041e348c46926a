use axum::{
    extract::{Path, State},
    Json,
};
use serde::Deserialize;
use uuid::Uuid;

use super::tracker::{BulkConfirmation, LineStatusUpdate, OrderProgress};
use crate::actor::Actor;
use crate::api::handler::AppState;
use crate::error::AppResult;
use crate::orders::models::LineStatus;

#[derive(Debug, Deserialize)]
pub struct UpdateLineStatusRequest {
    pub status: LineStatus,
}

/// POST /api/v1/order-lines/:line_id/status
pub async fn update_line_status(
    State(state): State<AppState>,
    actor: Actor,
    Path(line_id): Path<Uuid>,
    Json(request): Json<UpdateLineStatusRequest>,
) -> AppResult<Json<LineStatusUpdate>> {
    let update = state
        .fulfillment
        .update_line_status(&actor, line_id, request.status)
        .await?;
    Ok(Json(update))
}

/// POST /api/v1/orders/:order_id/sellers/:seller_id/confirm
pub async fn confirm_seller_lines(
    State(state): State<AppState>,
    actor: Actor,
    Path((order_id, seller_id)): Path<(Uuid, Uuid)>,
) -> AppResult<Json<BulkConfirmation>> {
    let confirmation = state
        .fulfillment
        .confirm_all_seller_lines(&actor, order_id, seller_id)
        .await?;
    Ok(Json(confirmation))
}

/// GET /api/v1/orders/:order_id/progress
pub async fn get_order_progress(
    State(state): State<AppState>,
    actor: Actor,
    Path(order_id): Path<Uuid>,
) -> AppResult<Json<OrderProgress>> {
    let progress = state.fulfillment.get_order_progress(&actor, order_id).await?;
    Ok(Json(progress))
}
