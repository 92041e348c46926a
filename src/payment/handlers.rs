use axum::{
    extract::{Path, State},
    Json,
};
use tracing::info;
use uuid::Uuid;

use super::service::PaymentReceipt;
use crate::actor::Actor;
use crate::api::handler::AppState;
use crate::error::AppResult;

/// Pay one order from the caller's wallet
/// POST /api/v1/orders/:order_id/pay
pub async fn pay_order(
    State(state): State<AppState>,
    actor: Actor,
    Path(order_id): Path<Uuid>,
) -> AppResult<Json<PaymentReceipt>> {
    let user_id = actor.require_user()?;
    info!("Payment requested for order {} by {}", order_id, user_id);

    let receipt = state.payments.pay_order(user_id, order_id).await?;
    Ok(Json(receipt))
}

/// Pay every unpaid order of a checkout from the caller's wallet
/// POST /api/v1/order-groups/:group_id/pay
pub async fn pay_order_group(
    State(state): State<AppState>,
    actor: Actor,
    Path(group_id): Path<Uuid>,
) -> AppResult<Json<PaymentReceipt>> {
    let user_id = actor.require_user()?;
    info!("Payment requested for order group {} by {}", group_id, user_id);

    let receipt = state.payments.pay_order_group(user_id, group_id).await?;
    Ok(Json(receipt))
}
