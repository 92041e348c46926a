use axum::{
    extract::{Query, State},
    Json,
};
use serde::Deserialize;

use super::models::PayoutSweep;
use crate::actor::Actor;
use crate::api::handler::AppState;
use crate::error::{AppError, AppResult};

#[derive(Debug, Deserialize)]
pub struct RetryPayoutsQuery {
    pub limit: Option<i64>,
}

/// Drains pending payouts on demand
/// POST /api/v1/admin/payouts/retry?limit=N
pub async fn retry_payouts(
    State(state): State<AppState>,
    actor: Actor,
    Query(query): Query<RetryPayoutsQuery>,
) -> AppResult<Json<PayoutSweep>> {
    actor.ensure_privileged()?;

    let limit = query.limit.unwrap_or(state.payout_batch_size);
    if limit <= 0 {
        return Err(AppError::Validation("limit must be positive".to_string()));
    }

    let sweep = state.payouts.retry_pending(limit).await?;
    Ok(Json(sweep))
}
