use axum::{extract::State, http::HeaderMap, http::StatusCode, Json};
use tracing::info;

use super::orchestrator::{CheckoutOutcome, CheckoutRequest};
use crate::actor::Actor;
use crate::api::handler::AppState;
use crate::error::AppResult;
use crate::middleware::ValidatedJson;

const IDEMPOTENCY_HEADER: &str = "idempotency-key";

/// Create orders from a cart
/// POST /api/v1/checkout
///
/// The idempotency key may come from the body or the `Idempotency-Key` header.
/// A replayed checkout answers 200 instead of 201.
pub async fn create_checkout(
    State(state): State<AppState>,
    actor: Actor,
    headers: HeaderMap,
    ValidatedJson(mut request): ValidatedJson<CheckoutRequest>,
) -> AppResult<(StatusCode, Json<CheckoutOutcome>)> {
    let user_id = actor.require_user()?;

    if request.idempotency_key.is_none() {
        request.idempotency_key = headers
            .get(IDEMPOTENCY_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
    }

    info!("Checkout requested by {} ({} lines)", user_id, request.items.len());
    let outcome = state.checkout.create_checkout(user_id, request).await?;

    let status = if outcome.replayed {
        StatusCode::OK
    } else {
        StatusCode::CREATED
    };
    Ok((status, Json(outcome)))
}
