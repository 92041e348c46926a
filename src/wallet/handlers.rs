use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::info;
use uuid::Uuid;
use validator::Validate;

use super::models::{Wallet, WalletReconciliation, WalletStatus, WalletTransaction};
use crate::actor::Actor;
use crate::api::handler::AppState;
use crate::error::{AppError, AppResult};
use crate::middleware::ValidatedJson;

#[derive(Debug, Deserialize, Validate)]
pub struct AmountRequest {
    pub amount: Decimal,
    /// Gateway or bank reference, stored on the ledger row
    #[validate(length(min = 1, max = 255))]
    pub external_reference: Option<String>,
}

impl AmountRequest {
    fn positive_amount(&self) -> AppResult<Decimal> {
        if self.amount <= Decimal::ZERO {
            return Err(AppError::Validation("amount must be positive".to_string()));
        }
        Ok(self.amount)
    }
}

#[derive(Debug, Deserialize)]
pub struct CompleteTransactionRequest {
    pub succeeded: bool,
}

#[derive(Debug, Deserialize)]
pub struct WalletStatusRequest {
    pub status: WalletStatus,
}

#[derive(Serialize)]
pub struct WalletHistoryResponse {
    pub wallet_id: Uuid,
    pub user_id: Uuid,
    pub balance: Decimal,
    pub transactions: Vec<WalletTransaction>,
}

/// GET /api/v1/wallets/:user_id
pub async fn get_wallet(
    State(state): State<AppState>,
    actor: Actor,
    Path(user_id): Path<Uuid>,
) -> AppResult<Json<Wallet>> {
    actor.ensure_can_access(user_id)?;
    let wallet = state.wallets.balance(user_id).await?;
    Ok(Json(wallet))
}

/// GET /api/v1/wallets/:user_id/transactions
pub async fn get_wallet_transactions(
    State(state): State<AppState>,
    actor: Actor,
    Path(user_id): Path<Uuid>,
) -> AppResult<Json<WalletHistoryResponse>> {
    actor.ensure_can_access(user_id)?;
    let wallet = state.wallets.balance(user_id).await?;
    let transactions = state.wallets.history(user_id).await?;

    Ok(Json(WalletHistoryResponse {
        wallet_id: wallet.id,
        user_id,
        balance: wallet.balance,
        transactions,
    }))
}

/// GET /api/v1/wallets/:user_id/reconcile
pub async fn reconcile_wallet(
    State(state): State<AppState>,
    actor: Actor,
    Path(user_id): Path<Uuid>,
) -> AppResult<Json<WalletReconciliation>> {
    actor.ensure_can_access(user_id)?;
    let report = state.wallets.reconcile(user_id).await?;
    Ok(Json(report))
}

/// POST /api/v1/wallets/:user_id/deposit
pub async fn deposit(
    State(state): State<AppState>,
    actor: Actor,
    Path(user_id): Path<Uuid>,
    ValidatedJson(req): ValidatedJson<AmountRequest>,
) -> AppResult<(StatusCode, Json<WalletTransaction>)> {
    actor.ensure_can_access(user_id)?;
    let amount = req.positive_amount()?;

    let row = state
        .wallets
        .deposit(user_id, amount, req.external_reference)
        .await?;
    Ok((StatusCode::CREATED, Json(row)))
}

/// POST /api/v1/wallets/:user_id/withdraw
pub async fn withdraw(
    State(state): State<AppState>,
    actor: Actor,
    Path(user_id): Path<Uuid>,
    ValidatedJson(req): ValidatedJson<AmountRequest>,
) -> AppResult<(StatusCode, Json<WalletTransaction>)> {
    actor.ensure_can_access(user_id)?;
    let amount = req.positive_amount()?;

    let row = state
        .wallets
        .withdraw(user_id, amount, req.external_reference)
        .await?;
    Ok((StatusCode::CREATED, Json(row)))
}

/// Records a gateway deposit that settles later
/// POST /api/v1/wallets/:user_id/pending-deposits
pub async fn begin_deposit(
    State(state): State<AppState>,
    actor: Actor,
    Path(user_id): Path<Uuid>,
    ValidatedJson(req): ValidatedJson<AmountRequest>,
) -> AppResult<(StatusCode, Json<WalletTransaction>)> {
    actor.ensure_can_access(user_id)?;
    let amount = req.positive_amount()?;

    let row = state
        .wallets
        .begin_deposit(user_id, amount, req.external_reference)
        .await?;
    Ok((StatusCode::ACCEPTED, Json(row)))
}

/// Gateway callback resolving a pending row
/// POST /api/v1/wallet-transactions/:txn_id/complete
pub async fn complete_transaction(
    State(state): State<AppState>,
    actor: Actor,
    Path(txn_id): Path<Uuid>,
    Json(req): Json<CompleteTransactionRequest>,
) -> AppResult<Json<WalletTransaction>> {
    actor.ensure_privileged()?;
    let row = state.wallets.complete_transaction(txn_id, req.succeeded).await?;
    Ok(Json(row))
}

/// POST /api/v1/wallets/:user_id/status
pub async fn set_wallet_status(
    State(state): State<AppState>,
    actor: Actor,
    Path(user_id): Path<Uuid>,
    Json(req): Json<WalletStatusRequest>,
) -> AppResult<Json<Wallet>> {
    actor.ensure_privileged()?;
    info!("Wallet of {} set to {:?} by {:?}", user_id, req.status, actor);

    let wallet = state.wallets.set_status(user_id, req.status).await?;
    Ok(Json(wallet))
}
