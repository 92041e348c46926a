use axum::{extract::State, Json};
use chrono::Utc;
use std::sync::Arc;
use tracing::warn;

use super::models::*;
use crate::{
    catalog::CatalogClient,
    checkout::CheckoutService,
    error::AppResult,
    fulfillment::FulfillmentTracker,
    inventory::InventoryLedger,
    payment::PaymentService,
    payout::PayoutService,
    store::MarketStore,
    wallet::WalletLedger,
};

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn MarketStore>,
    pub catalog: Arc<dyn CatalogClient>,
    pub wallets: WalletLedger,
    pub inventory: InventoryLedger,
    pub checkout: Arc<CheckoutService>,
    pub payments: Arc<PaymentService>,
    pub fulfillment: Arc<FulfillmentTracker>,
    pub payouts: Arc<PayoutService>,
    /// Default size of an on-demand payout sweep
    pub payout_batch_size: i64,
}

/// GET /health
///
/// Degraded when the store is unreachable or escrow is not provisioned,
/// since payments fail closed in both cases.
pub async fn health_check(State(state): State<AppState>) -> AppResult<Json<HealthResponse>> {
    let mut checks = Vec::new();

    let store = match state.store.begin().await {
        Ok(tx) => {
            drop(tx);
            ComponentStatus {
                component: "store".to_string(),
                healthy: true,
                detail: None,
            }
        }
        Err(e) => {
            warn!("Health check: store unavailable: {}", e);
            ComponentStatus {
                component: "store".to_string(),
                healthy: false,
                detail: Some(e.to_string()),
            }
        }
    };
    let store_healthy = store.healthy;
    checks.push(store);

    if store_healthy {
        let escrow = state.wallets.balance(state.wallets.escrow_user_id()).await;
        checks.push(ComponentStatus {
            component: "escrow_wallet".to_string(),
            healthy: escrow.as_ref().map(|w| w.is_active()).unwrap_or(false),
            detail: escrow.err().map(|e| e.to_string()),
        });
    }

    let all_healthy = checks.iter().all(|c| c.healthy);

    Ok(Json(HealthResponse {
        status: if all_healthy {
            "healthy".to_string()
        } else {
            "degraded".to_string()
        },
        timestamp: Utc::now(),
        checks,
    }))
}
