use chrono::Utc;
use rust_decimal::{Decimal, RoundingStrategy};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::models::{PayoutOutcome, PayoutSweep, Settlement};
use crate::error::{AppError, AppResult};
use crate::notifications::{notify_best_effort, Notification, Notifier};
use crate::orders::models::{FulfillmentStatus, LineStatus, OrderLine, SellerRef};
use crate::store::{MarketStore, StoreTx};
use crate::wallet::ledger::WalletLedger;
use crate::wallet::models::{TransactionLinks, WalletTransactionKind};

/// Gross amount owed to one seller of an order
#[derive(Debug, Clone, PartialEq)]
struct SellerShare {
    seller: SellerRef,
    seller_user_id: Uuid,
    gross: Decimal,
}

/// Sums non-canceled line totals per seller, in seller order
fn seller_shares(lines: &[OrderLine]) -> Vec<SellerShare> {
    let mut shares: BTreeMap<SellerRef, SellerShare> = BTreeMap::new();
    for line in lines.iter().filter(|l| l.status != LineStatus::Canceled) {
        shares
            .entry(line.seller())
            .or_insert_with(|| SellerShare {
                seller: line.seller(),
                seller_user_id: line.seller_user_id,
                gross: Decimal::ZERO,
            })
            .gross += line.line_total();
    }
    shares.into_values().collect()
}

/// Platform commission on a gross amount, rounded to cents half away from zero
pub fn commission_for(gross: Decimal, rate: Decimal) -> Decimal {
    (gross * rate).round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero)
}

/// Releases escrowed funds of delivered orders to their sellers
pub struct PayoutService {
    store: Arc<dyn MarketStore>,
    wallets: WalletLedger,
    notifier: Arc<dyn Notifier>,
    commission_rate: Decimal,
}

impl PayoutService {
    pub fn new(
        store: Arc<dyn MarketStore>,
        wallets: WalletLedger,
        notifier: Arc<dyn Notifier>,
        commission_rate: Decimal,
    ) -> Self {
        Self {
            store,
            wallets,
            notifier,
            commission_rate,
        }
    }

    pub fn commission_rate(&self) -> Decimal {
        self.commission_rate
    }

    /// Pays every seller of a delivered order exactly once.
    ///
    /// A failed attempt is recorded on the payout queue row and returned; the
    /// order itself is left as it is.
    pub async fn settle_order(&self, order_id: Uuid) -> AppResult<PayoutOutcome> {
        match self.try_settle(order_id).await {
            Ok(outcome) => Ok(outcome),
            Err(e) => {
                error!("❌ Payout for order {} failed: {}", order_id, e);
                if let Err(record_err) = self.record_failure(order_id, &e.to_string()).await {
                    warn!("Could not record payout failure for {}: {}", order_id, record_err);
                }
                Err(e)
            }
        }
    }

    async fn try_settle(&self, order_id: Uuid) -> AppResult<PayoutOutcome> {
        let mut tx = self.store.begin().await?;

        let order = tx
            .lock_order(order_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("order {}", order_id)))?;
        if order.fulfillment_status != FulfillmentStatus::Delivered {
            debug!("Order {} not delivered, payout skipped", order_id);
            return Ok(PayoutOutcome::NotDelivered);
        }

        let now = Utc::now();
        if Self::already_settled(tx.as_mut(), order_id).await? {
            tx.mark_payout_settled(order_id, now).await?;
            tx.commit().await?;
            debug!("Order {} already settled", order_id);
            return Ok(PayoutOutcome::AlreadySettled);
        }

        let lines = tx.list_order_lines(order_id).await?;
        let escrow_user_id = self.wallets.escrow_user_id();
        let shares = seller_shares(&lines);
        let sellers: Vec<Uuid> = shares.iter().map(|s| s.seller_user_id).collect();
        self.wallets
            .lock_with_escrow_in(tx.as_mut(), &sellers, true)
            .await?;

        let mut settlements = Vec::new();
        for share in shares {
            let commission_amount = commission_for(share.gross, self.commission_rate);
            let settlement = Settlement {
                id: Uuid::new_v4(),
                order_id,
                seller_kind: share.seller.kind(),
                seller_id: share.seller.seller_id(),
                seller_user_id: share.seller_user_id,
                gross_amount: share.gross,
                commission_rate: self.commission_rate,
                commission_amount,
                net_amount: share.gross - commission_amount,
                created_at: now,
            };

            if settlement.net_amount > Decimal::ZERO {
                WalletLedger::transfer_in(
                    tx.as_mut(),
                    escrow_user_id,
                    share.seller_user_id,
                    settlement.net_amount,
                    WalletTransactionKind::Transfer,
                    WalletTransactionKind::Transfer,
                    TransactionLinks::order(order_id).with_settlement(settlement.id),
                    "Seller payout",
                )
                .await?;
            }
            tx.insert_settlement(&settlement).await?;
            settlements.push(settlement);
        }

        tx.enqueue_payout(order_id, now).await?;
        tx.mark_payout_settled(order_id, now).await?;
        tx.commit().await?;

        for settlement in &settlements {
            info!(
                "✓ Paid {} to {} for order {} (commission {})",
                settlement.net_amount,
                settlement.seller_user_id,
                order_id,
                settlement.commission_amount
            );
            notify_best_effort(
                self.notifier.as_ref(),
                Notification::PayoutSettled {
                    seller_user_id: settlement.seller_user_id,
                    order_id,
                    net_amount: settlement.net_amount,
                },
            )
            .await;
        }

        Ok(PayoutOutcome::Settled { settlements })
    }

    async fn already_settled(tx: &mut dyn StoreTx, order_id: Uuid) -> AppResult<bool> {
        if !tx.list_order_settlements(order_id).await?.is_empty() {
            return Ok(true);
        }
        let transfers = tx
            .find_order_transactions(order_id, WalletTransactionKind::Transfer)
            .await?;
        Ok(!transfers.is_empty())
    }

    async fn record_failure(&self, order_id: Uuid, message: &str) -> AppResult<()> {
        let mut tx = self.store.begin().await?;
        let now = Utc::now();
        tx.enqueue_payout(order_id, now).await?;
        tx.record_payout_failure(order_id, message, now).await?;
        tx.commit().await
    }

    /// Retries queued payouts, oldest first
    pub async fn retry_pending(&self, limit: i64) -> AppResult<PayoutSweep> {
        let pending = {
            let mut tx = self.store.begin().await?;
            let rows = tx.list_pending_payouts(limit).await?;
            tx.commit().await?;
            rows
        };

        let mut sweep = PayoutSweep::default();
        for payout in pending {
            sweep.attempted += 1;
            match self.settle_order(payout.order_id).await {
                Ok(PayoutOutcome::Settled { .. }) | Ok(PayoutOutcome::AlreadySettled) => sweep.settled += 1,
                Ok(PayoutOutcome::NotDelivered) => {
                    warn!("Queued order {} is not delivered", payout.order_id);
                    sweep.deferred += 1;
                }
                // already logged and recorded by settle_order
                Err(_) => sweep.deferred += 1,
            }
        }

        if sweep.attempted > 0 {
            info!(
                "🔄 Payout sweep: {} attempted, {} settled, {} deferred",
                sweep.attempted, sweep.settled, sweep.deferred
            );
        }
        Ok(sweep)
    }
}
