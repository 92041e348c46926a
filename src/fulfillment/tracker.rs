use chrono::Utc;
use rust_decimal::Decimal;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::status::{aggregate, aggregate_orders, can_transition, terminal_order_status};
use crate::actor::Actor;
use crate::error::{AppError, AppResult, OrderError};
use crate::inventory::{InventoryLedger, InventoryTransaction};
use crate::notifications::{notify_best_effort, Notification, Notifier};
use crate::orders::models::{
    FulfillmentStatus, LineStatus, Order, OrderLine, OrderStatus, PaymentStatus, SellerRef,
};
use crate::payout::{PayoutOutcome, PayoutService};
use crate::store::{MarketStore, StoreTx};
use crate::wallet::ledger::WalletLedger;
use crate::wallet::models::{TransactionLinks, WalletTransaction, WalletTransactionKind};

/// Result of one line status change
#[derive(Debug, Clone, Serialize)]
pub struct LineStatusUpdate {
    pub line: OrderLine,
    /// False when the line already had the requested status
    pub changed: bool,
    pub fulfillment_status: FulfillmentStatus,
    pub order_status: OrderStatus,
    /// Customer credits written by a cancellation
    pub refunds: Vec<WalletTransaction>,
    pub restocked: Option<InventoryTransaction>,
    /// Set when this change delivered the order and a payout was attempted
    pub payout: Option<PayoutOutcome>,
}

#[derive(Debug, Clone, Serialize)]
pub struct BulkConfirmation {
    pub order_id: Uuid,
    pub seller_id: Uuid,
    pub confirmed: Vec<Uuid>,
    pub fulfillment_status: FulfillmentStatus,
}

/// Line counts by status
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct LineCounts {
    pub pending: u32,
    pub confirmed: u32,
    pub shipping: u32,
    pub delivered: u32,
    pub canceled: u32,
}

impl LineCounts {
    fn add(&mut self, status: LineStatus) {
        match status {
            LineStatus::Pending => self.pending += 1,
            LineStatus::Confirmed => self.confirmed += 1,
            LineStatus::Shipping => self.shipping += 1,
            LineStatus::Delivered => self.delivered += 1,
            LineStatus::Canceled => self.canceled += 1,
        }
    }

    pub fn total(&self) -> u32 {
        self.pending + self.confirmed + self.shipping + self.delivered + self.canceled
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct SellerProgress {
    pub seller: SellerRef,
    pub lines: LineCounts,
    pub fulfillment_status: FulfillmentStatus,
}

#[derive(Debug, Clone, Serialize)]
pub struct GroupProgress {
    pub order_group_id: Uuid,
    pub total_orders: i32,
    pub completed_orders: i32,
    pub fulfillment_status: FulfillmentStatus,
}

#[derive(Debug, Clone, Serialize)]
pub struct OrderProgress {
    pub order_id: Uuid,
    pub payment_status: PaymentStatus,
    pub order_status: OrderStatus,
    pub fulfillment_status: FulfillmentStatus,
    pub group: Option<GroupProgress>,
    pub sellers: Vec<SellerProgress>,
}

/// Order state after its lines changed
struct Recomputed {
    fulfillment_status: FulfillmentStatus,
    order_status: OrderStatus,
    newly_delivered: bool,
    refunds: Vec<WalletTransaction>,
}

/// Drives per-line fulfillment and keeps the order aggregate, group counters,
/// refunds and the payout queue in step with it.
pub struct FulfillmentTracker {
    store: Arc<dyn MarketStore>,
    wallets: WalletLedger,
    notifier: Arc<dyn Notifier>,
    payouts: Arc<PayoutService>,
}

impl FulfillmentTracker {
    pub fn new(
        store: Arc<dyn MarketStore>,
        wallets: WalletLedger,
        notifier: Arc<dyn Notifier>,
        payouts: Arc<PayoutService>,
    ) -> Self {
        Self {
            store,
            wallets,
            notifier,
            payouts,
        }
    }

    /// Sellers move their own lines; admin and system actors may only
    /// record delivery.
    fn authorize(actor: &Actor, line: &OrderLine, target: LineStatus) -> AppResult<()> {
        if actor.is_user(line.seller_user_id) {
            return Ok(());
        }
        if actor.is_privileged() && target == LineStatus::Delivered {
            return Ok(());
        }
        Err(AppError::Forbidden(format!(
            "not allowed to set line {} to {}",
            line.id, target
        )))
    }

    pub async fn update_line_status(
        &self,
        actor: &Actor,
        line_id: Uuid,
        target: LineStatus,
    ) -> AppResult<LineStatusUpdate> {
        let mut tx = self.store.begin().await?;

        let mut line = tx
            .lock_order_line(line_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("order line {}", line_id)))?;
        Self::authorize(actor, &line, target)?;

        let order = tx
            .lock_order(line.order_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("order {}", line.order_id)))?;

        if line.status == target {
            debug!("Line {} already {}", line_id, target);
            return Ok(LineStatusUpdate {
                line,
                changed: false,
                fulfillment_status: order.fulfillment_status,
                order_status: order.order_status,
                refunds: Vec::new(),
                restocked: None,
                payout: None,
            });
        }

        if !can_transition(line.status, target) {
            return Err(OrderError::InvalidTransition {
                from: line.status,
                to: target,
            }
            .into());
        }
        if target != LineStatus::Canceled && !order.is_paid() {
            return Err(OrderError::NotPaid(order.id).into());
        }

        tx.update_line_status(line.id, target).await?;
        line.status = target;
        line.updated_at = Utc::now();

        let mut refunds = Vec::new();
        let mut restocked = None;
        if target == LineStatus::Canceled && order.is_paid() {
            if let Some(credit) = self.refund_line_in(tx.as_mut(), &order, &line).await? {
                refunds.push(credit);
            }
            restocked = InventoryLedger::restock_line_in(tx.as_mut(), &line, actor.user_id()).await?;
        }

        let recomputed = self.recompute_in(tx.as_mut(), &order).await?;
        refunds.extend(recomputed.refunds.iter().cloned());
        tx.commit().await?;

        info!(
            "📦 Line {} {} (order {} now {:?})",
            line.id, target, order.id, recomputed.fulfillment_status
        );
        self.line_changed(&order, &line).await;
        let payout = self.after_delivery(order.id, recomputed.newly_delivered).await;

        Ok(LineStatusUpdate {
            line,
            changed: true,
            fulfillment_status: recomputed.fulfillment_status,
            order_status: recomputed.order_status,
            refunds,
            restocked,
            payout,
        })
    }

    /// Confirms every pending line of one seller within an order
    pub async fn confirm_all_seller_lines(
        &self,
        actor: &Actor,
        order_id: Uuid,
        seller_id: Uuid,
    ) -> AppResult<BulkConfirmation> {
        let mut tx = self.store.begin().await?;

        let seller_lines: Vec<OrderLine> = tx
            .list_order_lines(order_id)
            .await?
            .into_iter()
            .filter(|l| l.seller_id == seller_id)
            .collect();
        let Some(first) = seller_lines.first() else {
            return Err(AppError::NotFound(format!(
                "no lines of seller {} in order {}",
                seller_id, order_id
            )));
        };
        Self::authorize(actor, first, LineStatus::Confirmed)?;

        // lines before the order, ascending id, like single-line updates
        let mut pending_ids: Vec<Uuid> = seller_lines
            .iter()
            .filter(|l| l.status == LineStatus::Pending)
            .map(|l| l.id)
            .collect();
        pending_ids.sort();
        let mut locked = Vec::with_capacity(pending_ids.len());
        for id in pending_ids {
            if let Some(line) = tx.lock_order_line(id).await? {
                locked.push(line);
            }
        }

        let order = tx
            .lock_order(order_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("order {}", order_id)))?;

        let mut confirmed = Vec::new();
        for mut line in locked.into_iter().filter(|l| l.status == LineStatus::Pending) {
            if !order.is_paid() {
                return Err(OrderError::NotPaid(order.id).into());
            }
            tx.update_line_status(line.id, LineStatus::Confirmed).await?;
            line.status = LineStatus::Confirmed;
            confirmed.push(line);
        }

        let fulfillment_status = if confirmed.is_empty() {
            order.fulfillment_status
        } else {
            self.recompute_in(tx.as_mut(), &order).await?.fulfillment_status
        };
        tx.commit().await?;

        info!(
            "✓ Confirmed {} line(s) of seller {} in order {}",
            confirmed.len(),
            seller_id,
            order_id
        );
        for line in &confirmed {
            self.line_changed(&order, line).await;
        }

        Ok(BulkConfirmation {
            order_id,
            seller_id,
            confirmed: confirmed.iter().map(|l| l.id).collect(),
            fulfillment_status,
        })
    }

    pub async fn get_order_progress(&self, actor: &Actor, order_id: Uuid) -> AppResult<OrderProgress> {
        let mut tx = self.store.begin().await?;

        let order = tx
            .find_order(order_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("order {}", order_id)))?;
        let lines = tx.list_order_lines(order_id).await?;

        let is_seller = lines.iter().any(|l| actor.is_user(l.seller_user_id));
        if !(actor.is_user(order.user_id) || is_seller || actor.is_privileged()) {
            return Err(AppError::Forbidden(format!("not allowed to view order {}", order_id)));
        }

        let group = match order.order_group_id {
            Some(group_id) => match tx.find_order_group(group_id).await? {
                Some(g) => {
                    let statuses: Vec<FulfillmentStatus> = tx
                        .list_group_orders(group_id)
                        .await?
                        .iter()
                        .map(|o| o.fulfillment_status)
                        .collect();
                    Some(GroupProgress {
                        order_group_id: g.id,
                        total_orders: g.total_orders,
                        completed_orders: g.completed_orders,
                        fulfillment_status: aggregate_orders(&statuses),
                    })
                }
                None => None,
            },
            None => None,
        };
        tx.commit().await?;

        let mut by_seller: BTreeMap<SellerRef, Vec<LineStatus>> = BTreeMap::new();
        for line in &lines {
            by_seller.entry(line.seller()).or_default().push(line.status);
        }
        let sellers = by_seller
            .into_iter()
            .map(|(seller, statuses)| {
                let mut counts = LineCounts::default();
                statuses.iter().for_each(|s| counts.add(*s));
                SellerProgress {
                    seller,
                    lines: counts,
                    fulfillment_status: aggregate(&statuses),
                }
            })
            .collect();

        let statuses: Vec<LineStatus> = lines.iter().map(|l| l.status).collect();
        Ok(OrderProgress {
            order_id,
            payment_status: order.payment_status,
            order_status: order.order_status,
            fulfillment_status: aggregate(&statuses),
            group,
            sellers,
        })
    }

    // ========== TRANSACTION STEPS ==========

    /// Writes the aggregate derived from the order's current lines and the
    /// effects of reaching a terminal state.
    async fn recompute_in(&self, tx: &mut dyn StoreTx, order: &Order) -> AppResult<Recomputed> {
        let lines = tx.list_order_lines(order.id).await?;
        let statuses: Vec<LineStatus> = lines.iter().map(|l| l.status).collect();
        let fulfillment_status = aggregate(&statuses);
        let order_status = terminal_order_status(fulfillment_status).unwrap_or(order.order_status);

        if fulfillment_status != order.fulfillment_status || order_status != order.order_status {
            tx.update_order_fulfillment(order.id, fulfillment_status, order_status)
                .await?;
        }

        let newly_terminal = fulfillment_status.is_terminal() && !order.fulfillment_status.is_terminal();
        if newly_terminal {
            if let Some(group_id) = order.order_group_id {
                tx.increment_group_completed(group_id).await?;
            }
        }

        let newly_delivered = newly_terminal && fulfillment_status == FulfillmentStatus::Delivered;
        if newly_delivered {
            tx.enqueue_payout(order.id, Utc::now()).await?;
        }

        let mut refunds = Vec::new();
        if newly_terminal && fulfillment_status == FulfillmentStatus::Canceled && order.is_paid() {
            if let Some(credit) = self.refund_remainder_in(tx, order).await? {
                refunds.push(credit);
            }
        }

        Ok(Recomputed {
            fulfillment_status,
            order_status,
            newly_delivered,
            refunds,
        })
    }

    /// Total already credited back to the customer for an order
    async fn refunded_in(tx: &mut dyn StoreTx, order: &Order) -> AppResult<Decimal> {
        Ok(tx
            .find_order_transactions(order.id, WalletTransactionKind::Refund)
            .await?
            .iter()
            .filter(|t| t.is_success() && t.amount > Decimal::ZERO)
            .map(|t| t.amount)
            .sum())
    }

    /// Refunds a canceled line from escrow, never more than the order's
    /// unrefunded total.
    async fn refund_line_in(
        &self,
        tx: &mut dyn StoreTx,
        order: &Order,
        line: &OrderLine,
    ) -> AppResult<Option<WalletTransaction>> {
        let existing = tx
            .find_line_transactions(line.id, WalletTransactionKind::Refund)
            .await?;
        if !existing.is_empty() {
            return Ok(None);
        }

        let outstanding = order.total_amount - Self::refunded_in(tx, order).await?;
        let amount = line.line_total().min(outstanding);
        self.refund_in(
            tx,
            order,
            amount,
            TransactionLinks::order(order.id).with_line(line.id),
            "Refund for canceled line",
        )
        .await
    }

    /// Returns what is left of a fully canceled order, such as its shipping fee
    async fn refund_remainder_in(&self, tx: &mut dyn StoreTx, order: &Order) -> AppResult<Option<WalletTransaction>> {
        let outstanding = order.total_amount - Self::refunded_in(tx, order).await?;
        self.refund_in(
            tx,
            order,
            outstanding,
            TransactionLinks::order(order.id),
            "Refund for canceled order",
        )
        .await
    }

    async fn refund_in(
        &self,
        tx: &mut dyn StoreTx,
        order: &Order,
        amount: Decimal,
        links: TransactionLinks,
        description: &str,
    ) -> AppResult<Option<WalletTransaction>> {
        if amount <= Decimal::ZERO {
            return Ok(None);
        }

        self.wallets.lock_with_escrow_in(tx, &[order.user_id], false).await?;
        let transfer = WalletLedger::transfer_in(
            tx,
            self.wallets.escrow_user_id(),
            order.user_id,
            amount,
            WalletTransactionKind::Refund,
            WalletTransactionKind::Refund,
            links,
            description,
        )
        .await?;

        info!("↩️ Refunded {} to {} for order {}", amount, order.user_id, order.id);
        Ok(Some(transfer.credit))
    }

    // ========== AFTER COMMIT ==========

    async fn line_changed(&self, order: &Order, line: &OrderLine) {
        notify_best_effort(
            self.notifier.as_ref(),
            Notification::LineStatusChanged {
                user_id: order.user_id,
                order_id: order.id,
                line_id: line.id,
                status: line.status,
            },
        )
        .await;
    }

    /// Attempts the payout right away; failures stay queued for the retry worker
    async fn after_delivery(&self, order_id: Uuid, newly_delivered: bool) -> Option<PayoutOutcome> {
        if !newly_delivered {
            return None;
        }
        match self.payouts.settle_order(order_id).await {
            Ok(outcome) => Some(outcome),
            Err(e) => {
                warn!("Payout for order {} deferred: {}", order_id, e);
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{CatalogItem, StaticCatalog};
    use crate::checkout::{AddressInput, CartLine, CheckoutPolicy, CheckoutRequest, CheckoutService};
    use crate::notifications::testing::RecordingNotifier;
    use crate::orders::models::{ItemKind, ItemRef, OrderWithLines};
    use crate::payment::PaymentService;
    use crate::payout::models::PayoutStatus;
    use crate::store::MemoryMarketStore;
    use rust_decimal_macros::dec;

    struct Fixture {
        store: Arc<MemoryMarketStore>,
        catalog: Arc<StaticCatalog>,
        notifier: Arc<RecordingNotifier>,
        wallets: WalletLedger,
        inventory: InventoryLedger,
        checkout: CheckoutService,
        payments: PaymentService,
        payouts: Arc<PayoutService>,
        tracker: FulfillmentTracker,
    }

    async fn fixture() -> Fixture {
        fixture_with(CheckoutPolicy::default()).await
    }

    async fn fixture_with(policy: CheckoutPolicy) -> Fixture {
        let store = Arc::new(MemoryMarketStore::new());
        let catalog = Arc::new(StaticCatalog::new());
        let notifier = Arc::new(RecordingNotifier::default());
        let wallets = WalletLedger::new(store.clone(), Uuid::new_v4());
        wallets.provision_escrow().await.unwrap();
        let payouts = Arc::new(PayoutService::new(
            store.clone(),
            wallets.clone(),
            notifier.clone(),
            dec!(0.10),
        ));
        Fixture {
            checkout: CheckoutService::new(store.clone(), catalog.clone(), notifier.clone(), policy),
            payments: PaymentService::new(store.clone(), wallets.clone(), notifier.clone()),
            tracker: FulfillmentTracker::new(store.clone(), wallets.clone(), notifier.clone(), payouts.clone()),
            inventory: InventoryLedger::new(store.clone()),
            payouts,
            wallets,
            notifier,
            catalog,
            store,
        }
    }

    struct Sale {
        customer: Uuid,
        seller_user: Uuid,
        order: OrderWithLines,
    }

    impl Fixture {
        /// One seller order with the given (kind, price, quantity) lines
        async fn order(&self, lines: &[(ItemKind, Decimal, i32)], pay: bool) -> Sale {
            let customer = Uuid::new_v4();
            let seller_user = Uuid::new_v4();
            let seller = SellerRef::Supplier(Uuid::new_v4());

            let mut cart = Vec::new();
            for (kind, price, quantity) in lines {
                let item = ItemRef::new(*kind, Uuid::new_v4());
                self.catalog
                    .upsert_item(CatalogItem {
                        item,
                        unit_price: *price,
                        seller,
                        seller_user_id: seller_user,
                        available: true,
                    })
                    .await;
                if kind.is_stocked() {
                    self.inventory
                        .receive_stock(item.id, Uuid::new_v4(), 100, None, None, None)
                        .await
                        .unwrap();
                }
                cart.push(CartLine {
                    item_type: item.kind,
                    item_id: item.id,
                    quantity: *quantity,
                });
            }

            let outcome = self
                .checkout
                .create_checkout(
                    customer,
                    CheckoutRequest {
                        items: cart,
                        shipping: AddressInput::Inline {
                            address: "9 Loom Street".to_string(),
                        },
                        idempotency_key: None,
                        hold_minutes: None,
                    },
                )
                .await
                .unwrap();
            let order = outcome.orders.into_iter().next().unwrap();

            if pay {
                self.wallets.deposit(customer, dec!(1000), None).await.unwrap();
                self.payments.pay_order(customer, order.order.id).await.unwrap();
            }

            Sale {
                customer,
                seller_user,
                order,
            }
        }

        async fn set(&self, sale: &Sale, index: usize, status: LineStatus) -> AppResult<LineStatusUpdate> {
            self.tracker
                .update_line_status(&Actor::User(sale.seller_user), sale.order.lines[index].id, status)
                .await
        }
    }

    #[tokio::test]
    async fn test_confirm_ship_deliver_pays_seller() {
        let fx = fixture().await;
        let sale = fx.order(&[(ItemKind::Product, dec!(10), 2)], true).await;

        let update = fx.set(&sale, 0, LineStatus::Confirmed).await.unwrap();
        assert_eq!(update.fulfillment_status, FulfillmentStatus::Processing);
        let update = fx.set(&sale, 0, LineStatus::Shipping).await.unwrap();
        assert_eq!(update.fulfillment_status, FulfillmentStatus::Shipped);

        let update = fx
            .tracker
            .update_line_status(&Actor::System, sale.order.lines[0].id, LineStatus::Delivered)
            .await
            .unwrap();
        assert_eq!(update.fulfillment_status, FulfillmentStatus::Delivered);
        assert_eq!(update.order_status, OrderStatus::Completed);
        match update.payout {
            Some(PayoutOutcome::Settled { settlements }) => {
                assert_eq!(settlements.len(), 1);
                assert_eq!(settlements[0].commission_amount, dec!(2.00));
                assert_eq!(settlements[0].net_amount, dec!(18.00));
            }
            other => panic!("expected a settled payout, got {:?}", other),
        }

        assert_eq!(fx.wallets.balance(sale.seller_user).await.unwrap().balance, dec!(18));
        let escrow = fx.wallets.escrow_user_id();
        assert_eq!(fx.wallets.balance(escrow).await.unwrap().balance, dec!(2));

        let progress = fx
            .tracker
            .get_order_progress(&Actor::User(sale.customer), sale.order.order.id)
            .await
            .unwrap();
        let group = progress.group.unwrap();
        assert_eq!((group.total_orders, group.completed_orders), (1, 1));
        assert_eq!(group.fulfillment_status, FulfillmentStatus::Delivered);

        // a second settle attempt is a no-op
        let again = fx.payouts.settle_order(sale.order.order.id).await.unwrap();
        assert!(matches!(again, PayoutOutcome::AlreadySettled));
        assert!(fx.wallets.reconcile(sale.seller_user).await.unwrap().consistent);
    }

    #[tokio::test]
    async fn test_shipping_fee_stays_with_platform() {
        let fx = fixture_with(CheckoutPolicy {
            shipping_fee: dec!(5),
            ..CheckoutPolicy::default()
        })
        .await;
        let sale = fx.order(&[(ItemKind::Product, dec!(10), 2)], true).await;
        assert_eq!(sale.order.order.total_amount, dec!(25));

        fx.set(&sale, 0, LineStatus::Confirmed).await.unwrap();
        fx.set(&sale, 0, LineStatus::Shipping).await.unwrap();
        let update = fx
            .tracker
            .update_line_status(&Actor::System, sale.order.lines[0].id, LineStatus::Delivered)
            .await
            .unwrap();
        match update.payout {
            Some(PayoutOutcome::Settled { settlements }) => {
                assert_eq!(settlements[0].gross_amount, dec!(20));
                assert_eq!(settlements[0].commission_amount, dec!(2.00));
                assert_eq!(settlements[0].net_amount, dec!(18.00));
            }
            other => panic!("expected a settled payout, got {:?}", other),
        }

        assert_eq!(fx.wallets.balance(sale.seller_user).await.unwrap().balance, dec!(18));
        let escrow = fx.wallets.escrow_user_id();
        assert_eq!(fx.wallets.balance(escrow).await.unwrap().balance, dec!(7));
    }

    #[tokio::test]
    async fn test_unpaid_order_only_allows_cancel() {
        let fx = fixture().await;
        let sale = fx.order(&[(ItemKind::Design, dec!(5), 1)], false).await;

        let err = fx.set(&sale, 0, LineStatus::Confirmed).await.unwrap_err();
        assert!(matches!(err, AppError::Order(OrderError::NotPaid(_))));

        let update = fx.set(&sale, 0, LineStatus::Canceled).await.unwrap();
        assert_eq!(update.fulfillment_status, FulfillmentStatus::Canceled);
        assert_eq!(update.order_status, OrderStatus::Canceled);
        assert!(update.refunds.is_empty());

        let progress = fx
            .tracker
            .get_order_progress(&Actor::System, sale.order.order.id)
            .await
            .unwrap();
        let group = progress.group.unwrap();
        assert_eq!(group.completed_orders, 1);
        assert_eq!(group.fulfillment_status, FulfillmentStatus::Canceled);

        // the canceled order can no longer be charged
        fx.wallets.deposit(sale.customer, dec!(100), None).await.unwrap();
        let err = fx
            .payments
            .pay_order(sale.customer, sale.order.order.id)
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Order(OrderError::Canceled(_))));
        assert_eq!(fx.wallets.balance(sale.customer).await.unwrap().balance, dec!(100));
    }

    #[tokio::test]
    async fn test_authorization_rules() {
        let fx = fixture().await;
        let sale = fx.order(&[(ItemKind::Product, dec!(10), 1)], true).await;
        let line_id = sale.order.lines[0].id;

        let err = fx
            .tracker
            .update_line_status(&Actor::User(sale.customer), line_id, LineStatus::Confirmed)
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Forbidden(_)));

        let err = fx
            .tracker
            .update_line_status(&Actor::Admin(Uuid::new_v4()), line_id, LineStatus::Confirmed)
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Forbidden(_)));

        // admin may record delivery, but only along valid transitions
        let err = fx
            .tracker
            .update_line_status(&Actor::Admin(Uuid::new_v4()), line_id, LineStatus::Delivered)
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Order(OrderError::InvalidTransition { .. })));
    }

    #[tokio::test]
    async fn test_invalid_and_repeated_transitions() {
        let fx = fixture().await;
        let sale = fx.order(&[(ItemKind::Product, dec!(10), 1)], true).await;

        let err = fx.set(&sale, 0, LineStatus::Shipping).await.unwrap_err();
        assert!(matches!(
            err,
            AppError::Order(OrderError::InvalidTransition {
                from: LineStatus::Pending,
                to: LineStatus::Shipping
            })
        ));

        assert!(fx.set(&sale, 0, LineStatus::Confirmed).await.unwrap().changed);
        let again = fx.set(&sale, 0, LineStatus::Confirmed).await.unwrap();
        assert!(!again.changed);
        assert_eq!(again.fulfillment_status, FulfillmentStatus::Processing);
    }

    #[tokio::test]
    async fn test_cancel_paid_line_refunds_and_restocks() {
        let fx = fixture().await;
        let sale = fx
            .order(&[(ItemKind::Material, dec!(4), 3), (ItemKind::Product, dec!(10), 1)], true)
            .await;
        let material = &sale.order.lines[0];
        let before = fx.wallets.balance(sale.customer).await.unwrap().balance;

        let update = fx.set(&sale, 0, LineStatus::Canceled).await.unwrap();
        assert_eq!(update.refunds.len(), 1);
        assert_eq!(update.refunds[0].amount, dec!(12));
        assert_eq!(update.refunds[0].order_line_id, Some(material.id));
        let restock = update.restocked.unwrap();
        assert_eq!(restock.delta, 3);
        assert_eq!(
            fx.inventory.on_hand(material.item_id, restock.warehouse_id).await.unwrap().quantity,
            100
        );
        assert_eq!(fx.wallets.balance(sale.customer).await.unwrap().balance, before + dec!(12));
        // the remaining line alone drives the aggregate
        assert_eq!(update.fulfillment_status, FulfillmentStatus::None);

        fx.set(&sale, 1, LineStatus::Confirmed).await.unwrap();
        fx.set(&sale, 1, LineStatus::Shipping).await.unwrap();
        let update = fx.set(&sale, 1, LineStatus::Delivered).await.unwrap();
        match update.payout {
            Some(PayoutOutcome::Settled { settlements }) => assert_eq!(settlements[0].gross_amount, dec!(10)),
            other => panic!("expected a settled payout, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_canceling_whole_order_refunds_total() {
        let fx = fixture().await;
        let sale = fx
            .order(&[(ItemKind::Product, dec!(10), 1), (ItemKind::Product, dec!(5), 2)], true)
            .await;

        fx.set(&sale, 0, LineStatus::Canceled).await.unwrap();
        let update = fx.set(&sale, 1, LineStatus::Canceled).await.unwrap();
        assert_eq!(update.order_status, OrderStatus::Canceled);
        assert_eq!(fx.wallets.balance(sale.customer).await.unwrap().balance, dec!(1000));
        assert_eq!(
            fx.wallets.balance(fx.wallets.escrow_user_id()).await.unwrap().balance,
            Decimal::ZERO
        );
    }

    #[tokio::test]
    async fn test_bulk_confirm_and_progress() {
        let fx = fixture().await;
        let sale = fx
            .order(&[(ItemKind::Product, dec!(10), 1), (ItemKind::Design, dec!(3), 1)], true)
            .await;
        let seller_id = sale.order.order.seller_id;

        let bulk = fx
            .tracker
            .confirm_all_seller_lines(&Actor::User(sale.seller_user), sale.order.order.id, seller_id)
            .await
            .unwrap();
        assert_eq!(bulk.confirmed.len(), 2);
        assert_eq!(bulk.fulfillment_status, FulfillmentStatus::Processing);

        fx.set(&sale, 1, LineStatus::Shipping).await.unwrap();
        let progress = fx
            .tracker
            .get_order_progress(&Actor::User(sale.seller_user), sale.order.order.id)
            .await
            .unwrap();
        assert_eq!(progress.fulfillment_status, FulfillmentStatus::PartiallyShipped);
        assert_eq!(progress.sellers.len(), 1);
        let counts = progress.sellers[0].lines;
        assert_eq!((counts.confirmed, counts.shipping, counts.total()), (1, 1, 2));

        let err = fx
            .tracker
            .get_order_progress(&Actor::User(Uuid::new_v4()), sale.order.order.id)
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Forbidden(_)));

        let sent = fx.notifier.sent.lock().await;
        let changes = sent
            .iter()
            .filter(|n| matches!(n, Notification::LineStatusChanged { .. }))
            .count();
        assert_eq!(changes, 3);
    }

    #[tokio::test]
    async fn test_failed_payout_is_queued_and_retried() {
        let fx = fixture().await;
        let sale = fx.order(&[(ItemKind::Product, dec!(10), 2)], true).await;
        let order_id = sale.order.order.id;
        let escrow = fx.wallets.escrow_user_id();

        // drain escrow so the payout cannot be funded
        fx.wallets.withdraw(escrow, dec!(20), None).await.unwrap();

        fx.set(&sale, 0, LineStatus::Confirmed).await.unwrap();
        fx.set(&sale, 0, LineStatus::Shipping).await.unwrap();
        let update = fx.set(&sale, 0, LineStatus::Delivered).await.unwrap();
        assert_eq!(update.fulfillment_status, FulfillmentStatus::Delivered);
        assert!(update.payout.is_none());

        let mut tx = fx.store.begin().await.unwrap();
        let queued = tx.find_payout(order_id).await.unwrap().unwrap();
        drop(tx);
        assert_eq!(queued.status, PayoutStatus::Pending);
        assert_eq!(queued.attempts, 1);
        assert!(queued.last_error.is_some());

        fx.wallets.deposit(escrow, dec!(20), None).await.unwrap();
        let sweep = fx.payouts.retry_pending(10).await.unwrap();
        assert_eq!((sweep.attempted, sweep.settled, sweep.deferred), (1, 1, 0));
        assert_eq!(fx.wallets.balance(sale.seller_user).await.unwrap().balance, dec!(18));

        let sweep = fx.payouts.retry_pending(10).await.unwrap();
        assert_eq!(sweep.attempted, 0);
    }
}
