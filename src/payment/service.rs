use chrono::Utc;
use rust_decimal::Decimal;
use serde::Serialize;
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

use crate::error::{AppError, AppResult, LedgerError, OrderError};
use crate::inventory::{InventoryLedger, InventoryTransaction};
use crate::notifications::{notify_best_effort, Notification, Notifier};
use crate::orders::models::{Order, OrderStatus, PaymentStatus};
use crate::store::{MarketStore, StoreTx};
use crate::wallet::ledger::WalletLedger;
use crate::wallet::models::{TransactionLinks, WalletTransaction, WalletTransactionKind};

/// Result of a committed wallet payment
#[derive(Debug, Clone, Serialize)]
pub struct PaymentReceipt {
    pub orders: Vec<Order>,
    pub amount: Decimal,
    /// Customer debit; absent when the amount due was zero
    pub payment: Option<WalletTransaction>,
    pub escrow_credit: Option<WalletTransaction>,
    pub inventory: Vec<InventoryTransaction>,
}

/// Debits the customer, credits escrow, marks orders paid and deducts stock
/// in one unit of work.
pub struct PaymentService {
    store: Arc<dyn MarketStore>,
    wallets: WalletLedger,
    notifier: Arc<dyn Notifier>,
}

/// Seller accounts to notify once a payment commits
type SaleNotices = Vec<(Uuid, Uuid)>;

impl PaymentService {
    pub fn new(store: Arc<dyn MarketStore>, wallets: WalletLedger, notifier: Arc<dyn Notifier>) -> Self {
        Self {
            store,
            wallets,
            notifier,
        }
    }

    pub async fn pay_order(&self, user_id: Uuid, order_id: Uuid) -> AppResult<PaymentReceipt> {
        let mut tx = self.store.begin().await?;

        let order = tx
            .lock_order(order_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("order {}", order_id)))?;
        if order.user_id != user_id {
            return Err(AppError::Forbidden(format!("order {} belongs to another user", order_id)));
        }
        if order.is_paid() {
            return Err(OrderError::AlreadyPaid(order_id).into());
        }
        if order.is_canceled() {
            return Err(OrderError::Canceled(order_id).into());
        }

        let (receipt, notices) = self
            .settle(tx.as_mut(), user_id, vec![order], TransactionLinks::order(order_id))
            .await?;
        tx.commit().await?;

        info!("✓ Order {} paid by {} ({})", order_id, user_id, receipt.amount);
        self.notify_paid(user_id, &receipt, notices).await;
        Ok(receipt)
    }

    /// Pays every unpaid order of a checkout at once; paid and canceled ones
    /// are skipped
    pub async fn pay_order_group(&self, user_id: Uuid, group_id: Uuid) -> AppResult<PaymentReceipt> {
        let mut tx = self.store.begin().await?;

        let group = tx
            .find_order_group(group_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("order group {}", group_id)))?;
        if group.user_id != user_id {
            return Err(AppError::Forbidden(format!("order group {} belongs to another user", group_id)));
        }

        let (unpaid, skipped): (Vec<Order>, Vec<Order>) = tx
            .lock_group_orders(group_id)
            .await?
            .into_iter()
            .filter(|o| !o.is_paid())
            .partition(|o| !o.is_canceled());
        if unpaid.is_empty() {
            return Err(match skipped.first() {
                Some(order) => OrderError::Canceled(order.id),
                None => OrderError::AlreadyPaid(group_id),
            }
            .into());
        }

        let (receipt, notices) = self
            .settle(tx.as_mut(), user_id, unpaid, TransactionLinks::order_group(group_id))
            .await?;
        tx.commit().await?;

        info!(
            "✓ Order group {} paid by {} ({} orders, {})",
            group_id,
            user_id,
            receipt.orders.len(),
            receipt.amount
        );
        self.notify_paid(user_id, &receipt, notices).await;
        Ok(receipt)
    }

    async fn settle(
        &self,
        tx: &mut dyn StoreTx,
        user_id: Uuid,
        orders: Vec<Order>,
        links: TransactionLinks,
    ) -> AppResult<(PaymentReceipt, SaleNotices)> {
        let now = Utc::now();

        for order in &orders {
            if order.user_id != user_id {
                return Err(AppError::Forbidden(format!("order {} belongs to another user", order.id)));
            }
            if order.is_canceled() {
                return Err(OrderError::Canceled(order.id).into());
            }
            if order.hold_expired_at(now) {
                return Err(OrderError::HoldExpired(order.id).into());
            }
        }

        let amount: Decimal = orders.iter().map(|o| o.total_amount).sum();

        let locks = self.wallets.lock_with_escrow_in(tx, &[user_id], false).await?;
        let customer = locks
            .counterparts
            .get(&user_id)
            .ok_or(LedgerError::WalletNotFound(user_id))?;
        if !customer.is_active() {
            return Err(LedgerError::WalletLocked(user_id).into());
        }
        if !customer.has_available(amount) {
            return Err(LedgerError::InsufficientBalance {
                required: amount,
                available: customer.balance,
            }
            .into());
        }

        let (payment, escrow_credit) = if amount > Decimal::ZERO {
            let transfer = WalletLedger::transfer_in(
                tx,
                user_id,
                self.wallets.escrow_user_id(),
                amount,
                WalletTransactionKind::Payment,
                WalletTransactionKind::PaymentReceived,
                links,
                "Order payment",
            )
            .await?;
            (Some(transfer.debit), Some(transfer.credit))
        } else {
            (None, None)
        };

        let mut paid = Vec::with_capacity(orders.len());
        let mut inventory = Vec::new();
        let mut notices = Vec::new();
        for mut order in orders {
            if !tx.mark_order_paid(order.id, now).await? {
                return Err(AppError::Concurrency(format!(
                    "order {} was paid concurrently",
                    order.id
                )));
            }
            tx.update_order_fulfillment(order.id, order.fulfillment_status, OrderStatus::Processing)
                .await?;

            let lines = tx.list_order_lines(order.id).await?;
            let deducted = InventoryLedger::deduct_for_order_in(tx, order.id, &lines, Some(user_id)).await?;
            inventory.extend(deducted);

            if let Some(line) = lines.first() {
                notices.push((line.seller_user_id, order.id));
            }

            order.payment_status = PaymentStatus::Paid;
            order.order_status = OrderStatus::Processing;
            order.paid_at = Some(now);
            order.updated_at = now;
            paid.push(order);
        }

        Ok((
            PaymentReceipt {
                orders: paid,
                amount,
                payment,
                escrow_credit,
                inventory,
            },
            notices,
        ))
    }

    async fn notify_paid(&self, user_id: Uuid, receipt: &PaymentReceipt, notices: SaleNotices) {
        for order in &receipt.orders {
            notify_best_effort(
                self.notifier.as_ref(),
                Notification::OrderPaid {
                    user_id,
                    order_id: order.id,
                    amount: order.total_amount,
                },
            )
            .await;
        }
        for (seller_user_id, order_id) in notices {
            notify_best_effort(
                self.notifier.as_ref(),
                Notification::NewSale {
                    seller_user_id,
                    order_id,
                },
            )
            .await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{CatalogItem, StaticCatalog};
    use crate::checkout::{AddressInput, CartLine, CheckoutOutcome, CheckoutPolicy, CheckoutRequest, CheckoutService};
    use crate::error::InventoryError;
    use crate::notifications::testing::RecordingNotifier;
    use crate::orders::models::{FulfillmentStatus, ItemKind, ItemRef, LineStatus, SellerRef};
    use crate::store::MemoryMarketStore;
    use rust_decimal_macros::dec;

    struct Fixture {
        store: Arc<MemoryMarketStore>,
        catalog: Arc<StaticCatalog>,
        checkout: CheckoutService,
        wallets: WalletLedger,
        inventory: InventoryLedger,
        payments: Arc<PaymentService>,
    }

    async fn fixture() -> Fixture {
        let store = Arc::new(MemoryMarketStore::new());
        let catalog = Arc::new(StaticCatalog::new());
        let notifier: Arc<dyn Notifier> = Arc::new(RecordingNotifier::default());
        let wallets = WalletLedger::new(store.clone(), Uuid::new_v4());
        wallets.provision_escrow().await.unwrap();
        Fixture {
            checkout: CheckoutService::new(store.clone(), catalog.clone(), notifier.clone(), CheckoutPolicy::default()),
            inventory: InventoryLedger::new(store.clone()),
            payments: Arc::new(PaymentService::new(store.clone(), wallets.clone(), notifier)),
            wallets,
            store,
            catalog,
        }
    }

    impl Fixture {
        async fn item(&self, kind: ItemKind, seller: SellerRef, price: Decimal) -> ItemRef {
            let item = ItemRef::new(kind, Uuid::new_v4());
            self.catalog
                .upsert_item(CatalogItem {
                    item,
                    unit_price: price,
                    seller,
                    seller_user_id: Uuid::new_v4(),
                    available: true,
                })
                .await;
            item
        }

        /// Cancels every line of an unpaid order the way the tracker does
        async fn cancel_unpaid(&self, order: &crate::orders::models::OrderWithLines) {
            let mut tx = self.store.begin().await.unwrap();
            for line in &order.lines {
                tx.update_line_status(line.id, LineStatus::Canceled).await.unwrap();
            }
            tx.update_order_fulfillment(order.order.id, FulfillmentStatus::Canceled, OrderStatus::Canceled)
                .await
                .unwrap();
            tx.commit().await.unwrap();
        }

        async fn checkout(&self, user: Uuid, lines: &[(ItemRef, i32)]) -> CheckoutOutcome {
            self.checkout
                .create_checkout(
                    user,
                    CheckoutRequest {
                        items: lines
                            .iter()
                            .map(|(item, quantity)| CartLine {
                                item_type: item.kind,
                                item_id: item.id,
                                quantity: *quantity,
                            })
                            .collect(),
                        shipping: AddressInput::Inline {
                            address: "2 Warp Lane".to_string(),
                        },
                        idempotency_key: None,
                        hold_minutes: None,
                    },
                )
                .await
                .unwrap()
        }
    }

    #[tokio::test]
    async fn test_pay_order_moves_funds_and_stock() {
        let fx = fixture().await;
        let cloth = fx.item(ItemKind::Material, SellerRef::Supplier(Uuid::new_v4()), dec!(10)).await;
        let warehouse = Uuid::new_v4();
        fx.inventory.receive_stock(cloth.id, warehouse, 5, None, None, None).await.unwrap();

        let user = Uuid::new_v4();
        fx.wallets.deposit(user, dec!(50), None).await.unwrap();
        let outcome = fx.checkout(user, &[(cloth, 2)]).await;
        let order_id = outcome.orders[0].order.id;

        let receipt = fx.payments.pay_order(user, order_id).await.unwrap();
        assert_eq!(receipt.amount, dec!(20));
        assert_eq!(receipt.orders[0].payment_status, PaymentStatus::Paid);
        assert_eq!(receipt.payment.as_ref().unwrap().order_id, Some(order_id));
        assert_eq!(receipt.inventory.len(), 1);

        assert_eq!(fx.wallets.balance(user).await.unwrap().balance, dec!(30));
        let escrow = fx.wallets.escrow_user_id();
        assert_eq!(fx.wallets.balance(escrow).await.unwrap().balance, dec!(20));
        assert_eq!(fx.inventory.on_hand(cloth.id, warehouse).await.unwrap().quantity, 3);

        let err = fx.payments.pay_order(user, order_id).await.unwrap_err();
        assert!(matches!(err, AppError::Order(OrderError::AlreadyPaid(_))));
        assert!(fx.wallets.reconcile(user).await.unwrap().consistent);
        assert!(fx.wallets.reconcile(escrow).await.unwrap().consistent);
    }

    #[tokio::test]
    async fn test_concurrent_pays_charge_once() {
        let fx = fixture().await;
        let item = fx.item(ItemKind::Design, SellerRef::Designer(Uuid::new_v4()), dec!(10)).await;
        let user = Uuid::new_v4();
        fx.wallets.deposit(user, dec!(100), None).await.unwrap();
        let order_id = fx.checkout(user, &[(item, 1)]).await.orders[0].order.id;

        let (a, b) = tokio::join!(
            fx.payments.pay_order(user, order_id),
            fx.payments.pay_order(user, order_id)
        );
        assert_eq!(a.is_ok() as u8 + b.is_ok() as u8, 1);

        let payments: Vec<_> = fx
            .wallets
            .history(user)
            .await
            .unwrap()
            .into_iter()
            .filter(|t| t.kind == WalletTransactionKind::Payment)
            .collect();
        assert_eq!(payments.len(), 1);
        assert_eq!(fx.wallets.balance(user).await.unwrap().balance, dec!(90));
    }

    #[tokio::test]
    async fn test_insufficient_balance_changes_nothing() {
        let fx = fixture().await;
        let item = fx.item(ItemKind::Product, SellerRef::Designer(Uuid::new_v4()), dec!(20)).await;
        let user = Uuid::new_v4();
        fx.wallets.deposit(user, dec!(15), None).await.unwrap();
        let order_id = fx.checkout(user, &[(item, 1)]).await.orders[0].order.id;

        let err = fx.payments.pay_order(user, order_id).await.unwrap_err();
        assert!(matches!(
            err,
            AppError::Ledger(LedgerError::InsufficientBalance { .. })
        ));
        assert_eq!(fx.wallets.history(user).await.unwrap().len(), 1);

        let mut tx = fx.store.begin().await.unwrap();
        let order = tx.find_order(order_id).await.unwrap().unwrap();
        assert_eq!(order.payment_status, PaymentStatus::Pending);
    }

    #[tokio::test]
    async fn test_insufficient_stock_rolls_back_charge() {
        let fx = fixture().await;
        let cloth = fx.item(ItemKind::Material, SellerRef::Supplier(Uuid::new_v4()), dec!(10)).await;
        let warehouse = Uuid::new_v4();
        fx.inventory.receive_stock(cloth.id, warehouse, 1, None, None, None).await.unwrap();

        let user = Uuid::new_v4();
        fx.wallets.deposit(user, dec!(50), None).await.unwrap();
        let order_id = fx.checkout(user, &[(cloth, 2)]).await.orders[0].order.id;

        let err = fx.payments.pay_order(user, order_id).await.unwrap_err();
        assert!(matches!(
            err,
            AppError::Inventory(InventoryError::InsufficientStock { .. })
        ));
        assert_eq!(fx.wallets.balance(user).await.unwrap().balance, dec!(50));
        assert_eq!(fx.inventory.on_hand(cloth.id, warehouse).await.unwrap().quantity, 1);
    }

    #[tokio::test]
    async fn test_missing_escrow_fails_closed() {
        let store = Arc::new(MemoryMarketStore::new());
        let catalog = Arc::new(StaticCatalog::new());
        let notifier: Arc<dyn Notifier> = Arc::new(RecordingNotifier::default());
        let wallets = WalletLedger::new(store.clone(), Uuid::new_v4());
        let checkout = CheckoutService::new(store.clone(), catalog.clone(), notifier.clone(), CheckoutPolicy::default());
        let payments = PaymentService::new(store.clone(), wallets.clone(), notifier);

        let item = ItemRef::new(ItemKind::Design, Uuid::new_v4());
        catalog
            .upsert_item(CatalogItem {
                item,
                unit_price: dec!(5),
                seller: SellerRef::Designer(Uuid::new_v4()),
                seller_user_id: Uuid::new_v4(),
                available: true,
            })
            .await;
        let user = Uuid::new_v4();
        wallets.deposit(user, dec!(10), None).await.unwrap();
        let outcome = checkout
            .create_checkout(
                user,
                CheckoutRequest {
                    items: vec![CartLine {
                        item_type: item.kind,
                        item_id: item.id,
                        quantity: 1,
                    }],
                    shipping: AddressInput::Inline {
                        address: "3 Bobbin Court".to_string(),
                    },
                    idempotency_key: None,
                    hold_minutes: None,
                },
            )
            .await
            .unwrap();

        let err = payments.pay_order(user, outcome.orders[0].order.id).await.unwrap_err();
        assert!(matches!(err, AppError::Ledger(LedgerError::EscrowWalletMissing(_))));
        assert_eq!(wallets.balance(user).await.unwrap().balance, dec!(10));
    }

    #[tokio::test]
    async fn test_group_pay_skips_paid_orders() {
        let fx = fixture().await;
        let a = fx.item(ItemKind::Product, SellerRef::Designer(Uuid::new_v4()), dec!(20)).await;
        let b = fx.item(ItemKind::Product, SellerRef::Designer(Uuid::new_v4()), dec!(30)).await;
        let user = Uuid::new_v4();
        fx.wallets.deposit(user, dec!(100), None).await.unwrap();
        let outcome = fx.checkout(user, &[(a, 1), (b, 1)]).await;

        fx.payments.pay_order(user, outcome.orders[0].order.id).await.unwrap();
        let receipt = fx.payments.pay_order_group(user, outcome.order_group.id).await.unwrap();
        assert_eq!(receipt.orders.len(), 1);
        assert_eq!(receipt.amount, dec!(30));
        assert_eq!(
            receipt.payment.as_ref().unwrap().order_group_id,
            Some(outcome.order_group.id)
        );
        assert_eq!(fx.wallets.balance(user).await.unwrap().balance, dec!(50));

        let err = fx
            .payments
            .pay_order_group(user, outcome.order_group.id)
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Order(OrderError::AlreadyPaid(_))));
    }

    #[tokio::test]
    async fn test_foreign_and_expired_orders_rejected() {
        let fx = fixture().await;
        let item = fx.item(ItemKind::Design, SellerRef::Designer(Uuid::new_v4()), dec!(5)).await;
        let user = Uuid::new_v4();
        fx.wallets.deposit(user, dec!(10), None).await.unwrap();
        let order_id = fx.checkout(user, &[(item, 1)]).await.orders[0].order.id;

        let stranger = Uuid::new_v4();
        fx.wallets.deposit(stranger, dec!(10), None).await.unwrap();
        let err = fx.payments.pay_order(stranger, order_id).await.unwrap_err();
        assert!(matches!(err, AppError::Forbidden(_)));

        fx.store.expire_holds().await;
        let err = fx.payments.pay_order(user, order_id).await.unwrap_err();
        assert!(matches!(err, AppError::Order(OrderError::HoldExpired(_))));
        assert_eq!(fx.wallets.balance(user).await.unwrap().balance, dec!(10));
    }

    #[tokio::test]
    async fn test_canceled_order_cannot_be_paid() {
        let fx = fixture().await;
        let cloth = fx.item(ItemKind::Material, SellerRef::Supplier(Uuid::new_v4()), dec!(10)).await;
        let warehouse = Uuid::new_v4();
        fx.inventory.receive_stock(cloth.id, warehouse, 5, None, None, None).await.unwrap();

        let user = Uuid::new_v4();
        fx.wallets.deposit(user, dec!(100), None).await.unwrap();
        let outcome = fx.checkout(user, &[(cloth, 2)]).await;
        let order_id = outcome.orders[0].order.id;
        fx.cancel_unpaid(&outcome.orders[0]).await;

        let err = fx.payments.pay_order(user, order_id).await.unwrap_err();
        assert!(matches!(err, AppError::Order(OrderError::Canceled(id)) if id == order_id));
        let err = fx.payments.pay_order_group(user, outcome.order_group.id).await.unwrap_err();
        assert!(matches!(err, AppError::Order(OrderError::Canceled(_))));

        assert_eq!(fx.wallets.balance(user).await.unwrap().balance, dec!(100));
        assert_eq!(fx.wallets.history(user).await.unwrap().len(), 1);
        assert_eq!(fx.inventory.on_hand(cloth.id, warehouse).await.unwrap().quantity, 5);

        let mut tx = fx.store.begin().await.unwrap();
        let order = tx.find_order(order_id).await.unwrap().unwrap();
        assert_eq!(order.payment_status, PaymentStatus::Pending);
        assert_eq!(order.order_status, OrderStatus::Canceled);
    }

    #[tokio::test]
    async fn test_group_pay_skips_canceled_orders() {
        let fx = fixture().await;
        let a = fx.item(ItemKind::Product, SellerRef::Designer(Uuid::new_v4()), dec!(20)).await;
        let b = fx.item(ItemKind::Product, SellerRef::Designer(Uuid::new_v4()), dec!(30)).await;
        let user = Uuid::new_v4();
        fx.wallets.deposit(user, dec!(100), None).await.unwrap();
        let outcome = fx.checkout(user, &[(a, 1), (b, 1)]).await;
        fx.cancel_unpaid(&outcome.orders[0]).await;

        let receipt = fx.payments.pay_order_group(user, outcome.order_group.id).await.unwrap();
        assert_eq!(receipt.orders.len(), 1);
        assert_eq!(receipt.orders[0].id, outcome.orders[1].order.id);
        assert_eq!(receipt.amount, dec!(30));
        assert_eq!(fx.wallets.balance(user).await.unwrap().balance, dec!(70));
    }
}
