use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};
use uuid::Uuid;

use crate::error::{AppError, AppResult};
use crate::inventory::models::{InventoryRecord, InventoryReference, InventoryTransaction};
use crate::orders::models::{
    FulfillmentStatus, LineStatus, Order, OrderGroup, OrderLine, OrderStatus, PaymentStatus,
};
use crate::payout::models::{PayoutStatus, PendingPayout, Settlement};
use crate::store::{MarketStore, StoreTx};
use crate::wallet::models::{
    Wallet, WalletStatus, WalletTransaction, WalletTransactionKind, WalletTransactionStatus,
};

#[derive(Debug, Clone)]
struct CheckoutSession {
    order_group_id: Uuid,
    expires_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default)]
struct MemoryState {
    next_seq: i64,
    wallets: HashMap<Uuid, Wallet>,
    wallet_transactions: Vec<WalletTransaction>,
    inventory_records: HashMap<(Uuid, Uuid), InventoryRecord>,
    inventory_transactions: Vec<InventoryTransaction>,
    order_groups: HashMap<Uuid, OrderGroup>,
    orders: HashMap<Uuid, Order>,
    order_lines: Vec<OrderLine>,
    checkout_sessions: HashMap<(Uuid, String), CheckoutSession>,
    settlements: Vec<Settlement>,
    payouts: HashMap<Uuid, PendingPayout>,
}

impl MemoryState {
    fn next_seq(&mut self) -> i64 {
        self.next_seq += 1;
        self.next_seq
    }

    fn wallet_by_id_mut(&mut self, wallet_id: Uuid) -> AppResult<&mut Wallet> {
        self.wallets
            .values_mut()
            .find(|w| w.id == wallet_id)
            .ok_or_else(|| AppError::NotFound(format!("wallet {}", wallet_id)))
    }
}

/// In-process store for development and tests.
///
/// A transaction holds the store-wide lock from `begin` until it is committed
/// or dropped, so transactions are fully serialized. Writes go to a working
/// copy that replaces the shared state only on commit.
#[derive(Clone, Default)]
pub struct MemoryMarketStore {
    state: Arc<Mutex<MemoryState>>,
}

impl MemoryMarketStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Moves every checkout hold and session expiry into the past
    #[cfg(test)]
    pub async fn expire_holds(&self) {
        let mut state = self.state.lock().await;
        let past = Utc::now() - chrono::Duration::seconds(1);
        for session in state.checkout_sessions.values_mut() {
            session.expires_at = past;
        }
        for group in state.order_groups.values_mut() {
            group.expires_at = past;
        }
        for order in state.orders.values_mut() {
            order.expires_at = past;
        }
    }
}

#[async_trait]
impl MarketStore for MemoryMarketStore {
    async fn begin(&self) -> AppResult<Box<dyn StoreTx>> {
        let guard = self.state.clone().lock_owned().await;
        let work = guard.clone();
        Ok(Box::new(MemoryTx { guard, work }))
    }
}

pub struct MemoryTx {
    guard: OwnedMutexGuard<MemoryState>,
    work: MemoryState,
}

fn unique_violation(what: &str) -> AppError {
    AppError::Concurrency(format!("duplicate key value violates unique constraint on {}", what))
}

#[async_trait]
impl StoreTx for MemoryTx {
    // ========== WALLETS ==========

    async fn find_wallet(&mut self, user_id: Uuid) -> AppResult<Option<Wallet>> {
        Ok(self.work.wallets.get(&user_id).cloned())
    }

    async fn lock_wallet(&mut self, user_id: Uuid) -> AppResult<Option<Wallet>> {
        Ok(self.work.wallets.get(&user_id).cloned())
    }

    async fn lock_wallet_by_id(&mut self, wallet_id: Uuid) -> AppResult<Option<Wallet>> {
        Ok(self.work.wallets.values().find(|w| w.id == wallet_id).cloned())
    }

    async fn insert_wallet(&mut self, wallet: &Wallet) -> AppResult<()> {
        if self.work.wallets.contains_key(&wallet.user_id) {
            return Err(unique_violation("wallets.user_id"));
        }
        self.work.wallets.insert(wallet.user_id, wallet.clone());
        Ok(())
    }

    async fn update_wallet_balance(&mut self, wallet_id: Uuid, balance: Decimal) -> AppResult<()> {
        let wallet = self.work.wallet_by_id_mut(wallet_id)?;
        wallet.balance = balance;
        wallet.updated_at = Utc::now();
        Ok(())
    }

    async fn update_wallet_status(&mut self, wallet_id: Uuid, status: WalletStatus) -> AppResult<()> {
        let wallet = self.work.wallet_by_id_mut(wallet_id)?;
        wallet.status = status;
        wallet.updated_at = Utc::now();
        Ok(())
    }

    async fn insert_wallet_transaction(&mut self, txn: &WalletTransaction) -> AppResult<WalletTransaction> {
        let mut row = txn.clone();
        row.seq = self.work.next_seq();
        self.work.wallet_transactions.push(row.clone());
        Ok(row)
    }

    async fn lock_wallet_transaction(&mut self, txn_id: Uuid) -> AppResult<Option<WalletTransaction>> {
        Ok(self
            .work
            .wallet_transactions
            .iter()
            .find(|t| t.id == txn_id)
            .cloned())
    }

    async fn complete_wallet_transaction(
        &mut self,
        txn_id: Uuid,
        status: WalletTransactionStatus,
        balance_before: Option<Decimal>,
        balance_after: Option<Decimal>,
        completed_at: DateTime<Utc>,
    ) -> AppResult<WalletTransaction> {
        let row = self
            .work
            .wallet_transactions
            .iter_mut()
            .find(|t| t.id == txn_id && t.status == WalletTransactionStatus::Pending)
            .ok_or_else(|| AppError::Concurrency(format!("transaction {} is no longer pending", txn_id)))?;
        row.status = status;
        row.balance_before = balance_before;
        row.balance_after = balance_after;
        row.completed_at = Some(completed_at);
        Ok(row.clone())
    }

    async fn list_wallet_transactions(&mut self, wallet_id: Uuid) -> AppResult<Vec<WalletTransaction>> {
        let mut rows: Vec<_> = self
            .work
            .wallet_transactions
            .iter()
            .filter(|t| t.wallet_id == wallet_id)
            .cloned()
            .collect();
        rows.sort_by_key(|t| t.seq);
        Ok(rows)
    }

    async fn find_order_transactions(
        &mut self,
        order_id: Uuid,
        kind: WalletTransactionKind,
    ) -> AppResult<Vec<WalletTransaction>> {
        Ok(self
            .work
            .wallet_transactions
            .iter()
            .filter(|t| t.order_id == Some(order_id) && t.kind == kind)
            .cloned()
            .collect())
    }

    async fn find_line_transactions(
        &mut self,
        order_line_id: Uuid,
        kind: WalletTransactionKind,
    ) -> AppResult<Vec<WalletTransaction>> {
        Ok(self
            .work
            .wallet_transactions
            .iter()
            .filter(|t| t.order_line_id == Some(order_line_id) && t.kind == kind)
            .cloned()
            .collect())
    }

    // ========== INVENTORY ==========

    async fn lock_inventory_record(
        &mut self,
        item_id: Uuid,
        warehouse_id: Uuid,
    ) -> AppResult<Option<InventoryRecord>> {
        Ok(self.work.inventory_records.get(&(item_id, warehouse_id)).cloned())
    }

    async fn lock_inventory_records_for_item(&mut self, item_id: Uuid) -> AppResult<Vec<InventoryRecord>> {
        let mut records: Vec<_> = self
            .work
            .inventory_records
            .values()
            .filter(|r| r.item_id == item_id)
            .cloned()
            .collect();
        records.sort_by(|a, b| {
            b.quantity
                .cmp(&a.quantity)
                .then_with(|| a.warehouse_id.cmp(&b.warehouse_id))
        });
        Ok(records)
    }

    async fn insert_inventory_record(&mut self, record: &InventoryRecord) -> AppResult<()> {
        let key = (record.item_id, record.warehouse_id);
        if self.work.inventory_records.contains_key(&key) {
            return Err(unique_violation("inventory_records(item_id, warehouse_id)"));
        }
        self.work.inventory_records.insert(key, record.clone());
        Ok(())
    }

    async fn update_inventory_quantity(&mut self, record_id: Uuid, quantity: i32) -> AppResult<()> {
        let record = self
            .work
            .inventory_records
            .values_mut()
            .find(|r| r.id == record_id)
            .ok_or_else(|| AppError::NotFound(format!("inventory record {}", record_id)))?;
        record.quantity = quantity;
        record.updated_at = Utc::now();
        Ok(())
    }

    async fn insert_inventory_transaction(
        &mut self,
        txn: &InventoryTransaction,
    ) -> AppResult<InventoryTransaction> {
        if let (Some(kind), Some(id)) = (txn.reference_kind, txn.reference_id) {
            let duplicate = self.work.inventory_transactions.iter().any(|t| {
                t.reference_kind == Some(kind)
                    && t.reference_id == Some(id)
                    && t.item_id == txn.item_id
                    && t.warehouse_id == txn.warehouse_id
            });
            if duplicate {
                return Err(unique_violation("inventory_transactions reference"));
            }
        }
        let mut row = txn.clone();
        row.seq = self.work.next_seq();
        self.work.inventory_transactions.push(row.clone());
        Ok(row)
    }

    async fn find_inventory_transactions_by_reference(
        &mut self,
        reference: InventoryReference,
    ) -> AppResult<Vec<InventoryTransaction>> {
        Ok(self
            .work
            .inventory_transactions
            .iter()
            .filter(|t| t.reference_kind == Some(reference.kind) && t.reference_id == Some(reference.id))
            .cloned()
            .collect())
    }

    async fn list_inventory_transactions(
        &mut self,
        item_id: Uuid,
        warehouse_id: Uuid,
    ) -> AppResult<Vec<InventoryTransaction>> {
        let mut rows: Vec<_> = self
            .work
            .inventory_transactions
            .iter()
            .filter(|t| t.item_id == item_id && t.warehouse_id == warehouse_id)
            .cloned()
            .collect();
        rows.sort_by_key(|t| t.seq);
        Ok(rows)
    }

    // ========== ORDERS ==========

    async fn insert_order_group(&mut self, group: &OrderGroup) -> AppResult<()> {
        self.work.order_groups.insert(group.id, group.clone());
        Ok(())
    }

    async fn find_order_group(&mut self, group_id: Uuid) -> AppResult<Option<OrderGroup>> {
        Ok(self.work.order_groups.get(&group_id).cloned())
    }

    async fn increment_group_completed(&mut self, group_id: Uuid) -> AppResult<()> {
        let group = self
            .work
            .order_groups
            .get_mut(&group_id)
            .ok_or_else(|| AppError::NotFound(format!("order group {}", group_id)))?;
        group.completed_orders += 1;
        Ok(())
    }

    async fn insert_order(&mut self, order: &Order) -> AppResult<()> {
        self.work.orders.insert(order.id, order.clone());
        Ok(())
    }

    async fn insert_order_line(&mut self, line: &OrderLine) -> AppResult<()> {
        self.work.order_lines.push(line.clone());
        Ok(())
    }

    async fn find_order(&mut self, order_id: Uuid) -> AppResult<Option<Order>> {
        Ok(self.work.orders.get(&order_id).cloned())
    }

    async fn lock_order(&mut self, order_id: Uuid) -> AppResult<Option<Order>> {
        Ok(self.work.orders.get(&order_id).cloned())
    }

    async fn lock_group_orders(&mut self, group_id: Uuid) -> AppResult<Vec<Order>> {
        let mut orders: Vec<_> = self
            .work
            .orders
            .values()
            .filter(|o| o.order_group_id == Some(group_id))
            .cloned()
            .collect();
        orders.sort_by_key(|o| o.id);
        Ok(orders)
    }

    async fn list_group_orders(&mut self, group_id: Uuid) -> AppResult<Vec<Order>> {
        self.lock_group_orders(group_id).await
    }

    async fn mark_order_paid(&mut self, order_id: Uuid, paid_at: DateTime<Utc>) -> AppResult<bool> {
        match self.work.orders.get_mut(&order_id) {
            Some(order) if order.payment_status == PaymentStatus::Pending => {
                order.payment_status = PaymentStatus::Paid;
                order.paid_at = Some(paid_at);
                order.updated_at = paid_at;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn update_order_fulfillment(
        &mut self,
        order_id: Uuid,
        fulfillment_status: FulfillmentStatus,
        order_status: OrderStatus,
    ) -> AppResult<()> {
        let order = self
            .work
            .orders
            .get_mut(&order_id)
            .ok_or_else(|| AppError::NotFound(format!("order {}", order_id)))?;
        order.fulfillment_status = fulfillment_status;
        order.order_status = order_status;
        order.updated_at = Utc::now();
        Ok(())
    }

    async fn list_order_lines(&mut self, order_id: Uuid) -> AppResult<Vec<OrderLine>> {
        Ok(self
            .work
            .order_lines
            .iter()
            .filter(|l| l.order_id == order_id)
            .cloned()
            .collect())
    }

    async fn lock_order_line(&mut self, line_id: Uuid) -> AppResult<Option<OrderLine>> {
        Ok(self.work.order_lines.iter().find(|l| l.id == line_id).cloned())
    }

    async fn update_line_status(&mut self, line_id: Uuid, status: LineStatus) -> AppResult<()> {
        let line = self
            .work
            .order_lines
            .iter_mut()
            .find(|l| l.id == line_id)
            .ok_or_else(|| AppError::NotFound(format!("order line {}", line_id)))?;
        line.status = status;
        line.updated_at = Utc::now();
        Ok(())
    }

    // ========== CHECKOUT SESSIONS ==========

    async fn find_active_checkout(
        &mut self,
        user_id: Uuid,
        idempotency_key: &str,
        now: DateTime<Utc>,
    ) -> AppResult<Option<Uuid>> {
        Ok(self
            .work
            .checkout_sessions
            .get(&(user_id, idempotency_key.to_string()))
            .filter(|s| s.expires_at > now)
            .map(|s| s.order_group_id))
    }

    async fn claim_checkout_session(
        &mut self,
        user_id: Uuid,
        idempotency_key: &str,
        order_group_id: Uuid,
        expires_at: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> AppResult<bool> {
        let key = (user_id, idempotency_key.to_string());
        if let Some(existing) = self.work.checkout_sessions.get(&key) {
            if existing.expires_at > now {
                return Ok(false);
            }
        }
        self.work.checkout_sessions.insert(
            key,
            CheckoutSession {
                order_group_id,
                expires_at,
            },
        );
        Ok(true)
    }

    // ========== PAYOUTS ==========

    async fn list_order_settlements(&mut self, order_id: Uuid) -> AppResult<Vec<Settlement>> {
        Ok(self
            .work
            .settlements
            .iter()
            .filter(|s| s.order_id == order_id)
            .cloned()
            .collect())
    }

    async fn insert_settlement(&mut self, settlement: &Settlement) -> AppResult<()> {
        let duplicate = self.work.settlements.iter().any(|s| {
            s.order_id == settlement.order_id
                && s.seller_kind == settlement.seller_kind
                && s.seller_id == settlement.seller_id
        });
        if duplicate {
            return Err(unique_violation("settlements(order_id, seller_kind, seller_id)"));
        }
        self.work.settlements.push(settlement.clone());
        Ok(())
    }

    async fn enqueue_payout(&mut self, order_id: Uuid, now: DateTime<Utc>) -> AppResult<()> {
        self.work.payouts.entry(order_id).or_insert(PendingPayout {
            order_id,
            status: PayoutStatus::Pending,
            attempts: 0,
            last_error: None,
            enqueued_at: now,
            settled_at: None,
            updated_at: now,
        });
        Ok(())
    }

    async fn find_payout(&mut self, order_id: Uuid) -> AppResult<Option<PendingPayout>> {
        Ok(self.work.payouts.get(&order_id).cloned())
    }

    async fn list_pending_payouts(&mut self, limit: i64) -> AppResult<Vec<PendingPayout>> {
        let mut pending: Vec<_> = self
            .work
            .payouts
            .values()
            .filter(|p| p.status == PayoutStatus::Pending)
            .cloned()
            .collect();
        pending.sort_by_key(|p| p.enqueued_at);
        pending.truncate(limit.max(0) as usize);
        Ok(pending)
    }

    async fn mark_payout_settled(&mut self, order_id: Uuid, now: DateTime<Utc>) -> AppResult<()> {
        if let Some(payout) = self.work.payouts.get_mut(&order_id) {
            payout.status = PayoutStatus::Settled;
            payout.attempts += 1;
            payout.last_error = None;
            payout.settled_at = Some(now);
            payout.updated_at = now;
        }
        Ok(())
    }

    async fn record_payout_failure(&mut self, order_id: Uuid, error: &str, now: DateTime<Utc>) -> AppResult<()> {
        if let Some(payout) = self.work.payouts.get_mut(&order_id) {
            payout.attempts += 1;
            payout.last_error = Some(error.to_string());
            payout.updated_at = now;
        }
        Ok(())
    }

    async fn commit(self: Box<Self>) -> AppResult<()> {
        let MemoryTx { mut guard, work } = *self;
        *guard = work;
        Ok(())
    }
}
