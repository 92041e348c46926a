//! Unit-of-work access to marketplace state.
//!
//! Every multi-step mutation runs inside one `StoreTx`: all writes become
//! visible together on `commit`, and dropping the transaction discards them.
//! `lock_*` reads take row locks that are held until the transaction ends.

pub mod memory;
pub mod postgres;

pub use memory::MemoryMarketStore;
pub use postgres::PgMarketStore;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use uuid::Uuid;

use crate::error::AppResult;
use crate::inventory::models::{InventoryRecord, InventoryReference, InventoryTransaction};
use crate::orders::models::{FulfillmentStatus, LineStatus, Order, OrderGroup, OrderLine, OrderStatus};
use crate::payout::models::{PendingPayout, Settlement};
use crate::wallet::models::{
    Wallet, WalletStatus, WalletTransaction, WalletTransactionKind, WalletTransactionStatus,
};

#[async_trait]
pub trait MarketStore: Send + Sync {
    async fn begin(&self) -> AppResult<Box<dyn StoreTx>>;
}

#[async_trait]
pub trait StoreTx: Send {
    // ========== WALLETS ==========

    async fn find_wallet(&mut self, user_id: Uuid) -> AppResult<Option<Wallet>>;

    async fn lock_wallet(&mut self, user_id: Uuid) -> AppResult<Option<Wallet>>;

    async fn lock_wallet_by_id(&mut self, wallet_id: Uuid) -> AppResult<Option<Wallet>>;

    async fn insert_wallet(&mut self, wallet: &Wallet) -> AppResult<()>;

    async fn update_wallet_balance(&mut self, wallet_id: Uuid, balance: Decimal) -> AppResult<()>;

    async fn update_wallet_status(&mut self, wallet_id: Uuid, status: WalletStatus) -> AppResult<()>;

    /// Appends a ledger row; the store assigns `seq`
    async fn insert_wallet_transaction(&mut self, txn: &WalletTransaction) -> AppResult<WalletTransaction>;

    async fn lock_wallet_transaction(&mut self, txn_id: Uuid) -> AppResult<Option<WalletTransaction>>;

    /// The single permitted update of a ledger row: leaving `Pending`
    async fn complete_wallet_transaction(
        &mut self,
        txn_id: Uuid,
        status: WalletTransactionStatus,
        balance_before: Option<Decimal>,
        balance_after: Option<Decimal>,
        completed_at: DateTime<Utc>,
    ) -> AppResult<WalletTransaction>;

    /// All rows of a wallet in creation order
    async fn list_wallet_transactions(&mut self, wallet_id: Uuid) -> AppResult<Vec<WalletTransaction>>;

    async fn find_order_transactions(
        &mut self,
        order_id: Uuid,
        kind: WalletTransactionKind,
    ) -> AppResult<Vec<WalletTransaction>>;

    async fn find_line_transactions(
        &mut self,
        order_line_id: Uuid,
        kind: WalletTransactionKind,
    ) -> AppResult<Vec<WalletTransaction>>;

    // ========== INVENTORY ==========

    async fn lock_inventory_record(
        &mut self,
        item_id: Uuid,
        warehouse_id: Uuid,
    ) -> AppResult<Option<InventoryRecord>>;

    /// Records of one item, largest on-hand first
    async fn lock_inventory_records_for_item(&mut self, item_id: Uuid) -> AppResult<Vec<InventoryRecord>>;

    async fn insert_inventory_record(&mut self, record: &InventoryRecord) -> AppResult<()>;

    async fn update_inventory_quantity(&mut self, record_id: Uuid, quantity: i32) -> AppResult<()>;

    async fn insert_inventory_transaction(
        &mut self,
        txn: &InventoryTransaction,
    ) -> AppResult<InventoryTransaction>;

    async fn find_inventory_transactions_by_reference(
        &mut self,
        reference: InventoryReference,
    ) -> AppResult<Vec<InventoryTransaction>>;

    async fn list_inventory_transactions(
        &mut self,
        item_id: Uuid,
        warehouse_id: Uuid,
    ) -> AppResult<Vec<InventoryTransaction>>;

    // ========== ORDERS ==========

    async fn insert_order_group(&mut self, group: &OrderGroup) -> AppResult<()>;

    async fn find_order_group(&mut self, group_id: Uuid) -> AppResult<Option<OrderGroup>>;

    async fn increment_group_completed(&mut self, group_id: Uuid) -> AppResult<()>;

    async fn insert_order(&mut self, order: &Order) -> AppResult<()>;

    async fn insert_order_line(&mut self, line: &OrderLine) -> AppResult<()>;

    async fn find_order(&mut self, order_id: Uuid) -> AppResult<Option<Order>>;

    async fn lock_order(&mut self, order_id: Uuid) -> AppResult<Option<Order>>;

    /// Orders of a group, ascending id (stable lock order)
    async fn lock_group_orders(&mut self, group_id: Uuid) -> AppResult<Vec<Order>>;

    /// Orders of a group without row locks
    async fn list_group_orders(&mut self, group_id: Uuid) -> AppResult<Vec<Order>>;

    /// Pending → Paid; returns false when the guard lost the race
    async fn mark_order_paid(&mut self, order_id: Uuid, paid_at: DateTime<Utc>) -> AppResult<bool>;

    async fn update_order_fulfillment(
        &mut self,
        order_id: Uuid,
        fulfillment_status: FulfillmentStatus,
        order_status: OrderStatus,
    ) -> AppResult<()>;

    async fn list_order_lines(&mut self, order_id: Uuid) -> AppResult<Vec<OrderLine>>;

    async fn lock_order_line(&mut self, line_id: Uuid) -> AppResult<Option<OrderLine>>;

    async fn update_line_status(&mut self, line_id: Uuid, status: LineStatus) -> AppResult<()>;

    // ========== CHECKOUT SESSIONS ==========

    async fn find_active_checkout(
        &mut self,
        user_id: Uuid,
        idempotency_key: &str,
        now: DateTime<Utc>,
    ) -> AppResult<Option<Uuid>>;

    /// Binds (user, key) to a group unless an unexpired binding exists
    async fn claim_checkout_session(
        &mut self,
        user_id: Uuid,
        idempotency_key: &str,
        order_group_id: Uuid,
        expires_at: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> AppResult<bool>;

    // ========== PAYOUTS ==========

    async fn list_order_settlements(&mut self, order_id: Uuid) -> AppResult<Vec<Settlement>>;

    async fn insert_settlement(&mut self, settlement: &Settlement) -> AppResult<()>;

    /// No-op when the order is already queued
    async fn enqueue_payout(&mut self, order_id: Uuid, now: DateTime<Utc>) -> AppResult<()>;

    async fn find_payout(&mut self, order_id: Uuid) -> AppResult<Option<PendingPayout>>;

    async fn list_pending_payouts(&mut self, limit: i64) -> AppResult<Vec<PendingPayout>>;

    async fn mark_payout_settled(&mut self, order_id: Uuid, now: DateTime<Utc>) -> AppResult<()>;

    async fn record_payout_failure(&mut self, order_id: Uuid, error: &str, now: DateTime<Utc>) -> AppResult<()>;

    async fn commit(self: Box<Self>) -> AppResult<()>;
}
