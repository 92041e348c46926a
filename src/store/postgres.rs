use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::{PgPool, Postgres, Transaction};
use uuid::Uuid;

use crate::error::{AppError, AppResult};
use crate::inventory::models::{InventoryRecord, InventoryReference, InventoryTransaction};
use crate::orders::models::{FulfillmentStatus, LineStatus, Order, OrderGroup, OrderLine, OrderStatus};
use crate::payout::models::{PendingPayout, Settlement};
use crate::store::{MarketStore, StoreTx};
use crate::wallet::models::{
    Wallet, WalletStatus, WalletTransaction, WalletTransactionKind, WalletTransactionStatus,
};

const WALLET_COLUMNS: &str = "id, user_id, balance, status, created_at, updated_at";

const WALLET_TXN_COLUMNS: &str = "id, seq, wallet_id, amount, balance_before, balance_after, kind, status, \
     order_id, order_group_id, settlement_id, order_line_id, external_reference, description, \
     created_at, completed_at";

const INVENTORY_RECORD_COLUMNS: &str = "id, item_id, warehouse_id, quantity, updated_at";

const INVENTORY_TXN_COLUMNS: &str = "id, seq, record_id, item_id, warehouse_id, kind, delta, \
     quantity_before, quantity_after, reference_kind, reference_id, performed_by, note, created_at";

const ORDER_GROUP_COLUMNS: &str =
    "id, user_id, total_orders, completed_orders, idempotency_key, expires_at, created_at";

const ORDER_COLUMNS: &str = "id, user_id, order_group_id, seller_kind, seller_id, shipping_address, \
     subtotal, shipping_fee, discount, total_amount, payment_status, order_status, fulfillment_status, \
     idempotency_key, expires_at, paid_at, created_at, updated_at";

const ORDER_LINE_COLUMNS: &str = "id, order_id, item_kind, item_id, seller_kind, seller_id, seller_user_id, \
     quantity, unit_price, status, created_at, updated_at";

const SETTLEMENT_COLUMNS: &str = "id, order_id, seller_kind, seller_id, seller_user_id, gross_amount, \
     commission_rate, commission_amount, net_amount, created_at";

const PAYOUT_COLUMNS: &str = "order_id, status, attempts, last_error, enqueued_at, settled_at, updated_at";

/// Postgres-backed store; each `StoreTx` is one database transaction
#[derive(Clone)]
pub struct PgMarketStore {
    pool: PgPool,
    statement_timeout_ms: u64,
}

impl PgMarketStore {
    pub fn new(pool: PgPool, statement_timeout_ms: u64) -> Self {
        Self {
            pool,
            statement_timeout_ms,
        }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl MarketStore for PgMarketStore {
    async fn begin(&self) -> AppResult<Box<dyn StoreTx>> {
        let mut tx = self.pool.begin().await?;

        // Bounded lock waits surface as retryable errors instead of hanging
        sqlx::query(&format!(
            "SET LOCAL statement_timeout = {}",
            self.statement_timeout_ms
        ))
        .execute(&mut *tx)
        .await?;

        Ok(Box::new(PgStoreTx { tx }))
    }
}

pub struct PgStoreTx {
    tx: Transaction<'static, Postgres>,
}

#[async_trait]
impl StoreTx for PgStoreTx {
    // ========== WALLETS ==========

    async fn find_wallet(&mut self, user_id: Uuid) -> AppResult<Option<Wallet>> {
        let wallet = sqlx::query_as::<_, Wallet>(&format!(
            "SELECT {} FROM wallets WHERE user_id = $1",
            WALLET_COLUMNS
        ))
        .bind(user_id)
        .fetch_optional(&mut *self.tx)
        .await?;

        Ok(wallet)
    }

    async fn lock_wallet(&mut self, user_id: Uuid) -> AppResult<Option<Wallet>> {
        let wallet = sqlx::query_as::<_, Wallet>(&format!(
            "SELECT {} FROM wallets WHERE user_id = $1 FOR UPDATE",
            WALLET_COLUMNS
        ))
        .bind(user_id)
        .fetch_optional(&mut *self.tx)
        .await?;

        Ok(wallet)
    }

    async fn lock_wallet_by_id(&mut self, wallet_id: Uuid) -> AppResult<Option<Wallet>> {
        let wallet = sqlx::query_as::<_, Wallet>(&format!(
            "SELECT {} FROM wallets WHERE id = $1 FOR UPDATE",
            WALLET_COLUMNS
        ))
        .bind(wallet_id)
        .fetch_optional(&mut *self.tx)
        .await?;

        Ok(wallet)
    }

    async fn insert_wallet(&mut self, wallet: &Wallet) -> AppResult<()> {
        sqlx::query(
            r#"
            INSERT INTO wallets (id, user_id, balance, status, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(wallet.id)
        .bind(wallet.user_id)
        .bind(wallet.balance)
        .bind(wallet.status)
        .bind(wallet.created_at)
        .bind(wallet.updated_at)
        .execute(&mut *self.tx)
        .await?;

        Ok(())
    }

    async fn update_wallet_balance(&mut self, wallet_id: Uuid, balance: Decimal) -> AppResult<()> {
        let result = sqlx::query(
            r#"
            UPDATE wallets
            SET balance = $2, updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(wallet_id)
        .bind(balance)
        .execute(&mut *self.tx)
        .await?;

        if result.rows_affected() == 0 {
            return Err(AppError::NotFound(format!("wallet {}", wallet_id)));
        }

        Ok(())
    }

    async fn update_wallet_status(&mut self, wallet_id: Uuid, status: WalletStatus) -> AppResult<()> {
        let result = sqlx::query("UPDATE wallets SET status = $2, updated_at = NOW() WHERE id = $1")
            .bind(wallet_id)
            .bind(status)
            .execute(&mut *self.tx)
            .await?;

        if result.rows_affected() == 0 {
            return Err(AppError::NotFound(format!("wallet {}", wallet_id)));
        }

        Ok(())
    }

    async fn insert_wallet_transaction(&mut self, txn: &WalletTransaction) -> AppResult<WalletTransaction> {
        let row = sqlx::query_as::<_, WalletTransaction>(&format!(
            r#"
            INSERT INTO wallet_transactions (
                id, wallet_id, amount, balance_before, balance_after, kind, status,
                order_id, order_group_id, settlement_id, order_line_id,
                external_reference, description, created_at, completed_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15)
            RETURNING {}
            "#,
            WALLET_TXN_COLUMNS
        ))
        .bind(txn.id)
        .bind(txn.wallet_id)
        .bind(txn.amount)
        .bind(txn.balance_before)
        .bind(txn.balance_after)
        .bind(txn.kind)
        .bind(txn.status)
        .bind(txn.order_id)
        .bind(txn.order_group_id)
        .bind(txn.settlement_id)
        .bind(txn.order_line_id)
        .bind(&txn.external_reference)
        .bind(&txn.description)
        .bind(txn.created_at)
        .bind(txn.completed_at)
        .fetch_one(&mut *self.tx)
        .await?;

        Ok(row)
    }

    async fn lock_wallet_transaction(&mut self, txn_id: Uuid) -> AppResult<Option<WalletTransaction>> {
        let row = sqlx::query_as::<_, WalletTransaction>(&format!(
            "SELECT {} FROM wallet_transactions WHERE id = $1 FOR UPDATE",
            WALLET_TXN_COLUMNS
        ))
        .bind(txn_id)
        .fetch_optional(&mut *self.tx)
        .await?;

        Ok(row)
    }

    async fn complete_wallet_transaction(
        &mut self,
        txn_id: Uuid,
        status: WalletTransactionStatus,
        balance_before: Option<Decimal>,
        balance_after: Option<Decimal>,
        completed_at: DateTime<Utc>,
    ) -> AppResult<WalletTransaction> {
        let row = sqlx::query_as::<_, WalletTransaction>(&format!(
            r#"
            UPDATE wallet_transactions
            SET status = $2, balance_before = $3, balance_after = $4, completed_at = $5
            WHERE id = $1 AND status = 'pending'
            RETURNING {}
            "#,
            WALLET_TXN_COLUMNS
        ))
        .bind(txn_id)
        .bind(status)
        .bind(balance_before)
        .bind(balance_after)
        .bind(completed_at)
        .fetch_optional(&mut *self.tx)
        .await?;

        row.ok_or_else(|| AppError::Concurrency(format!("transaction {} is no longer pending", txn_id)))
    }

    async fn list_wallet_transactions(&mut self, wallet_id: Uuid) -> AppResult<Vec<WalletTransaction>> {
        let rows = sqlx::query_as::<_, WalletTransaction>(&format!(
            "SELECT {} FROM wallet_transactions WHERE wallet_id = $1 ORDER BY seq ASC",
            WALLET_TXN_COLUMNS
        ))
        .bind(wallet_id)
        .fetch_all(&mut *self.tx)
        .await?;

        Ok(rows)
    }

    async fn find_order_transactions(
        &mut self,
        order_id: Uuid,
        kind: WalletTransactionKind,
    ) -> AppResult<Vec<WalletTransaction>> {
        let rows = sqlx::query_as::<_, WalletTransaction>(&format!(
            "SELECT {} FROM wallet_transactions WHERE order_id = $1 AND kind = $2 ORDER BY seq ASC",
            WALLET_TXN_COLUMNS
        ))
        .bind(order_id)
        .bind(kind)
        .fetch_all(&mut *self.tx)
        .await?;

        Ok(rows)
    }

    async fn find_line_transactions(
        &mut self,
        order_line_id: Uuid,
        kind: WalletTransactionKind,
    ) -> AppResult<Vec<WalletTransaction>> {
        let rows = sqlx::query_as::<_, WalletTransaction>(&format!(
            "SELECT {} FROM wallet_transactions WHERE order_line_id = $1 AND kind = $2 ORDER BY seq ASC",
            WALLET_TXN_COLUMNS
        ))
        .bind(order_line_id)
        .bind(kind)
        .fetch_all(&mut *self.tx)
        .await?;

        Ok(rows)
    }

    // ========== INVENTORY ==========

    async fn lock_inventory_record(
        &mut self,
        item_id: Uuid,
        warehouse_id: Uuid,
    ) -> AppResult<Option<InventoryRecord>> {
        let record = sqlx::query_as::<_, InventoryRecord>(&format!(
            "SELECT {} FROM inventory_records WHERE item_id = $1 AND warehouse_id = $2 FOR UPDATE",
            INVENTORY_RECORD_COLUMNS
        ))
        .bind(item_id)
        .bind(warehouse_id)
        .fetch_optional(&mut *self.tx)
        .await?;

        Ok(record)
    }

    async fn lock_inventory_records_for_item(&mut self, item_id: Uuid) -> AppResult<Vec<InventoryRecord>> {
        let records = sqlx::query_as::<_, InventoryRecord>(&format!(
            r#"
            SELECT {} FROM inventory_records
            WHERE item_id = $1
            ORDER BY quantity DESC, warehouse_id ASC
            FOR UPDATE
            "#,
            INVENTORY_RECORD_COLUMNS
        ))
        .bind(item_id)
        .fetch_all(&mut *self.tx)
        .await?;

        Ok(records)
    }

    async fn insert_inventory_record(&mut self, record: &InventoryRecord) -> AppResult<()> {
        sqlx::query(
            r#"
            INSERT INTO inventory_records (id, item_id, warehouse_id, quantity, updated_at)
            VALUES ($1, $2, $3, $4, $5)
            "#,
        )
        .bind(record.id)
        .bind(record.item_id)
        .bind(record.warehouse_id)
        .bind(record.quantity)
        .bind(record.updated_at)
        .execute(&mut *self.tx)
        .await?;

        Ok(())
    }

    async fn update_inventory_quantity(&mut self, record_id: Uuid, quantity: i32) -> AppResult<()> {
        let result = sqlx::query(
            "UPDATE inventory_records SET quantity = $2, updated_at = NOW() WHERE id = $1",
        )
        .bind(record_id)
        .bind(quantity)
        .execute(&mut *self.tx)
        .await?;

        if result.rows_affected() == 0 {
            return Err(AppError::NotFound(format!("inventory record {}", record_id)));
        }

        Ok(())
    }

    async fn insert_inventory_transaction(
        &mut self,
        txn: &InventoryTransaction,
    ) -> AppResult<InventoryTransaction> {
        let row = sqlx::query_as::<_, InventoryTransaction>(&format!(
            r#"
            INSERT INTO inventory_transactions (
                id, record_id, item_id, warehouse_id, kind, delta, quantity_before, quantity_after,
                reference_kind, reference_id, performed_by, note, created_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
            RETURNING {}
            "#,
            INVENTORY_TXN_COLUMNS
        ))
        .bind(txn.id)
        .bind(txn.record_id)
        .bind(txn.item_id)
        .bind(txn.warehouse_id)
        .bind(txn.kind)
        .bind(txn.delta)
        .bind(txn.quantity_before)
        .bind(txn.quantity_after)
        .bind(txn.reference_kind)
        .bind(txn.reference_id)
        .bind(txn.performed_by)
        .bind(&txn.note)
        .bind(txn.created_at)
        .fetch_one(&mut *self.tx)
        .await?;

        Ok(row)
    }

    async fn find_inventory_transactions_by_reference(
        &mut self,
        reference: InventoryReference,
    ) -> AppResult<Vec<InventoryTransaction>> {
        let rows = sqlx::query_as::<_, InventoryTransaction>(&format!(
            r#"
            SELECT {} FROM inventory_transactions
            WHERE reference_kind = $1 AND reference_id = $2
            ORDER BY seq ASC
            "#,
            INVENTORY_TXN_COLUMNS
        ))
        .bind(reference.kind)
        .bind(reference.id)
        .fetch_all(&mut *self.tx)
        .await?;

        Ok(rows)
    }

    async fn list_inventory_transactions(
        &mut self,
        item_id: Uuid,
        warehouse_id: Uuid,
    ) -> AppResult<Vec<InventoryTransaction>> {
        let rows = sqlx::query_as::<_, InventoryTransaction>(&format!(
            r#"
            SELECT {} FROM inventory_transactions
            WHERE item_id = $1 AND warehouse_id = $2
            ORDER BY seq ASC
            "#,
            INVENTORY_TXN_COLUMNS
        ))
        .bind(item_id)
        .bind(warehouse_id)
        .fetch_all(&mut *self.tx)
        .await?;

        Ok(rows)
    }

    // ========== ORDERS ==========

    async fn insert_order_group(&mut self, group: &OrderGroup) -> AppResult<()> {
        sqlx::query(
            r#"
            INSERT INTO order_groups (id, user_id, total_orders, completed_orders, idempotency_key, expires_at, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(group.id)
        .bind(group.user_id)
        .bind(group.total_orders)
        .bind(group.completed_orders)
        .bind(&group.idempotency_key)
        .bind(group.expires_at)
        .bind(group.created_at)
        .execute(&mut *self.tx)
        .await?;

        Ok(())
    }

    async fn find_order_group(&mut self, group_id: Uuid) -> AppResult<Option<OrderGroup>> {
        let group = sqlx::query_as::<_, OrderGroup>(&format!(
            "SELECT {} FROM order_groups WHERE id = $1",
            ORDER_GROUP_COLUMNS
        ))
        .bind(group_id)
        .fetch_optional(&mut *self.tx)
        .await?;

        Ok(group)
    }

    async fn increment_group_completed(&mut self, group_id: Uuid) -> AppResult<()> {
        let result = sqlx::query(
            r#"
            UPDATE order_groups
            SET completed_orders = completed_orders + 1
            WHERE id = $1 AND completed_orders < total_orders
            "#,
        )
        .bind(group_id)
        .execute(&mut *self.tx)
        .await?;

        if result.rows_affected() == 0 {
            return Err(AppError::Concurrency(format!(
                "order group {} has no incomplete orders left",
                group_id
            )));
        }

        Ok(())
    }

    async fn insert_order(&mut self, order: &Order) -> AppResult<()> {
        sqlx::query(
            r#"
            INSERT INTO orders (
                id, user_id, order_group_id, seller_kind, seller_id, shipping_address,
                subtotal, shipping_fee, discount, total_amount,
                payment_status, order_status, fulfillment_status,
                idempotency_key, expires_at, paid_at, created_at, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17, $18)
            "#,
        )
        .bind(order.id)
        .bind(order.user_id)
        .bind(order.order_group_id)
        .bind(order.seller_kind)
        .bind(order.seller_id)
        .bind(&order.shipping_address)
        .bind(order.subtotal)
        .bind(order.shipping_fee)
        .bind(order.discount)
        .bind(order.total_amount)
        .bind(order.payment_status)
        .bind(order.order_status)
        .bind(order.fulfillment_status)
        .bind(&order.idempotency_key)
        .bind(order.expires_at)
        .bind(order.paid_at)
        .bind(order.created_at)
        .bind(order.updated_at)
        .execute(&mut *self.tx)
        .await?;

        Ok(())
    }

    async fn insert_order_line(&mut self, line: &OrderLine) -> AppResult<()> {
        sqlx::query(
            r#"
            INSERT INTO order_lines (
                id, order_id, item_kind, item_id, seller_kind, seller_id, seller_user_id,
                quantity, unit_price, status, created_at, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
            "#,
        )
        .bind(line.id)
        .bind(line.order_id)
        .bind(line.item_kind)
        .bind(line.item_id)
        .bind(line.seller_kind)
        .bind(line.seller_id)
        .bind(line.seller_user_id)
        .bind(line.quantity)
        .bind(line.unit_price)
        .bind(line.status)
        .bind(line.created_at)
        .bind(line.updated_at)
        .execute(&mut *self.tx)
        .await?;

        Ok(())
    }

    async fn find_order(&mut self, order_id: Uuid) -> AppResult<Option<Order>> {
        let order = sqlx::query_as::<_, Order>(&format!(
            "SELECT {} FROM orders WHERE id = $1",
            ORDER_COLUMNS
        ))
        .bind(order_id)
        .fetch_optional(&mut *self.tx)
        .await?;

        Ok(order)
    }

    async fn lock_order(&mut self, order_id: Uuid) -> AppResult<Option<Order>> {
        let order = sqlx::query_as::<_, Order>(&format!(
            "SELECT {} FROM orders WHERE id = $1 FOR UPDATE",
            ORDER_COLUMNS
        ))
        .bind(order_id)
        .fetch_optional(&mut *self.tx)
        .await?;

        Ok(order)
    }

    async fn lock_group_orders(&mut self, group_id: Uuid) -> AppResult<Vec<Order>> {
        let orders = sqlx::query_as::<_, Order>(&format!(
            "SELECT {} FROM orders WHERE order_group_id = $1 ORDER BY id ASC FOR UPDATE",
            ORDER_COLUMNS
        ))
        .bind(group_id)
        .fetch_all(&mut *self.tx)
        .await?;

        Ok(orders)
    }

    async fn list_group_orders(&mut self, group_id: Uuid) -> AppResult<Vec<Order>> {
        let orders = sqlx::query_as::<_, Order>(&format!(
            "SELECT {} FROM orders WHERE order_group_id = $1 ORDER BY created_at ASC, id ASC",
            ORDER_COLUMNS
        ))
        .bind(group_id)
        .fetch_all(&mut *self.tx)
        .await?;

        Ok(orders)
    }

    async fn mark_order_paid(&mut self, order_id: Uuid, paid_at: DateTime<Utc>) -> AppResult<bool> {
        let result = sqlx::query(
            r#"
            UPDATE orders
            SET payment_status = 'paid', paid_at = $2, updated_at = $2
            WHERE id = $1 AND payment_status = 'pending'
            "#,
        )
        .bind(order_id)
        .bind(paid_at)
        .execute(&mut *self.tx)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn update_order_fulfillment(
        &mut self,
        order_id: Uuid,
        fulfillment_status: FulfillmentStatus,
        order_status: OrderStatus,
    ) -> AppResult<()> {
        let result = sqlx::query(
            r#"
            UPDATE orders
            SET fulfillment_status = $2, order_status = $3, updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(order_id)
        .bind(fulfillment_status)
        .bind(order_status)
        .execute(&mut *self.tx)
        .await?;

        if result.rows_affected() == 0 {
            return Err(AppError::NotFound(format!("order {}", order_id)));
        }

        Ok(())
    }

    async fn list_order_lines(&mut self, order_id: Uuid) -> AppResult<Vec<OrderLine>> {
        let lines = sqlx::query_as::<_, OrderLine>(&format!(
            "SELECT {} FROM order_lines WHERE order_id = $1 ORDER BY created_at ASC, id ASC",
            ORDER_LINE_COLUMNS
        ))
        .bind(order_id)
        .fetch_all(&mut *self.tx)
        .await?;

        Ok(lines)
    }

    async fn lock_order_line(&mut self, line_id: Uuid) -> AppResult<Option<OrderLine>> {
        let line = sqlx::query_as::<_, OrderLine>(&format!(
            "SELECT {} FROM order_lines WHERE id = $1 FOR UPDATE",
            ORDER_LINE_COLUMNS
        ))
        .bind(line_id)
        .fetch_optional(&mut *self.tx)
        .await?;

        Ok(line)
    }

    async fn update_line_status(&mut self, line_id: Uuid, status: LineStatus) -> AppResult<()> {
        let result = sqlx::query("UPDATE order_lines SET status = $2, updated_at = NOW() WHERE id = $1")
            .bind(line_id)
            .bind(status)
            .execute(&mut *self.tx)
            .await?;

        if result.rows_affected() == 0 {
            return Err(AppError::NotFound(format!("order line {}", line_id)));
        }

        Ok(())
    }

    // ========== CHECKOUT SESSIONS ==========

    async fn find_active_checkout(
        &mut self,
        user_id: Uuid,
        idempotency_key: &str,
        now: DateTime<Utc>,
    ) -> AppResult<Option<Uuid>> {
        let group_id = sqlx::query_scalar::<_, Uuid>(
            r#"
            SELECT order_group_id FROM checkout_sessions
            WHERE user_id = $1 AND idempotency_key = $2 AND expires_at > $3
            "#,
        )
        .bind(user_id)
        .bind(idempotency_key)
        .bind(now)
        .fetch_optional(&mut *self.tx)
        .await?;

        Ok(group_id)
    }

    async fn claim_checkout_session(
        &mut self,
        user_id: Uuid,
        idempotency_key: &str,
        order_group_id: Uuid,
        expires_at: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> AppResult<bool> {
        let claimed = sqlx::query_scalar::<_, Uuid>(
            r#"
            INSERT INTO checkout_sessions (user_id, idempotency_key, order_group_id, expires_at, created_at)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (user_id, idempotency_key) DO UPDATE
            SET order_group_id = EXCLUDED.order_group_id,
                expires_at = EXCLUDED.expires_at,
                created_at = EXCLUDED.created_at
            WHERE checkout_sessions.expires_at <= $5
            RETURNING order_group_id
            "#,
        )
        .bind(user_id)
        .bind(idempotency_key)
        .bind(order_group_id)
        .bind(expires_at)
        .bind(now)
        .fetch_optional(&mut *self.tx)
        .await?;

        Ok(claimed.is_some())
    }

    // ========== PAYOUTS ==========

    async fn list_order_settlements(&mut self, order_id: Uuid) -> AppResult<Vec<Settlement>> {
        let rows = sqlx::query_as::<_, Settlement>(&format!(
            "SELECT {} FROM settlements WHERE order_id = $1 ORDER BY created_at ASC",
            SETTLEMENT_COLUMNS
        ))
        .bind(order_id)
        .fetch_all(&mut *self.tx)
        .await?;

        Ok(rows)
    }

    async fn insert_settlement(&mut self, settlement: &Settlement) -> AppResult<()> {
        sqlx::query(
            r#"
            INSERT INTO settlements (
                id, order_id, seller_kind, seller_id, seller_user_id, gross_amount,
                commission_rate, commission_amount, net_amount, created_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            "#,
        )
        .bind(settlement.id)
        .bind(settlement.order_id)
        .bind(settlement.seller_kind)
        .bind(settlement.seller_id)
        .bind(settlement.seller_user_id)
        .bind(settlement.gross_amount)
        .bind(settlement.commission_rate)
        .bind(settlement.commission_amount)
        .bind(settlement.net_amount)
        .bind(settlement.created_at)
        .execute(&mut *self.tx)
        .await?;

        Ok(())
    }

    async fn enqueue_payout(&mut self, order_id: Uuid, now: DateTime<Utc>) -> AppResult<()> {
        sqlx::query(
            r#"
            INSERT INTO pending_payouts (order_id, status, attempts, enqueued_at, updated_at)
            VALUES ($1, 'pending', 0, $2, $2)
            ON CONFLICT (order_id) DO NOTHING
            "#,
        )
        .bind(order_id)
        .bind(now)
        .execute(&mut *self.tx)
        .await?;

        Ok(())
    }

    async fn find_payout(&mut self, order_id: Uuid) -> AppResult<Option<PendingPayout>> {
        let payout = sqlx::query_as::<_, PendingPayout>(&format!(
            "SELECT {} FROM pending_payouts WHERE order_id = $1",
            PAYOUT_COLUMNS
        ))
        .bind(order_id)
        .fetch_optional(&mut *self.tx)
        .await?;

        Ok(payout)
    }

    async fn list_pending_payouts(&mut self, limit: i64) -> AppResult<Vec<PendingPayout>> {
        let rows = sqlx::query_as::<_, PendingPayout>(&format!(
            r#"
            SELECT {} FROM pending_payouts
            WHERE status = 'pending'
            ORDER BY enqueued_at ASC
            LIMIT $1
            "#,
            PAYOUT_COLUMNS
        ))
        .bind(limit)
        .fetch_all(&mut *self.tx)
        .await?;

        Ok(rows)
    }

    async fn mark_payout_settled(&mut self, order_id: Uuid, now: DateTime<Utc>) -> AppResult<()> {
        sqlx::query(
            r#"
            UPDATE pending_payouts
            SET status = 'settled', attempts = attempts + 1, last_error = NULL, settled_at = $2, updated_at = $2
            WHERE order_id = $1
            "#,
        )
        .bind(order_id)
        .bind(now)
        .execute(&mut *self.tx)
        .await?;

        Ok(())
    }

    async fn record_payout_failure(&mut self, order_id: Uuid, error: &str, now: DateTime<Utc>) -> AppResult<()> {
        sqlx::query(
            r#"
            UPDATE pending_payouts
            SET attempts = attempts + 1, last_error = $2, updated_at = $3
            WHERE order_id = $1
            "#,
        )
        .bind(order_id)
        .bind(error)
        .bind(now)
        .execute(&mut *self.tx)
        .await?;

        Ok(())
    }

    async fn commit(self: Box<Self>) -> AppResult<()> {
        self.tx.commit().await?;
        Ok(())
    }
}
