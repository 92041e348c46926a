use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::{prelude::FromRow, Type};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Type)]
#[sqlx(type_name = "wallet_status", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum WalletStatus {
    Active,
    Locked,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Type)]
#[sqlx(type_name = "wallet_transaction_kind", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum WalletTransactionKind {
    Deposit,
    Withdrawal,
    Payment,
    PaymentReceived,
    Transfer,
    Refund,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Type)]
#[sqlx(type_name = "wallet_transaction_status", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum WalletTransactionStatus {
    Pending,
    Success,
    Fail,
}

/// Wallet entity, one per user
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Wallet {
    pub id: Uuid,
    pub user_id: Uuid,
    pub balance: Decimal,
    pub status: WalletStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Wallet {
    pub fn new(user_id: Uuid) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            user_id,
            balance: Decimal::ZERO,
            status: WalletStatus::Active,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn is_active(&self) -> bool {
        self.status == WalletStatus::Active
    }

    pub fn has_available(&self, required: Decimal) -> bool {
        self.balance >= required
    }
}

/// Optional business references carried by a ledger row
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionLinks {
    pub order_id: Option<Uuid>,
    pub order_group_id: Option<Uuid>,
    pub settlement_id: Option<Uuid>,
    pub order_line_id: Option<Uuid>,
}

impl TransactionLinks {
    pub fn order(order_id: Uuid) -> Self {
        Self {
            order_id: Some(order_id),
            ..Default::default()
        }
    }

    pub fn order_group(order_group_id: Uuid) -> Self {
        Self {
            order_group_id: Some(order_group_id),
            ..Default::default()
        }
    }

    pub fn with_settlement(mut self, settlement_id: Uuid) -> Self {
        self.settlement_id = Some(settlement_id);
        self
    }

    pub fn with_line(mut self, order_line_id: Uuid) -> Self {
        self.order_line_id = Some(order_line_id);
        self
    }
}

/// Immutable wallet ledger row
///
/// `seq` defines creation order for replay. Balance snapshots are empty while
/// the row is pending and stamped once when it succeeds.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct WalletTransaction {
    pub id: Uuid,
    pub seq: i64,
    pub wallet_id: Uuid,
    pub amount: Decimal,
    pub balance_before: Option<Decimal>,
    pub balance_after: Option<Decimal>,
    pub kind: WalletTransactionKind,
    pub status: WalletTransactionStatus,
    pub order_id: Option<Uuid>,
    pub order_group_id: Option<Uuid>,
    pub settlement_id: Option<Uuid>,
    pub order_line_id: Option<Uuid>,
    pub external_reference: Option<String>,
    pub description: Option<String>,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl WalletTransaction {
    pub fn is_success(&self) -> bool {
        self.status == WalletTransactionStatus::Success
    }

    pub fn links(&self) -> TransactionLinks {
        TransactionLinks {
            order_id: self.order_id,
            order_group_id: self.order_group_id,
            settlement_id: self.settlement_id,
            order_line_id: self.order_line_id,
        }
    }
}

/// Result of replaying a wallet's successful ledger rows
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WalletReconciliation {
    pub wallet_id: Uuid,
    pub user_id: Uuid,
    pub balance: Decimal,
    pub replayed_balance: Decimal,
    pub transaction_count: usize,
    /// First row whose snapshots break the chain, if any
    pub broken_at: Option<Uuid>,
    pub consistent: bool,
}
