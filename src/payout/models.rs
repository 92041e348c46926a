use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::{prelude::FromRow, Type};
use uuid::Uuid;

use crate::orders::models::SellerKind;

/// Commission/net split of one seller's share of a delivered order
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Settlement {
    pub id: Uuid,
    pub order_id: Uuid,
    pub seller_kind: SellerKind,
    pub seller_id: Uuid,
    pub seller_user_id: Uuid,
    pub gross_amount: Decimal,
    pub commission_rate: Decimal,
    pub commission_amount: Decimal,
    pub net_amount: Decimal,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Type)]
#[sqlx(type_name = "payout_status", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum PayoutStatus {
    Pending,
    Settled,
}

/// Queue row for a delivered order awaiting payout
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct PendingPayout {
    pub order_id: Uuid,
    pub status: PayoutStatus,
    pub attempts: i32,
    pub last_error: Option<String>,
    pub enqueued_at: DateTime<Utc>,
    pub settled_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
}

/// Outcome of one payout attempt
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum PayoutOutcome {
    Settled { settlements: Vec<Settlement> },
    AlreadySettled,
    NotDelivered,
}

/// Summary of one retry sweep
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PayoutSweep {
    pub attempted: usize,
    pub settled: usize,
    pub deferred: usize,
}
