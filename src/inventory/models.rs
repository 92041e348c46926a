use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{prelude::FromRow, Type};
use uuid::Uuid;

/// On-hand quantity of one item in one warehouse
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct InventoryRecord {
    pub id: Uuid,
    pub item_id: Uuid,
    pub warehouse_id: Uuid,
    pub quantity: i32,
    pub updated_at: DateTime<Utc>,
}

impl InventoryRecord {
    pub fn empty(item_id: Uuid, warehouse_id: Uuid) -> Self {
        Self {
            id: Uuid::new_v4(),
            item_id,
            warehouse_id,
            quantity: 0,
            updated_at: Utc::now(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Type)]
#[sqlx(type_name = "inventory_transaction_kind", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum InventoryTransactionKind {
    /// Stock received into a warehouse
    Import,
    /// Stock leaving for a paid order
    Export,
    Adjustment,
    /// Stock returned by a canceled line
    Return,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Type)]
#[sqlx(type_name = "inventory_reference_kind", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum ReferenceKind {
    OrderPayment,
    OrderCancellation,
    Manual,
}

/// What caused an inventory movement; (kind, id) is the idempotency key
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct InventoryReference {
    pub kind: ReferenceKind,
    pub id: Uuid,
}

impl InventoryReference {
    pub fn order_payment(order_id: Uuid) -> Self {
        Self {
            kind: ReferenceKind::OrderPayment,
            id: order_id,
        }
    }

    pub fn order_cancellation(order_line_id: Uuid) -> Self {
        Self {
            kind: ReferenceKind::OrderCancellation,
            id: order_line_id,
        }
    }
}

/// Immutable inventory ledger row
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct InventoryTransaction {
    pub id: Uuid,
    pub seq: i64,
    pub record_id: Uuid,
    pub item_id: Uuid,
    pub warehouse_id: Uuid,
    pub kind: InventoryTransactionKind,
    pub delta: i32,
    pub quantity_before: i32,
    pub quantity_after: i32,
    pub reference_kind: Option<ReferenceKind>,
    pub reference_id: Option<Uuid>,
    pub performed_by: Option<Uuid>,
    pub note: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// A requested stock movement
#[derive(Debug, Clone)]
pub struct InventoryChange {
    pub item_id: Uuid,
    pub warehouse_id: Uuid,
    pub kind: InventoryTransactionKind,
    pub delta: i32,
    pub reference: Option<InventoryReference>,
    pub performed_by: Option<Uuid>,
    pub note: Option<String>,
}
