use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::{prelude::FromRow, Type};
use std::fmt;
use uuid::Uuid;

/// Kind of purchasable catalog entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Type)]
#[sqlx(type_name = "item_kind", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum ItemKind {
    Material,
    Product,
    Design,
}

impl ItemKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ItemKind::Material => "material",
            ItemKind::Product => "product",
            ItemKind::Design => "design",
        }
    }

    /// Only materials are physical stock tracked by the inventory ledger
    pub fn is_stocked(&self) -> bool {
        matches!(self, ItemKind::Material)
    }
}

/// Reference to one catalog entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ItemRef {
    pub kind: ItemKind,
    pub id: Uuid,
}

impl ItemRef {
    pub fn new(kind: ItemKind, id: Uuid) -> Self {
        Self { kind, id }
    }
}

impl fmt::Display for ItemRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.kind.as_str(), self.id)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Type)]
#[sqlx(type_name = "seller_kind", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum SellerKind {
    Supplier,
    Designer,
}

/// Seller identity behind a line: suppliers sell materials, designers sell
/// products and designs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(tag = "type", content = "id", rename_all = "lowercase")]
pub enum SellerRef {
    Supplier(Uuid),
    Designer(Uuid),
}

impl SellerRef {
    pub fn from_parts(kind: SellerKind, id: Uuid) -> Self {
        match kind {
            SellerKind::Supplier => SellerRef::Supplier(id),
            SellerKind::Designer => SellerRef::Designer(id),
        }
    }

    pub fn seller_id(&self) -> Uuid {
        match self {
            SellerRef::Supplier(id) | SellerRef::Designer(id) => *id,
        }
    }

    pub fn kind(&self) -> SellerKind {
        match self {
            SellerRef::Supplier(_) => SellerKind::Supplier,
            SellerRef::Designer(_) => SellerKind::Designer,
        }
    }
}

impl fmt::Display for SellerRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SellerRef::Supplier(id) => write!(f, "supplier:{}", id),
            SellerRef::Designer(id) => write!(f, "designer:{}", id),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Type)]
#[sqlx(type_name = "payment_status", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum PaymentStatus {
    Pending,
    Paid,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Type)]
#[sqlx(type_name = "order_status", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum OrderStatus {
    Pending,
    Processing,
    Completed,
    Canceled,
}

/// Per-line fulfillment state, driven by the owning seller
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Type)]
#[sqlx(type_name = "line_status", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum LineStatus {
    Pending,
    Confirmed,
    Shipping,
    Delivered,
    Canceled,
}

impl LineStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            LineStatus::Pending => "pending",
            LineStatus::Confirmed => "confirmed",
            LineStatus::Shipping => "shipping",
            LineStatus::Delivered => "delivered",
            LineStatus::Canceled => "canceled",
        }
    }

    pub fn all() -> [LineStatus; 5] {
        [
            LineStatus::Pending,
            LineStatus::Confirmed,
            LineStatus::Shipping,
            LineStatus::Delivered,
            LineStatus::Canceled,
        ]
    }
}

impl fmt::Display for LineStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Order-level fulfillment status, derived from line statuses
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Type)]
#[sqlx(type_name = "fulfillment_status", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum FulfillmentStatus {
    None,
    PartiallyConfirmed,
    Processing,
    PartiallyShipped,
    Shipped,
    Delivered,
    Canceled,
}

impl FulfillmentStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, FulfillmentStatus::Delivered | FulfillmentStatus::Canceled)
    }
}

/// One checkout event
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct OrderGroup {
    pub id: Uuid,
    pub user_id: Uuid,
    pub total_orders: i32,
    pub completed_orders: i32,
    pub idempotency_key: Option<String>,
    pub expires_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

impl OrderGroup {
    pub fn new(user_id: Uuid, total_orders: i32, idempotency_key: Option<String>, expires_at: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            user_id,
            total_orders,
            completed_orders: 0,
            idempotency_key,
            expires_at,
            created_at: Utc::now(),
        }
    }

    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }
}

/// One seller's share of a checkout
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Order {
    pub id: Uuid,
    pub user_id: Uuid,
    pub order_group_id: Option<Uuid>,
    pub seller_kind: SellerKind,
    pub seller_id: Uuid,
    pub shipping_address: String,
    pub subtotal: Decimal,
    pub shipping_fee: Decimal,
    pub discount: Decimal,
    pub total_amount: Decimal,
    pub payment_status: PaymentStatus,
    pub order_status: OrderStatus,
    pub fulfillment_status: FulfillmentStatus,
    pub idempotency_key: Option<String>,
    pub expires_at: DateTime<Utc>,
    pub paid_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Order {
    pub fn seller(&self) -> SellerRef {
        SellerRef::from_parts(self.seller_kind, self.seller_id)
    }

    pub fn is_paid(&self) -> bool {
        self.payment_status == PaymentStatus::Paid
    }

    pub fn hold_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }

    /// Every line canceled, or the order itself closed as canceled
    pub fn is_canceled(&self) -> bool {
        self.order_status == OrderStatus::Canceled || self.fulfillment_status == FulfillmentStatus::Canceled
    }
}

/// One purchased item within an order
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct OrderLine {
    pub id: Uuid,
    pub order_id: Uuid,
    pub item_kind: ItemKind,
    pub item_id: Uuid,
    pub seller_kind: SellerKind,
    pub seller_id: Uuid,
    /// Account owning the seller identity at checkout time
    pub seller_user_id: Uuid,
    pub quantity: i32,
    pub unit_price: Decimal,
    pub status: LineStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl OrderLine {
    pub fn item(&self) -> ItemRef {
        ItemRef::new(self.item_kind, self.item_id)
    }

    pub fn seller(&self) -> SellerRef {
        SellerRef::from_parts(self.seller_kind, self.seller_id)
    }

    pub fn line_total(&self) -> Decimal {
        self.unit_price * Decimal::from(self.quantity)
    }
}

/// Order together with its lines, as returned to callers
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderWithLines {
    #[serde(flatten)]
    pub order: Order,
    pub lines: Vec<OrderLine>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_seller_ref_round_trips_parts() {
        let id = Uuid::new_v4();
        let seller = SellerRef::from_parts(SellerKind::Designer, id);
        assert_eq!(seller, SellerRef::Designer(id));
        assert_eq!(seller.seller_id(), id);
        assert_eq!(seller.kind(), SellerKind::Designer);
    }

    #[test]
    fn test_only_materials_are_stocked() {
        assert!(ItemKind::Material.is_stocked());
        assert!(!ItemKind::Product.is_stocked());
        assert!(!ItemKind::Design.is_stocked());
    }
}
