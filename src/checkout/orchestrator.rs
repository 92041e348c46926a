use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;
use validator::Validate;

use crate::catalog::{CatalogClient, CatalogItem};
use crate::error::{AppError, AppResult, OrderError};
use crate::notifications::{notify_best_effort, Notification, Notifier};
use crate::orders::models::*;
use crate::store::{MarketStore, StoreTx};

const MAX_IDEMPOTENCY_KEY_LEN: usize = 128;
pub const MAX_LINE_QUANTITY: i32 = 10_000;

/// Pricing and hold rules applied to every checkout
#[derive(Debug, Clone)]
pub struct CheckoutPolicy {
    /// Flat fee added to each seller order
    pub shipping_fee: Decimal,
    /// Flat discount per seller order, capped at subtotal + shipping
    pub discount: Decimal,
    pub default_hold_minutes: i64,
    pub max_hold_minutes: i64,
}

impl Default for CheckoutPolicy {
    fn default() -> Self {
        Self {
            shipping_fee: Decimal::ZERO,
            discount: Decimal::ZERO,
            default_hold_minutes: 30,
            max_hold_minutes: 24 * 60,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CartLine {
    pub item_type: ItemKind,
    pub item_id: Uuid,
    pub quantity: i32,
}

impl CartLine {
    pub fn item(&self) -> ItemRef {
        ItemRef::new(self.item_type, self.item_id)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum AddressInput {
    Saved { address_id: Uuid },
    Inline { address: String },
}

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct CheckoutRequest {
    #[validate(length(min = 1, message = "cart is empty"))]
    pub items: Vec<CartLine>,
    pub shipping: AddressInput,
    #[validate(length(min = 1, max = 128))]
    pub idempotency_key: Option<String>,
    pub hold_minutes: Option<i64>,
}

#[derive(Debug, Clone, Serialize)]
pub struct CheckoutOutcome {
    pub order_group: OrderGroup,
    pub orders: Vec<OrderWithLines>,
    /// True when an earlier checkout with the same key was returned
    pub replayed: bool,
}

/// One seller's share of a resolved cart
#[derive(Debug, Clone)]
struct SellerCart {
    seller: SellerRef,
    lines: Vec<(CatalogItem, i32)>,
}

/// Groups resolved lines by seller, keeping first-appearance order
fn partition_by_seller(lines: Vec<(CatalogItem, i32)>) -> Vec<SellerCart> {
    let mut carts: Vec<SellerCart> = Vec::new();
    for (item, quantity) in lines {
        match carts.iter_mut().find(|c| c.seller == item.seller) {
            Some(cart) => cart.lines.push((item, quantity)),
            None => carts.push(SellerCart {
                seller: item.seller,
                lines: vec![(item, quantity)],
            }),
        }
    }
    carts
}

pub struct CheckoutService {
    store: Arc<dyn MarketStore>,
    catalog: Arc<dyn CatalogClient>,
    notifier: Arc<dyn Notifier>,
    policy: CheckoutPolicy,
}

impl CheckoutService {
    pub fn new(
        store: Arc<dyn MarketStore>,
        catalog: Arc<dyn CatalogClient>,
        notifier: Arc<dyn Notifier>,
        policy: CheckoutPolicy,
    ) -> Self {
        Self {
            store,
            catalog,
            notifier,
            policy,
        }
    }

    /// Splits a cart into one order per seller under a new order group.
    ///
    /// With an idempotency key, a retry inside the hold returns the orders of
    /// the first attempt instead of creating new ones.
    pub async fn create_checkout(&self, user_id: Uuid, request: CheckoutRequest) -> AppResult<CheckoutOutcome> {
        let hold_minutes = self.validate(&request)?;
        let now = Utc::now();

        if let Some(key) = request.idempotency_key.as_deref() {
            if let Some(outcome) = self.replay(user_id, key, now).await? {
                info!(user_id = %user_id, group_id = %outcome.order_group.id, "↩️ Checkout replayed");
                return Ok(outcome);
            }
        }

        let shipping_address = self.resolve_address(user_id, &request.shipping).await?;
        let resolved = self.resolve_lines(&request.items).await?;
        let carts = partition_by_seller(resolved);

        let expires_at = now + Duration::minutes(hold_minutes);
        let group = OrderGroup::new(
            user_id,
            carts.len() as i32,
            request.idempotency_key.clone(),
            expires_at,
        );
        let orders: Vec<OrderWithLines> = carts
            .iter()
            .map(|cart| self.build_order(user_id, &group, cart, &shipping_address, now))
            .collect();

        let mut tx = self.store.begin().await?;

        if let Some(key) = request.idempotency_key.as_deref() {
            let claimed = tx
                .claim_checkout_session(user_id, key, group.id, expires_at, now)
                .await?;
            if !claimed {
                drop(tx);
                debug!(user_id = %user_id, "Checkout session claimed concurrently, replaying");
                return self.replay(user_id, key, now).await?.ok_or_else(|| {
                    AppError::Concurrency("checkout session changed during retry".to_string())
                });
            }
        }

        Self::persist(tx.as_mut(), &group, &orders).await?;
        tx.commit().await?;

        info!(
            user_id = %user_id,
            group_id = %group.id,
            orders = orders.len(),
            "🛒 Checkout created"
        );

        notify_best_effort(
            self.notifier.as_ref(),
            Notification::OrderPlaced {
                user_id,
                order_group_id: group.id,
                order_ids: orders.iter().map(|o| o.order.id).collect(),
            },
        )
        .await;

        Ok(CheckoutOutcome {
            order_group: group,
            orders,
            replayed: false,
        })
    }

    /// Returns the hold duration in minutes
    fn validate(&self, request: &CheckoutRequest) -> AppResult<i64> {
        if request.items.is_empty() {
            return Err(AppError::Validation("cart is empty".to_string()));
        }
        if let Some(line) = request.items.iter().find(|l| l.quantity <= 0) {
            return Err(AppError::Validation(format!(
                "quantity for {} must be positive",
                line.item()
            )));
        }
        if let Some(line) = request.items.iter().find(|l| l.quantity > MAX_LINE_QUANTITY) {
            return Err(AppError::Validation(format!(
                "quantity for {} exceeds {}",
                line.item(),
                MAX_LINE_QUANTITY
            )));
        }
        if let Some(key) = request.idempotency_key.as_deref() {
            if key.trim().is_empty() || key.len() > MAX_IDEMPOTENCY_KEY_LEN {
                return Err(AppError::Validation("invalid idempotency key".to_string()));
            }
        }
        if let AddressInput::Inline { address } = &request.shipping {
            if address.trim().is_empty() {
                return Err(AppError::Validation("shipping address is empty".to_string()));
            }
        }

        let hold = request.hold_minutes.unwrap_or(self.policy.default_hold_minutes);
        if hold < 1 || hold > self.policy.max_hold_minutes {
            return Err(AppError::Validation(format!(
                "hold must be between 1 and {} minutes",
                self.policy.max_hold_minutes
            )));
        }
        Ok(hold)
    }

    async fn replay(&self, user_id: Uuid, key: &str, now: DateTime<Utc>) -> AppResult<Option<CheckoutOutcome>> {
        let mut tx = self.store.begin().await?;

        let Some(group_id) = tx.find_active_checkout(user_id, key, now).await? else {
            return Ok(None);
        };
        let group = tx
            .find_order_group(group_id)
            .await?
            .ok_or_else(|| AppError::Internal(format!("checkout session points at missing group {}", group_id)))?;

        let mut orders = Vec::new();
        for order in tx.lock_group_orders(group_id).await? {
            if order.is_paid() {
                continue;
            }
            let lines = tx.list_order_lines(order.id).await?;
            orders.push(OrderWithLines { order, lines });
        }
        tx.commit().await?;

        if orders.is_empty() {
            return Err(OrderError::CheckoutCompleted.into());
        }

        Ok(Some(CheckoutOutcome {
            order_group: group,
            orders,
            replayed: true,
        }))
    }

    async fn resolve_address(&self, user_id: Uuid, input: &AddressInput) -> AppResult<String> {
        match input {
            AddressInput::Inline { address } => Ok(address.trim().to_string()),
            AddressInput::Saved { address_id } => self
                .catalog
                .resolve_address(*address_id, user_id)
                .await?
                .ok_or_else(|| AppError::Validation(format!("unknown shipping address {}", address_id))),
        }
    }

    /// Prices every line from the catalog; client prices are never used
    async fn resolve_lines(&self, items: &[CartLine]) -> AppResult<Vec<(CatalogItem, i32)>> {
        let mut resolved = Vec::with_capacity(items.len());
        for line in items {
            let item = line.item();
            let entry = self
                .catalog
                .resolve_item(item)
                .await?
                .ok_or_else(|| OrderError::InvalidItem {
                    item,
                    reason: "not found".to_string(),
                })?;

            if !entry.available {
                return Err(OrderError::InvalidItem {
                    item,
                    reason: "not available".to_string(),
                }
                .into());
            }
            if entry.unit_price < Decimal::ZERO {
                warn!(item = %item, "Catalog returned a negative price");
                return Err(OrderError::InvalidItem {
                    item,
                    reason: "invalid price".to_string(),
                }
                .into());
            }

            resolved.push((entry, line.quantity));
        }
        Ok(resolved)
    }

    fn build_order(
        &self,
        user_id: Uuid,
        group: &OrderGroup,
        cart: &SellerCart,
        shipping_address: &str,
        now: DateTime<Utc>,
    ) -> OrderWithLines {
        let order_id = Uuid::new_v4();

        let lines: Vec<OrderLine> = cart
            .lines
            .iter()
            .map(|(item, quantity)| OrderLine {
                id: Uuid::new_v4(),
                order_id,
                item_kind: item.item.kind,
                item_id: item.item.id,
                seller_kind: cart.seller.kind(),
                seller_id: cart.seller.seller_id(),
                seller_user_id: item.seller_user_id,
                quantity: *quantity,
                unit_price: item.unit_price,
                status: LineStatus::Pending,
                created_at: now,
                updated_at: now,
            })
            .collect();

        let subtotal: Decimal = lines.iter().map(|l| l.line_total()).sum();
        let shipping_fee = self.policy.shipping_fee;
        let discount = self.policy.discount.min(subtotal + shipping_fee);

        let order = Order {
            id: order_id,
            user_id,
            order_group_id: Some(group.id),
            seller_kind: cart.seller.kind(),
            seller_id: cart.seller.seller_id(),
            shipping_address: shipping_address.to_string(),
            subtotal,
            shipping_fee,
            discount,
            total_amount: subtotal + shipping_fee - discount,
            payment_status: PaymentStatus::Pending,
            order_status: OrderStatus::Pending,
            fulfillment_status: FulfillmentStatus::None,
            idempotency_key: group.idempotency_key.clone(),
            expires_at: group.expires_at,
            paid_at: None,
            created_at: now,
            updated_at: now,
        };

        OrderWithLines { order, lines }
    }

    async fn persist(tx: &mut dyn StoreTx, group: &OrderGroup, orders: &[OrderWithLines]) -> AppResult<()> {
        tx.insert_order_group(group).await?;
        for entry in orders {
            tx.insert_order(&entry.order).await?;
            for line in &entry.lines {
                tx.insert_order_line(line).await?;
            }
        }
        Ok(())
    }
}
