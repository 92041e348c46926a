pub mod remote;
pub mod fixed;

pub use fixed::StaticCatalog;
pub use remote::HttpCatalogClient;

use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::AppResult;
use crate::orders::models::{ItemRef, SellerRef};

/// Current price, availability and seller of one catalog entry
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CatalogItem {
    pub item: ItemRef,
    pub unit_price: Decimal,
    pub seller: SellerRef,
    /// Account that owns the seller identity
    pub seller_user_id: Uuid,
    pub available: bool,
}

/// Read-only view of the catalog and address book owned by other services
#[async_trait]
pub trait CatalogClient: Send + Sync {
    /// `None` when the item does not exist
    async fn resolve_item(&self, item: ItemRef) -> AppResult<Option<CatalogItem>>;

    /// Formatted address of a saved address, `None` when it is not the user's
    async fn resolve_address(&self, address_id: Uuid, user_id: Uuid) -> AppResult<Option<String>>;
}
