use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::RwLock;
use uuid::Uuid;

use super::{CatalogClient, CatalogItem};
use crate::error::AppResult;
use crate::orders::models::ItemRef;

/// In-process catalog used in dev mode and tests
#[derive(Default)]
pub struct StaticCatalog {
    items: RwLock<HashMap<ItemRef, CatalogItem>>,
    addresses: RwLock<HashMap<(Uuid, Uuid), String>>,
}

impl StaticCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn upsert_item(&self, item: CatalogItem) {
        self.items.write().await.insert(item.item, item);
    }

    pub async fn set_available(&self, item: ItemRef, available: bool) {
        if let Some(entry) = self.items.write().await.get_mut(&item) {
            entry.available = available;
        }
    }

    pub async fn add_address(&self, user_id: Uuid, address_id: Uuid, formatted: impl Into<String>) {
        self.addresses
            .write()
            .await
            .insert((user_id, address_id), formatted.into());
    }
}

#[async_trait]
impl CatalogClient for StaticCatalog {
    async fn resolve_item(&self, item: ItemRef) -> AppResult<Option<CatalogItem>> {
        Ok(self.items.read().await.get(&item).cloned())
    }

    async fn resolve_address(&self, address_id: Uuid, user_id: Uuid) -> AppResult<Option<String>> {
        Ok(self.addresses.read().await.get(&(user_id, address_id)).cloned())
    }
}
