use async_trait::async_trait;
use reqwest::StatusCode;
use serde::Deserialize;
use std::time::Duration;
use tracing::debug;
use uuid::Uuid;

use super::{CatalogClient, CatalogItem};
use crate::error::{AppError, AppResult};
use crate::orders::models::ItemRef;

/// Catalog service client over HTTP/JSON
pub struct HttpCatalogClient {
    base_url: String,
    client: reqwest::Client,
}

#[derive(Debug, Deserialize)]
struct AddressResponse {
    formatted: String,
}

impl HttpCatalogClient {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> AppResult<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            client,
        })
    }

    async fn get_optional<T: for<'de> Deserialize<'de>>(&self, url: &str) -> AppResult<Option<T>> {
        debug!("Catalog request: GET {}", url);
        let response = self.client.get(url).send().await?;

        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_default();
            return Err(AppError::ExternalDependency(format!(
                "Catalog API error {}: {}",
                status, error_text
            )));
        }

        Ok(Some(response.json().await?))
    }
}

#[async_trait]
impl CatalogClient for HttpCatalogClient {
    async fn resolve_item(&self, item: ItemRef) -> AppResult<Option<CatalogItem>> {
        let url = format!("{}/items/{}/{}", self.base_url, item.kind.as_str(), item.id);
        self.get_optional(&url).await
    }

    async fn resolve_address(&self, address_id: Uuid, user_id: Uuid) -> AppResult<Option<String>> {
        let url = format!("{}/users/{}/addresses/{}", self.base_url, user_id, address_id);
        let address: Option<AddressResponse> = self.get_optional(&url).await?;
        Ok(address.map(|a| a.formatted))
    }
}
