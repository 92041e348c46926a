// Notification side channel
//
// Delivery is best effort: callers emit after their transaction commits and a
// failed delivery is logged, never propagated.

use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::Serialize;
use std::time::Duration;
use tracing::{info, warn};
use uuid::Uuid;

use crate::error::{AppError, AppResult};
use crate::orders::models::LineStatus;

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum Notification {
    OrderPlaced {
        user_id: Uuid,
        order_group_id: Uuid,
        order_ids: Vec<Uuid>,
    },
    OrderPaid {
        user_id: Uuid,
        order_id: Uuid,
        amount: Decimal,
    },
    NewSale {
        seller_user_id: Uuid,
        order_id: Uuid,
    },
    LineStatusChanged {
        user_id: Uuid,
        order_id: Uuid,
        line_id: Uuid,
        status: LineStatus,
    },
    PayoutSettled {
        seller_user_id: Uuid,
        order_id: Uuid,
        net_amount: Decimal,
    },
}

#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, notification: &Notification) -> AppResult<()>;
}

/// Writes notifications to the log only
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn notify(&self, notification: &Notification) -> AppResult<()> {
        info!("🔔 Notification: {:?}", notification);
        Ok(())
    }
}

// ============ WEBHOOK ============

/// Posts each notification as JSON to a delivery service
pub struct WebhookNotifier {
    url: String,
    client: reqwest::Client,
}

impl WebhookNotifier {
    pub fn new(url: impl Into<String>, timeout: Duration) -> AppResult<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            url: url.into(),
            client,
        })
    }
}

#[async_trait]
impl Notifier for WebhookNotifier {
    async fn notify(&self, notification: &Notification) -> AppResult<()> {
        let response = self.client.post(&self.url).json(notification).send().await?;

        if !response.status().is_success() {
            let error_text = response.text().await.unwrap_or_default();
            return Err(AppError::ExternalDependency(format!(
                "Notification webhook error: {}",
                error_text
            )));
        }

        Ok(())
    }
}

pub async fn notify_best_effort(notifier: &dyn Notifier, notification: Notification) {
    if let Err(e) = notifier.notify(&notification).await {
        warn!("⚠️ Notification dropped: {} ({:?})", e, notification);
    }
}

#[cfg(test)]
pub mod testing {
    use super::*;
    use tokio::sync::Mutex;

    /// Keeps every notification, or fails all of them when `failing`
    #[derive(Default)]
    pub struct RecordingNotifier {
        pub failing: bool,
        pub sent: Mutex<Vec<Notification>>,
    }

    impl RecordingNotifier {
        pub fn failing() -> Self {
            Self {
                failing: true,
                ..Default::default()
            }
        }
    }

    #[async_trait]
    impl Notifier for RecordingNotifier {
        async fn notify(&self, notification: &Notification) -> AppResult<()> {
            if self.failing {
                return Err(AppError::ExternalDependency("notifier down".to_string()));
            }
            self.sent.lock().await.push(notification.clone());
            Ok(())
        }
    }
}
