// Payout Scheduler - drains the pending-payout queue in the background
//
// Deliveries try to pay sellers right after they commit. Anything that fails
// there (escrow short, store hiccup) stays queued and is retried here.

use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio::time::{interval, Duration, MissedTickBehavior};
use tracing::{error, info};

use super::settlement::PayoutService;

#[derive(Debug, Clone)]
pub struct PayoutScheduleConfig {
    pub interval: Duration,
    pub batch_size: i64,
}

pub struct PayoutScheduler {
    config: PayoutScheduleConfig,
    payouts: Arc<PayoutService>,
}

impl PayoutScheduler {
    pub fn new(config: PayoutScheduleConfig, payouts: Arc<PayoutService>) -> Self {
        Self { config, payouts }
    }

    /// Start the retry loop (runs in background)
    pub fn start(&self) -> JoinHandle<()> {
        let config = self.config.clone();
        let payouts = self.payouts.clone();

        tokio::spawn(async move {
            info!(
                "⏰ Payout retry worker every {}s (batch {})",
                config.interval.as_secs(),
                config.batch_size
            );

            let mut ticker = interval(config.interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                ticker.tick().await;
                if let Err(e) = payouts.retry_pending(config.batch_size).await {
                    error!("❌ Payout sweep failed: {:?}", e);
                }
            }
        })
    }
}
