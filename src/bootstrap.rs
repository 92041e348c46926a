use std::{sync::Arc, time::Duration};
use sqlx::{PgPool, postgres::PgPoolOptions};
use tracing::{info, warn};
use crate::{
    api::handler::AppState,
    catalog::{CatalogClient, HttpCatalogClient, StaticCatalog},
    checkout::{CheckoutPolicy, CheckoutService},
    config::{Config, DatabaseConfig, StoreBackend},
    error::AppResult,
    fulfillment::FulfillmentTracker,
    inventory::InventoryLedger,
    notifications::{LogNotifier, Notifier, WebhookNotifier},
    payment::PaymentService,
    payout::{PayoutScheduleConfig, PayoutScheduler, PayoutService},
    store::{MarketStore, MemoryMarketStore, PgMarketStore},
    wallet::WalletLedger,
};

pub async fn initialize_app_state(config: &Config) -> AppResult<AppState> {
    info!("Initializing application components ...");

    // Store
    let store: Arc<dyn MarketStore> = match config.database.backend {
        StoreBackend::Postgres => {
            let pool = initialize_database(&config.database).await?;
            Arc::new(PgMarketStore::new(pool, config.database.statement_timeout_ms))
        }
        StoreBackend::Memory => {
            warn!("⚠️  Using the in-memory store - state is lost on restart");
            Arc::new(MemoryMarketStore::new())
        }
    };

    // Collaborators
    let catalog: Arc<dyn CatalogClient> = match &config.integrations.catalog_base_url {
        Some(url) => {
            info!("✅ Catalog client: {}", url);
            Arc::new(HttpCatalogClient::new(url.clone(), config.http_timeout())?)
        }
        None => {
            warn!("⚠️  No catalog service configured - using an empty in-process catalog");
            Arc::new(StaticCatalog::new())
        }
    };

    let notifier: Arc<dyn Notifier> = match &config.integrations.notification_webhook_url {
        Some(url) => {
            info!("✅ Notification webhook: {}", url);
            Arc::new(WebhookNotifier::new(url.clone(), config.http_timeout())?)
        }
        None => Arc::new(LogNotifier),
    };

    // Ledgers
    let wallets = WalletLedger::new(store.clone(), config.ledger.escrow_user_id);
    wallets.provision_escrow().await?;
    let inventory = InventoryLedger::new(store.clone());

    // Services
    let policy = CheckoutPolicy {
        shipping_fee: config.checkout.shipping_fee,
        discount: config.checkout.discount,
        default_hold_minutes: config.checkout.default_hold_minutes,
        max_hold_minutes: config.checkout.max_hold_minutes,
    };
    let checkout = Arc::new(CheckoutService::new(
        store.clone(),
        catalog.clone(),
        notifier.clone(),
        policy,
    ));
    let payments = Arc::new(PaymentService::new(store.clone(), wallets.clone(), notifier.clone()));
    let payouts = Arc::new(PayoutService::new(
        store.clone(),
        wallets.clone(),
        notifier.clone(),
        config.ledger.commission_rate,
    ));
    let fulfillment = Arc::new(FulfillmentTracker::new(
        store.clone(),
        wallets.clone(),
        notifier.clone(),
        payouts.clone(),
    ));
    info!(
        "✅ Services ready (commission {}, hold {}m)",
        config.ledger.commission_rate, config.checkout.default_hold_minutes
    );

    // Background payout retries
    let scheduler = PayoutScheduler::new(
        PayoutScheduleConfig {
            interval: Duration::from_secs(config.payouts.retry_interval_secs),
            batch_size: config.payouts.batch_size,
        },
        payouts.clone(),
    );
    scheduler.start();
    info!("✅ Payout retry task started");

    Ok(AppState {
        store,
        catalog,
        wallets,
        inventory,
        checkout,
        payments,
        fulfillment,
        payouts,
        payout_batch_size: config.payouts.batch_size,
    })
}

async fn initialize_database(database: &DatabaseConfig) -> AppResult<PgPool> {
    info!("📊 Connecting to database...");

    let pool = PgPoolOptions::new()
        .max_connections(database.max_connections)
        .min_connections(database.min_connections)
        .acquire_timeout(Duration::from_secs(database.acquire_timeout_secs))
        .idle_timeout(Duration::from_secs(600))
        .max_lifetime(Duration::from_secs(1800))
        .connect(&database.url)
        .await?;

    info!("✓ Database pool configured: {} max connections", database.max_connections);

    // Run migrations
    info!("🔄 Running database migrations...");
    sqlx::migrate!("./migrations").run(&pool).await?;

    info!("✓ Database initialized");
    Ok(pool)
}
