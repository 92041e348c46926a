use axum::{
    http::StatusCode,
    middleware::from_fn_with_state,
    routing::{get, post},
    Router,
};
use std::time::Duration;
use tower::ServiceBuilder;
use tower_http::{compression::CompressionLayer, timeout::TimeoutLayer, trace::TraceLayer};
use tracing::info;

use crate::{
    api::handler::{health_check, AppState},
    checkout::handlers::create_checkout,
    config::Config,
    error::AppResult,
    fulfillment::handlers::{confirm_seller_lines, get_order_progress, update_line_status},
    inventory::handlers::{adjust_stock, get_stock_level, receive_stock},
    middleware::{create_cors_layer, rate_limit_middleware, RateLimitLayer},
    payment::handlers::{pay_order, pay_order_group},
    payout::handlers::retry_payouts,
    wallet::handlers::{
        begin_deposit, complete_transaction, deposit, get_wallet, get_wallet_transactions,
        reconcile_wallet, set_wallet_status, withdraw,
    },
};

pub fn create_app(state: AppState, config: &Config) -> AppResult<Router> {
    info!("⚙️ Setting up HTTP routes...");

    let limiter = RateLimitLayer::new(config.server.rate_limit_per_minute, 60)?;
    spawn_limiter_pruning(limiter.clone());

    // Mutating endpoints, rate limited per caller
    let commands = Router::new()
        // Checkout and payment
        .route("/checkout", post(create_checkout))
        .route("/orders/:order_id/pay", post(pay_order))
        .route("/order-groups/:group_id/pay", post(pay_order_group))

        // Fulfillment
        .route("/order-lines/:line_id/status", post(update_line_status))
        .route("/orders/:order_id/sellers/:seller_id/confirm", post(confirm_seller_lines))

        // Wallets
        .route("/wallets/:user_id/deposit", post(deposit))
        .route("/wallets/:user_id/withdraw", post(withdraw))
        .route("/wallets/:user_id/pending-deposits", post(begin_deposit))
        .route("/wallets/:user_id/status", post(set_wallet_status))
        .route("/wallet-transactions/:txn_id/complete", post(complete_transaction))

        // Inventory
        .route("/inventory/receive", post(receive_stock))
        .route("/inventory/adjust", post(adjust_stock))

        // Admin endpoints
        .route("/admin/payouts/retry", post(retry_payouts))
        .route_layer(from_fn_with_state(limiter, rate_limit_middleware));

    let queries = Router::new()
        .route("/orders/:order_id/progress", get(get_order_progress))
        .route("/wallets/:user_id", get(get_wallet))
        .route("/wallets/:user_id/transactions", get(get_wallet_transactions))
        .route("/wallets/:user_id/reconcile", get(reconcile_wallet))
        .route("/inventory/:item_id/:warehouse_id", get(get_stock_level));

    let app = Router::new()
        // Public health check endpoint
        .route("/health", get(health_check))
        .nest("/api/v1", commands.merge(queries))
        .layer(
            ServiceBuilder::new()
                // Add request tracing
                .layer(TraceLayer::new_for_http())
                .layer(create_cors_layer(&config.server.cors_origins))
                .layer(TimeoutLayer::with_status_code(
                    StatusCode::REQUEST_TIMEOUT,
                    config.request_timeout(),
                ))
                .layer(CompressionLayer::new()),
        )
        .with_state(state);

    info!("✓ HTTP routes configured");
    Ok(app)
}

fn spawn_limiter_pruning(limiter: RateLimitLayer) {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(Duration::from_secs(300));
        loop {
            ticker.tick().await;
            limiter.prune();
        }
    });
}

pub async fn run_server(app: Router, bind_address: &str) -> Result<(), Box<dyn std::error::Error>> {
    let listener = tokio::net::TcpListener::bind(bind_address).await?;
    info!("🌐 Server listening on: {}", bind_address);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    Ok(())
}

async fn shutdown_signal() {
    if tokio::signal::ctrl_c().await.is_ok() {
        info!("🛑 Shutdown signal received");
    }
}
