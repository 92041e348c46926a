use anyhow::{anyhow, Context};
use marketplace::{bootstrap, config::Config, server};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

// Initialize logging and tracing
fn init_tracing() {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG")
                .unwrap_or_else(|_| "info,tower_http=debug,marketplace=debug".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load configuration
    dotenv::dotenv().ok();

    // Initialize tracing
    init_tracing();

    info!("🚀 Starting Marketplace Backend");

    let config = Config::from_env().context("loading configuration")?;
    config
        .validate()
        .map_err(|e| anyhow!("invalid configuration: {}", e))?;

    let state = bootstrap::initialize_app_state(&config)
        .await
        .context("initializing application state")?;

    // Create HTTP server
    let app = server::create_app(state, &config)?;

    // Run the Server
    server::run_server(app, &config.server.bind_address)
        .await
        .map_err(|e| anyhow!("server error: {}", e))?;

    info!("👋 Server stopped");
    Ok(())
}
