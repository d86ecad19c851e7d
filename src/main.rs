use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crossfund::{bootstrap, Config};

// Initialize logging and tracing
fn init_tracing() {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info,crossfund=debug".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load configuration first so RUST_LOG from .env applies
    let config = Config::load();
    init_tracing();

    info!("🚀 Starting crossfund storage credit service");

    let config = config.map_err(|e| {
        error!("❌ Invalid configuration: {}", e);
        e
    })?;

    let state = bootstrap::initialize_app_state(&config).await?;

    let diagnostics = state.diagnostics();
    info!(
        "🌐 Ready: {} route(s), storage session generation {}",
        diagnostics.routes, diagnostics.session.generation
    );

    tokio::signal::ctrl_c().await?;
    info!("🛑 Shutdown requested");

    state.shutdown().await;
    info!("👋 Stopped");
    Ok(())
}
