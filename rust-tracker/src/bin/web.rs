//! Replytrack Web Server - tracking API and inbound reply webhook.
//!
//! Serves the campaign tracking API (`track-send`, `register`,
//! `mark-replied`, `stats`) on top of the configured store, plus a signed
//! webhook that correlates pushed replies as they arrive.

use std::net::SocketAddr;

use anyhow::{Context, Result};
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;
use tracing::info;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use replytrack::shutdown::shutdown_signal;
use replytrack::web::{router, AppState};
use replytrack::{store, Config};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize structured JSON logging
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().json().flatten_event(true))
        .init();

    info!("web_server_starting");

    let config = Config::from_env().context("Failed to load configuration")?;
    info!(
        port = config.port,
        store = ?config.store,
        webhook_signing_configured = config.inbound_webhook_secret.is_some(),
        correlation_days = config.poll.correlation_window.days,
        "config_loaded"
    );

    let store = store::open(&config.store).context("Failed to open tracking store")?;
    let state = AppState::new(config.web(), store);

    let app = router(state).layer(TraceLayer::new_for_http());

    // Bind to address
    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    let listener = TcpListener::bind(addr)
        .await
        .context("Failed to bind to address")?;

    info!(address = %addr, "web_server_listening");

    // Run server with graceful shutdown
    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            shutdown_signal().await;
            info!("web_server_shutting_down");
        })
        .await
        .context("Server error")?;

    info!("web_server_shutdown_complete");

    Ok(())
}
