//! collab-relay server entry point.
//!
//! Starts the Axum HTTP server with the document REST API and the
//! WebSocket relay.

use tracing_subscriber::EnvFilter;

use collab_sync::api;
use collab_sync::app_state::AppState;
use collab_sync::config::RelayConfig;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing; LOG_FORMAT=json switches to structured output
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    if std::env::var("LOG_FORMAT").is_ok_and(|f| f.eq_ignore_ascii_case("json")) {
        tracing_subscriber::fmt().json().with_env_filter(filter).init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }

    // Load configuration
    let config = RelayConfig::from_env()?;
    tracing::info!(addr = %config.listen_addr, "starting collab-relay");

    let app_state = AppState::new(config.event_bus_capacity);
    let app = api::build_app(app_state, config.request_timeout);

    // Start server
    let listener = tokio::net::TcpListener::bind(config.listen_addr).await?;
    tracing::info!(addr = %config.listen_addr, "server listening");

    axum::serve(listener, app).await?;

    Ok(())
}
