//! Relay Chat server
//!
//! Relays chat questions to the upstream conversational API and streams the
//! SSE answer back to the browser.

use std::net::SocketAddr;

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use relay_chat::config::Config;
use relay_chat::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "relay_chat=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::from_env()?;
    let addr: SocketAddr = format!("{}:{}", config.host, config.port).parse()?;

    match config.upstream.credentials() {
        Ok((base_url, _)) => tracing::info!("Upstream API: {}", base_url),
        Err(e) => tracing::warn!("{}; chat requests will fail until it is set", e),
    }

    let app = relay_chat::app(AppState::new(config));

    tracing::info!("Relay running at http://{}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
