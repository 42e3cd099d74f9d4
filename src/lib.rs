//! Relay Chat - streaming chat relay and client
//!
//! The relay forwards chat questions to a hosted conversational API and
//! passes the Server-Sent-Events answer straight back to the caller. The
//! client side decodes that stream and folds it into an in-memory
//! conversation.

use std::sync::Arc;

use axum::Router;
use tower_http::{cors::CorsLayer, trace::TraceLayer};

pub mod client;
pub mod config;
pub mod conversation;
pub mod routes;
pub mod sse;
pub mod upstream;

use config::Config;
use upstream::UpstreamClient;

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub config: Config,
    pub upstream: Arc<UpstreamClient>,
}

impl AppState {
    pub fn new(config: Config) -> Self {
        let upstream = Arc::new(UpstreamClient::new(config.upstream.clone()));
        Self { config, upstream }
    }
}

/// The relay application with CORS and request tracing
pub fn app(state: AppState) -> Router {
    Router::new()
        .merge(routes::router())
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
