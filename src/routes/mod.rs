//! API routes

use axum::{
    body::Body,
    extract::{rejection::JsonRejection, State},
    http::{header, HeaderName, StatusCode},
    response::{IntoResponse, Json, Response},
    routing::{get, post},
    Router,
};
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::conversation::Category;
use crate::upstream::{RelayRequest, UpstreamError};
use crate::AppState;

pub const CHAT_MESSAGES_PATH: &str = "/api/chat-messages";

const CORS_HEADERS: [(HeaderName, &str); 3] = [
    (header::ACCESS_CONTROL_ALLOW_ORIGIN, "*"),
    (header::ACCESS_CONTROL_ALLOW_METHODS, "POST, OPTIONS"),
    (header::ACCESS_CONTROL_ALLOW_HEADERS, "Content-Type"),
];

#[derive(Debug, Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
    upstream_configured: bool,
}

/// Inbound chat request from the browser or terminal client
#[derive(Debug, Default, Deserialize)]
pub struct ChatMessagesBody {
    #[serde(default)]
    pub query: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default, alias = "category")]
    pub select: Option<String>,
    #[serde(default)]
    pub conversation_id: Option<String>,
    #[serde(default)]
    pub user: Option<String>,
}

impl From<ChatMessagesBody> for RelayRequest {
    fn from(body: ChatMessagesBody) -> Self {
        RelayRequest {
            query: body
                .query
                .filter(|q| !q.is_empty())
                .or(body.message)
                .unwrap_or_default(),
            category: body
                .select
                .filter(|s| !s.is_empty())
                .unwrap_or_else(|| Category::default().wire_value().to_string()),
            conversation_id: body.conversation_id.filter(|c| !c.is_empty()),
            user_id: body.user.filter(|u| !u.is_empty()),
        }
    }
}

/// Relay failure, rendered as `500 {"error": message}`
#[derive(Debug)]
pub struct RelayError(String);

impl From<UpstreamError> for RelayError {
    fn from(err: UpstreamError) -> Self {
        RelayError(err.to_string())
    }
}

impl From<JsonRejection> for RelayError {
    fn from(rejection: JsonRejection) -> Self {
        RelayError(rejection.body_text())
    }
}

impl IntoResponse for RelayError {
    fn into_response(self) -> Response {
        tracing::error!("Error in chat-messages route: {}", self.0);
        (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({ "error": self.0 })),
        )
            .into_response()
    }
}

async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
        upstream_configured: state.config.upstream.is_complete(),
    })
}

async fn chat_messages(
    State(state): State<AppState>,
    body: Result<Json<ChatMessagesBody>, JsonRejection>,
) -> Result<Response, RelayError> {
    let Json(body) = body?;
    let request = RelayRequest::from(body);
    tracing::info!(
        "Chat request received: select={}, conversation_id={:?}",
        request.category,
        request.conversation_id
    );

    let upstream = state.upstream.open_stream(&request).await?;

    let headers = [
        (header::CONTENT_TYPE, "text/event-stream"),
        (header::CACHE_CONTROL, "no-cache"),
        (header::CONNECTION, "keep-alive"),
    ];
    Ok((
        headers,
        CORS_HEADERS,
        Body::from_stream(upstream.bytes_stream()),
    )
        .into_response())
}

async fn chat_messages_preflight() -> impl IntoResponse {
    (StatusCode::OK, CORS_HEADERS)
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/health", get(health))
        .route(
            CHAT_MESSAGES_PATH,
            post(chat_messages).options(chat_messages_preflight),
        )
}
