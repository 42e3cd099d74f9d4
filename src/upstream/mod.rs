//! Upstream conversational API client
//!
//! Opens a streaming `chat-messages` call against the hosted API. The only
//! recovery performed here is a single retry when the upstream reports that
//! a supplied conversation no longer exists.

use reqwest::{Client, Response, StatusCode};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::config::{ConfigurationError, UpstreamConfig};

/// Upstream error code meaning "conversation not found"
pub const CONVERSATION_NOT_FOUND: &str = "not_found";

#[derive(Debug, Error)]
pub enum UpstreamError {
    #[error(transparent)]
    Configuration(#[from] ConfigurationError),

    #[error("{message}")]
    Http {
        status: StatusCode,
        code: Option<String>,
        message: String,
    },

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Request failed: {0}")]
    Request(#[from] reqwest::Error),
}

/// A chat request as received by the relay
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RelayRequest {
    pub query: String,
    pub category: String,
    pub conversation_id: Option<String>,
    pub user_id: Option<String>,
}

/// Outbound `chat-messages` body
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct ChatMessagesRequest {
    pub inputs: Inputs,
    pub query: String,
    pub response_mode: &'static str,
    pub conversation_id: String,
    pub user: String,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct Inputs {
    pub select: String,
}

impl ChatMessagesRequest {
    pub fn from_relay(request: &RelayRequest) -> Self {
        Self {
            inputs: Inputs {
                select: request.category.clone(),
            },
            query: request.query.clone(),
            response_mode: "streaming",
            conversation_id: request.conversation_id.clone().unwrap_or_default(),
            user: request
                .user_id
                .clone()
                .filter(|u| !u.is_empty())
                .unwrap_or_else(|| format!("user-{}", uuid::Uuid::new_v4())),
        }
    }

    /// Same request, detached from any upstream conversation
    pub fn fresh_conversation(&self) -> Self {
        Self {
            conversation_id: String::new(),
            ..self.clone()
        }
    }
}

/// Error payload returned by the upstream on non-2xx responses
#[derive(Debug, Default, Deserialize)]
struct ErrorBody {
    #[serde(default)]
    code: Option<String>,
    #[serde(default)]
    message: Option<String>,
}

pub struct UpstreamClient {
    config: UpstreamConfig,
    client: Client,
}

impl UpstreamClient {
    pub fn new(config: UpstreamConfig) -> Self {
        Self {
            config,
            client: Client::new(),
        }
    }

    /// Open the upstream event stream for a relay request.
    ///
    /// The returned response has a success status and an unread body.
    pub async fn open_stream(&self, request: &RelayRequest) -> Result<Response, UpstreamError> {
        let (base_url, api_key) = self.config.credentials().map_err(|e| {
            tracing::error!("{}", e);
            e
        })?;
        let url = format!("{}/chat-messages", base_url);
        let body = ChatMessagesRequest::from_relay(request);

        tracing::info!(
            "Sending request to upstream: url={}, select={}, conversation_id={:?}, user={}",
            url,
            body.inputs.select,
            body.conversation_id,
            body.user
        );

        let response = self.post(&url, api_key, &body).await?;
        tracing::info!("Upstream response status: {}", response.status());

        if response.status().is_success() {
            return ensure_body(response);
        }

        let error = http_error(response).await;

        if should_retry(&error, &body) {
            tracing::warn!("Upstream conversation not found, retrying without conversation_id");

            let retry = self.post(&url, api_key, &body.fresh_conversation()).await?;
            tracing::info!("Retry response status: {}", retry.status());

            if retry.status().is_success() {
                if let Ok(response) = ensure_body(retry) {
                    return Ok(response);
                }
            }
        }

        tracing::error!("Upstream API error: {}", error);
        Err(error)
    }

    async fn post(
        &self,
        url: &str,
        api_key: &str,
        body: &ChatMessagesRequest,
    ) -> Result<Response, UpstreamError> {
        let response = self
            .client
            .post(url)
            .header("Authorization", format!("Bearer {}", api_key))
            .header("Content-Type", "application/json")
            .json(body)
            .send()
            .await?;
        Ok(response)
    }
}

/// Only a 404 "not_found" for a conversation we actually named is retried
fn should_retry(error: &UpstreamError, body: &ChatMessagesRequest) -> bool {
    match error {
        UpstreamError::Http { status, code, .. } => {
            *status == StatusCode::NOT_FOUND
                && code.as_deref() == Some(CONVERSATION_NOT_FOUND)
                && !body.conversation_id.is_empty()
        }
        _ => false,
    }
}

async fn http_error(response: Response) -> UpstreamError {
    let status = response.status();
    let text = response.text().await.unwrap_or_default();
    let body: ErrorBody = serde_json::from_str(&text).unwrap_or_default();

    UpstreamError::Http {
        status,
        code: body.code,
        message: body
            .message
            .filter(|m| !m.is_empty())
            .unwrap_or_else(|| format!("HTTP error! status: {}", status.as_u16())),
    }
}

/// A success status with an explicitly empty body breaks the streaming contract
fn ensure_body(response: Response) -> Result<Response, UpstreamError> {
    if response.content_length() == Some(0) {
        return Err(UpstreamError::Protocol(
            "No response body from upstream API".to_string(),
        ));
    }
    Ok(response)
}
