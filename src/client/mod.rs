//! Relay client: opens a turn's event stream against the relay server

use std::pin::Pin;

use async_trait::async_trait;
use futures::{Stream, StreamExt};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::conversation::Category;
use crate::routes::CHAT_MESSAGES_PATH;
use crate::sse::{event_stream, StreamEvent};

/// Live sequence of upstream events for one turn
pub type EventStream = Pin<Box<dyn Stream<Item = Result<StreamEvent, TransportError>> + Send>>;

#[derive(Debug, Error)]
pub enum TransportError {
    /// Non-2xx answer from the relay, with its `error` text when present
    #[error("{message}")]
    Status { status: u16, message: String },

    #[error("Request failed: {0}")]
    Request(#[from] reqwest::Error),
}

/// What a turn sends to the relay
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TurnRequest {
    pub query: String,
    #[serde(rename = "select")]
    pub category: Category,
    pub conversation_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user: Option<String>,
}

/// Source of a turn's event stream
#[async_trait]
pub trait ChatTransport: Send + Sync {
    async fn open(&self, request: &TurnRequest) -> Result<EventStream, TransportError>;
}

#[derive(Debug, Default, Deserialize)]
struct RelayErrorBody {
    #[serde(default)]
    error: Option<String>,
}

/// [`ChatTransport`] over HTTP to the relay server
pub struct RelayClient {
    client: Client,
    relay_url: String,
}

impl RelayClient {
    pub fn new(relay_url: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            relay_url: relay_url.into().trim_end_matches('/').to_string(),
        }
    }

    fn endpoint(&self) -> String {
        format!("{}{}", self.relay_url, CHAT_MESSAGES_PATH)
    }
}

#[async_trait]
impl ChatTransport for RelayClient {
    async fn open(&self, request: &TurnRequest) -> Result<EventStream, TransportError> {
        let response = self.client.post(self.endpoint()).json(request).send().await?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            let body: RelayErrorBody = serde_json::from_str(&text).unwrap_or_default();
            return Err(TransportError::Status {
                status: status.as_u16(),
                message: body
                    .error
                    .unwrap_or_else(|| format!("HTTP error! status: {}", status.as_u16())),
            });
        }

        tracing::debug!("Starting to read streaming response");
        let bytes = response
            .bytes_stream()
            .map(|chunk| chunk.map_err(TransportError::from));
        Ok(Box::pin(event_stream(bytes)))
    }
}
