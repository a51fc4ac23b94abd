//! Request/response backend
//!
//! History fetches and message submits need an answer, so they go through
//! HTTP rather than the fire-and-forget socket.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, Response};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use tracing::{debug, warn};

use crate::error::TransportError;
use crate::message::{ChatMessage, OutgoingMessage};
use crate::types::{MessageId, RoomId};

/// Request/response side of the server
#[async_trait]
pub trait Backend: Send + Sync + 'static {
    /// Message history of a room, oldest first
    async fn fetch_history(&self, room: &RoomId) -> Result<Vec<ChatMessage>, TransportError>;

    /// Submit a message; returns the server-assigned id
    async fn send_message(&self, message: &OutgoingMessage) -> Result<MessageId, TransportError>;
}

#[derive(Debug, Deserialize)]
struct HistoryResponse {
    #[serde(default)]
    messages: Vec<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct SendResponse {
    id: MessageId,
}

#[derive(Debug, Deserialize)]
struct ErrorResponse {
    error: String,
}

/// HTTP backend
#[derive(Debug, Clone)]
pub struct HttpBackend {
    client: Client,
    base_url: String,
}

impl HttpBackend {
    /// Create a backend for the API at `base_url`
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, TransportError> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    fn history_url(&self, room: &RoomId) -> String {
        format!("{}/api/rooms/{}/messages", self.base_url, room)
    }

    fn send_url(&self) -> String {
        format!("{}/api/send_message", self.base_url)
    }
}

#[async_trait]
impl Backend for HttpBackend {
    async fn fetch_history(&self, room: &RoomId) -> Result<Vec<ChatMessage>, TransportError> {
        let url = self.history_url(room);
        debug!("GET {}", url);

        let response = check_status(self.client.get(&url).send().await?).await?;
        let body: HistoryResponse = decode(&response.text().await?)?;
        Ok(parse_history(body.messages))
    }

    async fn send_message(&self, message: &OutgoingMessage) -> Result<MessageId, TransportError> {
        let url = self.send_url();
        debug!("POST {} ({})", url, message.client_ref);

        let response = check_status(self.client.post(&url).json(message).send().await?).await?;
        let body: SendResponse = decode(&response.text().await?)?;
        Ok(body.id)
    }
}

/// Map non-success statuses to `Rejected`, using the `{"error": ...}` body if present
async fn check_status(response: Response) -> Result<Response, TransportError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let text = response.text().await.unwrap_or_default();
    Err(rejection(status.as_u16(), &text))
}

fn rejection(status: u16, body: &str) -> TransportError {
    let message = match serde_json::from_str::<ErrorResponse>(body) {
        Ok(err) => err.error,
        Err(_) if body.is_empty() => "no details".to_string(),
        Err(_) => body.to_string(),
    };
    TransportError::Rejected { status, message }
}

/// Decode a success body
fn decode<T: DeserializeOwned>(body: &str) -> Result<T, TransportError> {
    Ok(serde_json::from_str(body)?)
}

/// Decode history entries one by one, skipping malformed ones
fn parse_history(entries: Vec<serde_json::Value>) -> Vec<ChatMessage> {
    entries
        .into_iter()
        .filter_map(|entry| match serde_json::from_value::<ChatMessage>(entry) {
            Ok(message) => Some(message),
            Err(e) => {
                warn!("Skipping malformed history entry: {}", e);
                None
            }
        })
        .collect()
}
