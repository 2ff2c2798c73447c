//! Client for the upstream conversational backend.
//!
//! The bridge forwards every inbound message's text to a single backend
//! and relays the textual reply. The backend is an external collaborator:
//! a hosted chat API taking `{message, conversation_id?}` and answering
//! with `{message, ...}` within a bounded timeout.

use async_trait::async_trait;
use reqwest::Client;
use serde_json::{json, Value};
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

/// Fallback sentence used when a 2xx response carries no `message` field.
const EMPTY_REPLY_FALLBACK: &str = "Sorry, I couldn't get a response.";

#[derive(Debug, Error)]
pub enum UpstreamError {
    #[error("chat backend request timed out after {0:?}")]
    Timeout(Duration),
    #[error("chat backend returned {status}: {body}")]
    Status { status: u16, body: String },
    #[error("chat backend network error: {0}")]
    Network(String),
    #[error("failed to decode chat backend response: {0}")]
    Decode(String),
}

/// Seam for the conversational backend. The HTTP client below is the
/// production implementation; tests substitute their own.
#[async_trait]
pub trait ChatBackend: Send + Sync {
    async fn respond(
        &self,
        message: &str,
        conversation_id: Option<&str>,
    ) -> Result<String, UpstreamError>;
}

pub struct HttpChatBackend {
    url: String,
    timeout: Duration,
    client: Client,
}

impl HttpChatBackend {
    pub fn new(url: String, timeout_secs: u64) -> Self {
        Self {
            url,
            timeout: Duration::from_secs(timeout_secs),
            client: Client::new(),
        }
    }
}

#[async_trait]
impl ChatBackend for HttpChatBackend {
    async fn respond(
        &self,
        message: &str,
        conversation_id: Option<&str>,
    ) -> Result<String, UpstreamError> {
        let mut payload = json!({ "message": message });
        if let Some(conversation_id) = conversation_id {
            payload["conversation_id"] = json!(conversation_id);
        }

        debug!(url = %self.url, "forwarding message to chat backend");

        let res = self
            .client
            .post(&self.url)
            .timeout(self.timeout)
            .header("accept", "application/json")
            .json(&payload)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    UpstreamError::Timeout(self.timeout)
                } else {
                    UpstreamError::Network(e.to_string())
                }
            })?;

        let status = res.status();
        if !status.is_success() {
            let body = res.text().await.unwrap_or_default();
            return Err(UpstreamError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let body: Value = res
            .json()
            .await
            .map_err(|e| UpstreamError::Decode(e.to_string()))?;

        Ok(extract_reply(&body))
    }
}

fn extract_reply(body: &Value) -> String {
    body.get("message")
        .and_then(|v| v.as_str())
        .filter(|s| !s.is_empty())
        .unwrap_or(EMPTY_REPLY_FALLBACK)
        .to_string()
}
