use crate::types::{Dispatch, InboundEvent};
use crate::verify::VerifyError;
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;
use std::collections::HashMap;

pub const PLATFORM_SLACK: &str = "slack";
pub const PLATFORM_FACEBOOK: &str = "facebook";
pub const PLATFORM_INSTAGRAM: &str = "instagram";
pub const PLATFORM_TELEGRAM: &str = "telegram";

/// Raw inbound webhook request, decoupled from the HTTP framework so
/// adapters stay testable without a running server. Header names are
/// case-insensitive.
#[derive(Debug, Default)]
pub struct WebhookRequest {
    headers: HashMap<String, String>,
    pub body: Vec<u8>,
}

impl WebhookRequest {
    pub fn new(body: Vec<u8>) -> Self {
        Self {
            headers: HashMap::new(),
            body,
        }
    }

    pub fn with_header(mut self, name: &str, value: &str) -> Self {
        self.headers.insert(name.to_ascii_lowercase(), value.to_string());
        self
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(&name.to_ascii_lowercase()).map(|v| v.as_str())
    }
}

/// Query parameters of a Meta-style GET verification handshake.
#[derive(Debug, Default, Deserialize)]
pub struct ChallengeQuery {
    #[serde(rename = "hub.mode")]
    pub mode: Option<String>,
    #[serde(rename = "hub.verify_token")]
    pub verify_token: Option<String>,
    #[serde(rename = "hub.challenge")]
    pub challenge: Option<String>,
}

#[derive(Debug)]
pub enum ChallengeOutcome {
    /// Platform has no GET handshake; the route answers 404.
    Unsupported,
    /// Echo this challenge string back verbatim as plain text.
    Accepted(String),
    Rejected(VerifyError),
}

/// Per-platform behavior behind the shared webhook/dispatch pipeline.
///
/// One adapter instance serves one platform: it authenticates inbound
/// requests, normalizes payloads into [`InboundEvent`]s, resolves delivery
/// credentials, and performs the outbound send through the broker.
#[async_trait]
pub trait PlatformAdapter: Send + Sync {
    fn platform_name(&self) -> &'static str;

    /// Route the gateway mounts this adapter's webhook on.
    fn webhook_path(&self) -> &'static str;

    /// Outbound chunk budget; adapters leave margin below the platform's
    /// hard message-length limit.
    fn chunk_limit(&self) -> usize {
        1900
    }

    fn subscribe_challenge(&self, _query: &ChallengeQuery) -> ChallengeOutcome {
        ChallengeOutcome::Unsupported
    }

    /// In-band handshake payload (Slack `url_verification`). Answered
    /// before signature verification, since the platform's handshake call
    /// does not carry a valid signature.
    fn handshake_response(&self, _payload: &Value) -> Option<Value> {
        None
    }

    fn verify(&self, _request: &WebhookRequest, _now_epoch_secs: i64) -> Result<(), VerifyError> {
        Ok(())
    }

    /// Normalize a verified payload into zero or more events. Filtering
    /// that needs no account data (bot echoes, empty text) happens here.
    fn extract_events(&self, payload: &Value) -> Vec<InboundEvent>;

    /// Platform-side filtering and credential resolution. `Ok(None)` drops
    /// the event; the adapter logs the reason.
    async fn prepare(&self, event: &InboundEvent) -> anyhow::Result<Option<Dispatch>>;

    /// Deliver one chunk of reply text.
    async fn send(&self, dispatch: &Dispatch, text: &str) -> anyhow::Result<()>;
}
