use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Normalized inbound event produced by a platform adapter from a raw
/// webhook payload (or polled update).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InboundEvent {
    /// Platform event/message identifier used for duplicate suppression.
    /// Events without one cannot be deduplicated and are processed
    /// unconditionally.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    /// Platform scope identifier (Slack team id, Facebook page id, ...)
    /// used to look up delivery credentials.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scope_id: Option<String>,
    /// ID of the user who wrote the message.
    pub sender_id: String,
    /// Where the reply goes (Slack channel, Messenger sender id, ...).
    pub reply_to: String,
    /// Thread identifier when the platform threads replies (Slack thread_ts).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub thread: Option<String>,
    pub text: String,
    #[serde(default = "default_timestamp")]
    pub received_at: DateTime<Utc>,
    /// Platform-specific extras (event type, raw ids) the adapter needs
    /// again at prepare time.
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub metadata: HashMap<String, String>,
}

fn default_timestamp() -> DateTime<Utc> {
    Utc::now()
}

impl InboundEvent {
    pub fn new(sender_id: &str, reply_to: &str, text: &str) -> Self {
        Self {
            id: None,
            scope_id: None,
            sender_id: sender_id.to_string(),
            reply_to: reply_to.to_string(),
            thread: None,
            text: text.to_string(),
            received_at: Utc::now(),
            metadata: HashMap::new(),
        }
    }

    /// Builder-style method to set the dedup identifier
    pub fn with_id(mut self, id: &str) -> Self {
        self.id = Some(id.to_string());
        self
    }

    /// Builder-style method to set the scope identifier
    pub fn with_scope(mut self, scope_id: &str) -> Self {
        self.scope_id = Some(scope_id.to_string());
        self
    }

    /// Builder-style method to set the thread identifier
    pub fn with_thread(mut self, thread: &str) -> Self {
        self.thread = Some(thread.to_string());
        self
    }
}

/// Credentials and addressing needed to deliver a reply through the
/// integration broker.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Delivery {
    /// Broker org/user scope the tool call executes under.
    pub org_id: String,
    /// Connected-account handle authorizing the outbound send.
    pub connected_account_id: String,
    pub scope_id: String,
    pub recipient: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub thread: Option<String>,
}

/// A fully resolved unit of work: the text to feed the upstream backend
/// and where the reply is delivered.
#[derive(Debug, Clone)]
pub struct Dispatch {
    pub delivery: Delivery,
    pub text: String,
}
