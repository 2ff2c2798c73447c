//! Instagram Direct Messages adapter.
//!
//! Instagram delivers DM events in two payload shapes, Messenger-style
//! `messaging` items and `changes` items with a `messages` field; both
//! are normalized here. Credentials are a single explicitly configured
//! org/connected-account pair; there is deliberately no introspection of
//! broker account objects to recover them.

use async_trait::async_trait;
use omnirelay_broker::BrokerClient;
use omnirelay_core::platform::{
    ChallengeOutcome, ChallengeQuery, PlatformAdapter, PLATFORM_INSTAGRAM,
};
use omnirelay_core::types::{Delivery, Dispatch, InboundEvent};
use omnirelay_core::verify::{check_subscribe_challenge, VerifyError};
use serde_json::{json, Value};
use tracing::{info, warn};

const SEND_MESSAGE_TOOL: &str = "INSTAGRAM_SEND_MESSAGE";

pub struct InstagramAdapter {
    broker: BrokerClient,
    verify_token: Option<String>,
    org_id: Option<String>,
    connected_account_id: Option<String>,
}

impl InstagramAdapter {
    pub fn new(
        broker: BrokerClient,
        verify_token: Option<String>,
        org_id: Option<String>,
        connected_account_id: Option<String>,
    ) -> Self {
        Self {
            broker,
            verify_token: verify_token.filter(|s| !s.is_empty()),
            org_id: org_id.filter(|s| !s.is_empty()),
            connected_account_id: connected_account_id.filter(|s| !s.is_empty()),
        }
    }

    fn extract_messaging(&self, item: &Value) -> Option<InboundEvent> {
        let message = item.get("message")?;
        let text = message.get("text").and_then(|v| v.as_str()).unwrap_or_default().trim();
        if text.is_empty() || message.get("is_echo").and_then(|v| v.as_bool()).unwrap_or(false) {
            info!("skipping empty or echo message");
            return None;
        }
        let sender_id = item
            .get("sender")
            .and_then(|s| s.get("id"))
            .and_then(|v| v.as_str())?;

        let mut inbound = InboundEvent::new(sender_id, sender_id, text);
        if let Some(mid) = message.get("mid").and_then(|v| v.as_str()) {
            inbound = inbound.with_id(mid);
        }
        Some(inbound)
    }

    /// `changes` items with `field == "messages"` carry the message under
    /// `value.message` with a different field layout.
    fn extract_change(&self, change: &Value) -> Option<InboundEvent> {
        if change.get("field").and_then(|v| v.as_str()) != Some("messages") {
            return None;
        }
        let message = change.get("value").and_then(|v| v.get("message"))?;
        let text = message.get("text").and_then(|v| v.as_str()).unwrap_or_default().trim();
        let sender_id = message
            .get("from")
            .and_then(|f| f.get("id"))
            .and_then(|v| v.as_str())
            .unwrap_or_default();
        if text.is_empty() || sender_id.is_empty() {
            return None;
        }

        let mut inbound = InboundEvent::new(sender_id, sender_id, text);
        if let Some(id) = message.get("id").and_then(|v| v.as_str()) {
            inbound = inbound.with_id(id);
        }
        Some(inbound)
    }
}

#[async_trait]
impl PlatformAdapter for InstagramAdapter {
    fn platform_name(&self) -> &'static str {
        PLATFORM_INSTAGRAM
    }

    fn webhook_path(&self) -> &'static str {
        "/instagram/webhook"
    }

    fn subscribe_challenge(&self, query: &ChallengeQuery) -> ChallengeOutcome {
        let expected = self.verify_token.as_deref().unwrap_or_default();
        let mode = query.mode.as_deref().unwrap_or_default();
        let token = query.verify_token.as_deref().unwrap_or_default();
        match check_subscribe_challenge(expected, mode, token) {
            Ok(()) if !expected.is_empty() => {
                info!("Instagram webhook verified");
                ChallengeOutcome::Accepted(query.challenge.clone().unwrap_or_default())
            }
            Ok(()) => {
                warn!("Instagram verify token not configured; rejecting handshake");
                ChallengeOutcome::Rejected(VerifyError::TokenMismatch)
            }
            Err(e) => {
                warn!(error = %e, "Instagram webhook verification failed");
                ChallengeOutcome::Rejected(e)
            }
        }
    }

    fn extract_events(&self, payload: &Value) -> Vec<InboundEvent> {
        let entries = payload.get("entry").and_then(|v| v.as_array()).cloned().unwrap_or_default();
        if entries.is_empty() {
            warn!("Instagram payload carried no entries");
            return Vec::new();
        }

        let mut events = Vec::new();
        for entry in &entries {
            let messaging = entry.get("messaging").and_then(|v| v.as_array()).cloned().unwrap_or_default();
            for item in &messaging {
                if let Some(event) = self.extract_messaging(item) {
                    events.push(event);
                }
            }
            let changes = entry.get("changes").and_then(|v| v.as_array()).cloned().unwrap_or_default();
            for change in &changes {
                if let Some(event) = self.extract_change(change) {
                    events.push(event);
                }
            }
        }
        events
    }

    async fn prepare(&self, event: &InboundEvent) -> anyhow::Result<Option<Dispatch>> {
        let (Some(org_id), Some(connected_account_id)) =
            (self.org_id.clone(), self.connected_account_id.clone())
        else {
            warn!("Instagram org/connected-account ids not configured; dropping event");
            return Ok(None);
        };

        Ok(Some(Dispatch {
            delivery: Delivery {
                org_id,
                connected_account_id,
                scope_id: event.scope_id.clone().unwrap_or_default(),
                recipient: event.sender_id.clone(),
                thread: None,
            },
            text: event.text.clone(),
        }))
    }

    async fn send(&self, dispatch: &Dispatch, text: &str) -> anyhow::Result<()> {
        let arguments = json!({
            "recipient_id": dispatch.delivery.recipient,
            "message_text": text,
        });

        let response = self
            .broker
            .execute_tool(
                SEND_MESSAGE_TOOL,
                arguments,
                &dispatch.delivery.org_id,
                &dispatch.delivery.connected_account_id,
            )
            .await?;
        response.into_data()?;
        info!(recipient = %dispatch.delivery.recipient, "Instagram reply sent");
        Ok(())
    }
}
