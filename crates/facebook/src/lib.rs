//! Facebook Messenger adapter.
//!
//! Handles the Meta subscribe handshake and page messaging events, resolves
//! each page to broker credentials through the page mapping (with a
//! single-page configured fallback), and replies through the broker's
//! Facebook toolkit.

use async_trait::async_trait;
use omnirelay_accounts::AccountCache;
use omnirelay_broker::BrokerClient;
use omnirelay_core::platform::{
    ChallengeOutcome, ChallengeQuery, PlatformAdapter, WebhookRequest, PLATFORM_FACEBOOK,
};
use omnirelay_core::types::{Delivery, Dispatch, InboundEvent};
use omnirelay_core::verify::{check_subscribe_challenge, verify_hub_signature, VerifyError};
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::{info, warn};

const SEND_MESSAGE_TOOL: &str = "FACEBOOK_SEND_MESSAGE";

pub struct FacebookAdapter {
    broker: BrokerClient,
    pages: Arc<AccountCache>,
    verify_token: Option<String>,
    app_secret: Option<String>,
    /// Single-page setup: used when the page id is not in the mapping.
    fallback_org_id: Option<String>,
    fallback_connected_account_id: Option<String>,
}

impl FacebookAdapter {
    pub fn new(
        broker: BrokerClient,
        pages: Arc<AccountCache>,
        verify_token: Option<String>,
        app_secret: Option<String>,
        fallback_org_id: Option<String>,
        fallback_connected_account_id: Option<String>,
    ) -> Self {
        Self {
            broker,
            pages,
            verify_token: verify_token.filter(|s| !s.is_empty()),
            app_secret: app_secret.filter(|s| !s.is_empty()),
            fallback_org_id: fallback_org_id.filter(|s| !s.is_empty()),
            fallback_connected_account_id: fallback_connected_account_id.filter(|s| !s.is_empty()),
        }
    }

    fn extract_messaging(&self, page_id: &str, item: &Value) -> Option<InboundEvent> {
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

        let mut inbound = InboundEvent::new(sender_id, sender_id, text).with_scope(page_id);
        if let Some(mid) = message.get("mid").and_then(|v| v.as_str()) {
            inbound = inbound.with_id(mid);
        }
        Some(inbound)
    }
}

#[async_trait]
impl PlatformAdapter for FacebookAdapter {
    fn platform_name(&self) -> &'static str {
        PLATFORM_FACEBOOK
    }

    fn webhook_path(&self) -> &'static str {
        "/facebook/webhook"
    }

    fn subscribe_challenge(&self, query: &ChallengeQuery) -> ChallengeOutcome {
        let Some(expected) = self.verify_token.as_deref() else {
            warn!("Facebook verify token not configured; rejecting handshake");
            return ChallengeOutcome::Rejected(VerifyError::NotConfigured);
        };
        let mode = query.mode.as_deref().unwrap_or_default();
        let token = query.verify_token.as_deref().unwrap_or_default();
        match check_subscribe_challenge(expected, mode, token) {
            Ok(()) => {
                info!("Facebook webhook verified");
                ChallengeOutcome::Accepted(query.challenge.clone().unwrap_or_default())
            }
            Err(e) => {
                warn!(error = %e, "Facebook webhook verification failed");
                ChallengeOutcome::Rejected(e)
            }
        }
    }

    fn verify(&self, request: &WebhookRequest, _now_epoch_secs: i64) -> Result<(), VerifyError> {
        match self.app_secret.as_deref() {
            Some(secret) => verify_hub_signature(
                secret,
                request.header("x-hub-signature-256"),
                &request.body,
            ),
            None => Ok(()),
        }
    }

    fn extract_events(&self, payload: &Value) -> Vec<InboundEvent> {
        // Instagram events arrive on their own webhook; only page events
        // belong here.
        if payload.get("object").and_then(|v| v.as_str()) != Some("page") {
            info!("skipping non-page event");
            return Vec::new();
        }

        let mut events = Vec::new();
        let entries = payload.get("entry").and_then(|v| v.as_array()).cloned().unwrap_or_default();
        for entry in &entries {
            let Some(page_id) = entry.get("id").and_then(|v| v.as_str()) else {
                warn!("entry missing page id");
                continue;
            };
            let messaging = entry.get("messaging").and_then(|v| v.as_array()).cloned().unwrap_or_default();
            for item in &messaging {
                if let Some(event) = self.extract_messaging(page_id, item) {
                    events.push(event);
                }
            }
        }
        events
    }

    async fn prepare(&self, event: &InboundEvent) -> anyhow::Result<Option<Dispatch>> {
        let Some(page_id) = event.scope_id.as_deref() else {
            warn!("Facebook event carried no page id");
            return Ok(None);
        };

        let (org_id, connected_account_id) = if let Some(account) = self.pages.resolve(page_id).await {
            (account.org_id, account.connected_account_id)
        } else if let (Some(org), Some(account)) = (
            self.fallback_org_id.clone(),
            self.fallback_connected_account_id.clone(),
        ) {
            info!(page_id, "page not in mapping; using single-page fallback credentials");
            (org, account)
        } else {
            warn!(page_id, "no credentials for Facebook page; dropping event");
            return Ok(None);
        };

        Ok(Some(Dispatch {
            delivery: Delivery {
                org_id,
                connected_account_id,
                scope_id: page_id.to_string(),
                recipient: event.sender_id.clone(),
                thread: None,
            },
            text: event.text.clone(),
        }))
    }

    async fn send(&self, dispatch: &Dispatch, text: &str) -> anyhow::Result<()> {
        // The Facebook toolkit takes "message_text", not "text".
        let arguments = json!({
            "page_id": dispatch.delivery.scope_id,
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
        info!(recipient = %dispatch.delivery.recipient, "Facebook reply sent");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use omnirelay_accounts::{AccountRecord, AccountStore, AccountStoreError};
    use std::collections::HashMap;

    struct EmptyStore;

    #[async_trait]
    impl AccountStore for EmptyStore {
        async fn load_all(&self) -> Result<HashMap<String, AccountRecord>, AccountStoreError> {
            Ok(HashMap::new())
        }
        async fn upsert_many(&self, _: &[AccountRecord]) -> Result<usize, AccountStoreError> {
            Ok(0)
        }
    }

    fn adapter() -> FacebookAdapter {
        FacebookAdapter::new(
            BrokerClient::new("key".to_string(), "http://broker.invalid".to_string()),
            Arc::new(AccountCache::new(Arc::new(EmptyStore))),
            Some("verify-me".to_string()),
            None,
            Some("org_fb".to_string()),
            Some("ca_fb".to_string()),
        )
    }

    fn challenge(mode: &str, token: &str) -> ChallengeQuery {
        ChallengeQuery {
            mode: Some(mode.to_string()),
            verify_token: Some(token.to_string()),
            challenge: Some("1158201444".to_string()),
        }
    }

    fn page_payload() -> Value {
        json!({
            "object": "page",
            "entry": [{
                "id": "P777",
                "messaging": [{
                    "sender": {"id": "U555"},
                    "recipient": {"id": "P777"},
                    "message": {"mid": "m.abc", "text": "hi there"}
                }]
            }]
        })
    }

    #[test]
    fn handshake_echoes_the_challenge() {
        match adapter().subscribe_challenge(&challenge("subscribe", "verify-me")) {
            ChallengeOutcome::Accepted(c) => assert_eq!(c, "1158201444"),
            other => panic!("expected acceptance, got {:?}", other),
        }
    }

    #[test]
    fn handshake_rejects_bad_mode_and_token() {
        match adapter().subscribe_challenge(&challenge("unsubscribe", "verify-me")) {
            ChallengeOutcome::Rejected(VerifyError::BadMode(_)) => {}
            other => panic!("expected bad-mode rejection, got {:?}", other),
        }
        match adapter().subscribe_challenge(&challenge("subscribe", "wrong")) {
            ChallengeOutcome::Rejected(VerifyError::TokenMismatch) => {}
            other => panic!("expected token rejection, got {:?}", other),
        }
    }

    #[test]
    fn handshake_requires_a_configured_token() {
        let adapter = FacebookAdapter::new(
            BrokerClient::new("key".to_string(), "http://broker.invalid".to_string()),
            Arc::new(AccountCache::new(Arc::new(EmptyStore))),
            None,
            None,
            None,
            None,
        );
        match adapter.subscribe_challenge(&challenge("subscribe", "anything")) {
            ChallengeOutcome::Rejected(VerifyError::NotConfigured) => {}
            other => panic!("expected not-configured rejection, got {:?}", other),
        }
    }

    #[test]
    fn extracts_page_messages() {
        let events = adapter().extract_events(&page_payload());
        assert_eq!(events.len(), 1);
        let event = &events[0];
        assert_eq!(event.id.as_deref(), Some("m.abc"));
        assert_eq!(event.scope_id.as_deref(), Some("P777"));
        assert_eq!(event.sender_id, "U555");
        assert_eq!(event.reply_to, "U555");
        assert_eq!(event.text, "hi there");
    }

    #[test]
    fn non_page_echo_and_empty_messages_are_skipped() {
        let adapter = adapter();

        let mut payload = page_payload();
        payload["object"] = json!("instagram");
        assert!(adapter.extract_events(&payload).is_empty());

        let mut payload = page_payload();
        payload["entry"][0]["messaging"][0]["message"]["is_echo"] = json!(true);
        assert!(adapter.extract_events(&payload).is_empty());

        let mut payload = page_payload();
        payload["entry"][0]["messaging"][0]["message"]["text"] = json!("   ");
        assert!(adapter.extract_events(&payload).is_empty());
    }

    #[tokio::test]
    async fn prepare_falls_back_to_single_page_credentials() {
        let adapter = adapter();
        let events = adapter.extract_events(&page_payload());
        let dispatch = adapter.prepare(&events[0]).await.unwrap().unwrap();
        assert_eq!(dispatch.delivery.org_id, "org_fb");
        assert_eq!(dispatch.delivery.connected_account_id, "ca_fb");
        assert_eq!(dispatch.delivery.scope_id, "P777");
        assert_eq!(dispatch.delivery.recipient, "U555");
    }

    #[tokio::test]
    async fn prepare_drops_unknown_pages_without_fallback() {
        let adapter = FacebookAdapter::new(
            BrokerClient::new("key".to_string(), "http://broker.invalid".to_string()),
            Arc::new(AccountCache::new(Arc::new(EmptyStore))),
            Some("verify-me".to_string()),
            None,
            None,
            None,
        );
        let events = adapter.extract_events(&page_payload());
        assert!(adapter.prepare(&events[0]).await.unwrap().is_none());
    }

    #[test]
    fn verify_checks_hub_signature_only_when_configured() {
        let adapter = adapter();
        let request = WebhookRequest::new(b"{}".to_vec());
        assert_eq!(adapter.verify(&request, 0), Ok(()));

        let signed = FacebookAdapter::new(
            BrokerClient::new("key".to_string(), "http://broker.invalid".to_string()),
            Arc::new(AccountCache::new(Arc::new(EmptyStore))),
            None,
            Some("app-secret".to_string()),
            None,
            None,
        );
        assert_eq!(
            signed.verify(&WebhookRequest::new(b"{}".to_vec()), 0),
            Err(VerifyError::MissingHeaders)
        );
    }
}
