//! Slack events adapter.
//!
//! Listens on the Events API webhook, routes bot mentions to the upstream
//! backend, and replies through the broker's Slackbot toolkit. Workspace
//! credentials are resolved per team id from the account cache.

use async_trait::async_trait;
use omnirelay_accounts::AccountCache;
use omnirelay_broker::BrokerClient;
use omnirelay_core::platform::{PlatformAdapter, WebhookRequest, PLATFORM_SLACK};
use omnirelay_core::types::{Delivery, Dispatch, InboundEvent};
use omnirelay_core::verify::{verify_signed_request, VerifyError};
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::{info, warn};

const SEND_MESSAGE_TOOL: &str = "SLACKBOT_CHAT_POST_MESSAGE";
const EVENT_TYPE_KEY: &str = "event_type";

pub struct SlackAdapter {
    broker: BrokerClient,
    accounts: Arc<AccountCache>,
    signing_secret: Option<String>,
    bot_user_fallback: Option<String>,
}

impl SlackAdapter {
    pub fn new(
        broker: BrokerClient,
        accounts: Arc<AccountCache>,
        signing_secret: Option<String>,
        bot_user_fallback: Option<String>,
    ) -> Self {
        Self {
            broker,
            accounts,
            signing_secret: signing_secret.filter(|s| !s.is_empty()),
            bot_user_fallback: bot_user_fallback.filter(|s| !s.is_empty()),
        }
    }

    fn mention_tag(bot_user_id: &str) -> String {
        format!("<@{}>", bot_user_id)
    }
}

#[async_trait]
impl PlatformAdapter for SlackAdapter {
    fn platform_name(&self) -> &'static str {
        PLATFORM_SLACK
    }

    fn webhook_path(&self) -> &'static str {
        "/slack/events"
    }

    fn handshake_response(&self, payload: &Value) -> Option<Value> {
        if payload.get("type").and_then(|v| v.as_str()) != Some("url_verification") {
            return None;
        }
        let challenge = payload
            .get("challenge")
            .and_then(|v| v.as_str())
            .unwrap_or_default();
        info!("answering Slack URL verification challenge");
        Some(json!({ "challenge": challenge }))
    }

    fn verify(&self, request: &WebhookRequest, now_epoch_secs: i64) -> Result<(), VerifyError> {
        verify_signed_request(
            self.signing_secret.as_deref(),
            request.header("x-slack-request-timestamp"),
            request.header("x-slack-signature"),
            &request.body,
            now_epoch_secs,
        )
    }

    fn extract_events(&self, payload: &Value) -> Vec<InboundEvent> {
        let Some(event) = payload.get("event").filter(|e| e.is_object()) else {
            return Vec::new();
        };

        // Bot-generated updates would loop the bridge onto itself.
        if event.get("bot_id").is_some() {
            info!("ignoring Slack bot event");
            return Vec::new();
        }

        let team_id = payload
            .get("team_id")
            .and_then(|v| v.as_str())
            .or_else(|| event.get("team").and_then(|v| v.as_str()));
        let channel = event.get("channel").and_then(|v| v.as_str());
        let (Some(team_id), Some(channel)) = (team_id, channel) else {
            warn!("Slack event missing team_id/channel");
            return Vec::new();
        };

        let user = event.get("user").and_then(|v| v.as_str()).unwrap_or_default();
        let text = event
            .get("text")
            .and_then(|v| v.as_str())
            .unwrap_or_default()
            .trim();

        let mut inbound = InboundEvent::new(user, channel, text).with_scope(team_id);
        if let Some(id) = payload
            .get("event_id")
            .and_then(|v| v.as_str())
            .or_else(|| event.get("client_msg_id").and_then(|v| v.as_str()))
        {
            inbound = inbound.with_id(id);
        }
        if let Some(thread_ts) = event.get("thread_ts").and_then(|v| v.as_str()) {
            inbound = inbound.with_thread(thread_ts);
        }
        if let Some(event_type) = event.get("type").and_then(|v| v.as_str()) {
            inbound
                .metadata
                .insert(EVENT_TYPE_KEY.to_string(), event_type.to_string());
        }

        vec![inbound]
    }

    async fn prepare(&self, event: &InboundEvent) -> anyhow::Result<Option<Dispatch>> {
        let Some(team_id) = event.scope_id.as_deref() else {
            warn!("Slack event carried no team id");
            return Ok(None);
        };
        let Some(account) = self.accounts.resolve(team_id).await else {
            warn!(team_id, "no account mapping for Slack team; dropping event");
            return Ok(None);
        };

        let bot_user_id = account
            .bot_user_id
            .clone()
            .or_else(|| self.bot_user_fallback.clone())
            .unwrap_or_default();

        if !bot_user_id.is_empty() && event.sender_id == bot_user_id {
            info!(team_id, "ignoring self message");
            return Ok(None);
        }

        let event_type = event
            .metadata
            .get(EVENT_TYPE_KEY)
            .map(|s| s.as_str())
            .unwrap_or_default();
        let tag = Self::mention_tag(&bot_user_id);
        let mentioned = match event_type {
            "app_mention" => true,
            "message" => !bot_user_id.is_empty() && event.text.contains(&tag),
            _ => false,
        };
        if !mentioned {
            info!(team_id, event_type, "event is not a mention; skipping");
            return Ok(None);
        }

        let text = if bot_user_id.is_empty() {
            event.text.clone()
        } else {
            let cleaned = event.text.replace(&tag, "").trim().to_string();
            if cleaned.is_empty() {
                event.text.clone()
            } else {
                cleaned
            }
        };

        Ok(Some(Dispatch {
            delivery: Delivery {
                org_id: account.org_id,
                connected_account_id: account.connected_account_id,
                scope_id: team_id.to_string(),
                recipient: event.reply_to.clone(),
                thread: event.thread.clone(),
            },
            text,
        }))
    }

    async fn send(&self, dispatch: &Dispatch, text: &str) -> anyhow::Result<()> {
        let mut arguments = json!({
            "channel": dispatch.delivery.recipient,
            "text": text,
        });
        if let Some(thread_ts) = &dispatch.delivery.thread {
            arguments["thread_ts"] = json!(thread_ts);
        }

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
        info!(channel = %dispatch.delivery.recipient, "Slack reply sent");
        Ok(())
    }
}
