//! Telegram polling bridge.
//!
//! Telegram has no inbound webhook here; a loop long-polls the broker's
//! `TELEGRAM_GET_UPDATES` tool with a monotonically increasing offset
//! cursor, feeds each message to the upstream backend, and replies in
//! chunks through `TELEGRAM_SEND_MESSAGE`. The loop sleeps a fixed
//! interval every iteration and never crashes: fetch errors are logged and
//! the next iteration retries implicitly.

use omnirelay_broker::BrokerClient;
use omnirelay_core::chunk::chunk_reply;
use omnirelay_upstream::ChatBackend;
use serde_json::{json, Value};
use std::sync::Arc;
use tokio::time::{sleep, Duration};
use tracing::{error, info, warn};

const GET_UPDATES_TOOL: &str = "TELEGRAM_GET_UPDATES";
const SEND_MESSAGE_TOOL: &str = "TELEGRAM_SEND_MESSAGE";

/// Telegram caps messages at 4096 chars; stay well under it.
const TELEGRAM_CHUNK_LIMIT: usize = 3500;
const UPDATE_BATCH_LIMIT: u32 = 20;
const LONG_POLL_TIMEOUT_SECS: u32 = 30;

pub struct TelegramPoller {
    broker: BrokerClient,
    backend: Arc<dyn ChatBackend>,
    org_id: String,
    connected_account_id: String,
    poll_interval: Duration,
    chunk_delay: Duration,
    default_response: String,
}

impl TelegramPoller {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        broker: BrokerClient,
        backend: Arc<dyn ChatBackend>,
        org_id: String,
        connected_account_id: String,
        poll_interval_secs: u64,
        chunk_delay_ms: u64,
        default_response: String,
    ) -> Self {
        Self {
            broker,
            backend,
            org_id,
            connected_account_id,
            poll_interval: Duration::from_secs(poll_interval_secs.max(1)),
            chunk_delay: Duration::from_millis(chunk_delay_ms),
            default_response,
        }
    }

    pub fn spawn(self: Arc<Self>) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move { self.run().await })
    }

    pub async fn run(&self) {
        info!(interval_secs = self.poll_interval.as_secs(), "Telegram polling loop started");
        let mut offset: Option<i64> = None;
        loop {
            if let Err(e) = self.poll_once(&mut offset).await {
                error!(error = %e, "Telegram polling error");
            }
            sleep(self.poll_interval).await;
        }
    }

    /// One fetch-and-handle pass. Advances the offset cursor past every
    /// handled update so redelivery stops even across handler failures.
    async fn poll_once(&self, offset: &mut Option<i64>) -> anyhow::Result<()> {
        let mut arguments = json!({
            "limit": UPDATE_BATCH_LIMIT,
            "timeout": LONG_POLL_TIMEOUT_SECS,
        });
        if let Some(offset) = offset {
            arguments["offset"] = json!(offset);
        }

        let response = self
            .broker
            .execute_tool(
                GET_UPDATES_TOOL,
                arguments,
                &self.org_id,
                &self.connected_account_id,
            )
            .await?;
        if !response.successful {
            warn!(error = ?response.error, "Telegram get-updates call failed");
            return Ok(());
        }

        let updates = response
            .data
            .get("result")
            .and_then(|v| v.as_array())
            .cloned()
            .unwrap_or_default();

        for update in &updates {
            self.handle_update(update).await;
            if let Some(update_id) = update.get("update_id").and_then(|v| v.as_i64()) {
                *offset = Some(update_id + 1);
            }
        }
        Ok(())
    }

    async fn handle_update(&self, update: &Value) {
        let Some((chat_id, text)) = update_message(update) else {
            info!("skipping update without text/chat_id");
            return;
        };

        info!(chat_id, "received Telegram message");

        let reply = match self.backend.respond(text, None).await {
            Ok(reply) => reply,
            Err(e) => {
                error!(error = %e, "upstream backend failed");
                format!("{}\n\n(Error: {})", self.default_response, e)
            }
        };

        let chunks = chunk_reply(&reply, TELEGRAM_CHUNK_LIMIT);
        let total = chunks.len();
        for (i, chunk) in chunks.iter().enumerate() {
            let arguments = json!({ "chat_id": chat_id, "text": chunk });
            let sent = self
                .broker
                .execute_tool(
                    SEND_MESSAGE_TOOL,
                    arguments,
                    &self.org_id,
                    &self.connected_account_id,
                )
                .await
                .and_then(|r| r.into_data());
            if let Err(e) = sent {
                error!(chat_id, error = %e, "failed to send Telegram reply chunk");
                break;
            }
            if i + 1 < total {
                sleep(self.chunk_delay).await;
            }
        }
    }
}

/// Pull the chat id and text out of an update; both are required.
fn update_message(update: &Value) -> Option<(i64, &str)> {
    let message = update.get("message")?;
    let chat_id = message.get("chat").and_then(|c| c.get("id")).and_then(|v| v.as_i64())?;
    let text = message.get("text").and_then(|v| v.as_str())?;
    Some((chat_id, text))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn update_message_requires_chat_and_text() {
        let update = json!({
            "update_id": 7,
            "message": {"chat": {"id": 12345}, "text": "hello"}
        });
        assert_eq!(update_message(&update), Some((12345, "hello")));

        let no_text = json!({"update_id": 8, "message": {"chat": {"id": 1}}});
        assert_eq!(update_message(&no_text), None);

        let no_message = json!({"update_id": 9, "edited_message": {}});
        assert_eq!(update_message(&no_message), None);
    }

    #[test]
    fn chunk_limit_leaves_margin_under_the_platform_cap() {
        assert!(TELEGRAM_CHUNK_LIMIT < 4096);
    }
}
