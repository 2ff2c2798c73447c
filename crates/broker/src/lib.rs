//! Client for the connected-accounts integration broker.
//!
//! The broker exposes one generic RPC (execute a named tool with JSON
//! arguments, scoped to an org/user id and a connected-account id) plus a
//! listing endpoint for the connected accounts themselves. This crate only
//! knows tool slugs and argument shapes; the platform APIs behind them are
//! the broker's problem.

use reqwest::Client;
use serde::Deserialize;
use serde_json::{json, Value};
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Error)]
pub enum BrokerError {
    #[error("broker network error: {0}")]
    Network(String),
    #[error("broker returned {status}: {body}")]
    Status { status: u16, body: String },
    #[error("failed to decode broker response: {0}")]
    Decode(String),
    #[error("tool execution failed: {0}")]
    Tool(String),
}

/// Result envelope of a tool execution.
#[derive(Debug, Clone, Deserialize)]
pub struct ToolResponse {
    #[serde(default)]
    pub successful: bool,
    #[serde(default)]
    pub data: Value,
    #[serde(default)]
    pub error: Option<String>,
}

impl ToolResponse {
    /// Collapse the envelope into the data payload, mapping an unsuccessful
    /// execution to [`BrokerError::Tool`].
    pub fn into_data(self) -> Result<Value, BrokerError> {
        if self.successful {
            Ok(self.data)
        } else {
            Err(BrokerError::Tool(
                self.error.unwrap_or_else(|| "unknown error".to_string()),
            ))
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct AuthConfigRef {
    pub id: String,
}

/// A linked platform account held by the broker.
#[derive(Debug, Clone, Deserialize)]
pub struct ConnectedAccount {
    pub id: String,
    #[serde(default)]
    pub user_id: String,
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub auth_config: Option<AuthConfigRef>,
    #[serde(default)]
    pub updated_at: String,
    /// Opaque per-toolkit connection state (Slack embeds the team id and
    /// bot user id here).
    #[serde(default)]
    pub state: Value,
}

#[derive(Debug, Deserialize)]
struct AccountPage {
    #[serde(default)]
    items: Vec<ConnectedAccount>,
    #[serde(default)]
    next_cursor: Option<String>,
}

#[derive(Clone)]
pub struct BrokerClient {
    api_key: String,
    base_url: String,
    client: Client,
}

impl BrokerClient {
    pub fn new(api_key: String, base_url: String) -> Self {
        Self {
            api_key,
            base_url: base_url.trim_end_matches('/').to_string(),
            client: Client::new(),
        }
    }

    /// Execute a named tool scoped to an org id and a connected account.
    pub async fn execute_tool(
        &self,
        slug: &str,
        arguments: Value,
        user_id: &str,
        connected_account_id: &str,
    ) -> Result<ToolResponse, BrokerError> {
        let url = format!("{}/api/v3/tools/execute/{}", self.base_url, slug);
        let body = json!({
            "user_id": user_id,
            "connected_account_id": connected_account_id,
            "arguments": arguments,
            "version": "latest",
        });

        debug!(tool = slug, user_id, connected_account_id, "executing broker tool");

        let res = self
            .client
            .post(&url)
            .timeout(REQUEST_TIMEOUT)
            .header("x-api-key", &self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| BrokerError::Network(e.to_string()))?;

        let status = res.status();
        if !status.is_success() {
            let body = res.text().await.unwrap_or_default();
            return Err(BrokerError::Status {
                status: status.as_u16(),
                body,
            });
        }

        res.json::<ToolResponse>()
            .await
            .map_err(|e| BrokerError::Decode(e.to_string()))
    }

    /// List the broker's connected accounts for a toolkit, following
    /// pagination to the end.
    pub async fn list_connected_accounts(
        &self,
        toolkit_slug: &str,
    ) -> Result<Vec<ConnectedAccount>, BrokerError> {
        let url = format!("{}/api/v3/connected_accounts", self.base_url);
        let mut accounts = Vec::new();
        let mut cursor: Option<String> = None;

        loop {
            let mut query: Vec<(&str, String)> =
                vec![("toolkit_slugs", toolkit_slug.to_string())];
            if let Some(c) = &cursor {
                query.push(("cursor", c.clone()));
            }

            let res = self
                .client
                .get(&url)
                .timeout(REQUEST_TIMEOUT)
                .header("x-api-key", &self.api_key)
                .query(&query)
                .send()
                .await
                .map_err(|e| BrokerError::Network(e.to_string()))?;

            let status = res.status();
            if !status.is_success() {
                let body = res.text().await.unwrap_or_default();
                return Err(BrokerError::Status {
                    status: status.as_u16(),
                    body,
                });
            }

            let page: AccountPage = res
                .json()
                .await
                .map_err(|e| BrokerError::Decode(e.to_string()))?;
            accounts.extend(page.items);

            match page.next_cursor.filter(|c| !c.is_empty()) {
                Some(next) => cursor = Some(next),
                None => break,
            }
        }

        Ok(accounts)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tool_response_decodes_with_missing_fields() {
        let resp: ToolResponse = serde_json::from_str("{}").unwrap();
        assert!(!resp.successful);
        assert!(resp.error.is_none());

        let resp: ToolResponse = serde_json::from_str(
            r#"{"successful": true, "data": {"result": []}}"#,
        )
        .unwrap();
        assert!(resp.successful);
        assert_eq!(resp.data["result"], json!([]));
    }

    #[test]
    fn into_data_maps_failures_to_tool_error() {
        let resp: ToolResponse =
            serde_json::from_str(r#"{"successful": false, "error": "rate limited"}"#).unwrap();
        match resp.into_data() {
            Err(BrokerError::Tool(msg)) => assert_eq!(msg, "rate limited"),
            other => panic!("expected tool error, got {:?}", other),
        }
    }

    #[test]
    fn connected_account_decodes_nested_state() {
        let raw = r#"{
            "id": "ca_123",
            "user_id": "org_9",
            "status": "ACTIVE",
            "auth_config": {"id": "ac_5"},
            "updated_at": "2025-11-02T10:00:00Z",
            "state": {"val": {"team": {"id": "T123"}, "bot_user_id": "U99"}}
        }"#;
        let account: ConnectedAccount = serde_json::from_str(raw).unwrap();
        assert_eq!(account.id, "ca_123");
        assert_eq!(account.status, "ACTIVE");
        assert_eq!(account.auth_config.unwrap().id, "ac_5");
        assert_eq!(account.state["val"]["team"]["id"], "T123");
    }
}
