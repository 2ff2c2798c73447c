use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::platform::{PLATFORM_FACEBOOK, PLATFORM_INSTAGRAM, PLATFORM_SLACK, PLATFORM_TELEGRAM};

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct AppConfig {
    #[serde(default)]
    pub server: ServerConfig,
    pub upstream: Option<UpstreamConfig>,
    pub broker: Option<BrokerConfig>,
    pub slack: Option<SlackConfig>,
    pub facebook: Option<FacebookConfig>,
    pub instagram: Option<InstagramConfig>,
    pub telegram: Option<TelegramConfig>,
    #[serde(default)]
    pub accounts: AccountsConfig,
    #[serde(default)]
    pub dispatch: DispatchConfig,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            port: default_port(),
        }
    }
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct UpstreamConfig {
    /// Chat backend endpoint the bridge forwards message text to.
    pub url: String,
    #[serde(default = "default_upstream_timeout_secs")]
    pub timeout_secs: u64,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct BrokerConfig {
    pub api_key: String,
    /// Org/user scope the broker executes tool calls under when an account
    /// mapping does not carry its own.
    pub user_id: String,
    #[serde(default = "default_broker_base_url")]
    pub base_url: String,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct SlackConfig {
    /// Request-signing secret. Unset skips signature verification (insecure
    /// fallback for local setups).
    pub signing_secret: Option<String>,
    /// Fallback bot user id for mappings that don't record one.
    pub bot_user_id: Option<String>,
    pub default_response: Option<String>,
    #[serde(default = "default_sync_interval_secs")]
    pub sync_interval_secs: u64,
    #[serde(default = "default_slack_toolkit")]
    pub toolkit: String,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct FacebookConfig {
    pub verify_token: Option<String>,
    pub app_secret: Option<String>,
    /// Single-page fallback credentials when the page isn't in the mapping
    /// file.
    pub org_id: Option<String>,
    pub connected_account_id: Option<String>,
    #[serde(default = "default_facebook_accounts_path")]
    pub accounts_path: PathBuf,
    pub default_response: Option<String>,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct InstagramConfig {
    pub verify_token: Option<String>,
    pub org_id: Option<String>,
    pub connected_account_id: Option<String>,
    pub default_response: Option<String>,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct TelegramConfig {
    pub connected_account_id: String,
    /// Overrides broker.user_id for Telegram tool calls.
    pub org_id: Option<String>,
    #[serde(default = "default_poll_interval_secs")]
    pub poll_interval_secs: u64,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct AccountsConfig {
    /// "json" (flat file) or "postgrest" (relational table over REST).
    #[serde(default = "default_accounts_backend")]
    pub backend: String,
    #[serde(default = "default_accounts_path")]
    pub path: PathBuf,
    pub url: Option<String>,
    pub service_key: Option<String>,
    #[serde(default = "default_accounts_table")]
    pub table: String,
    #[serde(default = "default_cache_ttl_secs")]
    pub cache_ttl_secs: u64,
}

impl Default for AccountsConfig {
    fn default() -> Self {
        Self {
            backend: default_accounts_backend(),
            path: default_accounts_path(),
            url: None,
            service_key: None,
            table: default_accounts_table(),
            cache_ttl_secs: default_cache_ttl_secs(),
        }
    }
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct DispatchConfig {
    /// Apology text used when the upstream backend fails or times out.
    #[serde(default = "default_response_text")]
    pub default_response: String,
    /// Fixed pause between consecutive chunks of one reply.
    #[serde(default = "default_chunk_delay_ms")]
    pub chunk_delay_ms: u64,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            default_response: default_response_text(),
            chunk_delay_ms: default_chunk_delay_ms(),
        }
    }
}

fn default_bind() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8080
}

fn default_upstream_timeout_secs() -> u64 {
    25
}

fn default_broker_base_url() -> String {
    "https://backend.composio.dev".to_string()
}

fn default_sync_interval_secs() -> u64 {
    300
}

fn default_slack_toolkit() -> String {
    "SLACKBOT".to_string()
}

fn default_facebook_accounts_path() -> PathBuf {
    PathBuf::from("facebook_accounts.json")
}

fn default_poll_interval_secs() -> u64 {
    2
}

fn default_accounts_backend() -> String {
    "json".to_string()
}

fn default_accounts_path() -> PathBuf {
    PathBuf::from("slack_accounts.json")
}

fn default_accounts_table() -> String {
    "slack_accounts".to_string()
}

fn default_cache_ttl_secs() -> u64 {
    60
}

fn default_response_text() -> String {
    "Hi! I'm still connecting. Please try again later.".to_string()
}

fn default_chunk_delay_ms() -> u64 {
    400
}

impl AppConfig {
    pub fn load(custom_path: Option<PathBuf>) -> Result<Self, ConfigError> {
        let config_path = if let Some(path) = custom_path {
            path
        } else {
            let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
            PathBuf::from(home).join(".omnirelay/config.json")
        };

        let s = Config::builder()
            .add_source(File::from(config_path).required(false))
            // Environment variables (OMNIRELAY_SLACK__SIGNING_SECRET, ...)
            .add_source(Environment::with_prefix("OMNIRELAY").separator("__"))
            .build()?;

        s.try_deserialize()
    }

    /// Names of the platforms with a configured section.
    pub fn configured_platforms(&self) -> Vec<&'static str> {
        let mut platforms = Vec::new();
        if self.slack.is_some() {
            platforms.push(PLATFORM_SLACK);
        }
        if self.facebook.is_some() {
            platforms.push(PLATFORM_FACEBOOK);
        }
        if self.instagram.is_some() {
            platforms.push(PLATFORM_INSTAGRAM);
        }
        if self.telegram.is_some() {
            platforms.push(PLATFORM_TELEGRAM);
        }
        platforms
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_fill_missing_sections() {
        let config: AppConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(config.server.port, 8080);
        assert_eq!(config.accounts.backend, "json");
        assert_eq!(config.accounts.cache_ttl_secs, 60);
        assert_eq!(config.dispatch.chunk_delay_ms, 400);
        assert!(config.dispatch.default_response.contains("still connecting"));
        assert!(config.configured_platforms().is_empty());
    }

    #[test]
    fn configured_platforms_follow_sections() {
        let raw = r#"{
            "slack": { "signing_secret": "s3cr3t" },
            "telegram": { "connected_account_id": "ca_123" }
        }"#;
        let config: AppConfig = serde_json::from_str(raw).unwrap();
        assert_eq!(config.configured_platforms(), vec!["slack", "telegram"]);
        let slack = config.slack.unwrap();
        assert_eq!(slack.sync_interval_secs, 300);
        assert_eq!(slack.toolkit, "SLACKBOT");
        let telegram = config.telegram.unwrap();
        assert_eq!(telegram.poll_interval_secs, 2);
    }
}
