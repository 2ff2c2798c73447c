//! Account-mapping stores.
//!
//! A mapping entry translates a platform scope identifier (Slack team id,
//! Facebook page id) into the broker credentials needed to send on that
//! account's behalf. Two backends exist: a flat JSON file and a PostgREST
//! table. The bridge consumes them through [`AccountStore`] and, at event
//! time, through the TTL [`cache::AccountCache`] in front.

pub mod cache;
pub mod postgrest;
pub mod sync;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::error;

pub use cache::AccountCache;
pub use postgrest::PostgrestStore;

#[derive(Debug, Error)]
pub enum AccountStoreError {
    #[error("store I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("store parse error: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("store network error: {0}")]
    Network(String),
    #[error("store returned {status}: {body}")]
    Status { status: u16, body: String },
}

/// One account mapping: scope id → broker credentials plus auxiliary ids.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AccountRecord {
    pub scope_id: String,
    pub org_id: String,
    pub connected_account_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auth_config_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bot_user_id: Option<String>,
}

/// Point-lookup source of account mappings. The bridge only ever loads the
/// whole mapping (it is small) and upserts by scope id; it never deletes.
#[async_trait]
pub trait AccountStore: Send + Sync {
    async fn load_all(&self) -> Result<HashMap<String, AccountRecord>, AccountStoreError>;
    async fn upsert_many(&self, records: &[AccountRecord]) -> Result<usize, AccountStoreError>;
}

/// Entry shape inside the JSON mapping file; the scope id is the map key.
#[derive(Debug, Serialize, Deserialize)]
struct JsonAccountEntry {
    #[serde(default)]
    org_id: String,
    #[serde(default)]
    connected_account_id: String,
    #[serde(default)]
    auth_config_id: Option<String>,
    #[serde(default)]
    bot_user_id: Option<String>,
}

/// Flat JSON file keyed by scope id. A missing file reads as an empty
/// mapping; upserts merge into the existing content and rewrite the file.
pub struct JsonFileStore {
    path: PathBuf,
}

impl JsonFileStore {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    fn read_entries(path: &Path) -> Result<HashMap<String, JsonAccountEntry>, AccountStoreError> {
        if !path.exists() {
            return Ok(HashMap::new());
        }
        let data = fs::read_to_string(path)?;
        if data.trim().is_empty() {
            return Ok(HashMap::new());
        }
        Ok(serde_json::from_str(&data)?)
    }
}

#[async_trait]
impl AccountStore for JsonFileStore {
    async fn load_all(&self) -> Result<HashMap<String, AccountRecord>, AccountStoreError> {
        let entries = Self::read_entries(&self.path)?;
        Ok(entries
            .into_iter()
            .map(|(scope_id, entry)| {
                let record = AccountRecord {
                    scope_id: scope_id.clone(),
                    org_id: entry.org_id,
                    connected_account_id: entry.connected_account_id,
                    auth_config_id: entry.auth_config_id,
                    bot_user_id: entry.bot_user_id,
                };
                (scope_id, record)
            })
            .collect())
    }

    async fn upsert_many(&self, records: &[AccountRecord]) -> Result<usize, AccountStoreError> {
        if records.is_empty() {
            return Ok(0);
        }
        // Merge with existing content to preserve manually added entries.
        let mut entries = match Self::read_entries(&self.path) {
            Ok(entries) => entries,
            Err(e) => {
                error!(path = %self.path.display(), error = %e, "unreadable mapping file, rewriting");
                HashMap::new()
            }
        };
        for record in records {
            entries.insert(
                record.scope_id.clone(),
                JsonAccountEntry {
                    org_id: record.org_id.clone(),
                    connected_account_id: record.connected_account_id.clone(),
                    auth_config_id: record.auth_config_id.clone(),
                    bot_user_id: record.bot_user_id.clone(),
                },
            );
        }

        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        let data = serde_json::to_string_pretty(&entries)?;
        fs::write(&self.path, data)?;
        Ok(records.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_store_path(tag: &str) -> PathBuf {
        let nanos = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap()
            .as_nanos();
        std::env::temp_dir().join(format!("omnirelay-{}-{}-{}.json", tag, std::process::id(), nanos))
    }

    fn record(scope: &str, account: &str) -> AccountRecord {
        AccountRecord {
            scope_id: scope.to_string(),
            org_id: "org_1".to_string(),
            connected_account_id: account.to_string(),
            auth_config_id: Some("ac_1".to_string()),
            bot_user_id: None,
        }
    }

    #[tokio::test]
    async fn missing_file_reads_as_empty() {
        let store = JsonFileStore::new(temp_store_path("missing"));
        assert!(store.load_all().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn upsert_then_load_round_trips() {
        let path = temp_store_path("roundtrip");
        let store = JsonFileStore::new(path.clone());

        let count = store
            .upsert_many(&[record("T1", "ca_1"), record("T2", "ca_2")])
            .await
            .unwrap();
        assert_eq!(count, 2);

        let mapping = store.load_all().await.unwrap();
        assert_eq!(mapping.len(), 2);
        assert_eq!(mapping["T1"].connected_account_id, "ca_1");

        // Upserting an existing scope replaces it and keeps the rest.
        store.upsert_many(&[record("T1", "ca_9")]).await.unwrap();
        let mapping = store.load_all().await.unwrap();
        assert_eq!(mapping.len(), 2);
        assert_eq!(mapping["T1"].connected_account_id, "ca_9");

        let _ = fs::remove_file(path);
    }

    #[tokio::test]
    async fn empty_upsert_is_a_no_op() {
        let path = temp_store_path("noop");
        let store = JsonFileStore::new(path.clone());
        assert_eq!(store.upsert_many(&[]).await.unwrap(), 0);
        assert!(!path.exists());
    }
}
