//! Relational account store reached over a PostgREST-style API
//! (Supabase-compatible): full-table select for loads, merge-duplicates
//! upsert keyed on the scope column.

use crate::{AccountRecord, AccountStore, AccountStoreError};
use async_trait::async_trait;
use reqwest::Client;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::time::Duration;
use tracing::debug;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(15);

pub struct PostgrestStore {
    base_url: String,
    service_key: String,
    table: String,
    scope_column: String,
    client: Client,
}

impl PostgrestStore {
    pub fn new(base_url: String, service_key: String, table: String) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            service_key,
            table,
            scope_column: "team_id".to_string(),
            client: Client::new(),
        }
    }

    /// Override the column holding the scope id (default `team_id`).
    pub fn with_scope_column(mut self, column: &str) -> Self {
        self.scope_column = column.to_string();
        self
    }

    fn table_url(&self) -> String {
        format!("{}/rest/v1/{}", self.base_url, self.table)
    }

    fn record_from_row(&self, row: &Value) -> Option<AccountRecord> {
        let scope_id = row.get(&self.scope_column)?.as_str()?.to_string();
        if scope_id.is_empty() {
            return None;
        }
        Some(AccountRecord {
            scope_id,
            org_id: str_field(row, "org_id"),
            connected_account_id: str_field(row, "connected_account_id"),
            auth_config_id: opt_field(row, "auth_config_id"),
            bot_user_id: opt_field(row, "bot_user_id"),
        })
    }

    fn row_from_record(&self, record: &AccountRecord) -> Value {
        let mut row = serde_json::Map::new();
        row.insert(self.scope_column.clone(), json!(record.scope_id));
        row.insert("org_id".to_string(), json!(record.org_id));
        row.insert(
            "connected_account_id".to_string(),
            json!(record.connected_account_id),
        );
        row.insert(
            "auth_config_id".to_string(),
            json!(record.auth_config_id.clone().unwrap_or_default()),
        );
        if let Some(bot_user_id) = &record.bot_user_id {
            row.insert("bot_user_id".to_string(), json!(bot_user_id));
        }
        Value::Object(row)
    }
}

fn str_field(row: &Value, key: &str) -> String {
    row.get(key).and_then(|v| v.as_str()).unwrap_or_default().to_string()
}

fn opt_field(row: &Value, key: &str) -> Option<String> {
    row.get(key)
        .and_then(|v| v.as_str())
        .filter(|s| !s.is_empty())
        .map(|s| s.to_string())
}

#[async_trait]
impl AccountStore for PostgrestStore {
    async fn load_all(&self) -> Result<HashMap<String, AccountRecord>, AccountStoreError> {
        let res = self
            .client
            .get(self.table_url())
            .timeout(REQUEST_TIMEOUT)
            .query(&[("select", "*")])
            .header("apikey", &self.service_key)
            .bearer_auth(&self.service_key)
            .send()
            .await
            .map_err(|e| AccountStoreError::Network(e.to_string()))?;

        let status = res.status();
        if !status.is_success() {
            let body = res.text().await.unwrap_or_default();
            return Err(AccountStoreError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let rows: Vec<Value> = res
            .json()
            .await
            .map_err(|e| AccountStoreError::Network(e.to_string()))?;

        let mapping: HashMap<String, AccountRecord> = rows
            .iter()
            .filter_map(|row| self.record_from_row(row))
            .map(|record| (record.scope_id.clone(), record))
            .collect();

        debug!(table = %self.table, entries = mapping.len(), "loaded account mapping");
        Ok(mapping)
    }

    async fn upsert_many(&self, records: &[AccountRecord]) -> Result<usize, AccountStoreError> {
        if records.is_empty() {
            return Ok(0);
        }
        let rows: Vec<Value> = records.iter().map(|r| self.row_from_record(r)).collect();

        let res = self
            .client
            .post(self.table_url())
            .timeout(REQUEST_TIMEOUT)
            .query(&[("on_conflict", self.scope_column.as_str())])
            .header("apikey", &self.service_key)
            .bearer_auth(&self.service_key)
            .header("prefer", "resolution=merge-duplicates,return=minimal")
            .json(&rows)
            .send()
            .await
            .map_err(|e| AccountStoreError::Network(e.to_string()))?;

        let status = res.status();
        if !status.is_success() {
            let body = res.text().await.unwrap_or_default();
            return Err(AccountStoreError::Status {
                status: status.as_u16(),
                body,
            });
        }

        Ok(records.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rows_map_to_records_and_back() {
        let store = PostgrestStore::new(
            "https://example.supabase.co".to_string(),
            "service-key".to_string(),
            "slack_accounts".to_string(),
        );

        let row = json!({
            "team_id": "T123",
            "org_id": "org_1",
            "connected_account_id": "ca_1",
            "auth_config_id": "ac_1",
            "bot_user_id": "U42"
        });
        let record = store.record_from_row(&row).unwrap();
        assert_eq!(record.scope_id, "T123");
        assert_eq!(record.bot_user_id.as_deref(), Some("U42"));

        let back = store.row_from_record(&record);
        assert_eq!(back["team_id"], "T123");
        assert_eq!(back["bot_user_id"], "U42");
    }

    #[test]
    fn rows_without_scope_are_dropped() {
        let store = PostgrestStore::new(
            "https://example.supabase.co".to_string(),
            "service-key".to_string(),
            "slack_accounts".to_string(),
        );
        assert!(store.record_from_row(&json!({"org_id": "org_1"})).is_none());
        assert!(store.record_from_row(&json!({"team_id": ""})).is_none());
    }
}
