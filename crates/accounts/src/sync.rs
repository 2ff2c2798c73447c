//! Broker → store account synchronization.
//!
//! The broker is the source of truth for which platform accounts are
//! linked; the store is what the event path reads. The sync pass lists the
//! toolkit's connected accounts, keeps the most recently updated ACTIVE
//! account per team, and upserts the result.

use crate::{AccountCache, AccountRecord, AccountStore};
use omnirelay_broker::{BrokerClient, ConnectedAccount};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::time::{interval, Duration};
use tracing::{error, info};

/// Reduce a raw account listing to one record per team: ACTIVE accounts
/// only, bucketed by the team id embedded in the connection state, latest
/// `updated_at` wins.
pub fn pick_latest_accounts(accounts: &[ConnectedAccount]) -> HashMap<String, AccountRecord> {
    let mut buckets: HashMap<String, Vec<&ConnectedAccount>> = HashMap::new();
    for account in accounts {
        if !account.status.eq_ignore_ascii_case("ACTIVE") {
            continue;
        }
        let Some(team_id) = account.state["val"]["team"]["id"].as_str() else {
            continue;
        };
        if team_id.is_empty() {
            continue;
        }
        buckets.entry(team_id.to_string()).or_default().push(account);
    }

    let mut mapping = HashMap::new();
    for (team_id, bucket) in buckets {
        let Some(latest) = bucket.iter().max_by_key(|a| a.updated_at.as_str()) else {
            continue;
        };
        let bot_user_id = latest.state["val"]["bot_user_id"]
            .as_str()
            .filter(|s| !s.is_empty())
            .map(|s| s.to_string());
        mapping.insert(
            team_id.clone(),
            AccountRecord {
                scope_id: team_id,
                org_id: latest.user_id.clone(),
                connected_account_id: latest.id.clone(),
                auth_config_id: latest.auth_config.as_ref().map(|ac| ac.id.clone()),
                bot_user_id,
            },
        );
    }
    mapping
}

/// One sync pass: list, reduce, upsert. Returns the number of records
/// written.
pub async fn sync_accounts(
    broker: &BrokerClient,
    store: &dyn AccountStore,
    toolkit: &str,
) -> anyhow::Result<usize> {
    let accounts = broker.list_connected_accounts(toolkit).await?;
    let mapping = pick_latest_accounts(&accounts);
    if mapping.is_empty() {
        info!(toolkit, "no linked accounts to sync");
        return Ok(0);
    }
    let records: Vec<AccountRecord> = mapping.into_values().collect();
    let count = store.upsert_many(&records).await?;
    info!(toolkit, count, "synced accounts to store");
    Ok(count)
}

/// Background sync loop: sleep the interval, sync, then refresh the cache
/// so the new mappings become visible without waiting for its own TTL.
/// Failures are logged and the loop continues.
pub fn spawn_sync_loop(
    broker: BrokerClient,
    store: Arc<dyn AccountStore>,
    cache: Arc<AccountCache>,
    toolkit: String,
    interval_secs: u64,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        info!(interval_secs, toolkit = %toolkit, "account sync loop started");
        let mut ticker = interval(Duration::from_secs(interval_secs.max(1)));
        ticker.tick().await; // consume the immediate first tick

        loop {
            ticker.tick().await;
            match sync_accounts(&broker, store.as_ref(), &toolkit).await {
                Ok(count) => {
                    if count > 0 {
                        if let Err(e) = cache.refresh().await {
                            error!(error = %e, "cache refresh after sync failed");
                        }
                    }
                }
                Err(e) => error!(error = %e, "account sync failed"),
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn account(id: &str, team: &str, status: &str, updated_at: &str) -> ConnectedAccount {
        serde_json::from_value(json!({
            "id": id,
            "user_id": "org_1",
            "status": status,
            "auth_config": {"id": "ac_1"},
            "updated_at": updated_at,
            "state": {"val": {"team": {"id": team}, "bot_user_id": "U7"}}
        }))
        .unwrap()
    }

    #[test]
    fn latest_active_account_wins_per_team() {
        let accounts = vec![
            account("ca_old", "T1", "ACTIVE", "2025-01-01T00:00:00Z"),
            account("ca_new", "T1", "ACTIVE", "2025-06-01T00:00:00Z"),
            account("ca_other", "T2", "ACTIVE", "2025-03-01T00:00:00Z"),
        ];
        let mapping = pick_latest_accounts(&accounts);
        assert_eq!(mapping.len(), 2);
        assert_eq!(mapping["T1"].connected_account_id, "ca_new");
        assert_eq!(mapping["T1"].bot_user_id.as_deref(), Some("U7"));
        assert_eq!(mapping["T2"].connected_account_id, "ca_other");
    }

    #[test]
    fn inactive_and_teamless_accounts_are_ignored() {
        let mut teamless = account("ca_1", "T1", "ACTIVE", "2025-01-01T00:00:00Z");
        teamless.state = json!({"val": {}});
        let accounts = vec![
            teamless,
            account("ca_2", "T2", "INITIATED", "2025-01-01T00:00:00Z"),
        ];
        assert!(pick_latest_accounts(&accounts).is_empty());
    }
}
