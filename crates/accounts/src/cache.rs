//! TTL cache in front of an account store.
//!
//! Lookups read whatever the most recent completed refresh produced; a
//! background task refreshes on a fixed interval and keeps the stale map
//! when a refresh fails. Availability wins over freshness.

use crate::{AccountRecord, AccountStore, AccountStoreError};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tokio::time::{interval, Duration};
use tracing::{error, info};

pub struct AccountCache {
    store: Arc<dyn AccountStore>,
    map: RwLock<HashMap<String, AccountRecord>>,
}

impl AccountCache {
    pub fn new(store: Arc<dyn AccountStore>) -> Self {
        Self {
            store,
            map: RwLock::new(HashMap::new()),
        }
    }

    /// Look up delivery credentials for a scope id. `None` covers both an
    /// unknown scope and a cache that never managed to load.
    pub async fn resolve(&self, scope_id: &str) -> Option<AccountRecord> {
        self.map.read().await.get(scope_id).cloned()
    }

    pub async fn len(&self) -> usize {
        self.map.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.map.read().await.is_empty()
    }

    /// Reload the mapping from the store, replacing the cached map only on
    /// success. Readers are never blocked on a refresh in progress.
    pub async fn refresh(&self) -> Result<usize, AccountStoreError> {
        let fresh = self.store.load_all().await?;
        let count = fresh.len();
        *self.map.write().await = fresh;
        Ok(count)
    }

    /// Start the fixed-interval refresh loop. The first tick fires after
    /// one interval; callers wanting warm startup call [`refresh`] first.
    pub fn spawn_refresh_loop(self: Arc<Self>, interval_secs: u64) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            info!(interval_secs, "account cache refresh loop started");
            let mut ticker = interval(Duration::from_secs(interval_secs.max(1)));
            ticker.tick().await; // consume the immediate first tick

            loop {
                ticker.tick().await;
                match self.refresh().await {
                    Ok(count) => info!(entries = count, "refreshed account cache"),
                    Err(e) => {
                        // Keep serving the stale map.
                        error!(error = %e, "account cache refresh failed");
                    }
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicBool, Ordering};

    struct FlakyStore {
        failing: AtomicBool,
    }

    #[async_trait]
    impl AccountStore for FlakyStore {
        async fn load_all(&self) -> Result<HashMap<String, AccountRecord>, AccountStoreError> {
            if self.failing.load(Ordering::SeqCst) {
                return Err(AccountStoreError::Network("connection refused".to_string()));
            }
            let record = AccountRecord {
                scope_id: "T1".to_string(),
                org_id: "org_1".to_string(),
                connected_account_id: "ca_1".to_string(),
                auth_config_id: None,
                bot_user_id: Some("U1".to_string()),
            };
            Ok(HashMap::from([("T1".to_string(), record)]))
        }

        async fn upsert_many(&self, _: &[AccountRecord]) -> Result<usize, AccountStoreError> {
            Ok(0)
        }
    }

    #[tokio::test]
    async fn refresh_populates_and_resolve_reads() {
        let cache = AccountCache::new(Arc::new(FlakyStore {
            failing: AtomicBool::new(false),
        }));
        assert!(cache.resolve("T1").await.is_none());

        assert_eq!(cache.refresh().await.unwrap(), 1);
        let record = cache.resolve("T1").await.unwrap();
        assert_eq!(record.connected_account_id, "ca_1");
        assert!(cache.resolve("T2").await.is_none());
    }

    #[tokio::test]
    async fn failed_refresh_keeps_the_stale_map() {
        let store = Arc::new(FlakyStore {
            failing: AtomicBool::new(false),
        });
        let cache = AccountCache::new(store.clone());
        cache.refresh().await.unwrap();

        store.failing.store(true, Ordering::SeqCst);
        assert!(cache.refresh().await.is_err());
        // Stale entry still resolves.
        assert!(cache.resolve("T1").await.is_some());
    }
}
