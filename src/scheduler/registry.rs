//! Drop registry for routing drop events to their owning worker
//!
//! Maps each account to the task whose worker owns it. A drop is always
//! appended to durable history first, then forwarded to the owner's
//! statistics sink. The registry is constructed once and handed to every
//! worker; there is no process-wide instance.

use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::account::normalize_name;
use crate::metrics;
use crate::models::DropEvent;
use crate::stats::StatisticsSink;
use crate::storage::DropHistory;

// ============================================================================
// Owner Entry
// ============================================================================

#[derive(Clone)]
struct Owner {
    task_id: u32,
    sink: Arc<dyn StatisticsSink>,
}

// ============================================================================
// Drop Registry
// ============================================================================

/// Account → owning task index
pub struct DropRegistry {
    owners: RwLock<HashMap<String, Owner>>,
    history: Arc<dyn DropHistory>,
}

impl DropRegistry {
    pub fn new(history: Arc<dyn DropHistory>) -> Self {
        Self {
            owners: RwLock::new(HashMap::new()),
            history,
        }
    }

    /// Point every listed account at `task_id`.
    ///
    /// An account already owned by another task moves to this one.
    pub async fn register<I, S>(&self, task_id: u32, accounts: I, sink: Arc<dyn StatisticsSink>)
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut owners = self.owners.write().await;
        for account in accounts {
            let key = normalize_name(account.as_ref());
            let previous = owners.insert(
                key.clone(),
                Owner {
                    task_id,
                    sink: sink.clone(),
                },
            );
            if let Some(previous) = previous {
                if previous.task_id != task_id {
                    tracing::warn!(
                        account = %key,
                        from = previous.task_id,
                        to = task_id,
                        "Account ownership moved between tasks"
                    );
                }
            }
        }
    }

    /// Remove every account owned by `task_id`. Returns how many were removed.
    pub async fn unregister_task(&self, task_id: u32) -> usize {
        let mut owners = self.owners.write().await;
        let before = owners.len();
        owners.retain(|_, owner| owner.task_id != task_id);
        before - owners.len()
    }

    pub async fn owner_of(&self, account: &str) -> Option<u32> {
        self.owners
            .read()
            .await
            .get(&normalize_name(account))
            .map(|owner| owner.task_id)
    }

    pub async fn len(&self) -> usize {
        self.owners.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.owners.read().await.is_empty()
    }

    /// Record a drop: append to history, then forward to the owner's sink.
    ///
    /// Never fails. Missing owners and history write failures are logged.
    pub async fn record_drop(&self, account: &str, game_id: u32, item_def_id: &str) -> DropEvent {
        let event = DropEvent::new(account, game_id, item_def_id);

        if let Err(e) = self.history.append_drop(&event).await {
            tracing::error!(account = %account, game_id, item_def_id, "Failed to append drop history: {}", e);
        }

        let owner = self.owners.read().await.get(&normalize_name(account)).cloned();
        match owner {
            Some(owner) => {
                owner.sink.record_drop(&event).await;
                metrics::record_drop(owner.task_id);
                tracing::info!(task = owner.task_id, account = %account, game_id, item_def_id, "Drop recorded");
            }
            None => {
                tracing::error!(
                    account = %account,
                    game_id,
                    item_def_id,
                    "Drop for account with no owning worker; kept in history only"
                );
            }
        }

        event
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stats::FileStatistics;
    use crate::storage::MemoryStore;

    #[tokio::test]
    async fn test_routes_to_owner_sink() {
        let store = Arc::new(MemoryStore::new());
        let registry = DropRegistry::new(store.clone());
        let sink = Arc::new(FileStatistics::in_memory());

        registry.register(1, ["Alice"], sink.clone()).await;
        registry.record_drop("alice", 730, "42").await;

        assert_eq!(sink.get("alice").await.unwrap().total_drops_count, 1);
        assert_eq!(store.drops().await.len(), 1);
    }

    #[tokio::test]
    async fn test_missing_owner_still_records_history() {
        let store = Arc::new(MemoryStore::new());
        let registry = DropRegistry::new(store.clone());

        let event = registry.record_drop("ghost", 730, "1").await;
        assert_eq!(event.account_name, "ghost");
        assert_eq!(store.drops().await, vec![event]);
    }

    #[tokio::test]
    async fn test_reassignment_and_unregister() {
        let store = Arc::new(MemoryStore::new());
        let registry = DropRegistry::new(store);
        let sink_a = Arc::new(FileStatistics::in_memory());
        let sink_b = Arc::new(FileStatistics::in_memory());

        registry.register(1, ["x", "y"], sink_a).await;
        registry.register(2, ["y"], sink_b).await;
        assert_eq!(registry.owner_of("Y").await, Some(2));

        assert_eq!(registry.unregister_task(1).await, 1);
        assert_eq!(registry.owner_of("x").await, None);
        assert_eq!(registry.len().await, 1);
    }
}
