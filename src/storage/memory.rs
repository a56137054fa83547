//! In-process store
//!
//! Keeps everything in memory. Load and save failures can be switched on to
//! exercise the persistence-error paths of the worker.

use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::RwLock;

use super::{AccountStore, DropHistory, ScheduleStore, StoreError, StoreResult};
use crate::account::{normalize_name, parse_credentials, AccountRecord, Credential};
use crate::models::DropEvent;
use crate::scheduler::schedule::ScheduleConfig;
use crate::stats::{FileStatistics, StatisticsProvider, StatisticsSink};

#[derive(Default)]
pub struct MemoryStore {
    accounts: RwLock<HashMap<u32, BTreeMap<String, AccountRecord>>>,
    credentials: RwLock<HashMap<u32, Vec<Credential>>>,
    auth: RwLock<HashMap<(u32, String), String>>,
    schedules: RwLock<HashMap<u32, ScheduleConfig>>,
    drops: RwLock<Vec<DropEvent>>,
    statistics: RwLock<HashMap<u32, Arc<FileStatistics>>>,
    fail_loads: AtomicBool,
    fail_saves: AtomicBool,
    saves: AtomicUsize,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert_account(&self, task_id: u32, record: AccountRecord) {
        self.accounts
            .write()
            .await
            .entry(task_id)
            .or_default()
            .insert(record.key(), record);
    }

    pub async fn account(&self, task_id: u32, name: &str) -> Option<AccountRecord> {
        self.accounts
            .read()
            .await
            .get(&task_id)
            .and_then(|records| records.get(&normalize_name(name)))
            .cloned()
    }

    pub async fn set_credentials(&self, task_id: u32, text: &str) {
        self.credentials
            .write()
            .await
            .insert(task_id, parse_credentials(text));
    }

    pub async fn set_auth_material(&self, task_id: u32, login: &str, secret: &str) {
        self.auth
            .write()
            .await
            .insert((task_id, normalize_name(login)), secret.to_string());
    }

    pub async fn saved_schedule(&self, task_id: u32) -> Option<ScheduleConfig> {
        self.schedules.read().await.get(&task_id).cloned()
    }

    pub async fn drops(&self) -> Vec<DropEvent> {
        self.drops.read().await.clone()
    }

    /// Statistics sink previously handed out for `task_id`
    pub async fn statistics(&self, task_id: u32) -> Option<Arc<FileStatistics>> {
        self.statistics.read().await.get(&task_id).cloned()
    }

    pub fn set_fail_loads(&self, fail: bool) {
        self.fail_loads.store(fail, Ordering::SeqCst);
    }

    pub fn set_fail_saves(&self, fail: bool) {
        self.fail_saves.store(fail, Ordering::SeqCst);
    }

    /// Number of successful record and schedule saves
    pub fn save_count(&self) -> usize {
        self.saves.load(Ordering::SeqCst)
    }

    fn check(&self, flag: &AtomicBool, operation: &str) -> StoreResult<()> {
        if flag.load(Ordering::SeqCst) {
            Err(StoreError::Unavailable(format!("{operation} disabled")))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl AccountStore for MemoryStore {
    async fn load_all(&self, task_id: u32) -> StoreResult<Vec<AccountRecord>> {
        self.check(&self.fail_loads, "load")?;
        Ok(self
            .accounts
            .read()
            .await
            .get(&task_id)
            .map(|records| records.values().cloned().collect())
            .unwrap_or_default())
    }

    async fn save(&self, task_id: u32, record: &AccountRecord) -> StoreResult<()> {
        self.check(&self.fail_saves, "save")?;
        self.insert_account(task_id, record.clone()).await;
        self.saves.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn load_credentials(&self, task_id: u32) -> StoreResult<Vec<Credential>> {
        self.check(&self.fail_loads, "load")?;
        Ok(self
            .credentials
            .read()
            .await
            .get(&task_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn load_auth_material(&self, task_id: u32, login: &str) -> StoreResult<Option<String>> {
        Ok(self
            .auth
            .read()
            .await
            .get(&(task_id, normalize_name(login)))
            .cloned())
    }

    async fn remove_task(&self, task_id: u32) -> StoreResult<()> {
        self.accounts.write().await.remove(&task_id);
        self.credentials.write().await.remove(&task_id);
        self.schedules.write().await.remove(&task_id);
        self.statistics.write().await.remove(&task_id);
        self.auth.write().await.retain(|(id, _), _| *id != task_id);
        Ok(())
    }
}

#[async_trait]
impl ScheduleStore for MemoryStore {
    async fn load_schedule(&self, task_id: u32) -> StoreResult<ScheduleConfig> {
        self.check(&self.fail_loads, "load")?;
        Ok(self
            .schedules
            .read()
            .await
            .get(&task_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn save_schedule(&self, task_id: u32, config: &ScheduleConfig) -> StoreResult<()> {
        self.check(&self.fail_saves, "save")?;
        self.schedules.write().await.insert(task_id, config.clone());
        self.saves.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

#[async_trait]
impl DropHistory for MemoryStore {
    async fn append_drop(&self, event: &DropEvent) -> StoreResult<()> {
        self.check(&self.fail_saves, "append")?;
        self.drops.write().await.push(event.clone());
        Ok(())
    }

    async fn load_drops(&self, account: &str) -> StoreResult<Vec<DropEvent>> {
        let key = normalize_name(account);
        Ok(self
            .drops
            .read()
            .await
            .iter()
            .filter(|event| normalize_name(&event.account_name) == key)
            .cloned()
            .collect())
    }
}

#[async_trait]
impl StatisticsProvider for MemoryStore {
    async fn for_task(&self, task_id: u32) -> Arc<dyn StatisticsSink> {
        let sink = self
            .statistics
            .write()
            .await
            .entry(task_id)
            .or_insert_with(|| Arc::new(FileStatistics::in_memory()))
            .clone();
        sink
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_failure_injection() {
        let store = MemoryStore::new();
        store.set_fail_saves(true);
        assert!(store.save(1, &AccountRecord::new("a")).await.is_err());
        store.set_fail_saves(false);
        assert!(store.save(1, &AccountRecord::new("a")).await.is_ok());
        assert_eq!(store.save_count(), 1);

        store.set_fail_loads(true);
        assert!(store.load_all(1).await.is_err());
    }

    #[tokio::test]
    async fn test_statistics_sink_is_shared_per_task() {
        let store = MemoryStore::new();
        let _ = store.for_task(1).await;
        assert!(store.statistics(1).await.is_some());
        assert!(store.statistics(2).await.is_none());
    }
}
