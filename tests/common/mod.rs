//! Common test utilities

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use dropler::account::AccountRecord;
use dropler::config::WorkerSettings;
use dropler::scheduler::{AccountWorker, DropRegistry, WorkerDeps};
use dropler::session::dry_run::DryRunCounters;
use dropler::session::DryRunSessions;
use dropler::stats::FileStatistics;
use dropler::storage::MemoryStore;

pub const TASK: u32 = 1;

/// Settings with a short shutdown bound and timers that stay quiet during a test
pub fn test_settings(parallel_limit: usize) -> WorkerSettings {
    WorkerSettings {
        parallel_limit,
        start_spacing_secs: 10,
        pause_between_runs_minutes: 90,
        session_duration_minutes: 80,
        check_interval_minutes: 10,
        shutdown_timeout_secs: 1,
    }
}

/// Enabled account with auth material
pub fn ready_account(name: &str) -> AccountRecord {
    AccountRecord::new(name)
        .with_password("pw")
        .with_shared_secret("c2VjcmV0")
}

/// A worker wired to in-memory collaborators
pub struct Harness {
    pub store: Arc<MemoryStore>,
    pub stats: Arc<FileStatistics>,
    pub registry: Arc<DropRegistry>,
    pub counters: Arc<DryRunCounters>,
    pub worker: AccountWorker,
}

impl Harness {
    pub async fn new(accounts: Vec<AccountRecord>, sessions: DryRunSessions, settings: WorkerSettings) -> Self {
        let store = Arc::new(MemoryStore::new());
        for account in accounts {
            store.insert_account(TASK, account).await;
        }
        Self::with_store(store, sessions, settings)
    }

    pub fn with_store(store: Arc<MemoryStore>, sessions: DryRunSessions, settings: WorkerSettings) -> Self {
        let stats = Arc::new(FileStatistics::in_memory());
        let registry = Arc::new(DropRegistry::new(store.clone()));
        let counters = sessions.counters();
        let worker = AccountWorker::new(
            TASK,
            settings,
            WorkerDeps {
                store: store.clone(),
                sessions: Arc::new(sessions),
                stats: stats.clone(),
                registry: registry.clone(),
            },
        );
        Self {
            store,
            stats,
            registry,
            counters,
            worker,
        }
    }
}

const POLL: Duration = Duration::from_millis(10);
const ATTEMPTS: usize = 200;

pub async fn wait_until_active(worker: &AccountWorker, count: usize) -> bool {
    for _ in 0..ATTEMPTS {
        if worker.active_count().await == count {
            return true;
        }
        tokio::time::sleep(POLL).await;
    }
    false
}

pub async fn wait_until_in_flight(worker: &AccountWorker, count: usize) -> bool {
    for _ in 0..ATTEMPTS {
        if worker.in_flight().await == count {
            return true;
        }
        tokio::time::sleep(POLL).await;
    }
    false
}

pub async fn wait_until_account<P>(worker: &AccountWorker, name: &str, predicate: P) -> bool
where
    P: Fn(&AccountRecord) -> bool,
{
    for _ in 0..ATTEMPTS {
        if worker.account(name).await.is_some_and(|a| predicate(&a)) {
            return true;
        }
        tokio::time::sleep(POLL).await;
    }
    false
}

pub async fn wait_until_drops(stats: &FileStatistics, account: &str, count: u64) -> bool {
    for _ in 0..ATTEMPTS {
        if stats
            .get(account)
            .await
            .is_some_and(|s| s.total_drops_count == count)
        {
            return true;
        }
        tokio::time::sleep(POLL).await;
    }
    false
}
