//! Drop routing across tasks

use std::sync::Arc;

use tokio_test::{assert_err, assert_ok};

use dropler::account::AccountRecord;
use dropler::config::WorkerSettings;
use dropler::scheduler::{DropRegistry, TaskManager, TaskServices};
use dropler::session::{DropReporter, DryRunSessions};
use dropler::storage::{DropHistory, MemoryStore};

fn services(store: Arc<MemoryStore>, registry: Arc<DropRegistry>) -> TaskServices {
    TaskServices {
        accounts: store.clone(),
        schedules: store.clone(),
        sessions: Arc::new(DryRunSessions::new()),
        statistics: store,
        registry,
    }
}

#[tokio::test]
async fn test_drops_route_to_owning_task() {
    let store = Arc::new(MemoryStore::new());
    store.insert_account(1, AccountRecord::new("alpha")).await;
    store.insert_account(2, AccountRecord::new("beta")).await;
    let registry = Arc::new(DropRegistry::new(store.clone()));
    let manager = TaskManager::new(services(store.clone(), registry.clone()), WorkerSettings::default());

    assert_ok!(manager.open_task(1).await);
    assert_ok!(manager.open_task(2).await);

    DropReporter::new(registry.clone(), "alpha").report(730, "7").await;
    DropReporter::new(registry.clone(), "BETA").report(440, "9").await;
    DropReporter::new(registry.clone(), "beta").report(440, "9").await;

    let task1 = store.statistics(1).await.unwrap();
    let task2 = store.statistics(2).await.unwrap();
    assert_eq!(task1.get("alpha").await.unwrap().total_drops_count, 1);
    assert!(task1.get("beta").await.is_none());
    assert_eq!(task2.get("beta").await.unwrap().drops.get("440_9"), Some(&2));

    assert_eq!(assert_ok!(store.load_drops("beta").await).len(), 2);
    manager.shutdown().await;
}

#[tokio::test]
async fn test_drop_after_task_delete_kept_in_history() {
    let store = Arc::new(MemoryStore::new());
    store.insert_account(1, AccountRecord::new("gamma")).await;
    let registry = Arc::new(DropRegistry::new(store.clone()));
    let manager = TaskManager::new(services(store.clone(), registry.clone()), WorkerSettings::default());

    assert_ok!(manager.open_task(1).await);
    assert_ok!(manager.delete_task(1).await);
    assert_err!(manager.delete_task(1).await);

    let event = registry.record_drop("gamma", 570, "3").await;
    assert_eq!(event.stats_key(), "570_3");
    assert_eq!(assert_ok!(store.load_drops("gamma").await), vec![event]);
    assert!(registry.is_empty().await);
}

#[tokio::test]
async fn test_history_failure_still_updates_stats() {
    let store = Arc::new(MemoryStore::new());
    store.insert_account(1, AccountRecord::new("delta")).await;
    let registry = Arc::new(DropRegistry::new(store.clone()));
    let manager = TaskManager::new(services(store.clone(), registry.clone()), WorkerSettings::default());
    assert_ok!(manager.open_task(1).await);

    store.set_fail_saves(true);
    registry.record_drop("delta", 730, "1").await;
    store.set_fail_saves(false);

    let stats = store.statistics(1).await.unwrap();
    assert_eq!(stats.get("delta").await.unwrap().total_drops_count, 1);
    assert!(store.drops().await.is_empty());
    manager.shutdown().await;
}
