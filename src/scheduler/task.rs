//! Task management
//!
//! A task bundles one [`AccountWorker`] with the [`ScheduleEngine`] that
//! drives it. The [`TaskManager`] opens, creates and deletes tasks and starts
//! or stops them all together, staggering starts so tasks do not admit their
//! first accounts in the same instant.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, RwLock};
use tokio::task::JoinHandle;

use super::error::{SchedulerError, SchedulerResult};
use super::registry::DropRegistry;
use super::trigger::ScheduleEngine;
use super::worker::{AccountWorker, StopReport, WorkerDeps};
use crate::config::WorkerSettings;
use crate::session::SessionFactory;
use crate::stats::StatisticsProvider;
use crate::storage::{AccountStore, ScheduleStore};

/// Shared services handed to every task
#[derive(Clone)]
pub struct TaskServices {
    pub accounts: Arc<dyn AccountStore>,
    pub schedules: Arc<dyn ScheduleStore>,
    pub sessions: Arc<dyn SessionFactory>,
    pub statistics: Arc<dyn StatisticsProvider>,
    pub registry: Arc<DropRegistry>,
}

// ============================================================================
// Task
// ============================================================================

pub struct Task {
    id: u32,
    worker: AccountWorker,
    schedule: Arc<ScheduleEngine>,
    schedule_loop: Mutex<Option<JoinHandle<()>>>,
}

impl Task {
    pub fn id(&self) -> u32 {
        self.id
    }

    pub fn worker(&self) -> &AccountWorker {
        &self.worker
    }

    pub fn schedule(&self) -> &Arc<ScheduleEngine> {
        &self.schedule
    }

    /// Stop the schedule loop and the worker
    pub async fn shutdown(&self) -> StopReport {
        self.schedule.shutdown();
        if let Some(handle) = self.schedule_loop.lock().await.take() {
            if let Err(e) = handle.await {
                tracing::warn!(task = self.id, "Schedule loop ended abnormally: {}", e);
            }
        }
        self.worker.stop().await
    }
}

// ============================================================================
// Task Manager
// ============================================================================

pub struct TaskManager {
    services: TaskServices,
    settings: WorkerSettings,
    start_stagger: Duration,
    tasks: RwLock<BTreeMap<u32, Arc<Task>>>,
}

impl TaskManager {
    pub fn new(services: TaskServices, settings: WorkerSettings) -> Self {
        Self {
            services,
            settings,
            start_stagger: Duration::ZERO,
            tasks: RwLock::new(BTreeMap::new()),
        }
    }

    /// Delay between task starts in [`start_all`](Self::start_all)
    pub fn with_start_stagger(mut self, stagger: Duration) -> Self {
        self.start_stagger = stagger;
        self
    }

    /// Open an existing task. Returns the open instance if already open.
    pub async fn open_task(&self, id: u32) -> SchedulerResult<Arc<Task>> {
        if id == 0 {
            return Err(SchedulerError::InvalidTaskId { id });
        }
        if let Some(task) = self.get(id).await {
            return Ok(task);
        }

        let stats = self.services.statistics.for_task(id).await;
        let worker = AccountWorker::new(
            id,
            self.settings.clone(),
            WorkerDeps {
                store: self.services.accounts.clone(),
                sessions: self.services.sessions.clone(),
                stats,
                registry: self.services.registry.clone(),
            },
        );
        let summary = worker.refresh_accounts().await;

        let schedule = Arc::new(
            ScheduleEngine::load(self.services.schedules.clone(), Arc::new(worker.clone())).await,
        );
        let schedule_loop = schedule.spawn();

        let task = Arc::new(Task {
            id,
            worker,
            schedule,
            schedule_loop: Mutex::new(Some(schedule_loop)),
        });

        let mut tasks = self.tasks.write().await;
        if let Some(existing) = tasks.get(&id) {
            // lost a race with another open of the same id
            task.schedule.shutdown();
            return Ok(existing.clone());
        }
        tasks.insert(id, task.clone());
        tracing::info!(task = id, accounts = summary.total, "Task opened");
        Ok(task)
    }

    /// Open a new task under the lowest unused id
    pub async fn create_task(&self) -> SchedulerResult<Arc<Task>> {
        let id = {
            let tasks = self.tasks.read().await;
            (1..u32::MAX)
                .find(|id| !tasks.contains_key(id))
                .ok_or(SchedulerError::InvalidTaskId { id: u32::MAX })?
        };
        self.open_task(id).await
    }

    /// Stop a task and remove it and its persisted data
    pub async fn delete_task(&self, id: u32) -> SchedulerResult<StopReport> {
        let task = self
            .tasks
            .write()
            .await
            .remove(&id)
            .ok_or_else(|| SchedulerError::task_not_found(id))?;

        let report = task.shutdown().await;
        let removed = self.services.registry.unregister_task(id).await;
        self.services.accounts.remove_task(id).await?;

        tracing::info!(task = id, accounts = removed, "Task deleted");
        Ok(report)
    }

    pub async fn get(&self, id: u32) -> Option<Arc<Task>> {
        self.tasks.read().await.get(&id).cloned()
    }

    pub async fn ids(&self) -> Vec<u32> {
        self.tasks.read().await.keys().copied().collect()
    }

    async fn all(&self) -> Vec<Arc<Task>> {
        self.tasks.read().await.values().cloned().collect()
    }

    /// Start every open task's worker. Returns how many started.
    pub async fn start_all(&self) -> usize {
        let mut started = 0;
        for (index, task) in self.all().await.into_iter().enumerate() {
            if index > 0 && !self.start_stagger.is_zero() {
                tokio::time::sleep(self.start_stagger).await;
            }
            match task.worker.start().await {
                Ok(()) => started += 1,
                Err(e) => tracing::error!(task = task.id, "Failed to start worker: {}", e),
            }
        }
        started
    }

    /// Stop every open task's worker
    pub async fn stop_all(&self) -> Vec<(u32, StopReport)> {
        let mut reports = Vec::new();
        for task in self.all().await {
            reports.push((task.id, task.worker.stop().await));
        }
        reports
    }

    /// Stop every task and its schedule loop
    pub async fn shutdown(&self) -> Vec<(u32, StopReport)> {
        let tasks: Vec<Arc<Task>> = std::mem::take(&mut *self.tasks.write().await)
            .into_values()
            .collect();

        let mut reports = Vec::new();
        for task in tasks {
            reports.push((task.id, task.shutdown().await));
        }
        tracing::info!(tasks = reports.len(), "All tasks shut down");
        reports
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::account::AccountRecord;
    use crate::session::DryRunSessions;
    use crate::storage::MemoryStore;

    fn manager(store: Arc<MemoryStore>) -> TaskManager {
        let services = TaskServices {
            accounts: store.clone(),
            schedules: store.clone(),
            sessions: Arc::new(DryRunSessions::new()),
            statistics: store.clone(),
            registry: Arc::new(DropRegistry::new(store)),
        };
        TaskManager::new(services, WorkerSettings::default())
    }

    #[tokio::test]
    async fn test_open_registers_accounts() {
        let store = Arc::new(MemoryStore::new());
        store.insert_account(3, AccountRecord::new("erin")).await;
        let manager = manager(store);

        let task = manager.open_task(3).await.unwrap();
        assert_eq!(task.id(), 3);
        assert_eq!(manager.services.registry.owner_of("erin").await, Some(3));

        let again = manager.open_task(3).await.unwrap();
        assert!(Arc::ptr_eq(&task, &again));
        manager.shutdown().await;
    }

    #[tokio::test]
    async fn test_task_zero_rejected() {
        let manager = manager(Arc::new(MemoryStore::new()));
        assert!(manager.open_task(0).await.is_err());
    }

    #[tokio::test]
    async fn test_create_uses_lowest_free_id() {
        let manager = manager(Arc::new(MemoryStore::new()));
        manager.open_task(1).await.unwrap();
        manager.open_task(3).await.unwrap();

        let created = manager.create_task().await.unwrap();
        assert_eq!(created.id(), 2);
        assert_eq!(manager.ids().await, vec![1, 2, 3]);
        manager.shutdown().await;
    }

    #[tokio::test]
    async fn test_delete_unregisters_and_removes() {
        let store = Arc::new(MemoryStore::new());
        store.insert_account(1, AccountRecord::new("fay")).await;
        let manager = manager(store.clone());
        manager.open_task(1).await.unwrap();

        manager.delete_task(1).await.unwrap();
        assert!(manager.get(1).await.is_none());
        assert_eq!(manager.services.registry.owner_of("fay").await, None);
        assert!(store.account(1, "fay").await.is_none());

        assert!(matches!(
            manager.delete_task(1).await,
            Err(SchedulerError::TaskNotFound { id: 1 })
        ));
    }
}
