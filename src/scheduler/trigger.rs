//! Schedule engine
//!
//! Evaluates a task's [`ScheduleConfig`] once per minute against the local
//! wall clock and drives the task's worker. Within a tick a stop is applied
//! before a start, and matched one-time entries are removed and persisted
//! before the worker is touched so they fire at most once even if acting
//! fails.

use async_trait::async_trait;
use chrono::{Local, NaiveDateTime, Timelike};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, Mutex};
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use super::error::SchedulerResult;
use super::schedule::{ScheduleAction, ScheduleConfig};
use crate::config::SCHEDULE_TICK_SECS;
use crate::metrics;
use crate::storage::ScheduleStore;

// ============================================================================
// Target
// ============================================================================

/// Something the schedule can start and stop
#[async_trait]
pub trait ScheduleTarget: Send + Sync {
    fn task_id(&self) -> u32;

    fn is_running(&self) -> bool;

    async fn start(&self) -> SchedulerResult<()>;

    async fn stop(&self);
}

// ============================================================================
// Events
// ============================================================================

/// Action applied by the engine
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScheduleEvent {
    pub task_id: u32,
    pub action: ScheduleAction,
    pub at: NaiveDateTime,
}

/// What one tick did
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TickOutcome {
    pub stopped: bool,
    pub started: bool,
    /// One-time entries fired this tick
    pub consumed: usize,
    /// One-time entries dropped because their minute had passed
    pub expired: usize,
}

// ============================================================================
// Schedule Engine
// ============================================================================

pub struct ScheduleEngine {
    task_id: u32,
    config: Mutex<ScheduleConfig>,
    store: Arc<dyn ScheduleStore>,
    target: Arc<dyn ScheduleTarget>,
    tick_lock: Mutex<()>,
    shutdown: CancellationToken,
    event_tx: broadcast::Sender<ScheduleEvent>,
}

impl ScheduleEngine {
    pub fn new(
        config: ScheduleConfig,
        store: Arc<dyn ScheduleStore>,
        target: Arc<dyn ScheduleTarget>,
    ) -> Self {
        let (event_tx, _) = broadcast::channel(32);
        Self {
            task_id: target.task_id(),
            config: Mutex::new(config),
            store,
            target,
            tick_lock: Mutex::new(()),
            shutdown: CancellationToken::new(),
            event_tx,
        }
    }

    /// Build an engine from the persisted schedule, falling back to an empty
    /// one if it cannot be read
    pub async fn load(store: Arc<dyn ScheduleStore>, target: Arc<dyn ScheduleTarget>) -> Self {
        let task_id = target.task_id();
        let config = match store.load_schedule(task_id).await {
            Ok(config) => config,
            Err(e) => {
                tracing::warn!(task = task_id, "Failed to load schedule, starting with an empty one: {}", e);
                ScheduleConfig::default()
            }
        };
        Self::new(config, store, target)
    }

    pub fn task_id(&self) -> u32 {
        self.task_id
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ScheduleEvent> {
        self.event_tx.subscribe()
    }

    pub async fn config(&self) -> ScheduleConfig {
        self.config.lock().await.clone()
    }

    /// Apply `edit` to the schedule and persist the result
    pub async fn update<F, R>(&self, edit: F) -> SchedulerResult<R>
    where
        F: FnOnce(&mut ScheduleConfig) -> SchedulerResult<R>,
    {
        let mut config = self.config.lock().await;
        let mut updated = config.clone();
        let result = edit(&mut updated)?;
        self.store.save_schedule(self.task_id, &updated).await?;
        *config = updated;
        Ok(result)
    }

    /// Evaluate the current local minute
    pub async fn tick(&self) -> TickOutcome {
        self.tick_at(Local::now().naive_local()).await
    }

    /// Evaluate the minute containing `now` and act on it
    pub async fn tick_at(&self, now: NaiveDateTime) -> TickOutcome {
        let _tick = self.tick_lock.lock().await;
        let mut outcome = TickOutcome::default();

        let matched = {
            let mut config = self.config.lock().await;
            if !config.use_schedule {
                return outcome;
            }

            let matched = config.evaluate(now);
            if matched.consumes_entries() {
                for entry in matched.expired.iter().map(|&i| &config.one_time_actions[i]) {
                    tracing::warn!(
                        task = self.task_id,
                        at = %entry.at,
                        action = %entry.action,
                        "Dropping one-time schedule entry whose time has passed"
                    );
                }

                let mut indices = matched.one_time.clone();
                indices.extend(&matched.expired);
                config.remove_one_time(&indices);

                if let Err(e) = self.store.save_schedule(self.task_id, &config).await {
                    tracing::error!(task = self.task_id, "Failed to persist consumed schedule entries: {}", e);
                }
                outcome.consumed = matched.one_time.len();
                outcome.expired = matched.expired.len();
            }
            matched
        };

        if matched.stop && self.target.is_running() {
            tracing::info!(task = self.task_id, at = %now.format("%H:%M"), "Schedule stopping worker");
            self.target.stop().await;
            outcome.stopped = true;
            self.announce(ScheduleAction::Stop, now);
        }

        if matched.start && !self.target.is_running() {
            tracing::info!(task = self.task_id, at = %now.format("%H:%M"), "Schedule starting worker");
            match self.target.start().await {
                Ok(()) => {
                    outcome.started = true;
                    self.announce(ScheduleAction::Start, now);
                }
                Err(e) => {
                    tracing::error!(task = self.task_id, "Scheduled start failed: {}", e);
                }
            }
        }

        outcome
    }

    fn announce(&self, action: ScheduleAction, at: NaiveDateTime) {
        metrics::record_schedule_action(self.task_id, &action.to_string().to_lowercase());
        let _ = self.event_tx.send(ScheduleEvent {
            task_id: self.task_id,
            action,
            at,
        });
    }

    /// Time until the next local minute boundary
    pub fn duration_until_next_minute() -> Duration {
        let now = Local::now();
        let elapsed_ms = u64::from(now.second()) * 1000 + u64::from(now.nanosecond() / 1_000_000);
        Duration::from_millis(60_000u64.saturating_sub(elapsed_ms).max(1))
    }

    /// Run the minute loop until [`shutdown`](Self::shutdown) is called
    pub fn spawn(self: &Arc<Self>) -> JoinHandle<()> {
        let engine = self.clone();
        let shutdown = self.shutdown.clone();

        tokio::spawn(async move {
            let wait = Self::duration_until_next_minute();
            tracing::debug!(task = engine.task_id, ?wait, "Schedule engine waiting for next minute");

            tokio::select! {
                _ = tokio::time::sleep(wait) => {}
                _ = shutdown.cancelled() => return,
            }

            let mut ticker = interval(Duration::from_secs(SCHEDULE_TICK_SECS));
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        engine.tick().await;
                    }
                    _ = shutdown.cancelled() => {
                        tracing::debug!(task = engine.task_id, "Schedule engine shutting down");
                        break;
                    }
                }
            }
        })
    }

    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }
}

// ============================================================================
// Tests
// ============================================================================
