//! Admission-controlled worker
//!
//! One [`AccountWorker`] owns the accounts of one task. While running it keeps
//! two periodic tasks alive:
//!
//! - **admission tick** (every `start_spacing_secs`): rebuilds the ready queue
//!   and starts at most one session, as long as fewer than `parallel_limit`
//!   sessions are in flight and the spacing since the last start has elapsed
//! - **reconciliation tick** (every 10s): recomputes the active count from the
//!   accounts flagged `idle_now` and corrects drift
//!
//! Each admitted account gets its own session task holding a child of the
//! worker's cancellation token. `stop()` cancels the parent, waits a bounded
//! time for disconnects, then resets every account regardless of how the
//! disconnects went.
//!
//! Lock order is `accounts` → `active`. The ready queue has its own lock and
//! is never held together with `active`.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::future::join_all;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Duration, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use super::error::{SchedulerError, SchedulerResult};
use super::registry::DropRegistry;
use super::trigger::ScheduleTarget;
use crate::account::queue::eligible_order;
use crate::account::{normalize_name, AccountRecord, AccountState, ReadyQueue, ACTION_CONNECTING};
use crate::config::{WorkerSettings, RECONCILE_INTERVAL_SECS};
use crate::metrics;
use crate::models::OnlineStatus;
use crate::session::{DropReporter, SessionClient, SessionFactory, SessionOutcome, SessionResult};
use crate::stats::StatisticsSink;
use crate::storage::AccountStore;

// ============================================================================
// Dependencies and Reports
// ============================================================================

/// Collaborators injected into a worker
#[derive(Clone)]
pub struct WorkerDeps {
    pub store: Arc<dyn AccountStore>,
    pub sessions: Arc<dyn SessionFactory>,
    pub stats: Arc<dyn StatisticsSink>,
    pub registry: Arc<DropRegistry>,
}

/// Summary of a `stop()` call
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StopReport {
    /// Accounts whose transient flags were reset
    pub accounts_reset: usize,
    /// Disconnects that returned an error or panicked
    pub disconnect_failures: usize,
    /// The bounded wait expired before every disconnect finished
    pub timed_out: bool,
}

/// Summary of an account refresh
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RefreshSummary {
    pub loaded: usize,
    pub added: usize,
    pub created_from_credentials: usize,
    pub total: usize,
}

// ============================================================================
// Internal State
// ============================================================================

struct ActiveSession {
    session_id: Uuid,
    client: Arc<dyn SessionClient>,
}

/// Active count and in-flight sessions, guarded together
#[derive(Default)]
struct ActiveSessions {
    count: usize,
    sessions: HashMap<String, ActiveSession>,
}

impl ActiveSessions {
    fn in_flight(&self) -> usize {
        self.count.max(self.sessions.len())
    }
}

#[derive(Debug, Clone, Copy)]
enum Tick {
    Admission,
    Reconcile,
}

struct WorkerInner {
    task_id: u32,
    settings: RwLock<WorkerSettings>,
    accounts: RwLock<BTreeMap<String, AccountRecord>>,
    active: Mutex<ActiveSessions>,
    queue: ReadyQueue,
    running: AtomicBool,
    cancel: RwLock<CancellationToken>,
    timers: Mutex<Vec<JoinHandle<()>>>,
    transition: Mutex<()>,
    last_admission: Mutex<Option<Instant>>,
    last_pause_notice: Mutex<Option<i64>>,
    deps: WorkerDeps,
}

// ============================================================================
// Account Worker
// ============================================================================

/// Admission scheduler for one task
#[derive(Clone)]
pub struct AccountWorker {
    inner: Arc<WorkerInner>,
}

impl AccountWorker {
    pub fn new(task_id: u32, settings: WorkerSettings, deps: WorkerDeps) -> Self {
        Self {
            inner: Arc::new(WorkerInner {
                task_id,
                settings: RwLock::new(settings),
                accounts: RwLock::new(BTreeMap::new()),
                active: Mutex::new(ActiveSessions::default()),
                queue: ReadyQueue::new(),
                running: AtomicBool::new(false),
                cancel: RwLock::new(CancellationToken::new()),
                timers: Mutex::new(Vec::new()),
                transition: Mutex::new(()),
                last_admission: Mutex::new(None),
                last_pause_notice: Mutex::new(None),
                deps,
            }),
        }
    }

    pub fn task_id(&self) -> u32 {
        self.inner.task_id
    }

    pub fn is_running(&self) -> bool {
        self.inner.running.load(Ordering::SeqCst)
    }

    pub async fn settings(&self) -> WorkerSettings {
        self.inner.settings.read().await.clone()
    }

    /// Replace settings; they are clamped on the next `start()`
    pub async fn update_settings(&self, settings: WorkerSettings) {
        *self.inner.settings.write().await = settings;
    }

    /// Load accounts from the store and the credential list
    pub async fn refresh_accounts(&self) -> RefreshSummary {
        self.inner.refresh_accounts().await
    }

    /// Arm the periodic tasks and admit one account right away.
    ///
    /// Calling this while running is a no-op. Fails only when the timers
    /// cannot be armed.
    pub async fn start(&self) -> SchedulerResult<()> {
        let inner = &self.inner;
        let _transition = inner.transition.lock().await;

        if inner.running.load(Ordering::SeqCst) {
            tracing::info!(task = inner.task_id, "Worker already running");
            return Ok(());
        }

        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|e| SchedulerError::timer_init(e.to_string()))?;

        let settings = {
            let mut settings = inner.settings.write().await;
            for correction in settings.clamp() {
                tracing::warn!(task = inner.task_id, "Configuration corrected: {}", correction);
            }
            settings.clone()
        };

        inner.refresh_accounts().await;
        inner.reset_all_transient().await;

        let token = CancellationToken::new();
        *inner.cancel.write().await = token.clone();
        *inner.active.lock().await = ActiveSessions::default();
        inner.queue.clear().await;
        *inner.last_admission.lock().await = None;
        *inner.last_pause_notice.lock().await = None;

        inner.running.store(true, Ordering::SeqCst);

        // one origin for the immediate admission and both timers
        let armed = Instant::now();
        let timers = vec![
            spawn_periodic(
                &runtime,
                inner.clone(),
                armed,
                settings.start_spacing(),
                token.clone(),
                Tick::Admission,
            ),
            spawn_periodic(
                &runtime,
                inner.clone(),
                armed,
                Duration::from_secs(RECONCILE_INTERVAL_SECS),
                token,
                Tick::Reconcile,
            ),
        ];
        *inner.timers.lock().await = timers;

        inner.log_startup(&settings).await;
        metrics::set_active_sessions(inner.task_id, 0);

        inner.admission_tick(armed).await;
        Ok(())
    }

    /// Stop admitting, cancel sessions and reset every account.
    ///
    /// Never fails: disconnect errors and timeouts are logged and counted.
    pub async fn stop(&self) -> StopReport {
        self.inner.stop().await
    }

    /// Run one admission tick now. Returns the started account, if any.
    pub async fn admission_tick(&self) -> Option<String> {
        self.inner.admission_tick(Instant::now()).await
    }

    /// Run one reconciliation tick now. Returns `(recorded, actual)` when a
    /// correction was made.
    pub async fn reconciliation_tick(&self) -> Option<(usize, usize)> {
        self.inner.reconcile().await
    }

    /// Report the end of a session. Events for a superseded session id are
    /// ignored and return `false`.
    pub async fn on_session_terminal(
        &self,
        account: &str,
        session_id: Uuid,
        outcome: SessionOutcome,
    ) -> bool {
        self.inner
            .finish_session(&normalize_name(account), session_id, outcome)
            .await
    }

    pub async fn active_count(&self) -> usize {
        self.inner.active.lock().await.count
    }

    /// Sessions starting or active
    pub async fn in_flight(&self) -> usize {
        self.inner.active.lock().await.in_flight()
    }

    pub async fn account(&self, name: &str) -> Option<AccountRecord> {
        self.inner
            .accounts
            .read()
            .await
            .get(&normalize_name(name))
            .cloned()
    }

    pub async fn snapshot(&self) -> Vec<AccountRecord> {
        self.inner.accounts.read().await.values().cloned().collect()
    }

    /// Lifecycle state per account, keyed by login
    pub async fn account_states(&self) -> Vec<(String, AccountState)> {
        let now = Utc::now();
        let pause = self.inner.settings.read().await.pause_between_runs();
        let running = self.is_running();

        self.inner
            .accounts
            .read()
            .await
            .values()
            .map(|account| {
                let state = match account.state(now, pause) {
                    AccountState::Disabled => AccountState::Disabled,
                    _ if !running => AccountState::Stopped,
                    state => state,
                };
                (account.name.clone(), state)
            })
            .collect()
    }

    pub async fn queue_snapshot(&self) -> Vec<String> {
        self.inner.queue.snapshot().await
    }

    /// Time until the next account leaves its cool-down. Zero when an
    /// account is eligible now, `None` when no account can ever start.
    pub async fn next_start_in(&self) -> Option<chrono::Duration> {
        let pause = self.inner.settings.read().await.pause_between_runs();
        self.inner.next_start_in(Utc::now(), pause).await
    }

    /// Enable or disable an account. Returns `false` if it is unknown.
    pub async fn set_enabled(&self, name: &str, enabled: bool) -> bool {
        let record = {
            let mut accounts = self.inner.accounts.write().await;
            let Some(account) = accounts.get_mut(&normalize_name(name)) else {
                return false;
            };
            account.enabled = enabled;
            account.clone()
        };
        self.inner.persist(&record).await;
        tracing::info!(task = self.inner.task_id, account = %record.display_name(), enabled, "Account availability changed");
        true
    }

    #[cfg(test)]
    async fn force_active_count(&self, count: usize) {
        self.inner.active.lock().await.count = count;
    }
}

#[async_trait]
impl ScheduleTarget for AccountWorker {
    fn task_id(&self) -> u32 {
        self.inner.task_id
    }

    fn is_running(&self) -> bool {
        AccountWorker::is_running(self)
    }

    async fn start(&self) -> SchedulerResult<()> {
        AccountWorker::start(self).await
    }

    async fn stop(&self) {
        AccountWorker::stop(self).await;
    }
}

// ============================================================================
// Worker Internals
// ============================================================================

impl WorkerInner {
    fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    async fn persist(&self, record: &AccountRecord) {
        if let Err(e) = self.deps.store.save(self.task_id, record).await {
            tracing::warn!(
                task = self.task_id,
                account = %record.display_name(),
                "Failed to persist account, continuing with in-memory state: {}",
                e
            );
        }
    }

    async fn refresh_accounts(&self) -> RefreshSummary {
        let task = self.task_id;
        let mut summary = RefreshSummary::default();

        let loaded = match self.deps.store.load_all(task).await {
            Ok(records) => records,
            Err(e) => {
                tracing::warn!(task, "Failed to load accounts, keeping current set: {}", e);
                Vec::new()
            }
        };
        let credentials = match self.deps.store.load_credentials(task).await {
            Ok(credentials) => credentials,
            Err(e) => {
                tracing::warn!(task, "Failed to load credential list: {}", e);
                Vec::new()
            }
        };
        summary.loaded = loaded.len();

        {
            let mut accounts = self.accounts.write().await;
            for mut record in loaded {
                match accounts.get_mut(&record.key()) {
                    Some(existing) => {
                        existing.alias = record.alias;
                        existing.password = record.password;
                        existing.enabled = record.enabled;
                        existing.shared_secret = record.shared_secret;
                        if existing.last_start_time.is_none() {
                            existing.last_start_time = record.last_start_time;
                        }
                    }
                    None => {
                        record.reset_transient();
                        accounts.insert(record.key(), record);
                        summary.added += 1;
                    }
                }
            }
        }

        let mut created = Vec::new();
        for credential in credentials {
            let key = credential.key();
            let known = {
                let mut accounts = self.accounts.write().await;
                match accounts.get_mut(&key) {
                    Some(existing) if existing.password.is_empty() => {
                        existing.password = credential.password.clone();
                        true
                    }
                    Some(existing) => {
                        if existing.password != credential.password {
                            tracing::warn!(
                                task,
                                account = %credential.login,
                                "Credential list password differs from stored record, keeping stored record"
                            );
                        }
                        true
                    }
                    None => false,
                }
            };
            if known {
                continue;
            }

            match self.deps.store.load_auth_material(task, &credential.login).await {
                Ok(Some(secret)) => {
                    let record = AccountRecord::new(&credential.login)
                        .with_password(credential.password)
                        .with_shared_secret(secret);
                    self.accounts.write().await.insert(key, record.clone());
                    created.push(record);
                }
                Ok(None) => {
                    tracing::warn!(task, account = %credential.login, "No auth material for listed account, skipping");
                }
                Err(e) => {
                    tracing::warn!(task, account = %credential.login, "Failed to load auth material: {}", e);
                }
            }
        }

        summary.created_from_credentials = created.len();
        join_all(created.iter().map(|record| self.persist(record))).await;

        let names: Vec<String> = self
            .accounts
            .read()
            .await
            .values()
            .map(|account| account.name.clone())
            .collect();
        summary.total = names.len();
        self.deps
            .registry
            .register(task, names, self.deps.stats.clone())
            .await;

        tracing::debug!(task, ?summary, "Accounts refreshed");
        summary
    }

    async fn reset_all_transient(&self) {
        let reset: Vec<AccountRecord> = {
            let mut accounts = self.accounts.write().await;
            accounts
                .values_mut()
                .filter(|account| account.has_activity() || account.action != crate::account::ACTION_NONE)
                .map(|account| {
                    account.reset_transient();
                    account.clone()
                })
                .collect()
        };
        join_all(reset.iter().map(|record| self.persist(record))).await;
    }

    async fn log_startup(&self, settings: &WorkerSettings) {
        let accounts = self.accounts.read().await;
        let enabled = accounts.values().filter(|a| a.enabled).count();
        let with_auth = accounts
            .values()
            .filter(|a| a.enabled && a.has_auth_material())
            .count();

        tracing::info!(
            task = self.task_id,
            accounts = accounts.len(),
            enabled,
            with_auth,
            parallel_limit = settings.parallel_limit,
            start_spacing_secs = settings.start_spacing_secs,
            session_minutes = settings.session_duration_minutes,
            pause_minutes = settings.pause_between_runs_minutes,
            "Worker started"
        );
    }

    async fn admission_tick(self: &Arc<Self>, at: Instant) -> Option<String> {
        if !self.is_running() {
            return None;
        }

        let settings = self.settings.read().await.clone();

        let in_flight = self.active.lock().await.in_flight();
        if in_flight >= settings.parallel_limit {
            tracing::debug!(task = self.task_id, in_flight, limit = settings.parallel_limit, "Parallel limit reached");
            return None;
        }

        if let Some(last) = *self.last_admission.lock().await {
            if at.saturating_duration_since(last) < settings.start_spacing() {
                return None;
            }
        }

        let now = Utc::now();
        let pause = settings.pause_between_runs();
        let order = {
            let accounts = self.accounts.read().await;
            eligible_order(accounts.values(), now, pause)
        };
        self.queue.replace(order).await;

        let Some(key) = self.queue.pop().await else {
            self.log_all_paused(now, pause).await;
            return None;
        };

        self.begin_session(key, now, &settings, at).await
    }

    async fn begin_session(
        self: &Arc<Self>,
        key: String,
        now: DateTime<Utc>,
        settings: &WorkerSettings,
        at: Instant,
    ) -> Option<String> {
        let (record, session_id) = {
            let mut accounts = self.accounts.write().await;
            let account = accounts.get_mut(&key)?;
            if !account.is_eligible(now, settings.pause_between_runs()) {
                return None;
            }
            let session_id = account.begin_start();
            (account.clone(), session_id)
        };
        *self.last_admission.lock().await = Some(at);

        let reporter = DropReporter::new(self.deps.registry.clone(), record.name.clone());
        let client = match self.deps.sessions.create(&record, reporter) {
            Ok(client) => client,
            Err(e) => {
                tracing::error!(task = self.task_id, account = %record.display_name(), "Failed to create session: {}", e);
                self.finish_session(&key, session_id, SessionOutcome::Failed(SessionResult::Fail))
                    .await;
                return None;
            }
        };

        self.active.lock().await.sessions.insert(
            key.clone(),
            ActiveSession {
                session_id,
                client: client.clone(),
            },
        );

        if !self.is_running() {
            // stop() raced with this admission; it owns the reset
            self.active.lock().await.sessions.remove(&key);
            return None;
        }

        self.persist(&record).await;
        metrics::record_admission(self.task_id);
        tracing::info!(task = self.task_id, account = %record.display_name(), %session_id, "Starting session");

        let token = self.cancel.read().await.child_token();
        tokio::spawn(run_session(self.clone(), key, session_id, client, token));

        Some(record.name)
    }

    /// Disconnect one client, giving up after the shutdown timeout
    async fn disconnect_bounded(&self, key: &str, client: &dyn SessionClient) {
        let timeout = self.settings.read().await.shutdown_timeout();
        match tokio::time::timeout(timeout, client.disconnect()).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                tracing::warn!(task = self.task_id, account = %key, "Disconnect failed: {}", e);
            }
            Err(_) => {
                tracing::warn!(task = self.task_id, account = %key, ?timeout, "Disconnect timed out");
            }
        }
    }

    async fn set_action(&self, key: &str, session_id: Uuid, action: &str) {
        let mut accounts = self.accounts.write().await;
        if let Some(account) = accounts.get_mut(key) {
            if account.current_session_id == Some(session_id) {
                account.action = action.to_string();
            }
        }
    }

    /// Starting → Active. Returns `false` if the session is stale or the
    /// worker stopped in the meantime.
    async fn mark_active(&self, key: &str, session_id: Uuid) -> bool {
        if !self.is_running() {
            return false;
        }

        let (record, active_now) = {
            let mut accounts = self.accounts.write().await;
            let Some(account) = accounts.get_mut(key) else {
                return false;
            };
            if account.current_session_id != Some(session_id) {
                return false;
            }
            account.activate(Utc::now());

            let mut active = self.active.lock().await;
            active.count += 1;
            (account.clone(), active.count)
        };

        metrics::set_active_sessions(self.task_id, active_now);
        tracing::info!(task = self.task_id, account = %record.display_name(), active = active_now, "Session active");

        self.persist(&record).await;
        self.deps
            .stats
            .set_status(&record.name, OnlineStatus::Online)
            .await;

        // stop() may have reset the account while the writes above were pending
        let superseded = self
            .accounts
            .read()
            .await
            .get(key)
            .filter(|account| account.current_session_id != Some(session_id))
            .cloned();
        if let Some(current) = superseded {
            self.persist(&current).await;
            self.deps
                .stats
                .set_status(&current.name, OnlineStatus::Offline)
                .await;
            return false;
        }
        true
    }

    async fn finish_session(&self, key: &str, session_id: Uuid, outcome: SessionOutcome) -> bool {
        let (record, was_active, active_now) = {
            let mut accounts = self.accounts.write().await;
            let Some(account) = accounts.get_mut(key) else {
                return false;
            };
            if account.current_session_id != Some(session_id) {
                tracing::debug!(task = self.task_id, account = %key, %session_id, "Ignoring stale session event");
                return false;
            }

            let was_active = match outcome {
                SessionOutcome::Failed(_) => {
                    account.fail_start();
                    false
                }
                SessionOutcome::Expired | SessionOutcome::Cancelled => account.complete(Utc::now()),
            };

            let mut active = self.active.lock().await;
            if active
                .sessions
                .get(key)
                .is_some_and(|session| session.session_id == session_id)
            {
                active.sessions.remove(key);
            }
            if was_active {
                active.count = active.count.saturating_sub(1);
            }
            (account.clone(), was_active, active.count)
        };

        metrics::set_active_sessions(self.task_id, active_now);
        match outcome {
            SessionOutcome::Failed(result) => {
                metrics::record_session_failure(self.task_id, result.as_str());
                tracing::warn!(
                    task = self.task_id,
                    account = %record.display_name(),
                    %result,
                    "Session failed to start, account returned to pool"
                );
            }
            SessionOutcome::Expired => {
                let pause = self.settings.read().await.pause_between_runs_minutes;
                tracing::info!(
                    task = self.task_id,
                    account = %record.display_name(),
                    pause_minutes = pause,
                    "Session finished, cooling down"
                );
            }
            SessionOutcome::Cancelled => {
                tracing::info!(task = self.task_id, account = %record.display_name(), "Session cancelled");
            }
        }

        self.persist(&record).await;
        if was_active {
            self.deps
                .stats
                .set_status(&record.name, OnlineStatus::Offline)
                .await;
        }
        true
    }

    async fn reconcile(&self) -> Option<(usize, usize)> {
        if !self.is_running() {
            return None;
        }

        let accounts = self.accounts.read().await;
        let actual = accounts.values().filter(|account| account.idle_now).count();
        let mut active = self.active.lock().await;
        if active.count == actual {
            return None;
        }

        let recorded = active.count;
        active.count = actual;
        drop(active);
        drop(accounts);

        metrics::record_reconciliation(self.task_id);
        metrics::set_active_sessions(self.task_id, actual);
        tracing::warn!(task = self.task_id, recorded, actual, "Active count drifted, corrected");
        Some((recorded, actual))
    }

    async fn next_start_in(&self, now: DateTime<Utc>, pause: chrono::Duration) -> Option<chrono::Duration> {
        self.accounts
            .read()
            .await
            .values()
            .filter(|a| a.enabled && a.has_auth_material() && !a.has_activity())
            .map(|a| a.cooldown_remaining(now, pause).unwrap_or_else(chrono::Duration::zero))
            .min()
    }

    async fn log_all_paused(&self, now: DateTime<Utc>, pause: chrono::Duration) {
        let Some(remaining) = self.next_start_in(now, pause).await else {
            return;
        };
        if remaining <= chrono::Duration::zero() {
            return;
        }

        let minutes = remaining.num_minutes() + 1;
        let mut last = self.last_pause_notice.lock().await;
        if *last != Some(minutes) {
            *last = Some(minutes);
            tracing::info!(task = self.task_id, minutes, "All accounts paused, next start in {} minutes", minutes);
        }
    }

    async fn stop(&self) -> StopReport {
        let _transition = self.transition.lock().await;

        if !self.running.swap(false, Ordering::SeqCst) {
            tracing::info!(task = self.task_id, "Worker not running");
            return StopReport::default();
        }
        tracing::info!(task = self.task_id, "Stopping worker");

        for handle in self.timers.lock().await.drain(..) {
            handle.abort();
        }

        self.cancel.read().await.cancel();

        let timeout = self.settings.read().await.shutdown_timeout();
        let clients: Vec<(String, Arc<dyn SessionClient>)> = self
            .active
            .lock()
            .await
            .sessions
            .iter()
            .map(|(key, session)| (key.clone(), session.client.clone()))
            .collect();
        let (disconnect_failures, timed_out) = disconnect_all(self.task_id, clients, timeout).await;

        let now = Utc::now();
        let (reset, went_offline) = {
            let mut accounts = self.accounts.write().await;
            let mut reset = Vec::new();
            let mut went_offline = Vec::new();
            for account in accounts.values_mut().filter(|a| a.has_activity()) {
                if account.complete(now) {
                    went_offline.push(account.name.clone());
                }
                reset.push(account.clone());
            }

            *self.active.lock().await = ActiveSessions::default();
            (reset, went_offline)
        };
        self.queue.clear().await;
        *self.last_admission.lock().await = None;
        metrics::set_active_sessions(self.task_id, 0);

        join_all(reset.iter().map(|record| self.persist(record))).await;
        for name in &went_offline {
            self.deps.stats.set_status(name, OnlineStatus::Offline).await;
        }

        let report = StopReport {
            accounts_reset: reset.len(),
            disconnect_failures,
            timed_out,
        };
        tracing::info!(
            task = self.task_id,
            reset = report.accounts_reset,
            disconnect_failures,
            timed_out,
            "Worker stopped"
        );
        report
    }
}

// ============================================================================
// Background Tasks
// ============================================================================

fn spawn_periodic(
    runtime: &tokio::runtime::Handle,
    inner: Arc<WorkerInner>,
    armed: Instant,
    period: Duration,
    token: CancellationToken,
    tick: Tick,
) -> JoinHandle<()> {
    runtime.spawn(async move {
        let mut ticker = interval_at(armed + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                at = ticker.tick() => match tick {
                    Tick::Admission => {
                        inner.admission_tick(at).await;
                    }
                    Tick::Reconcile => {
                        inner.reconcile().await;
                    }
                },
                _ = token.cancelled() => {
                    tracing::debug!(task = inner.task_id, ?tick, "Timer shutting down");
                    break;
                }
            }
        }
    })
}

/// Lifecycle of one admitted session
async fn run_session(
    inner: Arc<WorkerInner>,
    key: String,
    session_id: Uuid,
    client: Arc<dyn SessionClient>,
    token: CancellationToken,
) {
    inner.set_action(&key, session_id, ACTION_CONNECTING).await;

    let Some(record) = inner.accounts.read().await.get(&key).cloned() else {
        return;
    };

    let result = tokio::select! {
        result = client.connect_and_authenticate(&record) => result,
        _ = token.cancelled() => {
            if let Err(e) = client.disconnect().await {
                tracing::debug!(task = inner.task_id, account = %key, "Disconnect after cancelled connect failed: {}", e);
            }
            inner.finish_session(&key, session_id, SessionOutcome::Cancelled).await;
            return;
        }
    };

    if !result.is_ok() {
        inner
            .finish_session(&key, session_id, SessionOutcome::Failed(result))
            .await;
        return;
    }

    if !inner.mark_active(&key, session_id).await {
        inner.disconnect_bounded(&key, client.as_ref()).await;
        return;
    }

    let (check_interval, duration) = {
        let settings = inner.settings.read().await;
        (settings.check_interval_minutes, settings.session_duration())
    };
    client.begin_periodic_check(check_interval).await;

    let outcome = tokio::select! {
        _ = tokio::time::sleep(duration) => SessionOutcome::Expired,
        _ = token.cancelled() => SessionOutcome::Cancelled,
    };

    inner.disconnect_bounded(&key, client.as_ref()).await;
    inner.finish_session(&key, session_id, outcome).await;
}

/// Disconnect every client concurrently, bounded by `timeout` in total.
///
/// Returns the number of failed disconnects and whether the wait timed out.
async fn disconnect_all(
    task_id: u32,
    clients: Vec<(String, Arc<dyn SessionClient>)>,
    timeout: Duration,
) -> (usize, bool) {
    if clients.is_empty() {
        return (0, false);
    }

    let handles: Vec<_> = clients
        .into_iter()
        .map(|(key, client)| tokio::spawn(async move { (key, client.disconnect().await) }))
        .collect();
    let abort_handles: Vec<_> = handles.iter().map(JoinHandle::abort_handle).collect();

    match tokio::time::timeout(timeout, join_all(handles)).await {
        Ok(results) => {
            let mut failures = 0;
            for result in results {
                match result {
                    Ok((_, Ok(()))) => {}
                    Ok((key, Err(e))) => {
                        failures += 1;
                        tracing::warn!(task = task_id, account = %key, "Disconnect failed during stop: {}", e);
                    }
                    Err(e) => {
                        failures += 1;
                        tracing::error!(task = task_id, "Disconnect task panicked: {}", e);
                    }
                }
            }
            (failures, false)
        }
        Err(_) => {
            let hung = abort_handles.iter().filter(|h| !h.is_finished()).count();
            for handle in &abort_handles {
                handle.abort();
            }
            tracing::warn!(
                task = task_id,
                ?timeout,
                hung,
                "Timed out waiting for disconnects, aborted the rest and resetting accounts anyway"
            );
            (0, true)
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::DryRunSessions;
    use crate::stats::FileStatistics;
    use crate::storage::MemoryStore;

    fn worker_with(store: Arc<MemoryStore>, settings: WorkerSettings) -> AccountWorker {
        let deps = WorkerDeps {
            store: store.clone(),
            sessions: Arc::new(DryRunSessions::new()),
            stats: Arc::new(FileStatistics::in_memory()),
            registry: Arc::new(DropRegistry::new(store)),
        };
        AccountWorker::new(1, settings, deps)
    }

    #[tokio::test]
    async fn test_reconciliation_corrects_drift() {
        let store = Arc::new(MemoryStore::new());
        let worker = worker_with(store, WorkerSettings::default());
        worker.inner.running.store(true, Ordering::SeqCst);

        worker.force_active_count(3).await;
        assert_eq!(worker.reconciliation_tick().await, Some((3, 0)));
        assert_eq!(worker.active_count().await, 0);
        assert_eq!(worker.reconciliation_tick().await, None);
    }

    #[tokio::test]
    async fn test_admission_noop_when_not_running() {
        let store = Arc::new(MemoryStore::new());
        store
            .insert_account(1, AccountRecord::new("a").with_shared_secret("s"))
            .await;
        let worker = worker_with(store, WorkerSettings::default());
        worker.refresh_accounts().await;

        assert_eq!(worker.admission_tick().await, None);
        assert_eq!(worker.in_flight().await, 0);
    }

    #[tokio::test]
    async fn test_stale_terminal_event_ignored() {
        let store = Arc::new(MemoryStore::new());
        store
            .insert_account(1, AccountRecord::new("a").with_shared_secret("s"))
            .await;
        let worker = worker_with(store, WorkerSettings::default());
        worker.refresh_accounts().await;

        assert!(
            !worker
                .on_session_terminal("a", Uuid::new_v4(), SessionOutcome::Expired)
                .await
        );
    }

    #[tokio::test]
    async fn test_start_and_stop_toggle_running() {
        let store = Arc::new(MemoryStore::new());
        let worker = worker_with(store, WorkerSettings::default());
        assert!(worker.start().await.is_ok());
        assert!(worker.is_running());
        worker.stop().await;
    }

    /// Holds every Online write until released
    #[derive(Default)]
    struct GatedSink {
        inner: FileStatistics,
        entered: tokio::sync::Notify,
        release: tokio::sync::Notify,
    }

    #[async_trait]
    impl StatisticsSink for GatedSink {
        async fn set_status(&self, account: &str, status: OnlineStatus) {
            if status == OnlineStatus::Online {
                self.entered.notify_one();
                self.release.notified().await;
            }
            self.inner.set_status(account, status).await;
        }

        async fn record_drop(&self, event: &crate::models::DropEvent) {
            self.inner.record_drop(event).await;
        }
    }

    #[tokio::test]
    async fn test_stop_during_online_write_leaves_account_offline() {
        let store = Arc::new(MemoryStore::new());
        store
            .insert_account(1, AccountRecord::new("a").with_shared_secret("s"))
            .await;
        let sessions = DryRunSessions::new();
        let counters = sessions.counters();
        let sink = Arc::new(GatedSink::default());
        let worker = AccountWorker::new(
            1,
            WorkerSettings::default(),
            WorkerDeps {
                store: store.clone(),
                sessions: Arc::new(sessions),
                stats: sink.clone(),
                registry: Arc::new(DropRegistry::new(store.clone())),
            },
        );

        worker.start().await.unwrap();
        sink.entered.notified().await;

        let report = worker.stop().await;
        assert_eq!(report.accounts_reset, 1);
        sink.release.notify_one();

        // stop and the superseded session task each disconnect once
        for _ in 0..200 {
            if counters.disconnects.load(Ordering::SeqCst) >= 2 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(counters.disconnects.load(Ordering::SeqCst), 2);

        assert!(!sink.inner.get("a").await.unwrap().is_active);
        let saved = store.account(1, "a").await.unwrap();
        assert!(!saved.idle_now);
        assert!(!saved.is_running);
        assert_eq!(worker.active_count().await, 0);
    }

    #[tokio::test]
    async fn test_account_states_when_stopped() {
        let store = Arc::new(MemoryStore::new());
        store
            .insert_account(1, AccountRecord::new("on").with_shared_secret("s"))
            .await;
        store
            .insert_account(1, AccountRecord::new("off").with_enabled(false))
            .await;
        let worker = worker_with(store, WorkerSettings::default());
        worker.refresh_accounts().await;

        let states: HashMap<_, _> = worker.account_states().await.into_iter().collect();
        assert_eq!(states["on"], AccountState::Stopped);
        assert_eq!(states["off"], AccountState::Disabled);
    }
}
