//! Simulated session client
//!
//! Used by the `run` command and by tests. Connect results, connect latency
//! and disconnect behaviour can be scripted per account; call counters are
//! shared across every client the factory creates.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use super::{DropReporter, SessionClient, SessionError, SessionFactory, SessionResult};
use crate::account::{normalize_name, AccountRecord};

/// What `disconnect` does
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisconnectBehavior {
    Clean,
    Fail,
    /// Never completes
    Hang,
}

/// Shared call counters
#[derive(Debug, Default)]
pub struct DryRunCounters {
    pub connects: AtomicUsize,
    pub checks: AtomicUsize,
    pub disconnects: AtomicUsize,
    /// Hanging disconnects whose futures are still alive
    pub hung_disconnects: AtomicUsize,
}

struct HangGuard(Arc<DryRunCounters>);

impl Drop for HangGuard {
    fn drop(&mut self) {
        self.0.hung_disconnects.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Factory for simulated sessions
#[derive(Debug, Clone)]
pub struct DryRunSessions {
    default_result: SessionResult,
    results: HashMap<String, SessionResult>,
    disconnects: HashMap<String, DisconnectBehavior>,
    connect_delay: Duration,
    simulated_drop: Option<(u32, String)>,
    counters: Arc<DryRunCounters>,
}

impl Default for DryRunSessions {
    fn default() -> Self {
        Self {
            default_result: SessionResult::Ok,
            results: HashMap::new(),
            disconnects: HashMap::new(),
            connect_delay: Duration::ZERO,
            simulated_drop: None,
            counters: Arc::new(DryRunCounters::default()),
        }
    }
}

impl DryRunSessions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Result for accounts without an override
    pub fn with_default_result(mut self, result: SessionResult) -> Self {
        self.default_result = result;
        self
    }

    pub fn with_result(mut self, account: &str, result: SessionResult) -> Self {
        self.results.insert(normalize_name(account), result);
        self
    }

    pub fn with_disconnect(mut self, account: &str, behavior: DisconnectBehavior) -> Self {
        self.disconnects.insert(normalize_name(account), behavior);
        self
    }

    pub fn with_connect_delay(mut self, delay: Duration) -> Self {
        self.connect_delay = delay;
        self
    }

    /// Report one drop per session as soon as its periodic check begins
    pub fn with_simulated_drop(mut self, game_id: u32, item_def_id: impl Into<String>) -> Self {
        self.simulated_drop = Some((game_id, item_def_id.into()));
        self
    }

    pub fn counters(&self) -> Arc<DryRunCounters> {
        self.counters.clone()
    }
}

impl SessionFactory for DryRunSessions {
    fn create(
        &self,
        account: &AccountRecord,
        drops: DropReporter,
    ) -> Result<Arc<dyn SessionClient>, SessionError> {
        let key = account.key();
        Ok(Arc::new(DryRunSession {
            result: self.results.get(&key).copied().unwrap_or(self.default_result),
            disconnect: self
                .disconnects
                .get(&key)
                .copied()
                .unwrap_or(DisconnectBehavior::Clean),
            connect_delay: self.connect_delay,
            simulated_drop: self.simulated_drop.clone(),
            counters: self.counters.clone(),
            drops,
        }))
    }
}

struct DryRunSession {
    result: SessionResult,
    disconnect: DisconnectBehavior,
    connect_delay: Duration,
    simulated_drop: Option<(u32, String)>,
    counters: Arc<DryRunCounters>,
    drops: DropReporter,
}

#[async_trait]
impl SessionClient for DryRunSession {
    async fn connect_and_authenticate(&self, account: &AccountRecord) -> SessionResult {
        self.counters.connects.fetch_add(1, Ordering::SeqCst);
        if !self.connect_delay.is_zero() {
            tokio::time::sleep(self.connect_delay).await;
        }
        tracing::debug!(account = %account.display_name(), result = %self.result, "Simulated connect");
        self.result
    }

    async fn begin_periodic_check(&self, interval_minutes: u64) {
        self.counters.checks.fetch_add(1, Ordering::SeqCst);
        tracing::debug!(account = %self.drops.account(), interval_minutes, "Simulated periodic check armed");

        if let Some((game_id, item_def_id)) = self.simulated_drop.clone() {
            let drops = self.drops.clone();
            tokio::spawn(async move {
                drops.report(game_id, &item_def_id).await;
            });
        }
    }

    async fn disconnect(&self) -> Result<(), SessionError> {
        self.counters.disconnects.fetch_add(1, Ordering::SeqCst);
        match self.disconnect {
            DisconnectBehavior::Clean => Ok(()),
            DisconnectBehavior::Fail => Err(SessionError::Disconnect(
                "simulated disconnect failure".to_string(),
            )),
            DisconnectBehavior::Hang => {
                self.counters.hung_disconnects.fetch_add(1, Ordering::SeqCst);
                let _guard = HangGuard(self.counters.clone());
                std::future::pending().await
            }
        }
    }
}
