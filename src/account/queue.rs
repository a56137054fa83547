//! Ready queue of accounts eligible to start
//!
//! The queue is rebuilt from the full account set on every admission tick
//! and drained one entry at a time. Ordering is oldest `last_start_time`
//! first, with never-started accounts ahead of everyone else.

use chrono::{DateTime, Duration, Utc};
use std::collections::VecDeque;
use tokio::sync::Mutex;

use super::AccountRecord;

/// Keys of eligible accounts in admission order
pub fn eligible_order<'a>(
    accounts: impl IntoIterator<Item = &'a AccountRecord>,
    now: DateTime<Utc>,
    pause: Duration,
) -> Vec<String> {
    let mut eligible: Vec<&AccountRecord> = accounts
        .into_iter()
        .filter(|account| account.is_eligible(now, pause))
        .collect();

    // Option<T> orders None first
    eligible.sort_by(|a, b| {
        a.last_start_time
            .cmp(&b.last_start_time)
            .then_with(|| a.key().cmp(&b.key()))
    });

    eligible.into_iter().map(AccountRecord::key).collect()
}

/// Separately locked queue of account keys
#[derive(Debug, Default)]
pub struct ReadyQueue {
    inner: Mutex<VecDeque<String>>,
}

impl ReadyQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the queue contents with a fresh eligible ordering
    pub async fn rebuild<'a>(
        &self,
        accounts: impl IntoIterator<Item = &'a AccountRecord>,
        now: DateTime<Utc>,
        pause: Duration,
    ) -> usize {
        let order = eligible_order(accounts, now, pause);
        self.replace(order).await
    }

    /// Replace the queue contents with a precomputed ordering
    pub async fn replace(&self, order: Vec<String>) -> usize {
        let len = order.len();
        *self.inner.lock().await = order.into();
        len
    }

    pub async fn pop(&self) -> Option<String> {
        self.inner.lock().await.pop_front()
    }

    pub async fn clear(&self) {
        self.inner.lock().await.clear();
    }

    pub async fn len(&self) -> usize {
        self.inner.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.inner.lock().await.is_empty()
    }

    pub async fn snapshot(&self) -> Vec<String> {
        self.inner.lock().await.iter().cloned().collect()
    }
}
