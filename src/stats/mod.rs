//! Per-account statistics
//!
//! [`StatisticsSink`] is the interface the worker and the drop registry
//! report into. [`FileStatistics`] keeps one [`AccountStatistics`] per
//! account and, when given a path, writes the whole map to a JSON file after
//! every change.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};

use crate::account::normalize_name;
use crate::models::{DropEvent, OnlineStatus};

/// Receiver of status changes and drops
#[async_trait]
pub trait StatisticsSink: Send + Sync {
    async fn set_status(&self, account: &str, status: OnlineStatus);

    async fn record_drop(&self, event: &DropEvent);
}

/// Hands out one sink per task
#[async_trait]
pub trait StatisticsProvider: Send + Sync {
    async fn for_task(&self, task_id: u32) -> Arc<dyn StatisticsSink>;
}

/// Counters for a single account
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccountStatistics {
    pub account_name: String,
    pub total_drops_count: u64,
    pub last_drop_time: Option<DateTime<Utc>>,
    pub is_active: bool,
    pub last_connection_time: Option<DateTime<Utc>>,
    /// Drop counts keyed `<gameId>_<itemDefId>`
    #[serde(default)]
    pub drops: BTreeMap<String, u64>,
}

impl AccountStatistics {
    pub fn new(account_name: impl Into<String>) -> Self {
        Self {
            account_name: account_name.into(),
            ..Default::default()
        }
    }

    /// Drop totals grouped by game id, highest first
    pub fn drops_by_game(&self) -> Vec<(u32, u64)> {
        let mut per_game: BTreeMap<u32, u64> = BTreeMap::new();
        for (key, count) in &self.drops {
            if let Some(game) = key.split_once('_').and_then(|(g, _)| g.parse::<u32>().ok()) {
                *per_game.entry(game).or_default() += count;
            }
        }
        let mut games: Vec<_> = per_game.into_iter().collect();
        games.sort_by(|a, b| b.1.cmp(&a.1));
        games
    }
}

/// Statistics kept in memory and optionally mirrored to a JSON file
#[derive(Debug, Default)]
pub struct FileStatistics {
    path: Option<PathBuf>,
    stats: RwLock<BTreeMap<String, AccountStatistics>>,
    write_lock: Mutex<()>,
}

impl FileStatistics {
    /// Statistics that are never written to disk
    pub fn in_memory() -> Self {
        Self::default()
    }

    /// Load from `path`, starting empty if the file is missing or unreadable
    pub async fn load(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let stats = match tokio::fs::read_to_string(&path).await {
            Ok(content) => match serde_json::from_str(&content) {
                Ok(stats) => stats,
                Err(e) => {
                    tracing::warn!(path = %path.display(), "Statistics file unreadable, starting empty: {}", e);
                    BTreeMap::new()
                }
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => BTreeMap::new(),
            Err(e) => {
                tracing::warn!(path = %path.display(), "Failed to read statistics: {}", e);
                BTreeMap::new()
            }
        };

        Self {
            path: Some(path),
            stats: RwLock::new(stats),
            write_lock: Mutex::new(()),
        }
    }

    pub async fn get(&self, account: &str) -> Option<AccountStatistics> {
        self.stats.read().await.get(&normalize_name(account)).cloned()
    }

    pub async fn all(&self) -> Vec<AccountStatistics> {
        self.stats.read().await.values().cloned().collect()
    }

    async fn persist(&self, snapshot: &BTreeMap<String, AccountStatistics>) {
        let Some(path) = &self.path else { return };

        let json = match serde_json::to_vec_pretty(snapshot) {
            Ok(json) => json,
            Err(e) => {
                tracing::error!("Failed to serialize statistics: {}", e);
                return;
            }
        };

        if let Some(parent) = path.parent() {
            if let Err(e) = tokio::fs::create_dir_all(parent).await {
                tracing::warn!(path = %parent.display(), "Failed to create statistics dir: {}", e);
                return;
            }
        }
        if let Err(e) = tokio::fs::write(path, json).await {
            tracing::warn!(path = %path.display(), "Failed to save statistics: {}", e);
        }
    }
}

#[async_trait]
impl StatisticsSink for FileStatistics {
    async fn set_status(&self, account: &str, status: OnlineStatus) {
        let _write = self.write_lock.lock().await;
        let snapshot = {
            let mut stats = self.stats.write().await;
            let entry = stats
                .entry(normalize_name(account))
                .or_insert_with(|| AccountStatistics::new(account));
            entry.is_active = status == OnlineStatus::Online;
            if entry.is_active {
                entry.last_connection_time = Some(Utc::now());
            }
            stats.clone()
        };
        self.persist(&snapshot).await;
    }

    async fn record_drop(&self, event: &DropEvent) {
        let _write = self.write_lock.lock().await;
        let snapshot = {
            let mut stats = self.stats.write().await;
            let entry = stats
                .entry(normalize_name(&event.account_name))
                .or_insert_with(|| AccountStatistics::new(&event.account_name));
            entry.total_drops_count += 1;
            entry.last_drop_time = Some(event.timestamp);
            *entry.drops.entry(event.stats_key()).or_default() += 1;
            stats.clone()
        };
        self.persist(&snapshot).await;
    }
}
