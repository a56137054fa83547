//! JSON file store
//!
//! Layout under the data directory:
//!
//! ```text
//! task_<n>/accounts/<name>.json
//! task_<n>/auth/<name>.json        {"shared_secret": "..."}
//! task_<n>/credentials.txt
//! task_<n>/schedule.json
//! task_<n>/statistics.json
//! drops/<name>.jsonl
//! ```

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;

use super::{file_stem, AccountStore, DropHistory, ScheduleStore, StoreError, StoreResult};
use crate::account::{normalize_name, parse_credentials, AccountRecord, Credential};
use crate::models::DropEvent;
use crate::scheduler::schedule::ScheduleConfig;
use crate::stats::{FileStatistics, StatisticsProvider, StatisticsSink};

const TASK_DIR_PREFIX: &str = "task_";

/// Store backed by JSON files
#[derive(Debug)]
pub struct FileStore {
    root: PathBuf,
    append_lock: Mutex<()>,
}

impl FileStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            append_lock: Mutex::new(()),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn task_dir(&self, task_id: u32) -> PathBuf {
        self.root.join(format!("{TASK_DIR_PREFIX}{task_id}"))
    }

    fn account_path(&self, task_id: u32, name: &str) -> PathBuf {
        self.task_dir(task_id)
            .join("accounts")
            .join(format!("{}.json", file_stem(&normalize_name(name))))
    }

    fn auth_path(&self, task_id: u32, login: &str) -> PathBuf {
        self.task_dir(task_id)
            .join("auth")
            .join(format!("{}.json", file_stem(&normalize_name(login))))
    }

    pub fn credentials_path(&self, task_id: u32) -> PathBuf {
        self.task_dir(task_id).join("credentials.txt")
    }

    fn schedule_path(&self, task_id: u32) -> PathBuf {
        self.task_dir(task_id).join("schedule.json")
    }

    pub fn statistics_path(&self, task_id: u32) -> PathBuf {
        self.task_dir(task_id).join("statistics.json")
    }

    fn drops_path(&self, account: &str) -> PathBuf {
        self.root
            .join("drops")
            .join(format!("{}.jsonl", file_stem(&normalize_name(account))))
    }

    /// Ids of every `task_<n>` directory, ascending
    pub async fn task_ids(&self) -> StoreResult<Vec<u32>> {
        let mut ids = Vec::new();
        let mut entries = match tokio::fs::read_dir(&self.root).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(ids),
            Err(e) => return Err(StoreError::io(&self.root, e)),
        };

        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| StoreError::io(&self.root, e))?
        {
            let name = entry.file_name();
            let Some(name) = name.to_str() else { continue };
            if let Some(id) = name
                .strip_prefix(TASK_DIR_PREFIX)
                .and_then(|n| n.parse::<u32>().ok())
            {
                ids.push(id);
            }
        }

        ids.sort_unstable();
        Ok(ids)
    }

    /// Create the directory skeleton for a task
    pub async fn create_task_dir(&self, task_id: u32) -> StoreResult<()> {
        let accounts = self.task_dir(task_id).join("accounts");
        tokio::fs::create_dir_all(&accounts)
            .await
            .map_err(|e| StoreError::io(&accounts, e))
    }

    /// Store auth material for a login
    pub async fn save_auth_material(
        &self,
        task_id: u32,
        login: &str,
        shared_secret: &str,
    ) -> StoreResult<()> {
        let path = self.auth_path(task_id, login);
        let doc = serde_json::json!({ "shared_secret": shared_secret });
        let bytes = serde_json::to_vec_pretty(&doc).map_err(|e| StoreError::json(&path, e))?;
        write_atomic(&path, &bytes).await
    }

    /// Replace the credential list
    pub async fn save_credentials(&self, task_id: u32, text: &str) -> StoreResult<()> {
        write_atomic(&self.credentials_path(task_id), text.as_bytes()).await
    }
}

/// Write through a sibling temp file and rename over the target
async fn write_atomic(path: &Path, bytes: &[u8]) -> StoreResult<()> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|e| StoreError::io(parent, e))?;
    }

    let tmp = path.with_extension(format!("{}.tmp", uuid::Uuid::new_v4().simple()));
    tokio::fs::write(&tmp, bytes)
        .await
        .map_err(|e| StoreError::io(&tmp, e))?;
    tokio::fs::rename(&tmp, path)
        .await
        .map_err(|e| StoreError::io(path, e))
}

async fn read_optional(path: &Path) -> StoreResult<Option<String>> {
    match tokio::fs::read_to_string(path).await {
        Ok(content) => Ok(Some(content)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(StoreError::io(path, e)),
    }
}

#[async_trait]
impl AccountStore for FileStore {
    async fn load_all(&self, task_id: u32) -> StoreResult<Vec<AccountRecord>> {
        let dir = self.task_dir(task_id).join("accounts");
        let mut records = Vec::new();

        let mut entries = match tokio::fs::read_dir(&dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(records),
            Err(e) => return Err(StoreError::io(&dir, e)),
        };

        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| StoreError::io(&dir, e))?
        {
            let path = entry.path();
            if path.extension().and_then(|ext| ext.to_str()) != Some("json") {
                continue;
            }

            let Some(content) = read_optional(&path).await? else {
                continue;
            };
            match serde_json::from_str::<AccountRecord>(&content) {
                Ok(record) => records.push(record),
                Err(e) => {
                    tracing::warn!(task = task_id, path = %path.display(), "Skipping unreadable account record: {}", e);
                }
            }
        }

        records.sort_by_key(AccountRecord::key);
        Ok(records)
    }

    async fn save(&self, task_id: u32, record: &AccountRecord) -> StoreResult<()> {
        let path = self.account_path(task_id, &record.name);
        let bytes = serde_json::to_vec_pretty(record).map_err(|e| StoreError::json(&path, e))?;
        write_atomic(&path, &bytes).await
    }

    async fn load_credentials(&self, task_id: u32) -> StoreResult<Vec<Credential>> {
        let path = self.credentials_path(task_id);
        Ok(read_optional(&path)
            .await?
            .map(|text| parse_credentials(&text))
            .unwrap_or_default())
    }

    async fn load_auth_material(&self, task_id: u32, login: &str) -> StoreResult<Option<String>> {
        let path = self.auth_path(task_id, login);
        let Some(content) = read_optional(&path).await? else {
            return Ok(None);
        };
        let doc: serde_json::Value =
            serde_json::from_str(&content).map_err(|e| StoreError::json(&path, e))?;
        Ok(doc
            .get("shared_secret")
            .and_then(|v| v.as_str())
            .filter(|s| !s.trim().is_empty())
            .map(str::to_string))
    }

    async fn remove_task(&self, task_id: u32) -> StoreResult<()> {
        let dir = self.task_dir(task_id);
        match tokio::fs::remove_dir_all(&dir).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(StoreError::io(&dir, e)),
        }
    }
}

#[async_trait]
impl ScheduleStore for FileStore {
    async fn load_schedule(&self, task_id: u32) -> StoreResult<ScheduleConfig> {
        let path = self.schedule_path(task_id);
        match read_optional(&path).await? {
            Some(content) => {
                let mut config: ScheduleConfig =
                    serde_json::from_str(&content).map_err(|e| StoreError::json(&path, e))?;
                for problem in config.normalize() {
                    tracing::warn!(task = task_id, "Schedule entry dropped: {}", problem);
                }
                Ok(config)
            }
            None => Ok(ScheduleConfig::default()),
        }
    }

    async fn save_schedule(&self, task_id: u32, config: &ScheduleConfig) -> StoreResult<()> {
        let path = self.schedule_path(task_id);
        let bytes = serde_json::to_vec_pretty(config).map_err(|e| StoreError::json(&path, e))?;
        write_atomic(&path, &bytes).await
    }
}

#[async_trait]
impl DropHistory for FileStore {
    async fn append_drop(&self, event: &DropEvent) -> StoreResult<()> {
        let path = self.drops_path(&event.account_name);
        let mut line = serde_json::to_string(event).map_err(|e| StoreError::json(&path, e))?;
        line.push('\n');

        let _guard = self.append_lock.lock().await;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| StoreError::io(parent, e))?;
        }
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await
            .map_err(|e| StoreError::io(&path, e))?;
        file.write_all(line.as_bytes())
            .await
            .map_err(|e| StoreError::io(&path, e))?;
        file.flush().await.map_err(|e| StoreError::io(&path, e))
    }

    async fn load_drops(&self, account: &str) -> StoreResult<Vec<DropEvent>> {
        let path = self.drops_path(account);
        let Some(content) = read_optional(&path).await? else {
            return Ok(Vec::new());
        };

        content
            .lines()
            .filter(|line| !line.trim().is_empty())
            .map(|line| serde_json::from_str(line).map_err(|e| StoreError::json(&path, e)))
            .collect()
    }
}

#[async_trait]
impl StatisticsProvider for FileStore {
    async fn for_task(&self, task_id: u32) -> Arc<dyn StatisticsSink> {
        Arc::new(FileStatistics::load(self.statistics_path(task_id)).await)
    }
}
