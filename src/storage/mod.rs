//! Storage layer for account records, schedules and drop history
//!
//! This module provides:
//! - [`AccountStore`] - durable account records per task
//! - [`ScheduleStore`] - persisted schedule configuration per task
//! - [`DropHistory`] - append-only per-account drop log
//! - [`FileStore`] - JSON files under a data directory
//! - [`MemoryStore`] - in-process store for tests and embedding

pub mod file;
pub mod memory;

use async_trait::async_trait;
use std::path::PathBuf;
use thiserror::Error;

use crate::account::{AccountRecord, Credential};
use crate::models::DropEvent;
use crate::scheduler::schedule::ScheduleConfig;

pub use file::FileStore;
pub use memory::MemoryStore;

/// Storage errors
#[derive(Debug, Error)]
pub enum StoreError {
    /// Filesystem failure
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Stored document could not be (de)serialized
    #[error("Malformed document {path}: {source}")]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    /// Backend refused the operation
    #[error("Store unavailable: {0}")]
    Unavailable(String),
}

impl StoreError {
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    pub fn json(path: impl Into<PathBuf>, source: serde_json::Error) -> Self {
        Self::Json {
            path: path.into(),
            source,
        }
    }

    /// Transient failures worth retrying on the next refresh
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Self::Io { .. } | Self::Unavailable(_))
    }
}

/// Result type for store operations
pub type StoreResult<T> = Result<T, StoreError>;

/// Durable account records
///
/// `save` must be safe to call concurrently for different records.
#[async_trait]
pub trait AccountStore: Send + Sync {
    async fn load_all(&self, task_id: u32) -> StoreResult<Vec<AccountRecord>>;

    async fn save(&self, task_id: u32, record: &AccountRecord) -> StoreResult<()>;

    /// Credential list for the task, empty when none exists
    async fn load_credentials(&self, _task_id: u32) -> StoreResult<Vec<Credential>> {
        Ok(Vec::new())
    }

    /// Auth material bound to `login`, if any
    async fn load_auth_material(&self, _task_id: u32, _login: &str) -> StoreResult<Option<String>> {
        Ok(None)
    }

    /// Drop everything stored for a deleted task
    async fn remove_task(&self, _task_id: u32) -> StoreResult<()> {
        Ok(())
    }
}

/// Persisted schedule configuration
#[async_trait]
pub trait ScheduleStore: Send + Sync {
    /// Missing configuration yields the default (schedule disabled)
    async fn load_schedule(&self, task_id: u32) -> StoreResult<ScheduleConfig>;

    async fn save_schedule(&self, task_id: u32, config: &ScheduleConfig) -> StoreResult<()>;
}

/// Append-only drop history keyed by account
#[async_trait]
pub trait DropHistory: Send + Sync {
    async fn append_drop(&self, event: &DropEvent) -> StoreResult<()>;

    async fn load_drops(&self, account: &str) -> StoreResult<Vec<DropEvent>>;
}

/// File-name safe form of an account key.
///
/// Bytes outside `[A-Za-z0-9._-]` are percent-escaped, so distinct keys never
/// share a file.
pub(crate) fn file_stem(key: &str) -> String {
    let mut stem = String::with_capacity(key.len());
    for byte in key.bytes() {
        if byte.is_ascii_alphanumeric() || matches!(byte, b'-' | b'_' | b'.') {
            stem.push(char::from(byte));
        } else {
            stem.push_str(&format!("%{byte:02X}"));
        }
    }
    stem
}
