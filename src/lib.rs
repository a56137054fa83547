//! dropler - Admission-controlled account session scheduler
//!
//! Starts long-running sessions for a pool of accounts under a parallel limit
//! and a minimum spacing between starts, cools accounts down between runs,
//! and starts or stops whole tasks on a daily or one-time schedule.
//!
//! # Architecture
//!
//! The library is organized into several modules:
//!
//! - [`config`] - Configuration management and settings
//! - [`account`] - Account records, lifecycle rules and the ready queue
//! - [`scheduler`] - Workers, schedule engine, drop registry and task manager
//! - [`session`] - Session client traits and the dry-run implementation
//! - [`storage`] - Persistence traits with file and in-memory backends
//! - [`stats`] - Per-account statistics
//! - [`metrics`] - Prometheus metrics
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use dropler::config::Config;
//! use dropler::scheduler::{DropRegistry, TaskManager, TaskServices};
//! use dropler::session::DryRunSessions;
//! use dropler::storage::FileStore;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::from_env()?;
//!     let store = Arc::new(FileStore::new(&config.storage.data_dir));
//!     let services = TaskServices {
//!         accounts: store.clone(),
//!         schedules: store.clone(),
//!         sessions: Arc::new(DryRunSessions::new()),
//!         statistics: store.clone(),
//!         registry: Arc::new(DropRegistry::new(store)),
//!     };
//!     let manager = TaskManager::new(services, config.worker.clone());
//!     manager.open_task(1).await?;
//!     manager.start_all().await;
//!     Ok(())
//! }
//! ```

pub mod account;
pub mod config;
pub mod error;
pub mod metrics;
pub mod models;
pub mod scheduler;
pub mod session;
pub mod stats;
pub mod storage;

/// Re-export commonly used types
pub mod prelude {
    pub use crate::account::{AccountRecord, AccountState};
    pub use crate::config::{Config, WorkerSettings};
    pub use crate::error::{Error, ErrorCategory, Result};
    pub use crate::models::{DropEvent, OnlineStatus};
    pub use crate::scheduler::{
        AccountWorker, DropRegistry, ScheduleConfig, ScheduleEngine, StopReport, TaskManager,
        TaskServices, WorkerDeps,
    };
    pub use crate::session::{SessionClient, SessionFactory, SessionOutcome, SessionResult};
    pub use crate::storage::{AccountStore, DropHistory, FileStore, MemoryStore, ScheduleStore};
}

// Direct re-exports for convenience
pub use account::AccountRecord;
pub use models::{DropEvent, OnlineStatus};
