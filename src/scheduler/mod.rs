//! Admission-controlled account scheduling
//!
//! This module turns a pool of accounts into a steady stream of sessions
//! without ever exceeding a parallel limit or starting two sessions closer
//! together than the configured spacing.
//!
//! # Overview
//!
//! Each task owns one [`AccountWorker`] and one [`ScheduleEngine`]. The
//! worker admits accounts oldest-first, keeps the active count honest with a
//! periodic reconciliation, and tears everything down within a bounded time
//! on `stop()`. The engine starts and stops the worker on daily and one-time
//! schedule entries. Drops reported by sessions are routed through the
//! [`DropRegistry`] to the statistics of the owning task.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │                       TaskManager                        │
//! │                                                          │
//! │  ┌─────────────── Task 1 ───────────────┐                │
//! │  │ ScheduleEngine ──start/stop──▶ Worker │  ...  Task N  │
//! │  │   (minute tick)        admission tick │               │
//! │  │                   reconciliation tick │               │
//! │  └──────────────────────┬───────────────┘                │
//! │                         │ sessions report drops          │
//! │                         ▼                                │
//! │                   DropRegistry ──▶ history + task stats  │
//! └──────────────────────────────────────────────────────────┘
//! ```
//!
//! # Account Lifecycle
//!
//! | State | Flags | Leaves via |
//! |-------|-------|------------|
//! | Ready | none | admission |
//! | Starting | `is_running` | connect ok → Active, connect failed → Ready |
//! | Active | `is_running`, `idle_now` | duration elapsed or stop → CoolingDown |
//! | CoolingDown | `last_start_time` recent | pause elapsed → Ready |
//!
//! # Example
//!
//! ```ignore
//! use dropler::scheduler::{AccountWorker, WorkerDeps};
//!
//! let worker = AccountWorker::new(1, settings, deps);
//! worker.start().await?;
//! // ...
//! let report = worker.stop().await;
//! ```

pub mod error;
pub mod registry;
pub mod schedule;
pub mod task;
pub mod trigger;
pub mod worker;

pub use error::{SchedulerError, SchedulerResult};
pub use registry::DropRegistry;
pub use schedule::{OneTimeAction, ScheduleAction, ScheduleConfig, ScheduleMatch, TimeInterval};
pub use task::{Task, TaskManager, TaskServices};
pub use trigger::{ScheduleEngine, ScheduleEvent, ScheduleTarget, TickOutcome};
pub use worker::{AccountWorker, RefreshSummary, StopReport, WorkerDeps};
