//! Configuration management for dropler
//!
//! This module handles loading and validating configuration from environment variables
//! and TOML files. Worker pacing values that are out of range are corrected in place
//! by [`WorkerSettings::clamp`] rather than rejected.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Minimum spacing between two admitted session starts
pub const MIN_START_SPACING_SECS: u64 = 10;

/// Upper bound for every minutes-valued pacing setting (one year)
pub const MAX_MINUTES: u64 = 525_600;

/// Upper bound for every seconds-valued pacing setting (one day)
pub const MAX_SECS: u64 = 86_400;

/// Period of the active-count reconciliation tick
pub const RECONCILE_INTERVAL_SECS: u64 = 10;

/// Period of the schedule engine tick
pub const SCHEDULE_TICK_SECS: u64 = 60;

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Admission and session pacing
    #[serde(default)]
    pub worker: WorkerSettings,

    /// On-disk layout
    #[serde(default)]
    pub storage: StorageConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Per-task worker pacing
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerSettings {
    /// Maximum number of concurrent sessions
    pub parallel_limit: usize,

    /// Minimum seconds between two admitted starts
    pub start_spacing_secs: u64,

    /// Cool-down after a session ends before the account may start again
    pub pause_between_runs_minutes: u64,

    /// How long a session is held open
    pub session_duration_minutes: u64,

    /// Interval handed to the session client for its periodic reward check
    pub check_interval_minutes: u64,

    /// Upper bound on waiting for disconnects during stop
    pub shutdown_timeout_secs: u64,
}

/// Storage configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Root directory holding `task_<n>` folders and drop history
    pub data_dir: PathBuf,

    /// Delay between task starts in `start_all`
    pub start_stagger_secs: u64,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,

    /// Log format (text, json)
    pub format: String,
}

impl Default for WorkerSettings {
    fn default() -> Self {
        Self {
            parallel_limit: 100,
            start_spacing_secs: 30,
            pause_between_runs_minutes: 90,
            session_duration_minutes: 80,
            check_interval_minutes: 10,
            shutdown_timeout_secs: 10,
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("data"),
            start_stagger_secs: 5,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: String::from("info"),
            format: String::from("text"),
        }
    }
}

impl WorkerSettings {
    /// Correct out-of-range values in place.
    ///
    /// Returns one human-readable line per correction so the caller can log it.
    pub fn clamp(&mut self) -> Vec<String> {
        let mut corrections = Vec::new();

        if self.start_spacing_secs < MIN_START_SPACING_SECS {
            corrections.push(format!(
                "start_spacing_secs {} below minimum, using {}",
                self.start_spacing_secs, MIN_START_SPACING_SECS
            ));
            self.start_spacing_secs = MIN_START_SPACING_SECS;
        }

        if self.start_spacing_secs > MAX_SECS {
            corrections.push(format!(
                "start_spacing_secs {} above maximum, using {}",
                self.start_spacing_secs, MAX_SECS
            ));
            self.start_spacing_secs = MAX_SECS;
        }

        for (name, value) in [
            ("pause_between_runs_minutes", &mut self.pause_between_runs_minutes),
            ("session_duration_minutes", &mut self.session_duration_minutes),
            ("check_interval_minutes", &mut self.check_interval_minutes),
        ] {
            if *value > MAX_MINUTES {
                corrections.push(format!("{name} {value} above maximum, using {MAX_MINUTES}"));
                *value = MAX_MINUTES;
            }
        }

        if self.parallel_limit == 0 {
            corrections.push("parallel_limit 0 is invalid, using 1".to_string());
            self.parallel_limit = 1;
        }

        if self.check_interval_minutes == 0 {
            corrections.push("check_interval_minutes 0 is invalid, using 1".to_string());
            self.check_interval_minutes = 1;
        }

        if self.session_duration_minutes < self.check_interval_minutes {
            corrections.push(format!(
                "session_duration_minutes {} shorter than check interval, using {}",
                self.session_duration_minutes, self.check_interval_minutes
            ));
            self.session_duration_minutes = self.check_interval_minutes;
        }

        if self.shutdown_timeout_secs == 0 {
            corrections.push("shutdown_timeout_secs 0 is invalid, using 1".to_string());
            self.shutdown_timeout_secs = 1;
        }
        if self.shutdown_timeout_secs > MAX_SECS {
            corrections.push(format!(
                "shutdown_timeout_secs {} above maximum, using {}",
                self.shutdown_timeout_secs, MAX_SECS
            ));
            self.shutdown_timeout_secs = MAX_SECS;
        }

        corrections
    }

    /// Spacing between starts as Duration
    #[must_use]
    pub fn start_spacing(&self) -> Duration {
        Duration::from_secs(self.start_spacing_secs)
    }

    /// Session length as Duration
    #[must_use]
    pub fn session_duration(&self) -> Duration {
        Duration::from_secs(self.session_duration_minutes.min(MAX_MINUTES) * 60)
    }

    /// Cool-down window as a chrono duration, for comparison with record timestamps
    #[must_use]
    pub fn pause_between_runs(&self) -> chrono::Duration {
        chrono::Duration::minutes(self.pause_between_runs_minutes.min(MAX_MINUTES) as i64)
    }

    /// Bounded wait for disconnects as Duration
    #[must_use]
    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.shutdown_timeout_secs)
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|v| v.parse::<T>().ok())
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();
        config.apply_env();
        Ok(config)
    }

    /// Load configuration from a file
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: Self = toml::from_str(&content)
            .with_context(|| format!("Failed to parse TOML config file: {}", path.display()))?;

        Ok(config)
    }

    /// Load from `path` when given, otherwise defaults; environment overrides both.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        config.apply_env();
        config.validate()?;
        Ok(config)
    }

    fn apply_env(&mut self) {
        if let Some(v) = env_parse("DROPLER_PARALLEL_LIMIT") {
            self.worker.parallel_limit = v;
        }
        if let Some(v) = env_parse("DROPLER_START_SPACING_SECS") {
            self.worker.start_spacing_secs = v;
        }
        if let Some(v) = env_parse("DROPLER_PAUSE_MINUTES") {
            self.worker.pause_between_runs_minutes = v;
        }
        if let Some(v) = env_parse("DROPLER_SESSION_MINUTES") {
            self.worker.session_duration_minutes = v;
        }
        if let Some(v) = env_parse("DROPLER_CHECK_INTERVAL_MINUTES") {
            self.worker.check_interval_minutes = v;
        }
        if let Ok(dir) = std::env::var("DROPLER_DATA_DIR") {
            self.storage.data_dir = PathBuf::from(dir);
        }
        if let Ok(level) = std::env::var("DROPLER_LOG_LEVEL") {
            self.logging.level = level;
        }
        if let Ok(format) = std::env::var("DROPLER_LOG_FORMAT") {
            self.logging.format = format;
        }
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<()> {
        if self.storage.data_dir.as_os_str().is_empty() {
            anyhow::bail!("storage.data_dir must not be empty");
        }

        if !matches!(self.logging.format.as_str(), "text" | "json") {
            anyhow::bail!(
                "logging.format must be 'text' or 'json', got '{}'",
                self.logging.format
            );
        }

        Ok(())
    }

    /// Delay between task starts as Duration
    #[must_use]
    pub fn start_stagger(&self) -> Duration {
        Duration::from_secs(self.storage.start_stagger_secs)
    }
}
