//! Error types for the scheduler module

use std::fmt;

/// Result type for scheduler operations
pub type SchedulerResult<T> = Result<T, SchedulerError>;

/// Scheduler-specific errors
#[derive(Debug)]
pub enum SchedulerError {
    /// Periodic tasks could not be armed (no runtime available)
    TimerInit {
        reason: String,
    },

    /// No task registered under this id
    TaskNotFound {
        id: u32,
    },

    /// Task ids start at 1
    InvalidTaskId {
        id: u32,
    },

    /// Invalid HH:MM time or timestamp in a schedule entry
    InvalidTime {
        field: String,
        value: String,
    },

    /// Persistence failed while applying a scheduler operation
    Persistence {
        operation: String,
        reason: String,
    },

    /// Serialization/deserialization error
    SerializationError {
        reason: String,
    },
}

impl fmt::Display for SchedulerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::TimerInit { reason } => {
                write!(f, "Failed to arm scheduler timers: {}", reason)
            }
            Self::TaskNotFound { id } => {
                write!(f, "Task {} not found", id)
            }
            Self::InvalidTaskId { id } => {
                write!(f, "Invalid task id {}. Task ids start at 1", id)
            }
            Self::InvalidTime { field, value } => {
                write!(f, "Invalid time '{}' in '{}'. Expected HH:MM", value, field)
            }
            Self::Persistence { operation, reason } => {
                write!(f, "Persistence error during '{}': {}", operation, reason)
            }
            Self::SerializationError { reason } => {
                write!(f, "Serialization error: {}", reason)
            }
        }
    }
}

impl std::error::Error for SchedulerError {}

impl From<serde_json::Error> for SchedulerError {
    fn from(err: serde_json::Error) -> Self {
        Self::SerializationError {
            reason: err.to_string(),
        }
    }
}

impl From<crate::storage::StoreError> for SchedulerError {
    fn from(err: crate::storage::StoreError) -> Self {
        Self::Persistence {
            operation: "store".to_string(),
            reason: err.to_string(),
        }
    }
}

impl SchedulerError {
    /// Create a timer initialization error
    pub fn timer_init(reason: impl Into<String>) -> Self {
        Self::TimerInit {
            reason: reason.into(),
        }
    }

    /// Create a task not found error
    pub fn task_not_found(id: u32) -> Self {
        Self::TaskNotFound { id }
    }

    /// Create an invalid time error
    pub fn invalid_time(field: impl Into<String>, value: impl Into<String>) -> Self {
        Self::InvalidTime {
            field: field.into(),
            value: value.into(),
        }
    }

    /// Create a persistence error with context
    pub fn persistence(operation: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Persistence {
            operation: operation.into(),
            reason: reason.into(),
        }
    }

    /// Check if the error is recoverable
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Self::Persistence { .. })
    }
}
