//! Session client interface
//!
//! A session client holds one account's remote session open: connect and
//! authenticate, enter idle, run a periodic check, disconnect. The protocol
//! itself lives outside this crate; the worker only depends on the traits
//! here. [`dry_run::DryRunSessions`] provides a simulated implementation.

pub mod dry_run;

use async_trait::async_trait;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;

use crate::account::AccountRecord;
use crate::models::DropEvent;
use crate::scheduler::registry::DropRegistry;

pub use dry_run::{DisconnectBehavior, DryRunSessions};

/// Outcome of `connect_and_authenticate`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SessionResult {
    Ok,
    InvalidCredentials,
    NoConnection,
    RateLimited,
    Fail,
}

impl SessionResult {
    pub fn is_ok(&self) -> bool {
        matches!(self, Self::Ok)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Ok => "ok",
            Self::InvalidCredentials => "invalid_credentials",
            Self::NoConnection => "no_connection",
            Self::RateLimited => "rate_limited",
            Self::Fail => "fail",
        }
    }
}

impl fmt::Display for SessionResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How a session ended, as reported to the worker
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionOutcome {
    /// Session duration elapsed
    Expired,
    /// Cooperative cancellation (stop requested)
    Cancelled,
    /// `connect_and_authenticate` returned a non-success result
    Failed(SessionResult),
}

/// Session client errors
#[derive(Debug, Error)]
pub enum SessionError {
    /// Client could not be constructed for the account
    #[error("Failed to create session for '{account}': {reason}")]
    Create { account: String, reason: String },

    /// Disconnect did not complete cleanly
    #[error("Disconnect failed: {0}")]
    Disconnect(String),
}

/// One account's remote session
///
/// `disconnect` must be safe to call more than once.
#[async_trait]
pub trait SessionClient: Send + Sync {
    async fn connect_and_authenticate(&self, account: &AccountRecord) -> SessionResult;

    async fn begin_periodic_check(&self, interval_minutes: u64);

    async fn disconnect(&self) -> Result<(), SessionError>;
}

/// Creates a session client per admitted account
pub trait SessionFactory: Send + Sync {
    fn create(
        &self,
        account: &AccountRecord,
        drops: DropReporter,
    ) -> Result<Arc<dyn SessionClient>, SessionError>;
}

/// Handle a session client uses to report drops for its account
#[derive(Clone)]
pub struct DropReporter {
    registry: Arc<DropRegistry>,
    account: String,
}

impl DropReporter {
    pub fn new(registry: Arc<DropRegistry>, account: impl Into<String>) -> Self {
        Self {
            registry,
            account: account.into(),
        }
    }

    pub fn account(&self) -> &str {
        &self.account
    }

    pub async fn report(&self, game_id: u32, item_def_id: &str) -> DropEvent {
        self.registry
            .record_drop(&self.account, game_id, item_def_id)
            .await
    }
}

impl fmt::Debug for DropReporter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DropReporter")
            .field("account", &self.account)
            .finish()
    }
}
