//! Account records and their per-account lifecycle
//!
//! An [`AccountRecord`] is the durable unit owned by one worker. Its transient
//! fields (`idle_now`, `is_running`, `action`, `current_session_id`) encode the
//! lifecycle state; the transition rules live in [`lifecycle`], the
//! oldest-first ready queue in [`queue`] and credential-list parsing in
//! [`credentials`].

pub mod credentials;
pub mod lifecycle;
pub mod queue;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub use credentials::{parse_credentials, Credential};
pub use lifecycle::AccountState;
pub use queue::ReadyQueue;

/// Status label for an account with no session
pub const ACTION_NONE: &str = "none";
/// Status label between dequeue and connect
pub const ACTION_STARTING: &str = "starting";
/// Status label while the session client connects and authenticates
pub const ACTION_CONNECTING: &str = "connecting";
/// Status label for an active session
pub const ACTION_FARMING: &str = "Farming";

fn default_enabled() -> bool {
    true
}

fn default_action() -> String {
    ACTION_NONE.to_string()
}

/// Durable per-account record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccountRecord {
    /// Login name; identity is case-insensitive (see [`AccountRecord::key`])
    pub name: String,

    /// Display name
    #[serde(default)]
    pub alias: String,

    /// Credential material handed to the session client
    #[serde(default)]
    pub password: String,

    #[serde(default = "default_enabled")]
    pub enabled: bool,

    /// Auth material; accounts without it are never admitted
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub shared_secret: Option<String>,

    #[serde(default)]
    pub last_start_time: Option<DateTime<Utc>>,

    #[serde(default)]
    pub idle_now: bool,

    #[serde(default)]
    pub is_running: bool,

    #[serde(default = "default_action")]
    pub action: String,

    #[serde(default)]
    pub current_session_id: Option<Uuid>,
}

impl AccountRecord {
    /// Create an enabled record with no history
    pub fn new(name: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            alias: name.clone(),
            name,
            password: String::new(),
            enabled: true,
            shared_secret: None,
            last_start_time: None,
            idle_now: false,
            is_running: false,
            action: default_action(),
            current_session_id: None,
        }
    }

    pub fn with_alias(mut self, alias: impl Into<String>) -> Self {
        self.alias = alias.into();
        self
    }

    pub fn with_password(mut self, password: impl Into<String>) -> Self {
        self.password = password.into();
        self
    }

    pub fn with_shared_secret(mut self, secret: impl Into<String>) -> Self {
        self.shared_secret = Some(secret.into());
        self
    }

    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    pub fn with_last_start_time(mut self, at: DateTime<Utc>) -> Self {
        self.last_start_time = Some(at);
        self
    }

    /// Case-insensitive identity
    pub fn key(&self) -> String {
        normalize_name(&self.name)
    }

    /// Alias if set, login otherwise
    pub fn display_name(&self) -> &str {
        if self.alias.is_empty() {
            &self.name
        } else {
            &self.alias
        }
    }

    pub fn has_auth_material(&self) -> bool {
        self.shared_secret
            .as_deref()
            .is_some_and(|secret| !secret.trim().is_empty())
    }
}

/// Normalize an account name into its map key
pub fn normalize_name(name: &str) -> String {
    name.trim().to_lowercase()
}
