//! Account lifecycle state machine
//!
//! ```text
//!   Disabled            Ready ──begin_start──▶ Starting ──activate──▶ Active
//!                         ▲                       │                    │
//!                         └────── fail_start ─────┘                    │
//!                         ▲                                            │
//!                         └── CoolingDown ◀──────── complete ──────────┘
//! ```
//!
//! `Stopped` is reported for enabled accounts while their worker is not running.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use super::{AccountRecord, ACTION_FARMING, ACTION_NONE, ACTION_STARTING};

/// Derived lifecycle state of an account
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AccountState {
    Disabled,
    Ready,
    Starting,
    Active,
    CoolingDown,
    Stopped,
}

impl fmt::Display for AccountState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Disabled => "disabled",
            Self::Ready => "ready",
            Self::Starting => "starting",
            Self::Active => "active",
            Self::CoolingDown => "cooling-down",
            Self::Stopped => "stopped",
        };
        f.write_str(label)
    }
}

impl AccountRecord {
    /// Any transient flag indicating a session in flight
    pub fn has_activity(&self) -> bool {
        self.idle_now || self.is_running || self.current_session_id.is_some()
    }

    /// Remaining cool-down, `None` if the pause window has elapsed
    pub fn cooldown_remaining(&self, now: DateTime<Utc>, pause: Duration) -> Option<Duration> {
        let last = self.last_start_time?;
        let elapsed = now - last;
        if elapsed >= pause {
            None
        } else {
            Some(pause - elapsed)
        }
    }

    /// Whether the account may be placed in the ready queue
    pub fn is_eligible(&self, now: DateTime<Utc>, pause: Duration) -> bool {
        self.enabled
            && self.has_auth_material()
            && !self.idle_now
            && !self.is_running
            && self.current_session_id.is_none()
            && self.cooldown_remaining(now, pause).is_none()
    }

    /// Derive the lifecycle state while the owning worker runs
    pub fn state(&self, now: DateTime<Utc>, pause: Duration) -> AccountState {
        if !self.enabled {
            AccountState::Disabled
        } else if self.idle_now {
            AccountState::Active
        } else if self.is_running || self.current_session_id.is_some() {
            AccountState::Starting
        } else if self.cooldown_remaining(now, pause).is_some() {
            AccountState::CoolingDown
        } else {
            AccountState::Ready
        }
    }

    /// Ready → Starting. Returns the new correlation id.
    pub fn begin_start(&mut self) -> Uuid {
        let session_id = Uuid::new_v4();
        self.is_running = true;
        self.idle_now = false;
        self.action = ACTION_STARTING.to_string();
        self.current_session_id = Some(session_id);
        session_id
    }

    /// Starting → Active
    pub fn activate(&mut self, now: DateTime<Utc>) {
        self.idle_now = true;
        self.is_running = true;
        self.action = ACTION_FARMING.to_string();
        self.last_start_time = Some(now);
    }

    /// Starting → Ready. `last_start_time` is left alone so the account is
    /// immediately eligible again.
    pub fn fail_start(&mut self) {
        self.reset_transient();
    }

    /// Active → Ready, starting the cool-down window.
    ///
    /// Returns `true` if the account was active. A session that never
    /// became active is treated like a failed start.
    pub fn complete(&mut self, now: DateTime<Utc>) -> bool {
        let was_active = self.idle_now;
        if was_active {
            self.last_start_time = Some(now);
        }
        self.reset_transient();
        was_active
    }

    /// Clear every transient flag
    pub fn reset_transient(&mut self) {
        self.idle_now = false;
        self.is_running = false;
        self.action = ACTION_NONE.to_string();
        self.current_session_id = None;
    }
}
