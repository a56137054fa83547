//! Shared value types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Online/offline status reported to the statistics sink
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OnlineStatus {
    Online,
    Offline,
}

impl OnlineStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Online => "Online",
            Self::Offline => "Offline",
        }
    }
}

impl fmt::Display for OnlineStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A reward drop observed on an account. Immutable once created.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DropEvent {
    pub account_name: String,
    pub game_id: u32,
    pub item_def_id: String,
    pub timestamp: DateTime<Utc>,
}

impl DropEvent {
    /// Create a drop event stamped with the current time
    pub fn new(account_name: impl Into<String>, game_id: u32, item_def_id: impl Into<String>) -> Self {
        Self {
            account_name: account_name.into(),
            game_id,
            item_def_id: item_def_id.into(),
            timestamp: Utc::now(),
        }
    }

    /// Key used in per-account statistics: `<gameId>_<itemDefId>`
    pub fn stats_key(&self) -> String {
        format!("{}_{}", self.game_id, self.item_def_id)
    }
}
