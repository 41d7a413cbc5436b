//! Record types for the upwatch state store.
//!
//! These types represent the persisted state of monitored targets and their
//! transition history. All types are serializable to/from JSON for storage
//! in redb tables.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use upwatch_core::TargetConfig;

/// Unique identifier for a monitored target.
pub type TargetId = String;

/// Settings key holding the notification template.
pub const SETTING_NOTIFICATION_TEMPLATE: &str = "notification_template";

// ── Target ────────────────────────────────────────────────────────

/// An application whose reachability is monitored.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MonitoredTarget {
    pub id: TargetId,
    pub name: String,
    /// URL shown in notifications, and probed when no `check_url` is set.
    pub public_url: String,
    /// Alternative URL to probe instead of `public_url`.
    pub check_url: Option<String>,
    /// Per-target debounce threshold, overriding the global one.
    pub min_downtime_seconds: Option<u64>,
    /// Last confirmed status. Only the monitor flips this.
    pub online: bool,
}

impl MonitoredTarget {
    /// Build a target from its config entry, carrying over a known status.
    pub fn from_config(config: &TargetConfig, online: bool) -> Self {
        Self {
            id: config.id.clone(),
            name: config.name.clone(),
            public_url: config.public_url.clone(),
            check_url: config.check_url.clone(),
            min_downtime_seconds: config.min_downtime_seconds,
            online,
        }
    }

    /// The URL actually probed: `check_url` when non-blank, else `public_url`.
    pub fn effective_check_url(&self) -> &str {
        match self.check_url.as_deref().map(str::trim) {
            Some(url) if !url.is_empty() => url,
            _ => &self.public_url,
        }
    }

    /// Debounce threshold for this target.
    pub fn min_downtime(&self, global: Duration) -> Duration {
        self.min_downtime_seconds
            .map(Duration::from_secs)
            .unwrap_or(global)
    }
}

// ── History ───────────────────────────────────────────────────────

/// One confirmed status transition. Never updated once written.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct HistoryEntry {
    pub online: bool,
    /// Unix timestamp (seconds) of the transition.
    pub at: u64,
}

/// A history entry together with the target it belongs to.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct HistoryRecord {
    pub target_id: TargetId,
    #[serde(flatten)]
    pub entry: HistoryEntry,
}

impl HistoryRecord {
    /// Build the composite key for the history table.
    ///
    /// `seq` disambiguates transitions recorded within the same second.
    pub fn table_key(&self, seq: u16) -> String {
        format!("{}{:020}:{seq:04}", history_prefix(&self.target_id), self.entry.at)
    }
}

/// Key prefix shared by every history row of a target.
pub fn history_prefix(target_id: &str) -> String {
    format!("{target_id}:")
}
