//! Uptime summaries derived from transition history.
//!
//! A span ending at `now` is cut into equal buckets. Each bucket reports the
//! status in effect at its end: the latest transition at or before that
//! instant. Buckets that precede the first recorded transition are
//! [`BucketStatus::Missing`].

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::StateResult;
use crate::store::StateStore;
use crate::types::HistoryEntry;

/// Time range covered by a summary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UptimeSpan {
    /// 60 one-minute buckets.
    Hour,
    /// 24 one-hour buckets.
    Day,
    /// 7 one-day buckets.
    Week,
    /// 30 one-day buckets.
    Month,
}

impl UptimeSpan {
    /// Width of one bucket in seconds.
    pub fn bucket_secs(self) -> u64 {
        match self {
            UptimeSpan::Hour => 60,
            UptimeSpan::Day => 60 * 60,
            UptimeSpan::Week | UptimeSpan::Month => 24 * 60 * 60,
        }
    }

    pub fn bucket_count(self) -> u64 {
        match self {
            UptimeSpan::Hour => 60,
            UptimeSpan::Day => 24,
            UptimeSpan::Week => 7,
            UptimeSpan::Month => 30,
        }
    }
}

impl FromStr for UptimeSpan {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "hour" | "1h" => Ok(UptimeSpan::Hour),
            "day" | "24h" => Ok(UptimeSpan::Day),
            "week" | "7d" => Ok(UptimeSpan::Week),
            "month" | "30d" => Ok(UptimeSpan::Month),
            other => Err(format!("unknown uptime span: {other} (expected hour, day, week or month)")),
        }
    }
}

impl fmt::Display for UptimeSpan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            UptimeSpan::Hour => "hour",
            UptimeSpan::Day => "day",
            UptimeSpan::Week => "week",
            UptimeSpan::Month => "month",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BucketStatus {
    Online,
    Offline,
    Missing,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct UptimeBucket {
    /// Unix timestamp (seconds), exclusive.
    pub start: u64,
    /// Unix timestamp (seconds), inclusive.
    pub end: u64,
    pub status: BucketStatus,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UptimeSummary {
    pub span: UptimeSpan,
    /// Oldest bucket first.
    pub buckets: Vec<UptimeBucket>,
}

impl UptimeSummary {
    /// Summarize `history` (sorted oldest first) over `span` ending at `now`.
    pub fn compute(history: &[HistoryEntry], span: UptimeSpan, now: u64) -> Self {
        let width = span.bucket_secs();
        let count = span.bucket_count();
        let buckets = (0..count)
            .map(|i| {
                let end = now.saturating_sub((count - 1 - i) * width);
                let idx = history.partition_point(|e| e.at <= end);
                let status = match idx {
                    0 => BucketStatus::Missing,
                    n if history[n - 1].online => BucketStatus::Online,
                    _ => BucketStatus::Offline,
                };
                UptimeBucket {
                    start: end.saturating_sub(width),
                    end,
                    status,
                }
            })
            .collect();
        Self { span, buckets }
    }

    /// Share of known buckets that were online, in percent.
    ///
    /// `None` when every bucket is missing.
    pub fn uptime_percent(&self) -> Option<f64> {
        let known = self
            .buckets
            .iter()
            .filter(|b| b.status != BucketStatus::Missing)
            .count();
        if known == 0 {
            return None;
        }
        let online = self
            .buckets
            .iter()
            .filter(|b| b.status == BucketStatus::Online)
            .count();
        Some(online as f64 * 100.0 / known as f64)
    }
}

impl StateStore {
    /// Uptime summary of one target over `span` ending at `now`.
    pub fn uptime_summary(
        &self,
        target_id: &str,
        span: UptimeSpan,
        now: u64,
    ) -> StateResult<UptimeSummary> {
        let history = self.list_history(target_id)?;
        Ok(UptimeSummary::compute(&history, span, now))
    }
}
