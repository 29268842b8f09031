//! Shared domain types aligned with persisted queue and summary rows.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use super::entities::Priority;
use super::error::DomainError;

/// What the worker must do with a queued URL.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueueIntent {
    /// Regenerate the artifact.
    Update,
    /// Remove the artifact and its stale companion.
    Delete,
}

impl QueueIntent {
    pub fn as_str(self) -> &'static str {
        match self {
            QueueIntent::Update => "update",
            QueueIntent::Delete => "delete",
        }
    }
}

impl fmt::Display for QueueIntent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for QueueIntent {
    type Err = DomainError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "update" => Ok(QueueIntent::Update),
            "delete" => Ok(QueueIntent::Delete),
            other => Err(DomainError::validation(format!(
                "unknown queue intent `{other}`"
            ))),
        }
    }
}

/// A pending URL in the durable queue.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct QueueItem {
    pub url: String,
    pub priority: Priority,
    pub intent: QueueIntent,
    #[serde(with = "time::serde::rfc3339")]
    pub enqueued_at: OffsetDateTime,
    pub error_message: Option<String>,
    pub attempts: i64,
    /// Bumped on every enqueue; used to detect re-enqueues during a build.
    pub version: i64,
    pub claimed: bool,
}

/// One persisted row describing a worker drain cycle.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SummaryRecord {
    pub id: i64,
    pub pid: u32,
    pub pages_built: u64,
    pub total_time_secs: f64,
    pub average_time_secs: f64,
    pub memory_usage_mb: f64,
    pub finished: bool,
    #[serde(with = "time::serde::rfc3339")]
    pub timestamp: OffsetDateTime,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn intent_round_trips_through_str() {
        for intent in [QueueIntent::Update, QueueIntent::Delete] {
            assert_eq!(intent.as_str().parse::<QueueIntent>().ok(), Some(intent));
        }
    }

    #[test]
    fn unknown_intent_is_rejected() {
        assert!("purge".parse::<QueueIntent>().is_err());
    }
}
