//! Repository traits describing persistence adapters.

use async_trait::async_trait;
use thiserror::Error;
use time::OffsetDateTime;

use crate::domain::entities::Priority;
use crate::domain::types::{QueueIntent, QueueItem, SummaryRecord};

#[derive(Debug, Error)]
pub enum RepoError {
    #[error("persistence error: {0}")]
    Persistence(String),
    #[error("resource not found")]
    NotFound,
    #[error("invalid input: {message}")]
    InvalidInput { message: String },
    #[error("integrity error: {message}")]
    Integrity { message: String },
    #[error("database busy")]
    Timeout,
}

impl RepoError {
    pub fn from_persistence(err: impl std::fmt::Display) -> Self {
        Self::Persistence(err.to_string())
    }
}

/// Durable set of pending URLs keyed by URL.
///
/// Every operation is atomic with respect to other processes sharing the
/// same store: change triggers enqueue while the worker drains.
#[async_trait]
pub trait QueueRepo: Send + Sync {
    /// Insert or overwrite the entry for `url`. A second enqueue replaces
    /// priority and intent, clears any error annotation and keeps the
    /// original FIFO position.
    async fn enqueue(
        &self,
        url: &str,
        priority: Priority,
        intent: QueueIntent,
    ) -> Result<(), RepoError>;

    /// Claim the most urgent pending entry (priority ascending, then FIFO).
    ///
    /// The entry stays persisted until it is deleted, so a crash after the
    /// claim does not lose it; see [`QueueRepo::release_claims`].
    async fn next_url(&self) -> Result<Option<QueueItem>, RepoError>;

    /// Remove an entry. Removing a missing entry is not an error.
    async fn delete_by_url(&self, url: &str) -> Result<(), RepoError>;

    /// Attach a diagnostic to an entry without removing or reordering it.
    async fn mark_error(&self, url: &str, message: &str) -> Result<(), RepoError>;

    /// Finish a claimed entry. Deletes it unless it was re-enqueued after the
    /// claim, in which case the claim is released so the newer change is
    /// rebuilt. Returns `true` when the entry was deleted.
    async fn complete(&self, item: &QueueItem) -> Result<bool, RepoError>;

    /// Release claims left behind by a worker that died mid-build.
    async fn release_claims(&self) -> Result<u64, RepoError>;

    /// Clear all error annotations so failed URLs are eligible again.
    async fn retry_errored(&self) -> Result<u64, RepoError>;

    /// Number of entries that are neither claimed nor errored.
    async fn pending_count(&self) -> Result<u64, RepoError>;

    /// All entries in dequeue order.
    async fn list(&self) -> Result<Vec<QueueItem>, RepoError>;
}

/// Figures written for one drain cycle.
#[derive(Debug, Clone, PartialEq)]
pub struct SummaryUpdate {
    pub pid: u32,
    pub pages_built: u64,
    pub total_time_secs: f64,
    pub average_time_secs: f64,
    pub memory_usage_mb: f64,
    pub finished: bool,
}

#[async_trait]
pub trait SummaryRepo: Send + Sync {
    /// Insert a new summary row, or update the row `id` when given. Returns the row id.
    async fn record_summary(
        &self,
        id: Option<i64>,
        summary: &SummaryUpdate,
    ) -> Result<i64, RepoError>;

    /// Delete summaries last written before `cutoff`.
    async fn prune_summaries(&self, cutoff: OffsetDateTime) -> Result<u64, RepoError>;

    /// Most recent summaries first.
    async fn list_summaries(&self, limit: u32) -> Result<Vec<SummaryRecord>, RepoError>;
}
