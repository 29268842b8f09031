//! Static artifact cache.
//!
//! - **Publishing engine**: turns a change event into queued URL writes
//! - **Cache builder**: singleton queue consumer that renders and stores artifacts
//! - **Artifact store**: primary artifact plus stale fallback companion per URL
//! - **Reconciler**: finds artifacts no live entity owns
//!
//! ## Configuration
//!
//! ```toml
//! [cache]
//! directory = "public/cache"
//! extension = "html"
//!
//! [worker]
//! daemon_budget_seconds = 590
//! idle_pause_ms = 200
//! ```

mod config;
mod consumer;
mod keys;
mod lock;
mod planner;
mod reconcile;
mod store;
mod trigger;

pub use config::{CacheConfig, MissingSetting, WorkerConfig};
pub use consumer::{
    CacheBuilder, CacheBuilderDeps, CycleReport, RunMode, RunOptions, RunOutcome, RunReport,
    StopReason, WorkerError,
};
pub use keys::{ArtifactLayout, InvalidUrl, relative_url_path, slash_variants};
pub use lock::{Acquisition, FileLock, LockError, LockGuard, RunLock};
pub use planner::{ChangeSet, FlushPlan, PlannedUrl};
pub use reconcile::{
    ExclusionRules, Orphan, ReconcileError, ReconcileReport, Reconciler, ScanResult, find_orphans,
};
pub use store::{ArtifactError, ArtifactStore, CacheArtifact, WriteOutcome};
pub use trigger::{PendingChanges, PublishingEngine};

pub(crate) mod metric_names {
    pub(crate) use super::consumer::{
        METRIC_BUILD_FAILURES, METRIC_BUILD_MS, METRIC_PAGES_BUILT, METRIC_QUEUE_PENDING,
    };
    pub(crate) use super::reconcile::METRIC_ORPHANS;
    pub(crate) use super::trigger::METRIC_URLS_ENQUEUED;
}

pub(crate) use config::{
    DEFAULT_DAEMON_BUDGET_SECS, DEFAULT_IDLE_PAUSE_MS, DEFAULT_LOCK_FILE_NAME,
    DEFAULT_STALE_MARKER, DEFAULT_STALE_NOTICE, DEFAULT_SUMMARY_RETENTION_DAYS,
};
