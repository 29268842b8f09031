//! Queue consumer that rebuilds artifacts.
//!
//! A singleton worker: it takes the run lock, drains the durable queue one
//! URL at a time, renders every physical variant of the URL, applies the
//! artifact write rule and writes queue state back.

use std::any::Any;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use metrics::{counter, gauge, histogram};
use thiserror::Error;
use time::OffsetDateTime;
use tracing::{debug, error, info, instrument, warn};

use crate::application::content::{ContentSource, SiteScope};
use crate::application::render::{
    RenderError, RenderOverrides, RenderRequest, RenderedPage, Renderer,
};
use crate::application::repos::{QueueRepo, RepoError, SummaryRepo, SummaryUpdate};
use crate::domain::types::{QueueIntent, QueueItem};
use crate::infra::memory::{MemorySampler, delta_mb, to_mb};

use super::config::{MissingSetting, WorkerConfig};
use super::keys::InvalidUrl;
use super::lock::{Acquisition, LockError, RunLock};
use super::store::{ArtifactError, ArtifactStore, CacheArtifact, WriteOutcome};

pub(crate) const METRIC_PAGES_BUILT: &str = "staticpub_pages_built_total";
pub(crate) const METRIC_BUILD_FAILURES: &str = "staticpub_build_failures_total";
pub(crate) const METRIC_BUILD_MS: &str = "staticpub_build_ms";
pub(crate) const METRIC_QUEUE_PENDING: &str = "staticpub_queue_pending";

#[derive(Debug, Error)]
pub enum WorkerError {
    #[error(transparent)]
    Lock(#[from] LockError),
    #[error("queue access failed: {0}")]
    Queue(#[from] RepoError),
    #[error("cache builder is not configured: {0}")]
    Configuration(#[from] MissingSetting),
    /// Unrecoverable failure while building `url`; the entry is already marked errored.
    #[error("fatal error while building `{url}`: {message}")]
    Fatal { url: String, message: String },
}

/// Why a single URL could not be built. Recorded on the queue entry.
#[derive(Debug, Error)]
enum UrlBuildError {
    #[error(transparent)]
    Render(#[from] RenderError),
    #[error(transparent)]
    Artifact(#[from] ArtifactError),
    #[error("content lookup failed: {0}")]
    Content(#[from] RepoError),
    #[error("renderer panicked: {0}")]
    Panic(String),
}

impl From<InvalidUrl> for UrlBuildError {
    fn from(err: InvalidUrl) -> Self {
        Self::Artifact(ArtifactError::from(err))
    }
}

impl UrlBuildError {
    fn is_fatal(&self) -> bool {
        match self {
            UrlBuildError::Render(err) => err.is_fatal(),
            UrlBuildError::Panic(_) => true,
            UrlBuildError::Artifact(_) | UrlBuildError::Content(_) => false,
        }
    }

    fn kind(&self) -> &'static str {
        match self {
            UrlBuildError::Render(_) => "render",
            UrlBuildError::Artifact(ArtifactError::Inconsistency { .. }) => "inconsistency",
            UrlBuildError::Artifact(_) => "artifact",
            UrlBuildError::Content(_) => "content",
            UrlBuildError::Panic(_) => "panic",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunMode {
    /// Exactly one drain cycle.
    Once,
    /// Drain cycles until the wall-clock budget is spent.
    Daemon,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunOptions {
    pub mode: RunMode,
    /// Log one line per built artifact at `info` instead of `debug`.
    pub verbose: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    QueueDrained,
    BuildTimeExceeded,
}

/// Figures for one drain cycle.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CycleReport {
    pub urls_processed: u64,
    pub pages_built: u64,
    pub failures: u64,
    pub summary_id: Option<i64>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RunReport {
    pub cycles: u32,
    pub urls_processed: u64,
    pub pages_built: u64,
    pub failures: u64,
    pub stop: StopReason,
    pub elapsed: Duration,
}

#[derive(Debug)]
pub enum RunOutcome {
    Completed(RunReport),
    /// Another worker holds the lock; nothing was done.
    Conflict { holder: Option<u32> },
}

/// One physical variant of a URL.
#[derive(Debug, Clone, PartialEq, Eq)]
struct BuildTarget {
    path: PathBuf,
    overrides: RenderOverrides,
    /// Swept on delete without being a known variant; absence is not reported.
    swept: bool,
}

/// Collaborators the worker drives.
pub struct CacheBuilderDeps {
    pub queue: Arc<dyn QueueRepo>,
    pub summaries: Arc<dyn SummaryRepo>,
    pub content: Arc<dyn ContentSource>,
    pub renderer: Arc<dyn Renderer>,
    pub lock: Arc<dyn RunLock>,
    pub memory: Arc<dyn MemorySampler>,
}

/// Singleton cache builder.
pub struct CacheBuilder {
    config: WorkerConfig,
    store: ArtifactStore,
    queue: Arc<dyn QueueRepo>,
    summaries: Arc<dyn SummaryRepo>,
    content: Arc<dyn ContentSource>,
    renderer: Arc<dyn Renderer>,
    lock: Arc<dyn RunLock>,
    memory: Arc<dyn MemorySampler>,
}

impl CacheBuilder {
    pub fn new(config: WorkerConfig, store: ArtifactStore, deps: CacheBuilderDeps) -> Self {
        Self {
            config,
            store,
            queue: deps.queue,
            summaries: deps.summaries,
            content: deps.content,
            renderer: deps.renderer,
            lock: deps.lock,
            memory: deps.memory,
        }
    }

    pub fn store(&self) -> &ArtifactStore {
        &self.store
    }

    /// Take the run lock and drain the queue.
    ///
    /// A held lock is not an error: the call returns [`RunOutcome::Conflict`]
    /// immediately and the next scheduled invocation retries.
    #[instrument(skip(self), fields(pid = std::process::id()))]
    pub async fn run(&self, options: RunOptions) -> Result<RunOutcome, WorkerError> {
        let guard = match self.lock.try_acquire()? {
            Acquisition::Acquired(guard) => guard,
            Acquisition::Conflict { holder } => {
                info!(
                    target: "staticpub::worker",
                    holder = ?holder,
                    "Another instance is already running; terminating"
                );
                return Ok(RunOutcome::Conflict { holder });
            }
        };

        let released = self.queue.release_claims().await?;
        if released > 0 {
            warn!(
                target: "staticpub::worker",
                released,
                "Released claims left by an interrupted run"
            );
        }

        let report = self.run_locked(options).await;
        drop(guard);
        report.map(RunOutcome::Completed)
    }

    async fn run_locked(&self, options: RunOptions) -> Result<RunReport, WorkerError> {
        let started = Instant::now();
        let mut report = RunReport {
            cycles: 0,
            urls_processed: 0,
            pages_built: 0,
            failures: 0,
            stop: StopReason::QueueDrained,
            elapsed: Duration::ZERO,
        };

        loop {
            let cycle = self.drain_cycle(options.verbose).await?;
            report.cycles += 1;
            report.urls_processed += cycle.urls_processed;
            report.pages_built += cycle.pages_built;
            report.failures += cycle.failures;

            if options.mode == RunMode::Once {
                break;
            }
            if started.elapsed() >= self.config.daemon_budget {
                report.stop = StopReason::BuildTimeExceeded;
                break;
            }
            tokio::time::sleep(self.config.idle_pause).await;
            if started.elapsed() >= self.config.daemon_budget {
                report.stop = StopReason::BuildTimeExceeded;
                break;
            }
        }

        report.elapsed = started.elapsed();
        info!(
            target: "staticpub::worker",
            cycles = report.cycles,
            urls = report.urls_processed,
            pages = report.pages_built,
            failures = report.failures,
            stop = ?report.stop,
            elapsed_secs = report.elapsed.as_secs_f64(),
            "Cache builder finished"
        );
        Ok(report)
    }

    /// Process queue entries until none are eligible.
    ///
    /// A failing URL is marked errored and skipped; only fatal failures and
    /// queue access errors end the cycle early.
    pub async fn drain_cycle(&self, verbose: bool) -> Result<CycleReport, WorkerError> {
        let cycle_started = Instant::now();
        let baseline_memory = self.memory.resident_bytes();
        let mut report = CycleReport::default();

        while let Some(item) = self.queue.next_url().await? {
            let url_started = Instant::now();
            report.urls_processed += 1;

            match self.build_item(&item).await {
                Ok(artifacts) => {
                    for artifact in &artifacts {
                        report.pages_built += 1;
                        counter!(METRIC_PAGES_BUILT, "outcome" => artifact.outcome.as_str())
                            .increment(1);
                        self.log_progress(
                            verbose,
                            report.pages_built,
                            url_started.elapsed(),
                            baseline_memory,
                            artifact,
                        );
                    }
                    if !self.queue.complete(&item).await? {
                        debug!(
                            target: "staticpub::worker",
                            url = %item.url,
                            "Entry was re-enqueued during the build; kept for another pass"
                        );
                    }
                }
                Err(err) => {
                    report.failures += 1;
                    let message = err.to_string();
                    self.queue.mark_error(&item.url, &message).await?;
                    counter!(METRIC_BUILD_FAILURES, "kind" => err.kind()).increment(1);

                    if err.is_fatal() {
                        error!(
                            target: "staticpub::worker",
                            url = %item.url,
                            error = %message,
                            "Fatal error while building; stopping"
                        );
                        self.record_summary(&mut report, cycle_started, true).await?;
                        return Err(WorkerError::Fatal {
                            url: item.url,
                            message,
                        });
                    }

                    warn!(
                        target: "staticpub::worker",
                        url = %item.url,
                        attempts = item.attempts,
                        kind = err.kind(),
                        error = %message,
                        "Failed to build url; marked as errored"
                    );
                }
            }

            histogram!(METRIC_BUILD_MS).record(url_started.elapsed().as_secs_f64() * 1000.0);
            self.record_summary(&mut report, cycle_started, false).await?;
        }

        self.record_summary(&mut report, cycle_started, true).await?;
        self.prune_summaries().await?;
        gauge!(METRIC_QUEUE_PENDING).set(self.queue.pending_count().await? as f64);

        Ok(report)
    }

    async fn build_item(&self, item: &QueueItem) -> Result<Vec<CacheArtifact>, UrlBuildError> {
        let targets = match item.intent {
            QueueIntent::Update => self.targets(&item.url).await?,
            QueueIntent::Delete => self.delete_targets(&item.url).await?,
        };
        if targets.is_empty() {
            warn!(
                target: "staticpub::worker",
                url = %item.url,
                "No domain variants to build for url"
            );
        }

        let mut artifacts = Vec::with_capacity(targets.len());
        for target in targets {
            let artifact = match item.intent {
                QueueIntent::Delete => {
                    let artifact = self.store.unpublish(&item.url, &target.path).await?;
                    if target.swept && artifact.outcome == WriteOutcome::UnlinkFileDoesNotExist {
                        continue;
                    }
                    artifact
                }
                QueueIntent::Update => {
                    let request =
                        RenderRequest::new(item.url.clone()).with_overrides(target.overrides);
                    let page = self.render_isolated(request).await?;
                    self.store
                        .apply(&item.url, &target.path, &page, QueueIntent::Update)
                        .await?
                }
            };
            artifacts.push(artifact);
        }
        Ok(artifacts)
    }

    /// Every physical variant of `url`: one for the main site, one per
    /// (primary) domain for a subsite.
    async fn targets(&self, url: &str) -> Result<Vec<BuildTarget>, UrlBuildError> {
        let layout = self.store.layout();
        match self.content.site_for_url(url).await? {
            SiteScope::Main => Ok(vec![BuildTarget {
                path: layout.primary_path(url)?,
                overrides: RenderOverrides::default(),
                swept: false,
            }]),
            SiteScope::Subsite { theme, domains } => {
                let primary_only = self.store.config().publish_primary_domains_only;
                domains
                    .iter()
                    .filter(|domain| !primary_only || domain.primary)
                    .map(|domain| -> Result<BuildTarget, UrlBuildError> {
                        Ok(BuildTarget {
                            path: layout.variant_path(Some(&domain.host), url)?,
                            overrides: RenderOverrides {
                                base_url: Some(format!("http://{}/", domain.host)),
                                theme: theme.clone(),
                            },
                            swept: false,
                        })
                    })
                    .collect()
            }
        }
    }

    /// Every path a deleted `url` may have been written to.
    ///
    /// The owning record is usually gone from the content source by the time
    /// its delete is drained, so the known variants are extended with the
    /// main path and the path under every registered subsite host.
    async fn delete_targets(&self, url: &str) -> Result<Vec<BuildTarget>, UrlBuildError> {
        let layout = self.store.layout();
        let mut targets: Vec<BuildTarget> = match self.content.site_for_url(url).await? {
            SiteScope::Main => Vec::new(),
            SiteScope::Subsite { domains, .. } => domains
                .iter()
                .map(|domain| -> Result<BuildTarget, UrlBuildError> {
                    Ok(BuildTarget {
                        path: layout.variant_path(Some(&domain.host), url)?,
                        overrides: RenderOverrides::default(),
                        swept: false,
                    })
                })
                .collect::<Result<_, _>>()?,
        };
        let owned_by_subsite = !targets.is_empty();

        let mut sweep = vec![BuildTarget {
            path: layout.primary_path(url)?,
            overrides: RenderOverrides::default(),
            swept: owned_by_subsite,
        }];
        for domain in self.content.site_domains().await? {
            sweep.push(BuildTarget {
                path: layout.variant_path(Some(&domain.host), url)?,
                overrides: RenderOverrides::default(),
                swept: true,
            });
        }
        for target in sweep {
            if targets.iter().all(|known| known.path != target.path) {
                targets.push(target);
            }
        }
        Ok(targets)
    }

    /// Render on a separate task so a panicking renderer surfaces as a
    /// fatal error instead of unwinding through the drain loop.
    async fn render_isolated(
        &self,
        request: RenderRequest,
    ) -> Result<RenderedPage, UrlBuildError> {
        let renderer = self.renderer.clone();
        let handle = tokio::spawn(async move { renderer.render(&request).await });
        match handle.await {
            Ok(result) => Ok(result?),
            Err(join) if join.is_panic() => Err(UrlBuildError::Panic(panic_message(
                join.into_panic(),
            ))),
            Err(join) => Err(UrlBuildError::Panic(join.to_string())),
        }
    }

    fn log_progress(
        &self,
        verbose: bool,
        sequence: u64,
        elapsed: Duration,
        baseline_memory: u64,
        artifact: &CacheArtifact,
    ) {
        let current = self.memory.resident_bytes();
        let build_secs = elapsed.as_secs_f64();
        let memory_delta_mb = delta_mb(current, baseline_memory);
        let memory_mb = to_mb(current);
        if verbose {
            info!(
                target: "staticpub::worker",
                sequence,
                build_secs,
                memory_delta_mb,
                memory_mb,
                url = %artifact.url,
                path = %artifact.path.display(),
                status = artifact.status,
                outcome = %artifact.outcome,
                "Built page"
            );
        } else {
            debug!(
                target: "staticpub::worker",
                sequence,
                build_secs,
                memory_delta_mb,
                memory_mb,
                url = %artifact.url,
                path = %artifact.path.display(),
                status = artifact.status,
                outcome = %artifact.outcome,
                "Built page"
            );
        }
    }

    /// Insert the cycle's summary row on the first built page, update it afterwards.
    async fn record_summary(
        &self,
        report: &mut CycleReport,
        cycle_started: Instant,
        finished: bool,
    ) -> Result<(), WorkerError> {
        if report.pages_built == 0 {
            return Ok(());
        }
        let total_time_secs = cycle_started.elapsed().as_secs_f64();
        let update = SummaryUpdate {
            pid: std::process::id(),
            pages_built: report.pages_built,
            total_time_secs,
            average_time_secs: total_time_secs / report.pages_built as f64,
            memory_usage_mb: to_mb(self.memory.resident_bytes()),
            finished,
        };
        let id = self
            .summaries
            .record_summary(report.summary_id, &update)
            .await?;
        report.summary_id = Some(id);
        Ok(())
    }

    async fn prune_summaries(&self) -> Result<(), WorkerError> {
        let cutoff = OffsetDateTime::now_utc() - self.config.summary_retention;
        let pruned = self.summaries.prune_summaries(cutoff).await?;
        if pruned > 0 {
            debug!(target: "staticpub::worker", pruned, "Pruned old build summaries");
        }
        Ok(())
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "renderer panicked".to_string()
    }
}
