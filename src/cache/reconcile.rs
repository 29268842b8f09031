//! Orphan reconciliation.
//!
//! Compares the artifact store against the live content set and reports (or,
//! when explicitly asked, deletes) artifacts no live entity owns.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use metrics::counter;
use regex::Regex;
use thiserror::Error;
use tracing::{info, warn};
use walkdir::WalkDir;

use crate::application::content::{ContentSource, Visibility};
use crate::application::repos::RepoError;

use super::config::MissingSetting;
use super::keys::{ArtifactLayout, slash_variants};
use super::lock::{Acquisition, LockError, RunLock};
use super::store::{ArtifactError, ArtifactStore};

pub(crate) const METRIC_ORPHANS: &str = "staticpub_orphans_total";

#[derive(Debug, Error)]
pub enum ReconcileError {
    #[error("static cache configuration not found: `{key}` is not set")]
    ConfigMissing { key: &'static str },
    #[error("cache directory `{0}` does not exist")]
    MissingDirectory(PathBuf),
    #[error("orphan purging is disabled by configuration")]
    Disabled,
    #[error("invalid exclusion pattern `{pattern}`: {source}")]
    InvalidPattern {
        pattern: String,
        #[source]
        source: regex::Error,
    },
    #[error("failed to scan cache directory: {0}")]
    Scan(#[from] walkdir::Error),
    #[error("failed to load live urls: {0}")]
    Content(#[from] RepoError),
    #[error(transparent)]
    Artifact(#[from] ArtifactError),
    #[error(transparent)]
    Lock(#[from] LockError),
    #[error("cache builder is running (pid {holder:?}); refusing to delete")]
    BuilderRunning { holder: Option<u32> },
    #[error("scan task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

impl ReconcileError {
    pub fn config_missing(key: &'static str) -> Self {
        Self::ConfigMissing { key }
    }
}

impl From<MissingSetting> for ReconcileError {
    fn from(missing: MissingSetting) -> Self {
        Self::ConfigMissing { key: missing.key }
    }
}

/// Ordered operator-configured exclusion patterns.
#[derive(Debug, Clone, Default)]
pub struct ExclusionRules {
    patterns: Vec<Regex>,
}

impl ExclusionRules {
    /// Accepts bare patterns (`^blog/tag/`) and delimited ones (`/^blog\/tag\//i`).
    pub fn parse<S: AsRef<str>>(patterns: &[S]) -> Result<Self, ReconcileError> {
        let patterns = patterns
            .iter()
            .map(|pattern| compile_pattern(pattern.as_ref()))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { patterns })
    }

    pub fn is_excluded(&self, candidate: &str) -> bool {
        self.patterns.iter().any(|pattern| pattern.is_match(candidate))
    }

    pub fn len(&self) -> usize {
        self.patterns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.patterns.is_empty()
    }
}

fn compile_pattern(raw: &str) -> Result<Regex, ReconcileError> {
    let source = delimited_body(raw).unwrap_or_else(|| raw.to_string());
    Regex::new(&source).map_err(|source| ReconcileError::InvalidPattern {
        pattern: raw.to_string(),
        source,
    })
}

/// `/body/flags` to `(?flags)body`; `None` when `raw` is not delimited.
fn delimited_body(raw: &str) -> Option<String> {
    let rest = raw.strip_prefix('/')?;
    let end = rest.rfind('/')?;
    let (body, flags) = (&rest[..end], &rest[end + 1..]);
    if !flags.chars().all(|flag| matches!(flag, 'i' | 'm' | 's' | 'x' | 'u')) {
        return None;
    }
    let body = unescape_slashes(body);
    let inline: String = flags.chars().filter(|flag| *flag != 'u').collect();
    if inline.is_empty() {
        Some(body)
    } else {
        Some(format!("(?{inline}){body}"))
    }
}

/// Drop the backslash of every `\/`, leaving other escapes (including `\\`) intact.
fn unescape_slashes(body: &str) -> String {
    let mut out = String::with_capacity(body.len());
    let mut chars = body.chars();
    while let Some(ch) = chars.next() {
        if ch != '\\' {
            out.push(ch);
            continue;
        }
        match chars.next() {
            Some('/') => out.push('/'),
            Some(next) => {
                out.push('\\');
                out.push(next);
            }
            None => out.push('\\'),
        }
    }
    out
}

/// A cache file no live entity owns.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Orphan {
    /// Candidate URL derived from the file name.
    pub url: String,
    pub path: PathBuf,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScanResult {
    /// Primary artifacts considered.
    pub scanned: u64,
    pub excluded: u64,
    pub orphans: Vec<Orphan>,
}

/// Walk the cache directory and collect orphaned primary artifacts.
///
/// Stale companions and files with a foreign extension are ignored; a
/// candidate is live when any slash variant of it is in `live_urls`.
pub fn find_orphans(
    layout: &ArtifactLayout,
    exclusions: &ExclusionRules,
    live_urls: &BTreeSet<String>,
) -> Result<ScanResult, ReconcileError> {
    let root = layout.root();
    if !root.is_dir() {
        return Err(ReconcileError::MissingDirectory(root.to_path_buf()));
    }

    let mut result = ScanResult::default();
    for entry in WalkDir::new(root).sort_by_file_name() {
        let entry = entry?;
        if !entry.file_type().is_file() {
            continue;
        }
        let Ok(relative) = entry.path().strip_prefix(root) else {
            continue;
        };
        let Some(candidate) = layout.candidate_url(relative) else {
            continue;
        };
        result.scanned += 1;

        if exclusions.is_excluded(&candidate) {
            result.excluded += 1;
            continue;
        }
        if slash_variants(&candidate)
            .iter()
            .any(|variant| live_urls.contains(variant))
        {
            continue;
        }
        result.orphans.push(Orphan {
            url: candidate,
            path: entry.path().to_path_buf(),
        });
    }
    Ok(result)
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    pub scan: ScanResult,
    /// Files removed (primaries plus stale companions); 0 in report-only mode.
    pub deleted_files: usize,
}

/// Batch reconciler over the artifact store.
pub struct Reconciler {
    store: ArtifactStore,
    exclusions: ExclusionRules,
    content: Arc<dyn ContentSource>,
    lock: Arc<dyn RunLock>,
}

impl Reconciler {
    pub fn new(
        store: ArtifactStore,
        exclusions: ExclusionRules,
        content: Arc<dyn ContentSource>,
        lock: Arc<dyn RunLock>,
    ) -> Self {
        Self {
            store,
            exclusions,
            content,
            lock,
        }
    }

    /// Report orphans; remove them too when `delete` is set.
    ///
    /// Live URLs come from the unscoped content set. Deleting takes the
    /// builder's run lock so a build in flight is never raced.
    pub async fn run(&self, delete: bool) -> Result<ReconcileReport, ReconcileError> {
        let live_urls = self.content.live_urls(&Visibility::Global).await?;

        let _guard = if delete {
            match self.lock.try_acquire()? {
                Acquisition::Acquired(guard) => Some(guard),
                Acquisition::Conflict { holder } => {
                    return Err(ReconcileError::BuilderRunning { holder });
                }
            }
        } else {
            None
        };

        let layout = self.store.layout().clone();
        let exclusions = self.exclusions.clone();
        let scan = tokio::task::spawn_blocking(move || {
            find_orphans(&layout, &exclusions, &live_urls)
        })
        .await??;

        for orphan in &scan.orphans {
            info!(
                target: "staticpub::reconcile",
                url = %orphan.url,
                path = %display_relative(self.store.layout().root(), &orphan.path),
                "Orphaned cache file"
            );
        }
        counter!(METRIC_ORPHANS).increment(scan.orphans.len() as u64);

        let mut deleted_files = 0;
        if delete {
            for orphan in &scan.orphans {
                match self.store.remove_orphan(&orphan.path).await {
                    Ok(removed) => deleted_files += removed,
                    Err(err) => {
                        warn!(
                            target: "staticpub::reconcile",
                            path = %orphan.path.display(),
                            error = %err,
                            "Failed to delete orphaned cache file"
                        );
                        return Err(err.into());
                    }
                }
            }
        }

        info!(
            target: "staticpub::reconcile",
            scanned = scan.scanned,
            excluded = scan.excluded,
            orphans = scan.orphans.len(),
            deleted_files,
            delete,
            "Reconciliation finished"
        );
        Ok(ReconcileReport {
            scan,
            deleted_files,
        })
    }
}

fn display_relative(root: &Path, path: &Path) -> String {
    path.strip_prefix(root)
        .unwrap_or(path)
        .display()
        .to_string()
}
