//! Cache builder configuration.
//!
//! Resolved from the `[cache]` and `[worker]` sections of `staticpub.toml`.

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

use super::keys::ArtifactLayout;

pub(crate) const DEFAULT_STALE_MARKER: &str = r#"<div id="stale"></div>"#;
pub(crate) const DEFAULT_STALE_NOTICE: &str = "<div id=\"stale\" class='page-is-stale'>\n\t<p>This page is a bit old, but will soon be updated.</p>\n</div>";
pub(crate) const DEFAULT_LOCK_FILE_NAME: &str = "pid.staticpub-build-queue.txt";
pub(crate) const DEFAULT_DAEMON_BUDGET_SECS: u64 = 590;
pub(crate) const DEFAULT_IDLE_PAUSE_MS: u64 = 200;
pub(crate) const DEFAULT_SUMMARY_RETENTION_DAYS: u64 = 7;

/// A setting the artifact layout cannot do without.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("`{key}` is not configured")]
pub struct MissingSetting {
    pub key: &'static str,
}

/// Artifact store settings shared by the builder and the reconciler.
#[derive(Debug, Clone)]
pub struct CacheConfig {
    pub layout: ArtifactLayout,
    /// Placeholder in rendered pages that the stale notice replaces.
    pub stale_marker: String,
    pub stale_notice: String,
    /// Only build the primary domain of each subsite.
    pub publish_primary_domains_only: bool,
}

impl CacheConfig {
    pub fn new(layout: ArtifactLayout) -> Self {
        Self {
            layout,
            stale_marker: DEFAULT_STALE_MARKER.to_string(),
            stale_notice: DEFAULT_STALE_NOTICE.to_string(),
            publish_primary_domains_only: false,
        }
    }

    /// Build from settings; directory and extension must both be present.
    pub fn from_settings(settings: &crate::config::CacheSettings) -> Result<Self, MissingSetting> {
        let directory = settings
            .directory
            .clone()
            .ok_or(MissingSetting {
                key: "cache.directory",
            })?;
        let extension = settings.extension.as_deref().ok_or(MissingSetting {
            key: "cache.extension",
        })?;
        Ok(Self {
            layout: ArtifactLayout::new(directory, extension),
            stale_marker: settings.stale_marker.clone(),
            stale_notice: settings.stale_notice.clone(),
            publish_primary_domains_only: settings.publish_primary_domains_only,
        })
    }
}

/// Run-shape settings for the queue worker.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Well-known lock resource guarding the singleton worker.
    pub lock_file: PathBuf,
    /// Wall-clock budget for daemon mode.
    pub daemon_budget: Duration,
    /// Pause between daemon drain cycles.
    pub idle_pause: Duration,
    /// Summaries older than this are pruned.
    pub summary_retention: Duration,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            lock_file: std::env::temp_dir().join(DEFAULT_LOCK_FILE_NAME),
            daemon_budget: Duration::from_secs(DEFAULT_DAEMON_BUDGET_SECS),
            idle_pause: Duration::from_millis(DEFAULT_IDLE_PAUSE_MS),
            summary_retention: Duration::from_secs(DEFAULT_SUMMARY_RETENTION_DAYS * 24 * 60 * 60),
        }
    }
}

impl From<&crate::config::Settings> for WorkerConfig {
    fn from(settings: &crate::config::Settings) -> Self {
        Self {
            lock_file: settings.cache.lock_file.clone(),
            daemon_budget: settings.worker.daemon_budget,
            idle_pause: settings.worker.idle_pause,
            summary_retention: settings.worker.summary_retention,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn worker_defaults() {
        let config = WorkerConfig::default();
        assert_eq!(config.daemon_budget, Duration::from_secs(590));
        assert_eq!(config.idle_pause, Duration::from_millis(200));
        assert_eq!(config.summary_retention, Duration::from_secs(7 * 86_400));
        assert!(config.lock_file.ends_with(DEFAULT_LOCK_FILE_NAME));
    }

    #[test]
    fn stale_notice_replaces_marker_element() {
        assert!(DEFAULT_STALE_NOTICE.starts_with("<div id=\"stale\""));
        assert!(DEFAULT_STALE_NOTICE.contains("page-is-stale"));
    }

    #[test]
    fn layout_requires_directory_and_extension() {
        let mut settings = crate::config::CacheSettings::default();
        let err = CacheConfig::from_settings(&settings).expect_err("directory missing");
        assert_eq!(err.key, "cache.directory");

        settings.directory = Some(PathBuf::from("/tmp/cache"));
        let err = CacheConfig::from_settings(&settings).expect_err("extension missing");
        assert_eq!(err.key, "cache.extension");

        settings.extension = Some("html".to_string());
        let config = CacheConfig::from_settings(&settings).expect("complete");
        assert_eq!(config.layout.extension(), "html");
    }
}
