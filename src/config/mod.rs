//! Configuration layer: typed settings with layered precedence (file → env → CLI).

mod cli;

pub use cli::{
    BuildQueueArgs, CliArgs, Command, EnqueueArgs, EntityArgs, GlobalOverrides, PurgeArgs,
    QueueArgs, QueueCommand, QueueListArgs, QueueRemoveArgs,
};

use std::{num::NonZeroU32, path::PathBuf, str::FromStr, time::Duration};

use clap::Parser;
use config::{Config, Environment, File};
use serde::Deserialize;
use thiserror::Error;
use tracing::level_filters::LevelFilter;
use url::Url;

use crate::cache::{
    DEFAULT_DAEMON_BUDGET_SECS, DEFAULT_IDLE_PAUSE_MS, DEFAULT_LOCK_FILE_NAME,
    DEFAULT_STALE_MARKER, DEFAULT_STALE_NOTICE, DEFAULT_SUMMARY_RETENTION_DAYS,
};

const DEFAULT_CONFIG_BASENAME: &str = "config/default";
const LOCAL_CONFIG_BASENAME: &str = "staticpub";
const ENV_PREFIX: &str = "STATICPUB";
const DEFAULT_DATABASE_URL: &str = "sqlite://staticpub.db";
const DEFAULT_DB_MAX_CONNECTIONS: u32 = 4;
const DEFAULT_DB_BUSY_TIMEOUT_MS: u64 = 5_000;
const DEFAULT_RENDER_ORIGIN: &str = "http://127.0.0.1:3000";
const DEFAULT_THEME_HEADER: &str = "x-staticpub-theme";
const DEFAULT_MANIFEST_PATH: &str = "content.toml";
const SECONDS_PER_DAY: u64 = 24 * 60 * 60;

/// Fully-resolved deployment settings after precedence resolution and validation.
#[derive(Debug, Clone)]
pub struct Settings {
    pub logging: LoggingSettings,
    pub queue: QueueSettings,
    pub cache: CacheSettings,
    pub worker: WorkerSettings,
    pub render: RenderSettings,
    pub content: ContentSettings,
    pub purge: PurgeSettings,
}

#[derive(Debug, Clone)]
pub struct LoggingSettings {
    pub level: LevelFilter,
    pub format: LogFormat,
}

#[derive(Debug, Clone, Copy)]
pub enum LogFormat {
    Json,
    Compact,
}

#[derive(Debug, Clone)]
pub struct QueueSettings {
    pub database_url: String,
    pub max_connections: NonZeroU32,
    pub busy_timeout: Duration,
}

/// Artifact store settings. Directory and extension stay optional here;
/// the commands that need them report their absence.
#[derive(Debug, Clone)]
pub struct CacheSettings {
    pub directory: Option<PathBuf>,
    pub extension: Option<String>,
    pub stale_marker: String,
    pub stale_notice: String,
    pub lock_file: PathBuf,
    pub publish_primary_domains_only: bool,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            directory: None,
            extension: None,
            stale_marker: DEFAULT_STALE_MARKER.to_string(),
            stale_notice: DEFAULT_STALE_NOTICE.to_string(),
            lock_file: std::env::temp_dir().join(DEFAULT_LOCK_FILE_NAME),
            publish_primary_domains_only: false,
        }
    }
}

#[derive(Debug, Clone)]
pub struct WorkerSettings {
    pub daemon_budget: Duration,
    pub idle_pause: Duration,
    pub summary_retention: Duration,
}

#[derive(Debug, Clone)]
pub struct RenderSettings {
    pub origin: Url,
    pub theme_header: String,
}

#[derive(Debug, Clone)]
pub struct ContentSettings {
    pub manifest: PathBuf,
}

#[derive(Debug, Clone, Default)]
pub struct PurgeSettings {
    /// Ordered exclusion patterns, matched against candidate URLs.
    pub exclude: Vec<String>,
    pub disabled: bool,
}

#[derive(Debug, Error)]
pub enum LoadError {
    #[error("failed to build configuration: {0}")]
    Build(#[from] config::ConfigError),
    #[error("invalid configuration for `{key}`: {reason}")]
    Invalid { key: &'static str, reason: String },
}

impl LoadError {
    fn invalid(key: &'static str, reason: impl Into<String>) -> Self {
        Self::Invalid {
            key,
            reason: reason.into(),
        }
    }
}

/// Load settings using the configured precedence (file → environment → CLI).
pub fn load(cli: &CliArgs) -> Result<Settings, LoadError> {
    let mut builder = Config::builder()
        .add_source(File::with_name(DEFAULT_CONFIG_BASENAME).required(false))
        .add_source(File::with_name(LOCAL_CONFIG_BASENAME).required(false));

    if let Some(path) = cli.config_file.as_ref() {
        builder = builder.add_source(File::from(path.as_path()).required(true));
    }

    builder = builder.add_source(Environment::with_prefix(ENV_PREFIX).separator("__"));

    let mut raw: RawSettings = builder.build()?.try_deserialize()?;
    raw.apply_overrides(&cli.overrides);

    Settings::from_raw(raw)
}

/// Resolve configuration using the supplied CLI arguments, returning both for downstream use.
pub fn load_with_cli() -> Result<(CliArgs, Settings), LoadError> {
    let args = CliArgs::parse();
    let settings = load(&args)?;
    Ok((args, settings))
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawSettings {
    logging: RawLoggingSettings,
    queue: RawQueueSettings,
    cache: RawCacheSettings,
    worker: RawWorkerSettings,
    render: RawRenderSettings,
    content: RawContentSettings,
    purge: RawPurgeSettings,
}

impl RawSettings {
    fn apply_overrides(&mut self, overrides: &GlobalOverrides) {
        if let Some(level) = overrides.log_level.as_ref() {
            self.logging.level = Some(level.clone());
        }
        if let Some(json) = overrides.log_json {
            self.logging.json = Some(json);
        }
        if let Some(url) = overrides.database_url.as_ref() {
            self.queue.database_url = Some(url.clone());
        }
        if let Some(directory) = overrides.cache_directory.as_ref() {
            self.cache.directory = Some(directory.clone());
        }
        if let Some(extension) = overrides.cache_extension.as_ref() {
            self.cache.extension = Some(extension.clone());
        }
    }
}

impl Settings {
    fn from_raw(raw: RawSettings) -> Result<Self, LoadError> {
        let RawSettings {
            logging,
            queue,
            cache,
            worker,
            render,
            content,
            purge,
        } = raw;

        Ok(Self {
            logging: build_logging_settings(logging)?,
            queue: build_queue_settings(queue)?,
            cache: build_cache_settings(cache)?,
            worker: build_worker_settings(worker)?,
            render: build_render_settings(render)?,
            content: build_content_settings(content)?,
            purge: PurgeSettings {
                exclude: purge.exclude,
                disabled: purge.disabled.unwrap_or(false),
            },
        })
    }
}

fn build_logging_settings(logging: RawLoggingSettings) -> Result<LoggingSettings, LoadError> {
    let level = match logging.level {
        Some(level) => LevelFilter::from_str(level.as_str()).map_err(|err| {
            LoadError::invalid("logging.level", format!("failed to parse: {err}"))
        })?,
        None => LevelFilter::INFO,
    };

    let format = if logging.json.unwrap_or(false) {
        LogFormat::Json
    } else {
        LogFormat::Compact
    };

    Ok(LoggingSettings { level, format })
}

fn build_queue_settings(queue: RawQueueSettings) -> Result<QueueSettings, LoadError> {
    let database_url = non_empty(queue.database_url)
        .unwrap_or_else(|| DEFAULT_DATABASE_URL.to_string());
    if !database_url.starts_with("sqlite:") {
        return Err(LoadError::invalid(
            "queue.database_url",
            "only sqlite: URLs are supported",
        ));
    }

    let max_connections = non_zero_u32(
        queue
            .max_connections
            .unwrap_or(DEFAULT_DB_MAX_CONNECTIONS)
            .into(),
        "queue.max_connections",
    )?;
    let busy_timeout = Duration::from_millis(
        queue
            .busy_timeout_ms
            .unwrap_or(DEFAULT_DB_BUSY_TIMEOUT_MS),
    );

    Ok(QueueSettings {
        database_url,
        max_connections,
        busy_timeout,
    })
}

fn build_cache_settings(cache: RawCacheSettings) -> Result<CacheSettings, LoadError> {
    let defaults = CacheSettings::default();

    let directory = cache.directory.filter(|dir| !dir.as_os_str().is_empty());
    let extension = match non_empty(cache.extension) {
        Some(extension) => {
            let trimmed = extension.trim_start_matches('.');
            if trimmed.is_empty() || trimmed.contains(['/', '\\']) {
                return Err(LoadError::invalid(
                    "cache.extension",
                    format!("`{extension}` is not a file extension"),
                ));
            }
            Some(trimmed.to_string())
        }
        None => None,
    };

    let stale_marker = cache.stale_marker.unwrap_or(defaults.stale_marker);
    if stale_marker.is_empty() {
        return Err(LoadError::invalid(
            "cache.stale_marker",
            "marker must not be empty",
        ));
    }

    let lock_file = cache
        .lock_file
        .filter(|path| !path.as_os_str().is_empty())
        .unwrap_or(defaults.lock_file);

    Ok(CacheSettings {
        directory,
        extension,
        stale_marker,
        stale_notice: cache.stale_notice.unwrap_or(defaults.stale_notice),
        lock_file,
        publish_primary_domains_only: cache.publish_primary_domains_only.unwrap_or(false),
    })
}

fn build_worker_settings(worker: RawWorkerSettings) -> Result<WorkerSettings, LoadError> {
    let budget_secs = worker
        .daemon_budget_seconds
        .unwrap_or(DEFAULT_DAEMON_BUDGET_SECS);
    if budget_secs == 0 {
        return Err(LoadError::invalid(
            "worker.daemon_budget_seconds",
            "must be greater than zero",
        ));
    }

    let retention_days = worker
        .summary_retention_days
        .unwrap_or(DEFAULT_SUMMARY_RETENTION_DAYS);
    let retention_secs = retention_days.checked_mul(SECONDS_PER_DAY).ok_or_else(|| {
        LoadError::invalid("worker.summary_retention_days", "value is out of range")
    })?;

    Ok(WorkerSettings {
        daemon_budget: Duration::from_secs(budget_secs),
        idle_pause: Duration::from_millis(worker.idle_pause_ms.unwrap_or(DEFAULT_IDLE_PAUSE_MS)),
        summary_retention: Duration::from_secs(retention_secs),
    })
}

fn build_render_settings(render: RawRenderSettings) -> Result<RenderSettings, LoadError> {
    let origin_raw = non_empty(render.origin).unwrap_or_else(|| DEFAULT_RENDER_ORIGIN.to_string());
    let origin = Url::parse(&origin_raw)
        .map_err(|err| LoadError::invalid("render.origin", format!("`{origin_raw}`: {err}")))?;
    if !matches!(origin.scheme(), "http" | "https") {
        return Err(LoadError::invalid(
            "render.origin",
            "scheme must be http or https",
        ));
    }

    let theme_header =
        non_empty(render.theme_header).unwrap_or_else(|| DEFAULT_THEME_HEADER.to_string());

    Ok(RenderSettings {
        origin,
        theme_header,
    })
}

fn build_content_settings(content: RawContentSettings) -> Result<ContentSettings, LoadError> {
    let manifest = content
        .manifest
        .filter(|path| !path.as_os_str().is_empty())
        .unwrap_or_else(|| PathBuf::from(DEFAULT_MANIFEST_PATH));
    Ok(ContentSettings { manifest })
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawLoggingSettings {
    level: Option<String>,
    json: Option<bool>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawQueueSettings {
    database_url: Option<String>,
    max_connections: Option<u32>,
    busy_timeout_ms: Option<u64>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawCacheSettings {
    directory: Option<PathBuf>,
    extension: Option<String>,
    stale_marker: Option<String>,
    stale_notice: Option<String>,
    lock_file: Option<PathBuf>,
    publish_primary_domains_only: Option<bool>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawWorkerSettings {
    daemon_budget_seconds: Option<u64>,
    idle_pause_ms: Option<u64>,
    summary_retention_days: Option<u64>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawRenderSettings {
    origin: Option<String>,
    theme_header: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawContentSettings {
    manifest: Option<PathBuf>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawPurgeSettings {
    exclude: Vec<String>,
    disabled: Option<bool>,
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.and_then(|value| {
        let trimmed = value.trim();
        (!trimmed.is_empty()).then(|| trimmed.to_string())
    })
}

fn non_zero_u32(value: u64, key: &'static str) -> Result<NonZeroU32, LoadError> {
    if value == 0 {
        return Err(LoadError::invalid(key, "must be greater than zero"));
    }
    let value_u32: u32 = value
        .try_into()
        .map_err(|_| LoadError::invalid(key, "value exceeds supported range for u32"))?;
    NonZeroU32::new(value_u32).ok_or_else(|| LoadError::invalid(key, "must be greater than zero"))
}
