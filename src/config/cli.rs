use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueHint, builder::BoolishValueParser};

/// Command-line arguments for the staticpub binary.
#[derive(Debug, Parser)]
#[command(
    name = "staticpub",
    version,
    about = "Queue-driven static artifact cache"
)]
pub struct CliArgs {
    /// Optional path to a configuration file.
    #[arg(
        long = "config-file",
        env = "STATICPUB_CONFIG_FILE",
        value_name = "PATH",
        global = true,
        value_hint = ValueHint::FilePath
    )]
    pub config_file: Option<PathBuf>,

    #[command(flatten)]
    pub overrides: GlobalOverrides,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Args, Default, Clone)]
pub struct GlobalOverrides {
    /// Override the base log level (trace|debug|info|warn|error).
    #[arg(long = "log-level", value_name = "LEVEL", global = true)]
    pub log_level: Option<String>,

    /// Toggle JSON logging.
    #[arg(
        long = "log-json",
        value_name = "BOOL",
        global = true,
        value_parser = BoolishValueParser::new()
    )]
    pub log_json: Option<bool>,

    /// Override the queue database URL.
    #[arg(long = "database-url", value_name = "URL", global = true)]
    pub database_url: Option<String>,

    /// Override the cache directory.
    #[arg(
        long = "cache-directory",
        value_name = "PATH",
        global = true,
        value_hint = ValueHint::DirPath
    )]
    pub cache_directory: Option<PathBuf>,

    /// Override the artifact file extension.
    #[arg(long = "cache-extension", value_name = "EXT", global = true)]
    pub cache_extension: Option<String>,
}

#[derive(Debug, Subcommand, Clone)]
pub enum Command {
    /// Drain the build queue and write static artifacts.
    #[command(name = "build-queue")]
    BuildQueue(BuildQueueArgs),
    /// Report (and optionally delete) cached files with no live entity.
    #[command(name = "purge-obsolete")]
    PurgeObsolete(PurgeArgs),
    /// Queue the URLs affected by publishing an entity.
    Publish(EntityArgs),
    /// Queue the URLs affected by unpublishing an entity.
    Unpublish(EntityArgs),
    /// Queue a single URL by hand.
    Enqueue(EnqueueArgs),
    /// Inspect and maintain the build queue.
    Queue(QueueArgs),
}

#[derive(Debug, Args, Clone)]
pub struct BuildQueueArgs {
    /// Log one line per generated artifact.
    #[arg(
        long,
        value_name = "BOOL",
        action = clap::ArgAction::Set,
        default_value_t = true,
        value_parser = BoolishValueParser::new()
    )]
    pub verbose: bool,

    /// Keep draining until the configured time budget is spent.
    #[arg(long, action = clap::ArgAction::SetTrue)]
    pub daemon: bool,
}

#[derive(Debug, Args, Clone)]
pub struct PurgeArgs {
    /// Delete orphaned files instead of only reporting them.
    #[arg(long, action = clap::ArgAction::SetTrue)]
    pub delete: bool,
}

#[derive(Debug, Args, Clone)]
pub struct EntityArgs {
    /// Entity id from the content manifest.
    #[arg(value_name = "ENTITY_ID")]
    pub id: String,

    /// Reason recorded with the change.
    #[arg(long, value_name = "TEXT")]
    pub reason: Option<String>,
}

#[derive(Debug, Args, Clone)]
pub struct EnqueueArgs {
    /// Site-relative URL.
    #[arg(value_name = "URL")]
    pub url: String,

    /// Queue priority; lower is more urgent.
    #[arg(long, value_name = "N", default_value_t = 0, allow_negative_numbers = true)]
    pub priority: i32,

    /// Queue a removal instead of a rebuild.
    #[arg(long, action = clap::ArgAction::SetTrue)]
    pub delete: bool,
}

#[derive(Debug, Args, Clone)]
pub struct QueueArgs {
    #[command(subcommand)]
    pub command: QueueCommand,
}

#[derive(Debug, Subcommand, Clone)]
pub enum QueueCommand {
    /// List queued URLs in build order.
    List(QueueListArgs),
    /// Make errored URLs eligible again.
    Retry,
    /// Drop a URL from the queue.
    Remove(QueueRemoveArgs),
}

#[derive(Debug, Args, Clone)]
pub struct QueueListArgs {
    /// Print entries as JSON.
    #[arg(long, action = clap::ArgAction::SetTrue)]
    pub json: bool,
}

#[derive(Debug, Args, Clone)]
pub struct QueueRemoveArgs {
    #[arg(value_name = "URL")]
    pub url: String,
}
