use std::{process, sync::Arc};

use staticpub::{
    application::{
        content::ContentSource,
        error::AppError,
        repos::{QueueRepo, SummaryRepo},
    },
    cache::{
        ArtifactStore, CacheBuilder, CacheBuilderDeps, CacheConfig, ExclusionRules, FileLock,
        PublishingEngine, ReconcileError, Reconciler, RunMode, RunOptions, RunOutcome,
        WorkerConfig, WorkerError,
    },
    config,
    domain::{
        context::ActionExtensions,
        entities::{EntityHandle, EntityId},
        error::DomainError,
        types::QueueIntent,
    },
    infra::{
        db::SqliteRepositories, error::InfraError, manifest::ManifestContentSource,
        memory::ProcessMemory, render::HttpRenderer, telemetry,
    },
};
use tracing::{Dispatch, Level, dispatcher, error, info};
use tracing_subscriber::fmt as tracing_fmt;

const CLI_INITIATOR: &str = "cli";

#[tokio::main]
async fn main() {
    if let Err(error) = run().await {
        report_application_error(&error);
        process::exit(1);
    }
}

fn report_application_error(error: &AppError) {
    let report = error.report();
    if dispatcher::has_been_set() {
        error!(kind = error.kind(), error = %report.joined(), "application error");
        return;
    }

    let subscriber = tracing_fmt().with_max_level(Level::ERROR).finish();
    let dispatch = Dispatch::new(subscriber);
    dispatcher::with_default(&dispatch, || {
        error!(kind = error.kind(), error = %report.joined(), "application error");
    });
}

async fn run() -> Result<(), AppError> {
    let (cli_args, settings) = config::load_with_cli()
        .map_err(|err| AppError::unexpected(format!("failed to load configuration: {err}")))?;

    telemetry::init(&settings.logging).map_err(AppError::from)?;

    match cli_args.command {
        config::Command::BuildQueue(args) => run_build_queue(settings, args).await,
        config::Command::PurgeObsolete(args) => run_purge_obsolete(settings, args).await,
        config::Command::Publish(args) => run_publish(settings, args).await,
        config::Command::Unpublish(args) => run_unpublish(settings, args).await,
        config::Command::Enqueue(args) => run_enqueue(settings, args).await,
        config::Command::Queue(args) => run_queue(settings, args).await,
    }
}

async fn run_build_queue(
    settings: config::Settings,
    args: config::BuildQueueArgs,
) -> Result<(), AppError> {
    let cache = CacheConfig::from_settings(&settings.cache).map_err(WorkerError::from)?;
    let repositories = Arc::new(init_repositories(&settings).await?);
    let content = load_content(&settings).await?;
    let renderer = HttpRenderer::new(&settings.render)?;

    let queue: Arc<dyn QueueRepo> = repositories.clone();
    let summaries: Arc<dyn SummaryRepo> = repositories;
    let builder = CacheBuilder::new(
        WorkerConfig::from(&settings),
        ArtifactStore::new(cache),
        CacheBuilderDeps {
            queue,
            summaries,
            content,
            renderer: Arc::new(renderer),
            lock: Arc::new(FileLock::new(settings.cache.lock_file.clone())),
            memory: Arc::new(ProcessMemory::new()),
        },
    );

    let mode = if args.daemon {
        RunMode::Daemon
    } else {
        RunMode::Once
    };
    match builder
        .run(RunOptions {
            mode,
            verbose: args.verbose,
        })
        .await?
    {
        RunOutcome::Completed(report) => {
            info!(
                target: "staticpub::cli",
                pages = report.pages_built,
                failures = report.failures,
                "build-queue done"
            );
        }
        RunOutcome::Conflict { holder } => {
            info!(target: "staticpub::cli", holder = ?holder, "build-queue skipped");
        }
    }
    Ok(())
}

async fn run_purge_obsolete(
    settings: config::Settings,
    args: config::PurgeArgs,
) -> Result<(), AppError> {
    if settings.purge.disabled {
        return Err(ReconcileError::Disabled.into());
    }
    let cache = CacheConfig::from_settings(&settings.cache).map_err(ReconcileError::from)?;
    let exclusions = ExclusionRules::parse(&settings.purge.exclude)?;
    let content = load_content(&settings).await?;

    let reconciler = Reconciler::new(
        ArtifactStore::new(cache),
        exclusions,
        content,
        Arc::new(FileLock::new(settings.cache.lock_file.clone())),
    );
    let report = reconciler.run(args.delete).await?;

    for orphan in &report.scan.orphans {
        println!("{}", orphan.path.display());
    }
    info!(
        target: "staticpub::cli",
        orphans = report.scan.orphans.len(),
        deleted_files = report.deleted_files,
        "purge-obsolete done"
    );
    Ok(())
}

async fn run_publish(settings: config::Settings, args: config::EntityArgs) -> Result<(), AppError> {
    let repositories = init_repositories(&settings).await?;
    let content = load_content(&settings).await?;
    let entity = find_entity(content.as_ref(), &args.id).await?;

    let engine = PublishingEngine::new(Arc::new(repositories));
    let plan = engine.after_write(&entity, extensions(args.reason)).await?;
    info!(target: "staticpub::cli", entity = %args.id, plan = %plan, "publish queued");
    Ok(())
}

async fn run_unpublish(
    settings: config::Settings,
    args: config::EntityArgs,
) -> Result<(), AppError> {
    let repositories = init_repositories(&settings).await?;
    let content = load_content(&settings).await?;
    let entity = find_entity(content.as_ref(), &args.id).await?;

    let engine = PublishingEngine::new(Arc::new(repositories));
    let plan = engine
        .before_unpublish(&entity, extensions(args.reason))
        .flush()
        .await?;
    info!(target: "staticpub::cli", entity = %args.id, plan = %plan, "unpublish queued");
    Ok(())
}

async fn run_enqueue(settings: config::Settings, args: config::EnqueueArgs) -> Result<(), AppError> {
    let url = args.url.trim();
    if url.is_empty() {
        return Err(AppError::validation("url must not be empty"));
    }
    let intent = if args.delete {
        QueueIntent::Delete
    } else {
        QueueIntent::Update
    };

    let repositories = init_repositories(&settings).await?;
    repositories.enqueue(url, args.priority, intent).await?;
    info!(
        target: "staticpub::cli",
        url,
        priority = args.priority,
        intent = %intent,
        "URL queued"
    );
    Ok(())
}

async fn run_queue(settings: config::Settings, args: config::QueueArgs) -> Result<(), AppError> {
    let repositories = init_repositories(&settings).await?;
    match args.command {
        config::QueueCommand::List(list) => {
            let items = repositories.list().await?;
            if list.json {
                let json = serde_json::to_string_pretty(&items)
                    .map_err(|err| AppError::unexpected(err.to_string()))?;
                println!("{json}");
            } else {
                for item in &items {
                    let state = match (&item.error_message, item.claimed) {
                        (Some(error), _) => format!("error: {error}"),
                        (None, true) => "claimed".to_string(),
                        (None, false) => "pending".to_string(),
                    };
                    println!(
                        "{:>4}  {:<6}  {}  [{}]",
                        item.priority,
                        item.intent.as_str(),
                        item.url,
                        state
                    );
                }
            }
        }
        config::QueueCommand::Retry => {
            let cleared = repositories.retry_errored().await?;
            info!(target: "staticpub::cli", cleared, "Errored URLs re-queued");
        }
        config::QueueCommand::Remove(remove) => {
            repositories.delete_by_url(&remove.url).await?;
            info!(target: "staticpub::cli", url = %remove.url, "URL removed from queue");
        }
    }
    Ok(())
}

async fn init_repositories(settings: &config::Settings) -> Result<SqliteRepositories, AppError> {
    let queue = &settings.queue;
    let pool = SqliteRepositories::connect(
        &queue.database_url,
        queue.max_connections.get(),
        queue.busy_timeout,
    )
    .await
    .map_err(InfraError::from)?;

    SqliteRepositories::run_migrations(&pool)
        .await
        .map_err(InfraError::from)?;

    Ok(SqliteRepositories::new(pool))
}

async fn load_content(settings: &config::Settings) -> Result<Arc<dyn ContentSource>, AppError> {
    let manifest = ManifestContentSource::load(&settings.content.manifest)
        .await
        .map_err(InfraError::from)?;
    Ok(Arc::new(manifest))
}

async fn find_entity(content: &dyn ContentSource, id: &str) -> Result<EntityHandle, AppError> {
    content
        .find_entity(&EntityId::from(id))
        .await?
        .ok_or_else(|| DomainError::not_found(format!("entity {id}")).into())
}

fn extensions(reason: Option<String>) -> ActionExtensions {
    ActionExtensions {
        reason,
        initiated_by: Some(CLI_INITIATOR.to_string()),
    }
}
