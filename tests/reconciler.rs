mod support;

use std::sync::Arc;

use staticpub::application::content::ContentSource;
use staticpub::cache::{
    Acquisition, CacheConfig, ExclusionRules, ReconcileError, Reconciler, RunLock,
};
use staticpub::config::CacheSettings;
use support::Harness;

const SITE: &str = r#"
    [[entities]]
    id = "home"
    url = "/"

    [[entities]]
    id = "about"
    url = "/about/"
    parent = "home"

    [[entities]]
    id = "retired"
    url = "/retired/"
    live = false
"#;

fn reconciler(harness: &Harness, exclude: &[&str]) -> Reconciler {
    let content: Arc<dyn ContentSource> = harness.content.clone();
    Reconciler::new(
        harness.store(),
        ExclusionRules::parse(exclude).unwrap(),
        content,
        Arc::new(harness.lock()),
    )
}

fn seed(harness: &Harness) {
    harness.write("index.html", "home");
    harness.write("about.html", "about");
    harness.write("about.stale.html", "about (stale)");
    harness.write("retired.html", "retired");
    harness.write("retired.stale.html", "retired (stale)");
    harness.write("blog/tag/rust.html", "tag page");
    harness.write("robots.txt", "User-agent: *");
}

#[tokio::test]
async fn report_only_lists_orphans_and_keeps_files() {
    let harness = Harness::new(SITE).await;
    seed(&harness);

    let report = reconciler(&harness, &[]).run(false).await.unwrap();

    let urls: Vec<&str> = report
        .scan
        .orphans
        .iter()
        .map(|orphan| orphan.url.as_str())
        .collect();
    assert_eq!(urls, vec!["blog/tag/rust", "retired"]);
    assert_eq!(report.deleted_files, 0);
    assert!(harness.cache_file("retired.html").exists());
    assert!(harness.cache_file("blog/tag/rust.html").exists());
}

#[tokio::test]
async fn delete_removes_orphans_with_their_stale_companions() {
    let harness = Harness::new(SITE).await;
    seed(&harness);

    let report = reconciler(&harness, &[r"/^blog\/tag\//"])
        .run(true)
        .await
        .unwrap();

    assert_eq!(report.scan.excluded, 1);
    assert_eq!(report.scan.orphans.len(), 1);
    assert_eq!(report.deleted_files, 2);
    assert!(!harness.cache_file("retired.html").exists());
    assert!(!harness.cache_file("retired.stale.html").exists());
    assert!(harness.cache_file("blog/tag/rust.html").exists());
    assert!(harness.cache_file("about.stale.html").exists());
    assert!(harness.cache_file("robots.txt").exists());
}

#[tokio::test]
async fn delete_refuses_while_the_builder_runs() {
    let harness = Harness::new(SITE).await;
    seed(&harness);

    let _held = match harness.lock().try_acquire().unwrap() {
        Acquisition::Acquired(guard) => guard,
        Acquisition::Conflict { .. } => panic!("lock should be free"),
    };

    let err = reconciler(&harness, &[])
        .run(true)
        .await
        .expect_err("builder holds the lock");
    assert!(matches!(
        err,
        ReconcileError::BuilderRunning { holder: Some(pid) } if pid == std::process::id()
    ));
    assert!(harness.cache_file("retired.html").exists());

    // Reporting never needs the lock.
    let report = reconciler(&harness, &[]).run(false).await.unwrap();
    assert_eq!(report.scan.orphans.len(), 2);
}

#[tokio::test]
async fn missing_cache_directory_is_reported() {
    let harness = Harness::new(SITE).await;
    std::fs::remove_dir_all(harness.cache_root()).unwrap();

    let err = reconciler(&harness, &[]).run(false).await.expect_err("no dir");
    assert!(matches!(err, ReconcileError::MissingDirectory(_)));
}

#[test]
fn unset_cache_settings_surface_as_config_missing() {
    let err = CacheConfig::from_settings(&CacheSettings::default())
        .map_err(ReconcileError::from)
        .expect_err("directory unset");
    assert!(matches!(
        err,
        ReconcileError::ConfigMissing {
            key: "cache.directory"
        }
    ));
    assert!(err.to_string().contains("static cache configuration not found"));
}
