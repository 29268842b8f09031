mod support;

use staticpub::application::content::ContentSource;
use staticpub::application::repos::QueueRepo;
use staticpub::cache::{PublishingEngine, RunMode, RunOptions, RunOutcome};
use staticpub::domain::context::ActionExtensions;
use staticpub::domain::entities::{EntityHandle, EntityId};
use staticpub::domain::types::QueueIntent;
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
    id = "about-copy"
    url = "/about-copy/"
    mirror_of = "about"

    [[entities]]
    id = "offer"
    kind = "record"
    url = "/offers/42/"
    publishable = false
    urls = [{ url = "/offers/", priority = 2 }]
"#;

async fn entity(harness: &Harness, id: &str) -> EntityHandle {
    harness
        .content
        .find_entity(&EntityId::from(id))
        .await
        .unwrap()
        .expect("entity in manifest")
}

fn engine(harness: &Harness) -> PublishingEngine {
    PublishingEngine::new(harness.repos.clone())
}

async fn queued(harness: &Harness) -> Vec<(String, i32, QueueIntent)> {
    let mut entries: Vec<_> = harness
        .repos
        .list()
        .await
        .unwrap()
        .into_iter()
        .map(|item| (item.url, item.priority, item.intent))
        .collect();
    entries.sort_by(|a, b| a.0.cmp(&b.0));
    entries
}

#[tokio::test]
async fn publishing_a_page_refreshes_parent_and_mirrors() {
    let harness = Harness::new(SITE).await;
    let about = entity(&harness, "about").await;

    let plan = engine(&harness)
        .after_publish(&about, ActionExtensions::default())
        .await
        .unwrap();

    assert_eq!(plan.len(), 3);
    assert_eq!(
        queued(&harness).await,
        vec![
            ("/".to_string(), 0, QueueIntent::Update),
            ("/about-copy/".to_string(), 0, QueueIntent::Update),
            ("/about/".to_string(), 0, QueueIntent::Update),
        ]
    );
}

#[tokio::test]
async fn unpublishing_a_page_deletes_it_and_its_mirrors() {
    let harness = Harness::new(SITE).await;
    let about = entity(&harness, "about").await;

    let pending = engine(&harness).before_unpublish(&about, ActionExtensions::default());
    assert!(harness.repos.list().await.unwrap().is_empty());
    pending.flush().await.unwrap();

    assert_eq!(
        queued(&harness).await,
        vec![
            ("/".to_string(), 0, QueueIntent::Update),
            ("/about-copy/".to_string(), 0, QueueIntent::Delete),
            ("/about/".to_string(), 0, QueueIntent::Delete),
        ]
    );
}

#[tokio::test]
async fn writing_an_unpublishable_record_removes_all_its_urls() {
    let harness = Harness::new(SITE).await;
    let offer = entity(&harness, "offer").await;

    engine(&harness)
        .after_write(&offer, ActionExtensions::default())
        .await
        .unwrap();

    assert_eq!(
        queued(&harness).await,
        vec![
            ("/offers/".to_string(), 2, QueueIntent::Delete),
            ("/offers/42/".to_string(), 0, QueueIntent::Delete),
        ]
    );
}

#[tokio::test]
async fn publishing_twice_keeps_one_entry_per_url() {
    let harness = Harness::new(SITE).await;
    let about = entity(&harness, "about").await;
    let engine = engine(&harness);

    for _ in 0..2 {
        engine
            .after_publish(&about, ActionExtensions::default())
            .await
            .unwrap();
    }

    let items = harness.repos.list().await.unwrap();
    assert_eq!(items.len(), 3);
    assert!(items.iter().all(|item| item.version == 2));
}

#[tokio::test]
async fn unpublished_page_disappears_from_the_cache_after_a_build() {
    let harness = Harness::new(SITE).await;
    harness.write("index.html", "home v1");
    harness.write("about.html", "about");
    harness.write("about.stale.html", "about (stale)");
    harness.write("about-copy.html", "copy");
    harness.renderer.serve("/", 200, "home v2");

    let about = entity(&harness, "about").await;
    engine(&harness)
        .before_unpublish(&about, ActionExtensions::default())
        .flush()
        .await
        .unwrap();

    let outcome = harness
        .builder()
        .run(RunOptions {
            mode: RunMode::Once,
            verbose: false,
        })
        .await
        .unwrap();
    assert!(matches!(outcome, RunOutcome::Completed(_)));

    assert!(!harness.cache_file("about.html").exists());
    assert!(!harness.cache_file("about.stale.html").exists());
    assert!(!harness.cache_file("about-copy.html").exists());
    assert_eq!(harness.read("index.html").as_deref(), Some("home v2"));
    assert!(harness.read("index.stale.html").is_some());
    assert!(harness.repos.list().await.unwrap().is_empty());
}
