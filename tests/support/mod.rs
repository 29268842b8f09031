#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use staticpub::application::content::ContentSource;
use staticpub::application::render::{RenderError, RenderRequest, RenderedPage, Renderer};
use staticpub::application::repos::{QueueRepo, SummaryRepo};
use staticpub::cache::{
    ArtifactLayout, ArtifactStore, CacheBuilder, CacheBuilderDeps, CacheConfig, FileLock,
    WorkerConfig,
};
use staticpub::infra::db::SqliteRepositories;
use staticpub::infra::manifest::ManifestContentSource;
use staticpub::infra::memory::MemorySampler;
use tempfile::TempDir;

pub const EXTENSION: &str = "html";

/// Renderer serving canned pages; unknown URLs render 404.
#[derive(Default)]
pub struct StaticRenderer {
    pages: Mutex<HashMap<String, (u16, String)>>,
    failing: Mutex<HashSet<String>>,
    panicking: Mutex<HashSet<String>>,
    requests: Mutex<Vec<RenderRequest>>,
}

impl StaticRenderer {
    pub fn serve(&self, url: &str, status: u16, body: &str) {
        self.pages
            .lock()
            .unwrap()
            .insert(url.to_string(), (status, body.to_string()));
    }

    pub fn fail(&self, url: &str) {
        self.failing.lock().unwrap().insert(url.to_string());
    }

    pub fn panic_on(&self, url: &str) {
        self.panicking.lock().unwrap().insert(url.to_string());
    }

    pub fn requests(&self) -> Vec<RenderRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl Renderer for StaticRenderer {
    async fn render(&self, request: &RenderRequest) -> Result<RenderedPage, RenderError> {
        self.requests.lock().unwrap().push(request.clone());
        if self.panicking.lock().unwrap().contains(&request.url) {
            panic!("template exploded for {}", request.url);
        }
        if self.failing.lock().unwrap().contains(&request.url) {
            return Err(RenderError::failed(&request.url, "template error"));
        }
        let page = self.pages.lock().unwrap().get(&request.url).cloned();
        Ok(match page {
            Some((status, body)) => RenderedPage::new(status, body),
            None => RenderedPage::new(404, ""),
        })
    }
}

pub struct FixedMemory;

impl MemorySampler for FixedMemory {
    fn resident_bytes(&self) -> u64 {
        32 * 1024 * 1024
    }
}

/// Scratch cache directory, queue database and content manifest for one test.
pub struct Harness {
    pub dir: TempDir,
    pub repos: Arc<SqliteRepositories>,
    pub content: Arc<ManifestContentSource>,
    pub renderer: Arc<StaticRenderer>,
}

impl Harness {
    pub async fn new(manifest: &str) -> Self {
        let dir = tempfile::tempdir().expect("tempdir");
        let url = format!("sqlite://{}", dir.path().join("queue.db").display());
        let pool = SqliteRepositories::connect(&url, 4, Duration::from_secs(5))
            .await
            .expect("connect");
        SqliteRepositories::run_migrations(&pool)
            .await
            .expect("migrations");
        let content = ManifestContentSource::from_toml_str(manifest).expect("manifest");
        std::fs::create_dir_all(dir.path().join("cache")).expect("cache dir");

        Self {
            dir,
            repos: Arc::new(SqliteRepositories::new(pool)),
            content: Arc::new(content),
            renderer: Arc::new(StaticRenderer::default()),
        }
    }

    pub fn cache_root(&self) -> PathBuf {
        self.dir.path().join("cache")
    }

    pub fn cache_file(&self, relative: &str) -> PathBuf {
        self.cache_root().join(relative)
    }

    pub fn read(&self, relative: &str) -> Option<String> {
        std::fs::read_to_string(self.cache_file(relative)).ok()
    }

    pub fn write(&self, relative: &str, body: &str) {
        let path = self.cache_file(relative);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).expect("parent dir");
        }
        std::fs::write(path, body).expect("write artifact");
    }

    pub fn lock_path(&self) -> PathBuf {
        self.dir.path().join("run.lock")
    }

    pub fn lock(&self) -> FileLock {
        FileLock::new(self.lock_path())
    }

    pub fn cache_config(&self) -> CacheConfig {
        CacheConfig::new(ArtifactLayout::new(self.cache_root(), EXTENSION))
    }

    pub fn store(&self) -> ArtifactStore {
        ArtifactStore::new(self.cache_config())
    }

    pub fn worker_config(&self) -> WorkerConfig {
        WorkerConfig {
            lock_file: self.lock_path(),
            daemon_budget: Duration::from_secs(5),
            idle_pause: Duration::from_millis(10),
            ..WorkerConfig::default()
        }
    }

    pub fn builder(&self) -> CacheBuilder {
        self.builder_with(self.worker_config(), self.cache_config())
    }

    pub fn builder_with(&self, worker: WorkerConfig, cache: CacheConfig) -> CacheBuilder {
        let queue: Arc<dyn QueueRepo> = self.repos.clone();
        let summaries: Arc<dyn SummaryRepo> = self.repos.clone();
        let content: Arc<dyn ContentSource> = self.content.clone();
        let renderer: Arc<dyn Renderer> = self.renderer.clone();
        CacheBuilder::new(
            worker.clone(),
            ArtifactStore::new(cache),
            CacheBuilderDeps {
                queue,
                summaries,
                content,
                renderer,
                lock: Arc::new(FileLock::new(worker.lock_file)),
                memory: Arc::new(FixedMemory),
            },
        )
    }
}
