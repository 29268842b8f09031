//! TOML content manifest standing in for the content persistence layer.
//!
//! ```toml
//! [[sites]]
//! key = "shop"
//! theme = "storefront"
//! domains = [{ host = "shop.example.com", primary = true }, { host = "shop.example.net" }]
//!
//! [[entities]]
//! id = "home"
//! url = "/"
//!
//! [[entities]]
//! id = "about"
//! url = "/about/"
//! parent = "home"
//!
//! [[entities]]
//! id = "offer-42"
//! kind = "record"
//! url = "/offers/42/"
//! site = "shop"
//! publishable = false
//! urls = [{ url = "/offers/", priority = 2 }]
//! ```

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Weak};

use async_trait::async_trait;
use serde::Deserialize;
use thiserror::Error;
use tracing::info;

use crate::application::content::{ContentSource, SiteDomain, SiteScope, Visibility};
use crate::application::repos::RepoError;
use crate::cache::slash_variants;
use crate::domain::entities::{
    EntityHandle, EntityId, HierarchicalEntity, LeafEntity, Priority, SiteTree,
    ensure_disjoint_urls,
};

/// Site key that entities without a `site` belong to.
pub const MAIN_SITE: &str = "main";

const DEFAULT_EXTRA_URL_PRIORITY: Priority = 1;

#[derive(Debug, Error)]
pub enum ManifestError {
    #[error("failed to read content manifest `{path}`: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse content manifest: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("invalid content manifest: {0}")]
    Invalid(String),
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct ManifestFile {
    #[serde(default)]
    sites: Vec<SiteEntry>,
    #[serde(default)]
    entities: Vec<EntityEntry>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
struct SiteEntry {
    key: String,
    theme: Option<String>,
    #[serde(default)]
    domains: Vec<DomainEntry>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
struct DomainEntry {
    host: String,
    #[serde(default)]
    primary: bool,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
enum EntityKind {
    #[default]
    Page,
    Record,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
struct EntityEntry {
    id: String,
    #[serde(default)]
    kind: EntityKind,
    url: String,
    parent: Option<String>,
    mirror_of: Option<String>,
    #[serde(default = "default_true")]
    live: bool,
    site: Option<String>,
    locale: Option<String>,
    #[serde(default = "default_true")]
    publishable: bool,
    #[serde(default)]
    urls: Vec<ExtraUrl>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
struct ExtraUrl {
    url: String,
    #[serde(default = "default_extra_priority")]
    priority: Priority,
}

fn default_true() -> bool {
    true
}

fn default_extra_priority() -> Priority {
    DEFAULT_EXTRA_URL_PRIORITY
}

struct ManifestIndex {
    sites: BTreeMap<String, SiteEntry>,
    entities: BTreeMap<EntityId, EntityEntry>,
    mirrors: BTreeMap<EntityId, Vec<EntityId>>,
    this: Weak<ManifestIndex>,
}

impl ManifestIndex {
    fn handle(&self, entry: &EntityEntry) -> Option<EntityHandle> {
        match entry.kind {
            EntityKind::Record => {
                let leaf = entry
                    .urls
                    .iter()
                    .fold(LeafEntity::new(entry.id.as_str(), entry.url.as_str()), |leaf, extra| {
                        leaf.with_url(extra.url.as_str(), extra.priority)
                    })
                    .with_publishable(entry.live && entry.publishable);
                Some(Arc::new(leaf))
            }
            EntityKind::Page => {
                let tree: Arc<dyn SiteTree> = self.this.upgrade()?;
                Some(Arc::new(HierarchicalEntity::new(
                    entry.id.as_str(),
                    entry.url.as_str(),
                    tree,
                )))
            }
        }
    }

    fn live_handle(&self, id: &EntityId) -> Option<EntityHandle> {
        self.entities
            .get(id)
            .filter(|entry| entry.live)
            .and_then(|entry| self.handle(entry))
    }

    fn owner_of(&self, url: &str) -> Option<&EntityEntry> {
        let variants = slash_variants(url.trim_matches('/'));
        self.entities.values().find(|entry| {
            std::iter::once(entry.url.as_str())
                .chain(entry.urls.iter().map(|extra| extra.url.as_str()))
                .any(|owned| owned == url || variants.iter().any(|variant| variant == owned))
        })
    }

    fn visible(entry: &EntityEntry, visibility: &Visibility) -> bool {
        match visibility {
            Visibility::Global => true,
            Visibility::Scoped { site, locale } => {
                entry.site.as_deref().unwrap_or(MAIN_SITE) == site
                    && locale
                        .as_deref()
                        .is_none_or(|locale| entry.locale.as_deref() == Some(locale))
            }
        }
    }
}

impl SiteTree for ManifestIndex {
    fn parent_of(&self, id: &EntityId) -> Option<EntityHandle> {
        let parent = self.entities.get(id)?.parent.as_deref()?;
        self.live_handle(&EntityId::from(parent))
    }

    fn mirrors_of(&self, id: &EntityId) -> Vec<EntityHandle> {
        self.mirrors
            .get(id)
            .into_iter()
            .flatten()
            .filter_map(|mirror| self.live_handle(mirror))
            .collect()
    }
}

/// Content source backed by a manifest file loaded at startup.
#[derive(Clone)]
pub struct ManifestContentSource {
    index: Arc<ManifestIndex>,
}

impl ManifestContentSource {
    pub async fn load(path: &Path) -> Result<Self, ManifestError> {
        let raw = tokio::fs::read_to_string(path)
            .await
            .map_err(|source| ManifestError::Read {
                path: path.to_path_buf(),
                source,
            })?;
        let source = Self::from_toml_str(&raw)?;
        info!(
            target: "staticpub::manifest",
            path = %path.display(),
            entities = source.index.entities.len(),
            sites = source.index.sites.len(),
            "Content manifest loaded"
        );
        Ok(source)
    }

    pub fn from_toml_str(raw: &str) -> Result<Self, ManifestError> {
        let file: ManifestFile = toml::from_str(raw)?;
        Self::from_file(file)
    }

    fn from_file(file: ManifestFile) -> Result<Self, ManifestError> {
        let mut sites = BTreeMap::new();
        for site in file.sites {
            if site.key == MAIN_SITE {
                return Err(ManifestError::Invalid(format!(
                    "site key `{MAIN_SITE}` is reserved for the main site"
                )));
            }
            if site.domains.is_empty() {
                return Err(ManifestError::Invalid(format!(
                    "site `{}` has no domains",
                    site.key
                )));
            }
            if let Some(previous) = sites.insert(site.key.clone(), site) {
                return Err(ManifestError::Invalid(format!(
                    "duplicate site `{}`",
                    previous.key
                )));
            }
        }

        let mut entities = BTreeMap::new();
        for entity in file.entities {
            let id = EntityId::from(entity.id.as_str());
            if entities.insert(id, entity.clone()).is_some() {
                return Err(ManifestError::Invalid(format!(
                    "duplicate entity `{}`",
                    entity.id
                )));
            }
        }

        let mut mirrors: BTreeMap<EntityId, Vec<EntityId>> = BTreeMap::new();
        for (id, entry) in &entities {
            validate_entry(id, entry, &entities, &sites)?;
            if let Some(original) = entry.mirror_of.as_deref() {
                mirrors
                    .entry(EntityId::from(original))
                    .or_default()
                    .push(id.clone());
            }
        }

        let index = Arc::new_cyclic(|this| ManifestIndex {
            sites,
            entities,
            mirrors,
            this: this.clone(),
        });

        let handles: Vec<EntityHandle> = index
            .entities
            .values()
            .filter_map(|entry| index.handle(entry))
            .collect();
        ensure_disjoint_urls(&handles).map_err(|err| ManifestError::Invalid(err.to_string()))?;

        Ok(Self { index })
    }

    /// Relation provider for site-tree pages in this manifest.
    pub fn site_tree(&self) -> Arc<dyn SiteTree> {
        self.index.clone()
    }

    /// Look up an entity whether or not it is live.
    pub fn entity(&self, id: &EntityId) -> Option<EntityHandle> {
        self.index
            .entities
            .get(id)
            .and_then(|entry| self.index.handle(entry))
    }
}

fn validate_entry(
    id: &EntityId,
    entry: &EntityEntry,
    entities: &BTreeMap<EntityId, EntityEntry>,
    sites: &BTreeMap<String, SiteEntry>,
) -> Result<(), ManifestError> {
    let invalid = |reason: String| -> Result<(), ManifestError> {
        Err(ManifestError::Invalid(format!("entity `{id}`: {reason}")))
    };

    if entry.kind == EntityKind::Record && (entry.parent.is_some() || entry.mirror_of.is_some()) {
        return invalid("records cannot have a parent or mirror".to_string());
    }
    if entry.kind == EntityKind::Page && !entry.urls.is_empty() {
        return invalid("extra urls are only supported on records".to_string());
    }
    for reference in [entry.parent.as_deref(), entry.mirror_of.as_deref()]
        .into_iter()
        .flatten()
    {
        if reference == id.as_str() {
            return invalid("refers to itself".to_string());
        }
        if !entities.contains_key(&EntityId::from(reference)) {
            return invalid(format!("unknown entity `{reference}`"));
        }
    }
    if let Some(site) = entry.site.as_deref()
        && site != MAIN_SITE
        && !sites.contains_key(site)
    {
        return invalid(format!("unknown site `{site}`"));
    }
    Ok(())
}

#[async_trait]
impl ContentSource for ManifestContentSource {
    async fn find_entity(&self, id: &EntityId) -> Result<Option<EntityHandle>, RepoError> {
        Ok(self.entity(id))
    }

    async fn live_urls(&self, visibility: &Visibility) -> Result<BTreeSet<String>, RepoError> {
        Ok(self
            .index
            .entities
            .values()
            .filter(|entry| entry.live && ManifestIndex::visible(entry, visibility))
            .filter_map(|entry| self.index.handle(entry))
            .flat_map(|handle| handle.urls_to_cache().into_keys())
            .collect())
    }

    async fn site_for_url(&self, url: &str) -> Result<SiteScope, RepoError> {
        let site = self
            .index
            .owner_of(url)
            .and_then(|entry| entry.site.as_deref())
            .and_then(|key| self.index.sites.get(key));

        Ok(match site {
            None => SiteScope::Main,
            Some(site) => SiteScope::Subsite {
                theme: site.theme.clone(),
                domains: site
                    .domains
                    .iter()
                    .map(|domain| SiteDomain {
                        host: domain.host.clone(),
                        primary: domain.primary,
                    })
                    .collect(),
            },
        })
    }

    async fn site_domains(&self) -> Result<Vec<SiteDomain>, RepoError> {
        Ok(self
            .index
            .sites
            .values()
            .flat_map(|site| site.domains.iter())
            .map(|domain| SiteDomain {
                host: domain.host.clone(),
                primary: domain.primary,
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::context::ActionContext;

    const MANIFEST: &str = r#"
        [[sites]]
        key = "shop"
        theme = "storefront"
        domains = [{ host = "shop.example.com", primary = true }, { host = "shop.example.net" }]

        [[entities]]
        id = "home"
        url = "/"

        [[entities]]
        id = "about"
        url = "/about/"
        parent = "home"
        locale = "en"

        [[entities]]
        id = "about-copy"
        url = "/about-copy/"
        mirror_of = "about"

        [[entities]]
        id = "retired"
        url = "/retired/"
        live = false

        [[entities]]
        id = "offer"
        kind = "record"
        url = "/offers/42/"
        site = "shop"
        urls = [{ url = "/offers/", priority = 2 }]
    "#;

    fn source() -> ManifestContentSource {
        ManifestContentSource::from_toml_str(MANIFEST).expect("manifest")
    }

    fn ids(set: &crate::domain::entities::EntitySet) -> Vec<String> {
        set.ids().iter().map(|id| id.to_string()).collect()
    }

    #[tokio::test]
    async fn global_live_urls_skip_offline_entities() {
        let urls = source().live_urls(&Visibility::Global).await.unwrap();
        let urls: Vec<&str> = urls.iter().map(String::as_str).collect();
        assert_eq!(
            urls,
            vec!["/", "/about-copy/", "/about/", "/offers/", "/offers/42/"]
        );
    }

    #[tokio::test]
    async fn scoped_live_urls_filter_site_and_locale() {
        let scoped = Visibility::Scoped {
            site: MAIN_SITE.to_string(),
            locale: Some("en".to_string()),
        };
        let urls = source().live_urls(&scoped).await.unwrap();
        assert_eq!(urls.into_iter().collect::<Vec<_>>(), vec!["/about/"]);
    }

    #[tokio::test]
    async fn page_publish_reaches_parent_and_mirrors() {
        let about = source()
            .find_entity(&EntityId::from("about"))
            .await
            .unwrap()
            .expect("about");
        let updates = about.objects_to_update(&ActionContext::publish());
        assert_eq!(ids(&updates), vec!["about", "about-copy", "home"]);
    }

    #[tokio::test]
    async fn subsite_urls_resolve_to_their_domains() {
        let source = source();
        match source.site_for_url("/offers/").await.unwrap() {
            SiteScope::Subsite { theme, domains } => {
                assert_eq!(theme.as_deref(), Some("storefront"));
                assert_eq!(domains.len(), 2);
                assert!(domains[0].primary);
            }
            SiteScope::Main => panic!("expected subsite"),
        }
        assert_eq!(source.site_for_url("/about/").await.unwrap(), SiteScope::Main);
        assert_eq!(source.site_for_url("/unknown/").await.unwrap(), SiteScope::Main);
    }

    #[test]
    fn offline_records_are_not_publishable() {
        let manifest = r#"
            [[entities]]
            id = "draft"
            kind = "record"
            url = "/drafts/1/"
            live = false
        "#;
        let source = ManifestContentSource::from_toml_str(manifest).unwrap();
        let draft = source.entity(&EntityId::from("draft")).expect("draft");
        assert!(!draft.is_publishable());
    }

    #[test]
    fn rejects_dangling_references_and_shared_urls() {
        let dangling = r#"
            [[entities]]
            id = "orphan"
            url = "/orphan/"
            parent = "missing"
        "#;
        assert!(matches!(
            ManifestContentSource::from_toml_str(dangling),
            Err(ManifestError::Invalid(_))
        ));

        let shared = r#"
            [[entities]]
            id = "a"
            url = "/same/"

            [[entities]]
            id = "b"
            url = "/same/"
        "#;
        assert!(matches!(
            ManifestContentSource::from_toml_str(shared),
            Err(ManifestError::Invalid(_))
        ));

        let trailing_slash = r#"
            [[entities]]
            id = "a"
            url = "/about"

            [[entities]]
            id = "b"
            url = "/about/"
        "#;
        assert!(matches!(
            ManifestContentSource::from_toml_str(trailing_slash),
            Err(ManifestError::Invalid(message)) if message.contains("/about")
        ));
    }
}
