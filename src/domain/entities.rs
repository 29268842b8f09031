//! Publishable entities and the capability contract used for change propagation.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use super::context::{Action, ActionContext};
use super::error::DomainError;

/// Advisory queue ordering hint. Lower values are more urgent; 0 is the highest in practice.
pub type Priority = i32;

/// URLs owned by one entity, mapped to their queue priority.
pub type UrlPriorities = BTreeMap<String, Priority>;

/// Default priority for an entity's own canonical URL.
pub const CANONICAL_PRIORITY: Priority = 0;

/// Stable identity of a content node.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EntityId(String);

impl EntityId {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for EntityId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

/// Shared handle to any publishable entity.
pub type EntityHandle = Arc<dyn Publishable>;

/// Capability set every cacheable content node provides.
///
/// Implementations report which entities must be rebuilt or torn down for a
/// given action, and which URLs they own. Ownership must not overlap across
/// entities: the queue and the artifact store are addressed by URL alone.
pub trait Publishable: Send + Sync + fmt::Debug {
    fn id(&self) -> &EntityId;

    /// Entities whose artifacts must be regenerated for this action.
    fn objects_to_update(self: Arc<Self>, context: &ActionContext) -> EntitySet;

    /// Entities whose artifacts must be removed for this action.
    fn objects_to_delete(self: Arc<Self>, context: &ActionContext) -> EntitySet;

    /// URLs this entity maintains, with their queue priority.
    fn urls_to_cache(&self) -> UrlPriorities;

    /// Whether a write of this entity should publish it. Records that exist but
    /// must stay offline return `false`, turning a write into an unpublish.
    fn is_publishable(&self) -> bool {
        true
    }
}

/// Deduplicated set of entities keyed by id, iterated in id order.
#[derive(Clone, Default)]
pub struct EntitySet {
    members: BTreeMap<EntityId, EntityHandle>,
}

impl EntitySet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert an entity; returns `false` when an entity with the same id was already present.
    pub fn insert(&mut self, entity: EntityHandle) -> bool {
        let id = entity.id().clone();
        if self.members.contains_key(&id) {
            return false;
        }
        self.members.insert(id, entity);
        true
    }

    pub fn contains(&self, id: &EntityId) -> bool {
        self.members.contains_key(id)
    }

    pub fn ids(&self) -> BTreeSet<EntityId> {
        self.members.keys().cloned().collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &EntityHandle> {
        self.members.values()
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }
}

impl fmt::Debug for EntitySet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.members.keys()).finish()
    }
}

impl FromIterator<EntityHandle> for EntitySet {
    fn from_iter<I: IntoIterator<Item = EntityHandle>>(iter: I) -> Self {
        let mut set = Self::new();
        set.extend(iter);
        set
    }
}

impl Extend<EntityHandle> for EntitySet {
    fn extend<I: IntoIterator<Item = EntityHandle>>(&mut self, iter: I) {
        for entity in iter {
            self.insert(entity);
        }
    }
}

impl IntoIterator for EntitySet {
    type Item = EntityHandle;
    type IntoIter = std::collections::btree_map::IntoValues<EntityId, EntityHandle>;

    fn into_iter(self) -> Self::IntoIter {
        self.members.into_values()
    }
}

/// A content node without structural relations (a standalone data record).
#[derive(Debug, Clone)]
pub struct LeafEntity {
    id: EntityId,
    canonical_url: String,
    extra_urls: UrlPriorities,
    publishable: bool,
}

impl LeafEntity {
    pub fn new(id: impl Into<EntityId>, canonical_url: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            canonical_url: canonical_url.into(),
            extra_urls: UrlPriorities::new(),
            publishable: true,
        }
    }

    /// Declare an additional URL maintained by this record.
    pub fn with_url(mut self, url: impl Into<String>, priority: Priority) -> Self {
        self.extra_urls.insert(url.into(), priority);
        self
    }

    pub fn with_publishable(mut self, publishable: bool) -> Self {
        self.publishable = publishable;
        self
    }

    pub fn canonical_url(&self) -> &str {
        &self.canonical_url
    }
}

impl From<String> for EntityId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl Publishable for LeafEntity {
    fn id(&self) -> &EntityId {
        &self.id
    }

    fn objects_to_update(self: Arc<Self>, context: &ActionContext) -> EntitySet {
        let mut set = EntitySet::new();
        match context.action() {
            Action::Publish => {
                set.insert(self);
            }
            Action::Unpublish => {}
        }
        set
    }

    fn objects_to_delete(self: Arc<Self>, context: &ActionContext) -> EntitySet {
        let mut set = EntitySet::new();
        match context.action() {
            Action::Publish => {}
            Action::Unpublish => {
                set.insert(self);
            }
        }
        set
    }

    fn urls_to_cache(&self) -> UrlPriorities {
        let mut urls = self.extra_urls.clone();
        urls.insert(self.canonical_url.clone(), CANONICAL_PRIORITY);
        urls
    }

    fn is_publishable(&self) -> bool {
        self.publishable
    }
}

/// Relation lookups for site-tree pages, backed by the content persistence layer.
pub trait SiteTree: Send + Sync {
    /// The immediate parent of a page, if it has one.
    fn parent_of(&self, id: &EntityId) -> Option<EntityHandle>;

    /// Pages that mirror (copy their content from) the given page.
    fn mirrors_of(&self, id: &EntityId) -> Vec<EntityHandle>;
}

/// A site-tree page with an optional parent and any number of mirrors.
///
/// Propagation is one hop: the parent is refreshed, grandparents are not.
#[derive(Clone)]
pub struct HierarchicalEntity {
    id: EntityId,
    canonical_url: String,
    tree: Arc<dyn SiteTree>,
}

impl HierarchicalEntity {
    pub fn new(
        id: impl Into<EntityId>,
        canonical_url: impl Into<String>,
        tree: Arc<dyn SiteTree>,
    ) -> Self {
        Self {
            id: id.into(),
            canonical_url: canonical_url.into(),
            tree,
        }
    }

    pub fn canonical_url(&self) -> &str {
        &self.canonical_url
    }
}

impl fmt::Debug for HierarchicalEntity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HierarchicalEntity")
            .field("id", &self.id)
            .field("canonical_url", &self.canonical_url)
            .finish_non_exhaustive()
    }
}

impl Publishable for HierarchicalEntity {
    fn id(&self) -> &EntityId {
        &self.id
    }

    fn objects_to_update(self: Arc<Self>, context: &ActionContext) -> EntitySet {
        let mut set = EntitySet::new();
        let parent = self.tree.parent_of(&self.id);
        match context.action() {
            Action::Publish => {
                let mirrors = self.tree.mirrors_of(&self.id);
                set.insert(self);
                set.extend(parent);
                set.extend(mirrors);
            }
            Action::Unpublish => {
                set.extend(parent);
            }
        }
        set
    }

    fn objects_to_delete(self: Arc<Self>, context: &ActionContext) -> EntitySet {
        let mut set = EntitySet::new();
        match context.action() {
            Action::Publish => {}
            Action::Unpublish => {
                let mirrors = self.tree.mirrors_of(&self.id);
                set.insert(self);
                set.extend(mirrors);
            }
        }
        set
    }

    fn urls_to_cache(&self) -> UrlPriorities {
        UrlPriorities::from([(self.canonical_url.clone(), CANONICAL_PRIORITY)])
    }
}

/// Verify that no URL is claimed by more than one entity.
///
/// URLs are compared the way they address artifacts: query, fragment and
/// surrounding slashes are ignored, so `/about` and `/about/` collide.
pub fn ensure_disjoint_urls<'a, I>(entities: I) -> Result<(), DomainError>
where
    I: IntoIterator<Item = &'a EntityHandle>,
{
    let mut owners: BTreeMap<String, (String, EntityId)> = BTreeMap::new();
    for entity in entities {
        for url in entity.urls_to_cache().into_keys() {
            let key = ownership_key(&url).to_string();
            if let Some((claimed, existing)) = owners.get(&key)
                && existing != entity.id()
            {
                return Err(DomainError::invariant(format!(
                    "url `{url}` of `{}` collides with `{claimed}` owned by `{existing}`",
                    entity.id()
                )));
            }
            owners.insert(key, (url, entity.id().clone()));
        }
    }
    Ok(())
}

fn ownership_key(url: &str) -> &str {
    url.split(['?', '#'])
        .next()
        .unwrap_or_default()
        .trim_matches('/')
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    #[derive(Default)]
    struct FixedTree {
        parents: HashMap<EntityId, EntityHandle>,
        mirrors: HashMap<EntityId, Vec<EntityHandle>>,
    }

    impl SiteTree for FixedTree {
        fn parent_of(&self, id: &EntityId) -> Option<EntityHandle> {
            self.parents.get(id).cloned()
        }

        fn mirrors_of(&self, id: &EntityId) -> Vec<EntityHandle> {
            self.mirrors.get(id).cloned().unwrap_or_default()
        }
    }

    fn leaf(id: &str, url: &str) -> EntityHandle {
        Arc::new(LeafEntity::new(id, url))
    }

    fn ids(values: &[&str]) -> BTreeSet<EntityId> {
        values.iter().map(|value| EntityId::from(*value)).collect()
    }

    fn page_with_family() -> Arc<HierarchicalEntity> {
        let mut tree = FixedTree::default();
        tree.parents
            .insert(EntityId::from("child"), leaf("parent", "/parent/"));
        tree.mirrors.insert(
            EntityId::from("child"),
            vec![
                leaf("mirror-1", "/mirror-1/"),
                leaf("mirror-2", "/mirror-2/"),
            ],
        );
        Arc::new(HierarchicalEntity::new(
            "child",
            "/parent/child/",
            Arc::new(tree),
        ))
    }

    #[test]
    fn leaf_publish_updates_only_itself() {
        let entity = Arc::new(LeafEntity::new("record", "/records/1/"));
        let context = ActionContext::publish();

        assert_eq!(
            entity.clone().objects_to_update(&context).ids(),
            ids(&["record"])
        );
        assert!(entity.objects_to_delete(&context).is_empty());
    }

    #[test]
    fn leaf_unpublish_deletes_only_itself() {
        let entity = Arc::new(LeafEntity::new("record", "/records/1/"));
        let context = ActionContext::unpublish();

        assert!(entity.clone().objects_to_update(&context).is_empty());
        assert_eq!(entity.objects_to_delete(&context).ids(), ids(&["record"]));
    }

    #[test]
    fn leaf_owns_canonical_url_at_top_priority() {
        let entity = LeafEntity::new("record", "/records/1/").with_url("/records/1/feed", 5);
        let urls = entity.urls_to_cache();

        assert_eq!(urls.get("/records/1/"), Some(&0));
        assert_eq!(urls.get("/records/1/feed"), Some(&5));
    }

    #[test]
    fn hierarchical_publish_refreshes_self_parent_and_mirrors() {
        let page = page_with_family();
        let context = ActionContext::publish();

        assert_eq!(
            page.clone().objects_to_update(&context).ids(),
            ids(&["child", "parent", "mirror-1", "mirror-2"])
        );
        assert!(page.objects_to_delete(&context).is_empty());
    }

    #[test]
    fn hierarchical_unpublish_refreshes_parent_and_deletes_self_and_mirrors() {
        let page = page_with_family();
        let context = ActionContext::unpublish();

        assert_eq!(
            page.clone().objects_to_update(&context).ids(),
            ids(&["parent"])
        );
        assert_eq!(
            page.objects_to_delete(&context).ids(),
            ids(&["child", "mirror-1", "mirror-2"])
        );
    }

    #[test]
    fn root_page_without_parent_updates_itself_only() {
        let page = Arc::new(HierarchicalEntity::new(
            "home",
            "/",
            Arc::new(FixedTree::default()),
        ));

        assert_eq!(
            page.clone()
                .objects_to_update(&ActionContext::publish())
                .ids(),
            ids(&["home"])
        );
        assert!(
            page.objects_to_update(&ActionContext::unpublish())
                .is_empty()
        );
    }

    #[test]
    fn entity_set_deduplicates_by_id() {
        let mut set = EntitySet::new();
        assert!(set.insert(leaf("a", "/a/")));
        assert!(!set.insert(leaf("a", "/other/")));
        assert_eq!(set.len(), 1);
    }

    #[test]
    fn disjoint_ownership_is_accepted() {
        let entities = vec![leaf("a", "/a/"), leaf("b", "/b/")];
        assert!(ensure_disjoint_urls(&entities).is_ok());
    }

    #[test]
    fn overlapping_ownership_is_rejected() {
        let entities = vec![leaf("a", "/shared/"), leaf("b", "/shared/")];
        let err = ensure_disjoint_urls(&entities).expect_err("overlap must be rejected");
        assert!(err.to_string().contains("/shared/"));
    }

    #[test]
    fn slash_variants_of_one_url_count_as_overlap() {
        for (first, second) in [("/about", "/about/"), ("about", "/about/"), ("/", "")] {
            let entities = vec![leaf("a", first), leaf("b", second)];
            assert!(
                ensure_disjoint_urls(&entities).is_err(),
                "`{first}` and `{second}` should collide"
            );
        }

        let entities = vec![leaf("a", "/about/"), leaf("b", "/about-us/")];
        assert!(ensure_disjoint_urls(&entities).is_ok());
    }
}
