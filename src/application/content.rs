//! Content persistence collaborator: live entity enumeration and tenancy lookups.

use std::collections::BTreeSet;

use async_trait::async_trait;

use crate::domain::entities::{EntityHandle, EntityId};

use super::repos::RepoError;

/// How much of the live content set a query may see.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Visibility {
    /// Every live entity regardless of tenant or locale filters.
    Global,
    /// Only entities belonging to one site and, optionally, one locale.
    Scoped {
        site: String,
        locale: Option<String>,
    },
}

/// One registered host for a subsite.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SiteDomain {
    pub host: String,
    pub primary: bool,
}

/// Tenancy of the entity that owns a URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SiteScope {
    /// The main site; one artifact per URL at the standard path.
    Main,
    /// A subsite; one artifact per registered domain variant.
    Subsite {
        theme: Option<String>,
        domains: Vec<SiteDomain>,
    },
}

#[async_trait]
pub trait ContentSource: Send + Sync {
    /// Look up an entity by id, live or not.
    async fn find_entity(&self, id: &EntityId) -> Result<Option<EntityHandle>, RepoError>;

    /// All URLs owned by live entities visible under `visibility`.
    async fn live_urls(&self, visibility: &Visibility) -> Result<BTreeSet<String>, RepoError>;

    /// Tenancy of the entity owning `url`; `Main` when the URL is unknown.
    async fn site_for_url(&self, url: &str) -> Result<SiteScope, RepoError>;

    /// Every host registered for any subsite.
    async fn site_domains(&self) -> Result<Vec<SiteDomain>, RepoError>;
}
