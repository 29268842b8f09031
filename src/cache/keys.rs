//! URL to artifact path mapping.
//!
//! The same rule is used by the builder (to write), the reconciler (to map a
//! file back to its URL) and any reader serving artifacts.

use std::path::{Component, Path, PathBuf};

use thiserror::Error;
use url::Url;

const INDEX_STEM: &str = "index";
const STALE_INFIX: &str = "stale";

#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("url `{url}` cannot be mapped to an artifact path: {reason}")]
pub struct InvalidUrl {
    pub url: String,
    pub reason: &'static str,
}

impl InvalidUrl {
    fn new(url: &str, reason: &'static str) -> Self {
        Self {
            url: url.to_string(),
            reason,
        }
    }
}

/// Physical location of the artifact cache.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactLayout {
    root: PathBuf,
    extension: String,
}

impl ArtifactLayout {
    /// `extension` may be given with or without its leading dot.
    pub fn new(root: impl Into<PathBuf>, extension: impl AsRef<str>) -> Self {
        Self {
            root: root.into(),
            extension: extension.as_ref().trim_start_matches('.').to_string(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn extension(&self) -> &str {
        &self.extension
    }

    /// Primary artifact for a main-site URL: `<root>/<urlPath>.<ext>`.
    pub fn primary_path(&self, url: &str) -> Result<PathBuf, InvalidUrl> {
        self.variant_path(None, url)
    }

    /// Primary artifact for one domain variant; `host` adds a directory level.
    pub fn variant_path(&self, host: Option<&str>, url: &str) -> Result<PathBuf, InvalidUrl> {
        let relative = relative_url_path(url)?;
        let mut path = self.root.clone();
        if let Some(host) = host {
            if host.is_empty() || host.contains(['/', '\\']) || host == "." || host == ".." {
                return Err(InvalidUrl::new(url, "domain is not a valid directory name"));
            }
            path.push(host);
        }
        if relative.is_empty() {
            path.push(format!("{INDEX_STEM}.{}", self.extension));
        } else {
            path.push(format!("{relative}.{}", self.extension));
        }
        Ok(path)
    }

    /// Stale companion of a primary artifact: `.<ext>` becomes `.stale.<ext>`.
    pub fn stale_path(&self, primary: &Path) -> PathBuf {
        primary.with_extension(format!("{STALE_INFIX}.{}", self.extension))
    }

    /// Whether a file name is a stale companion under this layout.
    pub fn is_stale_name(&self, file_name: &str) -> bool {
        file_name.ends_with(&format!(".{STALE_INFIX}.{}", self.extension))
    }

    /// URL candidate for a file below the root, or `None` when the file is not
    /// a primary artifact. `index.<ext>` at the root maps to the empty URL.
    pub fn candidate_url(&self, relative: &Path) -> Option<String> {
        let text = relative.to_str()?;
        let file_name = relative.file_name()?.to_str()?;
        if self.is_stale_name(file_name) {
            return None;
        }
        let suffix = format!(".{}", self.extension);
        let stem = text.strip_suffix(&suffix)?;
        let stem = stem.replace('\\', "/");
        if stem == INDEX_STEM {
            return Some(String::new());
        }
        Some(stem)
    }
}

/// Site-relative path of a URL without leading or trailing slashes.
///
/// Absolute URLs are reduced to their path. Query strings and fragments are
/// dropped. Parent-directory segments are rejected.
pub fn relative_url_path(url: &str) -> Result<String, InvalidUrl> {
    let path = match Url::parse(url) {
        Ok(parsed) if parsed.has_host() => parsed.path().to_string(),
        _ => url.split(['?', '#']).next().unwrap_or_default().to_string(),
    };
    let trimmed = path.trim_matches('/');
    if trimmed.is_empty() {
        return Ok(String::new());
    }
    for component in Path::new(trimmed).components() {
        match component {
            Component::Normal(_) => {}
            Component::CurDir => return Err(InvalidUrl::new(url, "`.` segments are not allowed")),
            _ => return Err(InvalidUrl::new(url, "path escapes the cache directory")),
        }
    }
    if trimmed.split('/').any(str::is_empty) {
        return Err(InvalidUrl::new(url, "empty path segment"));
    }
    Ok(trimmed.to_string())
}

/// The four slash variants a candidate URL may be stored under: `u`, `u/`, `/u`, `/u/`.
pub fn slash_variants(candidate: &str) -> [String; 4] {
    let bare = candidate.trim_matches('/');
    [
        bare.to_string(),
        format!("{bare}/"),
        format!("/{bare}"),
        format!("/{bare}/"),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    fn layout() -> ArtifactLayout {
        ArtifactLayout::new("/var/cache/site", ".html")
    }

    #[test]
    fn nested_url_maps_below_root() {
        let path = layout().primary_path("/about/team/").expect("valid url");
        assert_eq!(path, PathBuf::from("/var/cache/site/about/team.html"));
    }

    #[test]
    fn root_url_maps_to_index() {
        assert_eq!(
            layout().primary_path("/").expect("root"),
            PathBuf::from("/var/cache/site/index.html")
        );
        assert_eq!(
            layout().primary_path("").expect("empty"),
            PathBuf::from("/var/cache/site/index.html")
        );
    }

    #[test]
    fn absolute_urls_are_reduced_to_their_path() {
        let path = layout()
            .primary_path("https://example.com/news/?page=2")
            .expect("absolute url");
        assert_eq!(path, PathBuf::from("/var/cache/site/news.html"));
    }

    #[test]
    fn domain_variants_get_their_own_directory() {
        let path = layout()
            .variant_path(Some("sub.example.com"), "/contact")
            .expect("variant");
        assert_eq!(
            path,
            PathBuf::from("/var/cache/site/sub.example.com/contact.html")
        );
    }

    #[test]
    fn traversal_is_rejected() {
        assert!(layout().primary_path("/../etc/passwd").is_err());
        assert!(layout().variant_path(Some(".."), "/x").is_err());
    }

    #[test]
    fn stale_companion_sits_next_to_primary() {
        let layout = layout();
        let primary = layout.primary_path("/foo").expect("valid url");
        assert_eq!(
            layout.stale_path(&primary),
            PathBuf::from("/var/cache/site/foo.stale.html")
        );
    }

    #[test]
    fn candidate_url_skips_foreign_and_stale_files() {
        let layout = layout();
        assert_eq!(
            layout.candidate_url(Path::new("about/team.html")),
            Some("about/team".to_string())
        );
        assert_eq!(
            layout.candidate_url(Path::new("index.html")),
            Some(String::new())
        );
        assert_eq!(layout.candidate_url(Path::new("about.stale.html")), None);
        assert_eq!(layout.candidate_url(Path::new("robots.txt")), None);
    }

    #[test]
    fn slash_variants_cover_all_forms() {
        assert_eq!(
            slash_variants("/about/"),
            [
                "about".to_string(),
                "about/".to_string(),
                "/about".to_string(),
                "/about/".to_string()
            ]
        );
    }
}
