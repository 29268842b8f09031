//! Artifact store.
//!
//! Owns the primary artifact and its stale companion for every URL variant.
//! Only the queue worker writes here; the reconciler only removes.

use std::fmt;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use bytes::Bytes;
use thiserror::Error;
use time::OffsetDateTime;
use tokio::fs;

use crate::application::render::RenderedPage;
use crate::domain::types::QueueIntent;

use super::config::CacheConfig;
use super::keys::{ArtifactLayout, InvalidUrl};

#[cfg(unix)]
const ARTIFACT_MODE: u32 = 0o664;

#[derive(Debug, Error)]
pub enum ArtifactError {
    #[error(transparent)]
    InvalidUrl(#[from] InvalidUrl),
    #[error("artifact io failed for `{path}`: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    /// A stale companion survived without its primary while the page is
    /// reported absent. Needs an operator; never resolved automatically.
    #[error(
        "stale file `{stale}` exists for a page that returns 404; it should have been removed by the unpublish action"
    )]
    Inconsistency { stale: PathBuf },
}

impl ArtifactError {
    fn io(path: &Path, source: io::Error) -> Self {
        Self::Io {
            path: path.to_path_buf(),
            source,
        }
    }
}

/// What the write rule did with one build result.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOutcome {
    /// First successful build; primary written, no companion yet.
    Created,
    /// Primary refreshed and stale companion written.
    Updated,
    /// Failed or empty result; the existing primary was kept as is.
    Kept,
    /// Failed or empty result with nothing on disk; nothing written.
    Skipped,
    /// Page removed or confirmed absent; flags tell which files existed.
    Removed { primary: bool, stale: bool },
    /// Confirmed absent and neither file existed.
    UnlinkFileDoesNotExist,
}

impl WriteOutcome {
    pub fn as_str(self) -> &'static str {
        match self {
            WriteOutcome::Created => "created",
            WriteOutcome::Updated => "update",
            WriteOutcome::Kept => "kept",
            WriteOutcome::Skipped => "skipped",
            WriteOutcome::Removed { .. } => "removed",
            WriteOutcome::UnlinkFileDoesNotExist => "unlink_file_does_not_exist",
        }
    }

    /// Whether the outcome left a fresh primary artifact on disk.
    pub fn is_success(self) -> bool {
        matches!(self, WriteOutcome::Created | WriteOutcome::Updated)
    }
}

impl fmt::Display for WriteOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One generated (or removed) physical artifact.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheArtifact {
    pub url: String,
    pub path: PathBuf,
    pub stale_path: PathBuf,
    pub status: u16,
    pub bytes_written: u64,
    pub outcome: WriteOutcome,
    pub generated_at: OffsetDateTime,
}

/// Filesystem artifact store applying the stale-fallback write rule.
#[derive(Debug, Clone)]
pub struct ArtifactStore {
    config: CacheConfig,
}

impl ArtifactStore {
    pub fn new(config: CacheConfig) -> Self {
        Self { config }
    }

    pub fn layout(&self) -> &ArtifactLayout {
        &self.config.layout
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    /// Apply a render result for `url` at `path`.
    ///
    /// * existing primary, status < 400, non-empty: write primary and stale companion.
    /// * no primary, status < 400, non-empty: write primary only.
    /// * no primary, status 404: confirmed absent. With a delete intent the
    ///   stale companion is removed; with an update intent a surviving
    ///   companion is an [`ArtifactError::Inconsistency`].
    /// * anything else leaves the disk untouched.
    pub async fn apply(
        &self,
        url: &str,
        path: &Path,
        page: &RenderedPage,
        intent: QueueIntent,
    ) -> Result<CacheArtifact, ArtifactError> {
        let stale_path = self.config.layout.stale_path(path);
        let primary_exists = exists(path).await?;
        let usable = page.status < 400 && !page.content.is_empty();

        let (outcome, bytes_written) = if usable {
            write_atomic(path, page.content.clone()).await?;
            if primary_exists {
                let stale = self.stale_content(&page.content);
                let stale_len = stale.len() as u64;
                write_atomic(&stale_path, stale).await?;
                (
                    WriteOutcome::Updated,
                    page.content.len() as u64 + stale_len,
                )
            } else {
                (WriteOutcome::Created, page.content.len() as u64)
            }
        } else if primary_exists {
            (WriteOutcome::Kept, 0)
        } else if page.status == 404 {
            (self.confirm_absent(&stale_path, intent).await?, 0)
        } else {
            (WriteOutcome::Skipped, 0)
        };

        Ok(CacheArtifact {
            url: url.to_string(),
            path: path.to_path_buf(),
            stale_path,
            status: page.status,
            bytes_written,
            outcome,
            generated_at: OffsetDateTime::now_utc(),
        })
    }

    /// Remove the primary artifact at `path`, then run the confirmed-absent
    /// rule so its stale companion goes too.
    pub async fn unpublish(&self, url: &str, path: &Path) -> Result<CacheArtifact, ArtifactError> {
        let primary_removed = remove_if_exists(path).await?;
        let mut artifact = self
            .apply(url, path, &RenderedPage::new(404, Bytes::new()), QueueIntent::Delete)
            .await?;
        if primary_removed {
            artifact.outcome = match artifact.outcome {
                WriteOutcome::Removed { stale, .. } => WriteOutcome::Removed {
                    primary: true,
                    stale,
                },
                _ => WriteOutcome::Removed {
                    primary: true,
                    stale: false,
                },
            };
        }
        Ok(artifact)
    }

    /// Delete an orphaned artifact and its stale companion. Returns how many files went away.
    pub async fn remove_orphan(&self, path: &Path) -> Result<usize, ArtifactError> {
        let stale_path = self.config.layout.stale_path(path);
        let mut removed = 0;
        for candidate in [path, stale_path.as_path()] {
            if remove_if_exists(candidate).await? {
                removed += 1;
            }
        }
        Ok(removed)
    }

    /// Fresh content with the stale marker replaced by the staleness notice.
    pub fn stale_content(&self, content: &[u8]) -> Bytes {
        Bytes::from(replace_all(
            content,
            self.config.stale_marker.as_bytes(),
            self.config.stale_notice.as_bytes(),
        ))
    }

    async fn confirm_absent(
        &self,
        stale_path: &Path,
        intent: QueueIntent,
    ) -> Result<WriteOutcome, ArtifactError> {
        match intent {
            QueueIntent::Delete => {
                if remove_if_exists(stale_path).await? {
                    Ok(WriteOutcome::Removed {
                        primary: false,
                        stale: true,
                    })
                } else {
                    Ok(WriteOutcome::UnlinkFileDoesNotExist)
                }
            }
            QueueIntent::Update => {
                if exists(stale_path).await? {
                    Err(ArtifactError::Inconsistency {
                        stale: stale_path.to_path_buf(),
                    })
                } else {
                    Ok(WriteOutcome::UnlinkFileDoesNotExist)
                }
            }
        }
    }
}

async fn exists(path: &Path) -> Result<bool, ArtifactError> {
    fs::try_exists(path)
        .await
        .map_err(|err| ArtifactError::io(path, err))
}

async fn remove_if_exists(path: &Path) -> Result<bool, ArtifactError> {
    match fs::remove_file(path).await {
        Ok(()) => Ok(true),
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(false),
        Err(err) => Err(ArtifactError::io(path, err)),
    }
}

/// Write via a temporary sibling and rename, so readers never see a torn file.
async fn write_atomic(path: &Path, content: Bytes) -> Result<(), ArtifactError> {
    let target = path.to_path_buf();
    tokio::task::spawn_blocking(move || write_atomic_blocking(&target, &content))
        .await
        .map_err(|err| ArtifactError::io(path, io::Error::other(err)))?
        .map_err(|err| ArtifactError::io(path, err))
}

fn write_atomic_blocking(path: &Path, content: &[u8]) -> io::Result<()> {
    let parent = path
        .parent()
        .filter(|parent| !parent.as_os_str().is_empty())
        .unwrap_or(Path::new("."));
    std::fs::create_dir_all(parent)?;
    let mut temp = tempfile::NamedTempFile::new_in(parent)?;
    temp.write_all(content)?;
    temp.as_file().sync_data()?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        temp.as_file()
            .set_permissions(std::fs::Permissions::from_mode(ARTIFACT_MODE))?;
    }
    temp.persist(path).map_err(|err| err.error)?;
    Ok(())
}

fn replace_all(haystack: &[u8], needle: &[u8], replacement: &[u8]) -> Vec<u8> {
    if needle.is_empty() {
        return haystack.to_vec();
    }
    let mut out = Vec::with_capacity(haystack.len() + replacement.len());
    let mut rest = haystack;
    while let Some(index) = rest.windows(needle.len()).position(|window| window == needle) {
        out.extend_from_slice(&rest[..index]);
        out.extend_from_slice(replacement);
        rest = &rest[index + needle.len()..];
    }
    out.extend_from_slice(rest);
    out
}
