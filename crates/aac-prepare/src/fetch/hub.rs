//! Dataset files from the Hugging Face hub.

use std::path::{Path, PathBuf};

use aac_core::ResourceRef;
use async_trait::async_trait;
use hf_hub::{Repo, RepoType};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use super::FetchStrategy;
use crate::errors::FetchError;

/// Retrieves files of hub dataset repositories.
///
/// Files land in the `hf-hub` cache first and are then hard-linked (or
/// copied, across filesystems) to the destination, so repeated preparations
/// reuse the cache without doubling disk use.
#[derive(Clone, Debug, Default)]
pub struct HubFetch {
    cache_dir: Option<PathBuf>,
}

impl HubFetch {
    /// Hub fetcher using the default `hf-hub` cache location.
    pub fn new() -> Self {
        Self::default()
    }

    /// Hub fetcher using `cache_dir` as the `hf-hub` cache.
    pub fn with_cache_dir(cache_dir: impl Into<PathBuf>) -> Self {
        Self {
            cache_dir: Some(cache_dir.into()),
        }
    }

    /// Configured cache directory, if any.
    pub fn cache_dir(&self) -> Option<&Path> {
        self.cache_dir.as_deref()
    }
}

#[async_trait]
impl FetchStrategy for HubFetch {
    fn name(&self) -> &'static str {
        "hub"
    }

    fn supports(&self, resource: &ResourceRef) -> bool {
        matches!(resource, ResourceRef::Hub { .. })
    }

    async fn retrieve(
        &self,
        resource: &ResourceRef,
        tmp: &Path,
        _cancel: &CancellationToken,
    ) -> Result<(), FetchError> {
        let ResourceRef::Hub {
            repo_id,
            filename,
            revision,
        } = resource
        else {
            return Err(FetchError::Unsupported(resource.describe()));
        };

        // hf-hub's sync client does blocking HTTP.
        let request = HubRequest {
            cache_dir: self.cache_dir.clone(),
            repo_id: repo_id.clone(),
            filename: filename.clone(),
            revision: revision.clone(),
            tmp: tmp.to_path_buf(),
        };
        let described = resource.describe();
        tokio::task::spawn_blocking(move || request.run())
            .await
            .map_err(|e| FetchError::Hub {
                resource: described,
                message: format!("task join error: {e}"),
            })?
    }
}

struct HubRequest {
    cache_dir: Option<PathBuf>,
    repo_id: String,
    filename: String,
    revision: Option<String>,
    tmp: PathBuf,
}

impl HubRequest {
    fn run(self) -> Result<(), FetchError> {
        let resource = format!("hub:{}/{}", self.repo_id, self.filename);
        let hub_error = |message: String| hub_failure(&resource, message);

        let mut builder = hf_hub::api::sync::ApiBuilder::new().with_progress(false);
        if let Some(dir) = &self.cache_dir {
            builder = builder.with_cache_dir(dir.clone());
        }
        let api = builder
            .build()
            .map_err(|e| hub_error(format!("hf-hub api: {e}")))?;

        let repo = match &self.revision {
            Some(rev) => Repo::with_revision(self.repo_id.clone(), RepoType::Dataset, rev.clone()),
            None => Repo::new(self.repo_id.clone(), RepoType::Dataset),
        };

        info!(repo = %self.repo_id, file = %self.filename, "downloading from hub");
        let cached = api
            .repo(repo)
            .get(&self.filename)
            .map_err(|e| hub_error(e.to_string()))?;

        // snapshot entries are symlinks into blobs/
        let blob = std::fs::canonicalize(&cached)?;
        let linked = link_or_copy(&blob, &self.tmp)?;
        debug!(blob = %blob.display(), tmp = %self.tmp.display(), linked, "took file from hub cache");
        Ok(())
    }
}

/// Status codes the hub answers for a wrong repository, revision, or path.
const MISSING_MARKERS: &[&str] = &["status code 404", "status code 401", "status code 403"];

fn hub_failure(resource: &str, message: String) -> FetchError {
    if MISSING_MARKERS.iter().any(|m| message.contains(m)) {
        FetchError::HubMissing {
            resource: resource.to_string(),
            message,
        }
    } else {
        FetchError::Hub {
            resource: resource.to_string(),
            message,
        }
    }
}

/// Hard-link `src` to `dst`, copying when linking is impossible.
///
/// Returns whether a link was made.
fn link_or_copy(src: &Path, dst: &Path) -> std::io::Result<bool> {
    match std::fs::remove_file(dst) {
        Ok(()) => {}
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => return Err(e),
    }
    match std::fs::hard_link(src, dst) {
        Ok(()) => Ok(true),
        Err(e) => {
            debug!(error = %e, "hard link failed, copying");
            let _ = std::fs::copy(src, dst)?;
            Ok(false)
        }
    }
}
