//! Dispatch over resource variants.

use std::path::Path;
use std::sync::Arc;

use aac_core::ResourceRef;
use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use super::FetchStrategy;
use crate::errors::FetchError;

/// One optional strategy per resource variant.
///
/// Resources with no registered strategy (and [`ResourceRef::Extracted`])
/// fail with [`FetchError::Unsupported`].
#[derive(Clone, Default)]
pub struct Strategies {
    hub: Option<Arc<dyn FetchStrategy>>,
    http: Option<Arc<dyn FetchStrategy>>,
    clips: Option<Arc<dyn FetchStrategy>>,
}

impl Strategies {
    /// Router with no strategies.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the hub strategy.
    #[must_use]
    pub fn with_hub(mut self, strategy: Arc<dyn FetchStrategy>) -> Self {
        self.hub = Some(strategy);
        self
    }

    /// Register the URL strategy.
    #[must_use]
    pub fn with_http(mut self, strategy: Arc<dyn FetchStrategy>) -> Self {
        self.http = Some(strategy);
        self
    }

    /// Register the per-clip strategy.
    #[must_use]
    pub fn with_clips(mut self, strategy: Arc<dyn FetchStrategy>) -> Self {
        self.clips = Some(strategy);
        self
    }

    fn route(&self, resource: &ResourceRef) -> Option<&Arc<dyn FetchStrategy>> {
        match resource {
            ResourceRef::Hub { .. } => self.hub.as_ref(),
            ResourceRef::Url { .. } => self.http.as_ref(),
            ResourceRef::Clip { .. } => self.clips.as_ref(),
            ResourceRef::Extracted => None,
        }
    }
}

impl std::fmt::Debug for Strategies {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Strategies")
            .field("hub", &self.hub.as_ref().map(|s| s.name()))
            .field("http", &self.http.as_ref().map(|s| s.name()))
            .field("clips", &self.clips.as_ref().map(|s| s.name()))
            .finish()
    }
}

#[async_trait]
impl FetchStrategy for Strategies {
    fn name(&self) -> &'static str {
        "router"
    }

    fn supports(&self, resource: &ResourceRef) -> bool {
        self.route(resource).is_some_and(|s| s.supports(resource))
    }

    async fn retrieve(
        &self,
        resource: &ResourceRef,
        tmp: &Path,
        cancel: &CancellationToken,
    ) -> Result<(), FetchError> {
        match self.route(resource) {
            Some(strategy) => strategy.retrieve(resource, tmp, cancel).await,
            None => Err(FetchError::Unsupported(resource.describe())),
        }
    }
}
