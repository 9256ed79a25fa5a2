//! Plain URL downloads with `Range`-based resume.

use std::path::Path;
use std::time::Duration;

use aac_core::ResourceRef;
use aac_core::retry::parse_retry_after_seconds;
use async_trait::async_trait;
use futures::StreamExt;
use reqwest::StatusCode;
use reqwest::header::{RANGE, RETRY_AFTER};
use tokio::io::AsyncWriteExt;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::FetchStrategy;
use crate::errors::FetchError;

/// HTTP(S) downloader backed by `reqwest`.
///
/// A non-empty temp file left by an earlier attempt is resumed with a
/// `Range` request; servers answering `200` instead of `206` restart the
/// file from scratch.
pub struct HttpFetch {
    client: reqwest::Client,
}

impl HttpFetch {
    /// Downloader with default client settings.
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::builder()
                .connect_timeout(Duration::from_secs(30))
                .user_agent(concat!("aac-datasets/", env!("CARGO_PKG_VERSION")))
                .build()
                .unwrap_or_default(),
        }
    }

    /// Downloader using an existing client.
    pub fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }

    async fn download(
        &self,
        url: &str,
        tmp: &Path,
        cancel: &CancellationToken,
    ) -> Result<(), FetchError> {
        let mut offset = existing_len(tmp).await;
        let response = loop {
            let mut request = self.client.get(url);
            if offset > 0 {
                request = request.header(RANGE, format!("bytes={offset}-"));
            }
            let response = request.send().await.map_err(|e| network(url, &e))?;

            // A stale temp file longer than the resource: start over.
            if response.status() == StatusCode::RANGE_NOT_SATISFIABLE && offset > 0 {
                debug!(url, offset, "range not satisfiable, restarting download");
                tokio::fs::remove_file(tmp).await?;
                offset = 0;
                continue;
            }
            break response;
        };

        let status = response.status();
        if !status.is_success() {
            let retry_after_ms = response
                .headers()
                .get(RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .and_then(parse_retry_after_seconds);
            return Err(FetchError::Http {
                resource: url.to_string(),
                status: status.as_u16(),
                retry_after_ms,
            });
        }

        let append = offset > 0 && status == StatusCode::PARTIAL_CONTENT;
        debug!(url, offset, append, "downloading");

        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .write(true)
            .append(append)
            .truncate(!append)
            .open(tmp)
            .await?;

        let mut stream = response.bytes_stream();
        while let Some(chunk) = stream.next().await {
            if cancel.is_cancelled() {
                file.flush().await?;
                return Err(FetchError::Cancelled);
            }
            let chunk = chunk.map_err(|e| network(url, &e))?;
            file.write_all(&chunk).await?;
        }
        file.flush().await?;
        Ok(())
    }
}

impl Default for HttpFetch {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl FetchStrategy for HttpFetch {
    fn name(&self) -> &'static str {
        "http"
    }

    fn supports(&self, resource: &ResourceRef) -> bool {
        matches!(resource, ResourceRef::Url { .. })
    }

    async fn retrieve(
        &self,
        resource: &ResourceRef,
        tmp: &Path,
        cancel: &CancellationToken,
    ) -> Result<(), FetchError> {
        match resource {
            ResourceRef::Url { url } => self.download(url, tmp, cancel).await,
            other => Err(FetchError::Unsupported(other.describe())),
        }
    }
}

async fn existing_len(path: &Path) -> u64 {
    tokio::fs::metadata(path).await.map_or(0, |m| m.len())
}

fn network(url: &str, e: &reqwest::Error) -> FetchError {
    FetchError::Network {
        resource: url.to_string(),
        message: e.to_string(),
    }
}
