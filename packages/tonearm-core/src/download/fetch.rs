//! Media byte-stream fetching.

use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::BoxStream;
use futures::{StreamExt, TryStreamExt};
use reqwest::Client;

use crate::error::DownloadError;

/// Chunked body of a media resource.
pub type ByteStream = BoxStream<'static, Result<Bytes, DownloadError>>;

/// Trait for opening the byte stream of a resolved media URL.
#[async_trait]
pub trait MediaFetcher: Send + Sync {
    async fn fetch(&self, url: &str) -> Result<ByteStream, DownloadError>;
}

/// [`MediaFetcher`] over plain HTTP(S).
pub struct HttpFetcher {
    client: Client,
    connect_timeout: Duration,
}

impl HttpFetcher {
    pub fn new(client: Client, connect_timeout: Duration) -> Self {
        Self {
            client,
            connect_timeout,
        }
    }
}

#[async_trait]
impl MediaFetcher for HttpFetcher {
    async fn fetch(&self, url: &str) -> Result<ByteStream, DownloadError> {
        let response = tokio::time::timeout(self.connect_timeout, self.client.get(url).send())
            .await
            .map_err(|_| DownloadError::Network(format!("timed out connecting to {url}")))?
            .and_then(|r| r.error_for_status())
            .map_err(|e| DownloadError::Network(e.to_string()))?;

        log::debug!(
            "[Downloader] Fetching {} ({} bytes announced)",
            url,
            response
                .content_length()
                .map_or_else(|| "unknown".to_string(), |n| n.to_string())
        );

        Ok(response
            .bytes_stream()
            .map_err(|e| DownloadError::Network(e.to_string()))
            .boxed())
    }
}
