//! Prompt image download.

use std::time::Duration;

use crate::error::RemoteError;
use crate::http::{build_client, read_bytes, CONNECT_TIMEOUT};
use crate::services::ImageFetcher;

/// Total time allowed for one image download.
pub const DOWNLOAD_TIMEOUT: Duration = Duration::from_secs(60);

/// Fetches prompt images over HTTP(S).
#[derive(Clone)]
pub struct HttpImageFetcher {
    client: reqwest::Client,
}

impl HttpImageFetcher {
    pub fn new() -> Result<Self, RemoteError> {
        Ok(Self::with_client(build_client(CONNECT_TIMEOUT, DOWNLOAD_TIMEOUT)?))
    }

    pub fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }
}

impl ImageFetcher for HttpImageFetcher {
    async fn fetch(&self, url: &str) -> Result<Vec<u8>, RemoteError> {
        tracing::debug!(url, "Downloading prompt image");
        let response = self.client.get(url).send().await?;
        read_bytes(response).await
    }
}
