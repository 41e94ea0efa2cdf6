//! Client for the model render service.

use std::time::Duration;

use meshgen_core::endpoint_pool::Endpoint;
use reqwest::multipart::{Form, Part};

use crate::error::RemoteError;
use crate::http::{build_client, read_bytes, CONNECT_TIMEOUT};
use crate::services::{ModelFormat, ModelRenderer};

/// Total time allowed for one render request.
pub const RENDER_TIMEOUT: Duration = Duration::from_secs(300);

/// HTTP client shared by every render endpoint.
#[derive(Clone)]
pub struct HttpRenderer {
    client: reqwest::Client,
}

impl HttpRenderer {
    pub fn new() -> Result<Self, RemoteError> {
        Ok(Self::with_client(build_client(CONNECT_TIMEOUT, RENDER_TIMEOUT)?))
    }

    pub fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }
}

impl ModelRenderer for HttpRenderer {
    async fn render(
        &self,
        endpoint: &Endpoint,
        format: ModelFormat,
        file_name: &str,
        model: &[u8],
    ) -> Result<Vec<u8>, RemoteError> {
        let part = Part::bytes(model.to_vec())
            .file_name(file_name.to_string())
            .mime_str("application/octet-stream")?;
        let form = Form::new().part("file", part);

        let response = self
            .client
            .post(endpoint.url(format.render_path()))
            .multipart(form)
            .send()
            .await?;

        read_bytes(response).await
    }
}
