//! Client for the image-to-3D generation service.
//!
//! `POST {endpoint}/generate` with a multipart body holding the prompt
//! image (`prompt_image_file`) and the `seed`; the response body is the
//! generated `.ply` model.

use std::time::Duration;

use meshgen_core::endpoint_pool::Endpoint;
use reqwest::multipart::{Form, Part};

use crate::error::RemoteError;
use crate::http::{build_client, read_bytes, CONNECT_TIMEOUT};
use crate::services::ModelGenerator;

/// Total time allowed for one generation request.
pub const GENERATE_TIMEOUT: Duration = Duration::from_secs(300);

const IMAGE_FIELD: &str = "prompt_image_file";
const IMAGE_FILE_NAME: &str = "prompt.jpg";
const IMAGE_MIME: &str = "image/jpeg";

/// HTTP client shared by every generation endpoint.
#[derive(Clone)]
pub struct HttpGenerator {
    client: reqwest::Client,
}

impl HttpGenerator {
    pub fn new() -> Result<Self, RemoteError> {
        Ok(Self::with_client(build_client(CONNECT_TIMEOUT, GENERATE_TIMEOUT)?))
    }

    pub fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }
}

impl ModelGenerator for HttpGenerator {
    async fn generate(
        &self,
        endpoint: &Endpoint,
        image: &[u8],
        seed: u64,
    ) -> Result<Vec<u8>, RemoteError> {
        let part = Part::bytes(image.to_vec())
            .file_name(IMAGE_FILE_NAME)
            .mime_str(IMAGE_MIME)?;
        let form = Form::new()
            .part(IMAGE_FIELD, part)
            .text("seed", seed.to_string());

        let response = self
            .client
            .post(endpoint.url("/generate"))
            .multipart(form)
            .send()
            .await?;

        read_bytes(response).await
    }
}
