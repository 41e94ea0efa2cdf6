//! Shared reqwest plumbing: client construction and response checks.

use std::time::Duration;

use crate::error::{RemoteError, MAX_ERROR_BODY};

/// Time allowed to establish a TCP/TLS connection to any endpoint.
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

/// Build a client with the given connect and total request timeouts.
pub fn build_client(connect: Duration, total: Duration) -> Result<reqwest::Client, RemoteError> {
    Ok(reqwest::Client::builder()
        .connect_timeout(connect)
        .timeout(total)
        .build()?)
}

/// Ensure the response has a success status code. Returns the response
/// unchanged on success, or a [`RemoteError::Status`] carrying the status
/// and (truncated) body text on failure.
pub(crate) async fn ensure_success(
    response: reqwest::Response,
) -> Result<reqwest::Response, RemoteError> {
    let status = response.status();
    if !status.is_success() {
        let body = response
            .text()
            .await
            .unwrap_or_else(|_| "<unreadable body>".to_string());
        return Err(RemoteError::Status {
            status: status.as_u16(),
            body: body.chars().take(MAX_ERROR_BODY).collect(),
        });
    }
    Ok(response)
}

/// Read a successful response body as raw bytes. An empty body is
/// malformed: every endpoint we talk to returns a payload.
pub(crate) async fn read_bytes(response: reqwest::Response) -> Result<Vec<u8>, RemoteError> {
    let response = ensure_success(response).await?;
    let bytes = response.bytes().await?;
    if bytes.is_empty() {
        return Err(RemoteError::Malformed("empty response body".to_string()));
    }
    Ok(bytes.to_vec())
}

/// Parse a successful JSON response body into the expected type.
pub(crate) async fn parse_response<T: serde::de::DeserializeOwned>(
    response: reqwest::Response,
) -> Result<T, RemoteError> {
    let response = ensure_success(response).await?;
    let text = response.text().await?;
    serde_json::from_str(&text).map_err(|e| RemoteError::Malformed(e.to_string()))
}
