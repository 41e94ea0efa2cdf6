use meshgen_core::outcome::{ErrorKind, TaskError};
use meshgen_core::retry::Retryable;

/// Errors from the HTTP adapters.
#[derive(Debug, thiserror::Error)]
pub enum RemoteError {
    /// The HTTP request itself failed (connect, timeout, TLS, body read).
    #[error("HTTP request failed: {0}")]
    Request(#[from] reqwest::Error),

    /// The endpoint answered with a non-2xx status code.
    #[error("Endpoint returned {status}: {body}")]
    Status {
        status: u16,
        /// Response body, truncated, for debugging.
        body: String,
    },

    /// The endpoint answered 2xx but the payload is unusable.
    #[error("Malformed response: {0}")]
    Malformed(String),

    /// The request could not be built from the given input.
    #[error("Invalid input: {0}")]
    Input(String),
}

/// Longest response body kept in [`RemoteError::Status`].
pub(crate) const MAX_ERROR_BODY: usize = 512;

impl RemoteError {
    /// Whether the status code marks a transient condition on the server.
    pub fn is_transient_status(status: u16) -> bool {
        status >= 500 || status == 408 || status == 429
    }
}

impl Retryable for RemoteError {
    fn is_retryable(&self) -> bool {
        match self {
            Self::Request(e) => !(e.is_builder() || e.is_decode() || e.is_redirect()),
            Self::Status { status, .. } => Self::is_transient_status(*status),
            Self::Malformed(_) | Self::Input(_) => false,
        }
    }
}

impl From<RemoteError> for TaskError {
    fn from(err: RemoteError) -> Self {
        let kind = match &err {
            RemoteError::Request(e) if e.is_builder() => ErrorKind::Client,
            RemoteError::Request(_) => ErrorKind::Transient,
            RemoteError::Status { status, .. } if RemoteError::is_transient_status(*status) => {
                ErrorKind::Transient
            }
            RemoteError::Status { .. } => ErrorKind::Client,
            RemoteError::Malformed(_) | RemoteError::Input(_) => ErrorKind::Validation,
        };
        TaskError::new(kind, err.to_string())
    }
}
