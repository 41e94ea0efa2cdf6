use meshgen_core::error::CoreError;
use meshgen_remote::RemoteError;

/// Fatal errors that abort a whole pipeline run. Per-item failures never
/// surface here; they are recorded in the run report instead.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error(transparent)]
    Core(#[from] CoreError),

    #[error(transparent)]
    Remote(#[from] RemoteError),

    #[error("Failed to serialize results: {0}")]
    Serialization(#[from] serde_json::Error),
}
