//! The remote capabilities the pipelines depend on.
//!
//! Each trait has one HTTP implementation in this crate. Pipelines are
//! generic over them so tests can substitute in-memory fakes.

use std::future::Future;

use meshgen_core::duel::JudgeVerdict;
use meshgen_core::endpoint_pool::Endpoint;

use crate::error::RemoteError;

/// Model file formats the render service accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModelFormat {
    Ply,
    Glb,
}

impl ModelFormat {
    /// Format for a lower-cased file extension.
    pub fn from_extension(extension: &str) -> Option<Self> {
        match extension {
            "ply" => Some(Self::Ply),
            "glb" => Some(Self::Glb),
            _ => None,
        }
    }

    /// Render route on the endpoint, e.g. `/render_ply`.
    pub fn render_path(self) -> &'static str {
        match self {
            Self::Ply => "/render_ply",
            Self::Glb => "/render_glb",
        }
    }
}

/// Images shown to the judge for one evaluation call, in presentation order.
#[derive(Debug, Clone, Copy)]
pub struct JudgeRequest<'a> {
    pub prompt_image: &'a [u8],
    pub first: &'a [u8],
    pub second: &'a [u8],
    pub seed: u64,
}

/// Downloads prompt images.
pub trait ImageFetcher: Send + Sync {
    fn fetch(&self, url: &str) -> impl Future<Output = Result<Vec<u8>, RemoteError>> + Send;
}

/// Turns a prompt image into a 3D model.
pub trait ModelGenerator: Send + Sync {
    fn generate(
        &self,
        endpoint: &Endpoint,
        image: &[u8],
        seed: u64,
    ) -> impl Future<Output = Result<Vec<u8>, RemoteError>> + Send;
}

/// Turns a 3D model into a PNG preview.
pub trait ModelRenderer: Send + Sync {
    fn render(
        &self,
        endpoint: &Endpoint,
        format: ModelFormat,
        file_name: &str,
        model: &[u8],
    ) -> impl Future<Output = Result<Vec<u8>, RemoteError>> + Send;
}

/// Scores two renders against a prompt image.
pub trait DuelJudge: Send + Sync {
    fn evaluate(
        &self,
        endpoint: &Endpoint,
        request: JudgeRequest<'_>,
    ) -> impl Future<Output = Result<JudgeVerdict, RemoteError>> + Send;
}
