//! 3D model -> PNG preview.
//!
//! Render services are heavier than the generators, so the ceiling is fixed
//! at two concurrent calls no matter how many endpoints are configured.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use meshgen_core::endpoint_pool::{Endpoint, EndpointPool};
use meshgen_core::error::CoreError;
use meshgen_core::observer::{ProgressEvent, SharedObserver};
use meshgen_core::outcome::TaskOutcome;
use meshgen_core::retry::RetryExecutor;
use meshgen_core::scheduler::{ConcurrencyLimits, WorkContext, WorkItem, WorkRequest};
use meshgen_core::storage::{
    ensure_dir, extension, file_stem, list_files, require_dir, write_atomic, IMAGE_EXTENSION,
    RENDERABLE_EXTENSIONS,
};
use meshgen_core::types::PromptKey;
use meshgen_remote::services::{ModelFormat, ModelRenderer};

use crate::error::PipelineError;
use crate::report::FileReport;
use crate::runner::RunOptions;

pub const RENDER_MAX_CONCURRENT: usize = 2;
pub const RENDER_MAX_IN_FLIGHT: usize = 4;

/// A model file found in the input directory.
#[derive(Debug, Clone)]
pub struct ModelFile {
    pub path: PathBuf,
    pub format: ModelFormat,
}

/// Renderable models in `dir`, keyed by file stem and sorted by path.
///
/// When two files share a stem (`a.ply`, `a.glb`) only the first is kept,
/// since both would render to `a.png`.
pub async fn discover_models(dir: &Path) -> Result<Vec<(PromptKey, ModelFile)>, CoreError> {
    require_dir(dir).await?;
    let mut seen = HashSet::new();
    let mut models = Vec::new();

    for path in list_files(dir, RENDERABLE_EXTENSIONS).await? {
        let (Some(stem), Some(format)) = (
            file_stem(&path).map(str::to_string),
            extension(&path).as_deref().and_then(ModelFormat::from_extension),
        ) else {
            continue;
        };
        if !seen.insert(stem.clone()) {
            tracing::warn!(path = %path.display(), "Skipping model with duplicate stem");
            continue;
        }
        models.push((PromptKey::new(stem), ModelFile { path, format }));
    }

    Ok(models)
}

pub struct RenderPipeline<R> {
    renderer: Arc<R>,
    options: RunOptions,
    limits: ConcurrencyLimits,
}

impl<R: ModelRenderer + 'static> RenderPipeline<R> {
    pub fn new(renderer: R, options: RunOptions) -> Self {
        Self {
            renderer: Arc::new(renderer),
            options,
            limits: ConcurrencyLimits::fixed(RENDER_MAX_CONCURRENT, RENDER_MAX_IN_FLIGHT),
        }
    }

    /// Render every model in `input_dir` into `output_dir/<stem>.png`,
    /// spread round-robin over `endpoints` starting with the first.
    pub async fn run(
        &self,
        endpoints: &[Endpoint],
        input_dir: &Path,
        output_dir: &Path,
    ) -> Result<FileReport, PipelineError> {
        let pool = EndpointPool::new(endpoints.to_vec())?;
        let models = discover_models(input_dir).await?;
        ensure_dir(output_dir).await?;
        let scheduler = self.options.scheduler(self.limits)?;

        if models.is_empty() {
            tracing::warn!(input_dir = %input_dir.display(), "No .ply or .glb files to render");
        }
        tracing::info!(
            models = models.len(),
            endpoints = pool.len(),
            max_concurrent = self.limits.max_concurrent,
            "Starting render",
        );

        let job = Arc::new(RenderJob {
            renderer: Arc::clone(&self.renderer),
            retry: self.options.executor(),
            observer: Arc::clone(&self.options.observer),
            output_dir: output_dir.to_path_buf(),
        });
        let requests = models
            .into_iter()
            .map(|(key, model)| WorkRequest::new(key, model));

        let report = scheduler
            .run(&pool, requests, move |item, ctx| {
                let job = Arc::clone(&job);
                async move { job.process(item, ctx).await }
            })
            .await;

        Ok(FileReport::new(
            report.results,
            report.stats,
            output_dir.to_path_buf(),
        ))
    }
}

struct RenderJob<R> {
    renderer: Arc<R>,
    retry: RetryExecutor,
    observer: SharedObserver,
    output_dir: PathBuf,
}

impl<R: ModelRenderer> RenderJob<R> {
    async fn process(&self, item: WorkItem<ModelFile>, ctx: WorkContext) -> TaskOutcome<PathBuf> {
        let label = item.label();
        let model = match tokio::fs::read(&item.payload.path).await {
            Ok(bytes) => bytes,
            Err(e) => return TaskOutcome::failed(CoreError::io(&item.payload.path, e).into(), 0),
        };
        let file_name = item
            .payload
            .path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("model")
            .to_string();

        let renderer = &*self.renderer;
        let (ctx, endpoint, format) = (&ctx, &item.endpoint, item.payload.format);
        let (file_name, model) = (file_name.as_str(), model.as_slice());
        let (image, attempts) = match self
            .retry
            .run(&label, move |_| async move {
                let _slot = ctx.remote_slot().await;
                renderer.render(endpoint, format, file_name, model).await
            })
            .await
            .into_task_result()
        {
            Ok(done) => done,
            Err((error, attempts)) => return TaskOutcome::failed(error, attempts),
        };

        let output_name = format!("{}.{IMAGE_EXTENSION}", item.key);
        match write_atomic(&self.output_dir, &output_name, &image).await {
            Ok(path) => {
                self.observer.notify(&ProgressEvent::Saved {
                    label,
                    path: path.clone(),
                });
                TaskOutcome::Succeeded {
                    value: path,
                    attempts,
                }
            }
            Err(e) => TaskOutcome::failed(e.into(), attempts),
        }
    }
}
