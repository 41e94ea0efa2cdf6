//! Prompt image -> 3D model.
//!
//! Every prompt is downloaded (retried, outside the remote slot), sent to
//! its endpoint's generation service (retried, one remote slot per
//! attempt), and the returned model is written atomically to
//! `<output_dir>/<name>.ply`.

use std::path::PathBuf;
use std::sync::Arc;

use meshgen_core::endpoint_pool::{Endpoint, EndpointPool};
use meshgen_core::observer::{ProgressEvent, SharedObserver};
use meshgen_core::outcome::TaskOutcome;
use meshgen_core::prompts::Prompt;
use meshgen_core::retry::RetryExecutor;
use meshgen_core::scheduler::{WorkContext, WorkItem, WorkRequest};
use meshgen_core::storage::{ensure_dir, write_atomic, OutputNaming, MODEL_EXTENSION};
use meshgen_remote::services::{ImageFetcher, ModelGenerator};

use crate::error::PipelineError;
use crate::report::FileReport;
use crate::runner::RunOptions;

pub const DEFAULT_SEED: u64 = 0;

#[derive(Debug, Clone)]
pub struct GenerateConfig {
    pub seed: u64,
    pub output_dir: PathBuf,
    pub naming: OutputNaming,
}

impl GenerateConfig {
    pub fn new(output_dir: impl Into<PathBuf>) -> Self {
        Self {
            seed: DEFAULT_SEED,
            output_dir: output_dir.into(),
            naming: OutputNaming::default(),
        }
    }
}

pub struct GeneratePipeline<F, G> {
    fetcher: Arc<F>,
    generator: Arc<G>,
    options: RunOptions,
}

impl<F, G> GeneratePipeline<F, G>
where
    F: ImageFetcher + 'static,
    G: ModelGenerator + 'static,
{
    pub fn new(fetcher: F, generator: G, options: RunOptions) -> Self {
        Self {
            fetcher: Arc::new(fetcher),
            generator: Arc::new(generator),
            options,
        }
    }

    /// Generate one model per prompt, spread round-robin over `endpoints`
    /// starting with the first.
    pub async fn run(
        &self,
        endpoints: &[Endpoint],
        prompts: Vec<Prompt>,
        config: &GenerateConfig,
    ) -> Result<FileReport, PipelineError> {
        let pool = EndpointPool::new(endpoints.to_vec())?;
        ensure_dir(&config.output_dir).await?;
        let limits = pool.concurrency();
        let scheduler = self.options.scheduler(limits)?;

        tracing::info!(
            prompts = prompts.len(),
            endpoints = pool.len(),
            max_concurrent = limits.max_concurrent,
            max_in_flight = limits.max_in_flight,
            output_dir = %config.output_dir.display(),
            "Starting generation",
        );

        let job = Arc::new(GenerateJob {
            fetcher: Arc::clone(&self.fetcher),
            generator: Arc::clone(&self.generator),
            retry: self.options.executor(),
            observer: Arc::clone(&self.options.observer),
            config: config.clone(),
        });
        let requests = prompts
            .into_iter()
            .map(|prompt| WorkRequest::new(prompt.key, prompt.url));

        let report = scheduler
            .run(&pool, requests, move |item, ctx| {
                let job = Arc::clone(&job);
                async move { job.process(item, ctx).await }
            })
            .await;

        Ok(FileReport::new(
            report.results,
            report.stats,
            config.output_dir.clone(),
        ))
    }
}

struct GenerateJob<F, G> {
    fetcher: Arc<F>,
    generator: Arc<G>,
    retry: RetryExecutor,
    observer: SharedObserver,
    config: GenerateConfig,
}

impl<F: ImageFetcher, G: ModelGenerator> GenerateJob<F, G> {
    async fn process(&self, item: WorkItem<String>, ctx: WorkContext) -> TaskOutcome<PathBuf> {
        let label = item.label();
        let fetcher = &*self.fetcher;
        let url = item.payload.as_str();

        let image = match self
            .retry
            .run(&label, move |_| fetcher.fetch(url))
            .await
            .into_task_result()
        {
            Ok((image, _)) => image,
            Err((error, attempts)) => return TaskOutcome::failed(error, attempts),
        };

        let generator = &*self.generator;
        let (ctx, endpoint, seed) = (&ctx, &item.endpoint, self.config.seed);
        let image = image.as_slice();
        let (model, attempts) = match self
            .retry
            .run(&label, move |_| async move {
                let _slot = ctx.remote_slot().await;
                generator.generate(endpoint, image, seed).await
            })
            .await
            .into_task_result()
        {
            Ok(done) => done,
            Err((error, attempts)) => return TaskOutcome::failed(error, attempts),
        };

        let file_name = self
            .config
            .naming
            .file_name(&item.key, &model, MODEL_EXTENSION);
        match write_atomic(&self.config.output_dir, &file_name, &model).await {
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
