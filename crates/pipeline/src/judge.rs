//! Position-balanced duels between two sets of renders.
//!
//! For every prompt the judge sees the prompt image and both renders twice,
//! once in each order. The two verdicts are combined by
//! [`meshgen_core::duel::combine`] and all decided duels are written to one
//! JSON file keyed by prompt.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use meshgen_core::duel::{combine, DuelResult, JudgeVerdict, Outcome};
use meshgen_core::endpoint_pool::{Endpoint, EndpointPool};
use meshgen_core::error::CoreError;
use meshgen_core::observer::TaskLabel;
use meshgen_core::outcome::{ErrorKind, TaskError, TaskOutcome};
use meshgen_core::prompts::Prompt;
use meshgen_core::retry::{RetryExecutor, RetryOutcome};
use meshgen_core::scheduler::{ConcurrencyLimits, WorkContext, WorkItem, WorkRequest};
use meshgen_core::storage::{index_by_stem, require_dir, write_atomic_path, IMAGE_EXTENSION};
use meshgen_remote::services::{DuelJudge, ImageFetcher, JudgeRequest};
use meshgen_remote::RemoteError;
use serde::Serialize;

use crate::error::PipelineError;
use crate::report::RunSummary;
use crate::runner::RunOptions;

pub const JUDGE_MAX_CONCURRENT: usize = 1;
pub const JUDGE_MAX_IN_FLIGHT: usize = 8;

#[derive(Debug, Clone)]
pub struct JudgeConfig {
    pub seed: u64,
    /// Renders of the first model, `<key>.png`.
    pub images_1: PathBuf,
    /// Renders of the second model, `<key>.png`.
    pub images_2: PathBuf,
    /// Duel results file.
    pub output: PathBuf,
    pub limits: ConcurrencyLimits,
}

impl JudgeConfig {
    pub fn new(
        images_1: impl Into<PathBuf>,
        images_2: impl Into<PathBuf>,
        output: impl Into<PathBuf>,
    ) -> Self {
        Self {
            seed: 0,
            images_1: images_1.into(),
            images_2: images_2.into(),
            output: output.into(),
            limits: ConcurrencyLimits::fixed(JUDGE_MAX_CONCURRENT, JUDGE_MAX_IN_FLIGHT),
        }
    }
}

/// Tally of decided duels.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct OutcomeCounts {
    pub first_wins: usize,
    pub draws: usize,
    pub second_wins: usize,
}

impl OutcomeCounts {
    fn add(&mut self, outcome: Outcome) {
        match outcome {
            Outcome::FirstWins => self.first_wins += 1,
            Outcome::Draw => self.draws += 1,
            Outcome::SecondWins => self.second_wins += 1,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct JudgeReport {
    #[serde(flatten)]
    pub summary: RunSummary,
    pub output: PathBuf,
    pub outcomes: OutcomeCounts,
    /// Decided duels, as written to `output`.
    #[serde(skip)]
    pub duels: BTreeMap<String, DuelResult>,
}

/// Inputs for one duel. Missing renders are reported by the item itself so
/// every prompt yields an outcome.
#[derive(Debug, Clone)]
struct DuelInput {
    url: String,
    first: Option<PathBuf>,
    second: Option<PathBuf>,
}

pub struct JudgePipeline<F, J> {
    fetcher: Arc<F>,
    judge: Arc<J>,
    options: RunOptions,
}

impl<F, J> JudgePipeline<F, J>
where
    F: ImageFetcher + 'static,
    J: DuelJudge + 'static,
{
    pub fn new(fetcher: F, judge: J, options: RunOptions) -> Self {
        Self {
            fetcher: Arc::new(fetcher),
            judge: Arc::new(judge),
            options,
        }
    }

    /// Judge every prompt against `endpoint` and write the duel file.
    pub async fn run(
        &self,
        endpoint: &Endpoint,
        prompts: Vec<Prompt>,
        config: &JudgeConfig,
    ) -> Result<JudgeReport, PipelineError> {
        require_dir(&config.images_1).await?;
        require_dir(&config.images_2).await?;
        let mut first = index_by_stem(&config.images_1, IMAGE_EXTENSION).await?;
        let mut second = index_by_stem(&config.images_2, IMAGE_EXTENSION).await?;

        let pool = EndpointPool::new(vec![endpoint.clone()])?;
        let scheduler = self.options.scheduler(config.limits)?;

        tracing::info!(
            prompts = prompts.len(),
            renders_1 = first.len(),
            renders_2 = second.len(),
            endpoint = %endpoint,
            "Starting judge",
        );

        let job = Arc::new(JudgeJob {
            fetcher: Arc::clone(&self.fetcher),
            judge: Arc::clone(&self.judge),
            retry: self.options.executor(),
            seed: config.seed,
            images_1: config.images_1.clone(),
            images_2: config.images_2.clone(),
        });
        let requests: Vec<_> = prompts
            .into_iter()
            .map(|prompt| {
                let input = DuelInput {
                    first: first.remove(prompt.key.as_str()),
                    second: second.remove(prompt.key.as_str()),
                    url: prompt.url,
                };
                WorkRequest::new(prompt.key, input)
            })
            .collect();

        let report = scheduler
            .run(&pool, requests, move |item, ctx| {
                let job = Arc::clone(&job);
                async move { job.process(item, ctx).await }
            })
            .await;

        let summary = RunSummary::new(&report.results, report.stats);
        let (done, _) = report.results.into_parts();
        let mut outcomes = OutcomeCounts::default();
        let duels: BTreeMap<String, DuelResult> = done
            .into_iter()
            .map(|d| {
                outcomes.add(d.value.outcome);
                (d.key.to_string(), d.value)
            })
            .collect();

        let path = write_duels(&config.output, &duels).await?;
        tracing::info!(duels = duels.len(), path = %path.display(), "Saved duel results");

        Ok(JudgeReport {
            summary,
            output: config.output.clone(),
            outcomes,
            duels,
        })
    }
}

/// Persist duel results as one pretty-printed JSON object with sorted keys.
pub async fn write_duels(
    path: &Path,
    duels: &BTreeMap<String, DuelResult>,
) -> Result<PathBuf, PipelineError> {
    let json = serde_json::to_vec_pretty(duels)?;
    Ok(write_atomic_path(path, &json).await?)
}

struct JudgeJob<F, J> {
    fetcher: Arc<F>,
    judge: Arc<J>,
    retry: RetryExecutor,
    seed: u64,
    images_1: PathBuf,
    images_2: PathBuf,
}

impl<F: ImageFetcher, J: DuelJudge> JudgeJob<F, J> {
    async fn process(&self, item: WorkItem<DuelInput>, ctx: WorkContext) -> TaskOutcome<DuelResult> {
        let label = item.label();
        let input = &item.payload;

        let (first_path, second_path) = match (&input.first, &input.second) {
            (Some(first), Some(second)) => (first, second),
            (first, _) => {
                let dir = if first.is_none() { &self.images_1 } else { &self.images_2 };
                let message = format!(
                    "no render {}.{IMAGE_EXTENSION} in {}",
                    item.key,
                    dir.display()
                );
                return TaskOutcome::failed(TaskError::new(ErrorKind::Validation, message), 0);
            }
        };

        let first = match read_render(first_path).await {
            Ok(bytes) => bytes,
            Err(e) => return TaskOutcome::failed(e.into(), 0),
        };
        let second = match read_render(second_path).await {
            Ok(bytes) => bytes,
            Err(e) => return TaskOutcome::failed(e.into(), 0),
        };

        let fetcher = &*self.fetcher;
        let url = input.url.as_str();
        let prompt_image = match self
            .retry
            .run(&label, move |_| fetcher.fetch(url))
            .await
            .into_task_result()
        {
            Ok((image, _)) => image,
            Err((error, attempts)) => return TaskOutcome::failed(error, attempts),
        };

        let straight = JudgeRequest {
            prompt_image: &prompt_image,
            first: &first,
            second: &second,
            seed: self.seed,
        };
        let swapped = JudgeRequest {
            first: &second,
            second: &first,
            ..straight
        };

        let (a, b) = tokio::join!(
            self.evaluate(&label, &ctx, &item.endpoint, straight),
            self.evaluate(&label, &ctx, &item.endpoint, swapped),
        );
        let (a, attempts_a) = match a.into_task_result() {
            Ok(done) => done,
            Err((error, attempts)) => return TaskOutcome::failed(error, attempts),
        };
        let (b, attempts_b) = match b.into_task_result() {
            Ok(done) => done,
            Err((error, attempts)) => return TaskOutcome::failed(error, attempts),
        };

        let result = combine(&a, &b);
        tracing::info!(
            prompt_key = %item.key,
            outcome = result.outcome.as_i8(),
            straight = ?(a.penalty_1, a.penalty_2),
            swapped = ?(b.penalty_1, b.penalty_2),
            "Duel decided",
        );
        TaskOutcome::Succeeded {
            value: result,
            attempts: attempts_a.max(attempts_b),
        }
    }

    /// One judge call under retry, holding a remote slot per attempt.
    async fn evaluate(
        &self,
        label: &TaskLabel,
        ctx: &WorkContext,
        endpoint: &Endpoint,
        request: JudgeRequest<'_>,
    ) -> RetryOutcome<JudgeVerdict, RemoteError> {
        let judge = &*self.judge;
        self.retry
            .run(label, move |_| async move {
                let _slot = ctx.remote_slot().await;
                judge.evaluate(endpoint, request).await
            })
            .await
    }
}

async fn read_render(path: &Path) -> Result<Vec<u8>, CoreError> {
    tokio::fs::read(path).await.map_err(|e| CoreError::io(path, e))
}
