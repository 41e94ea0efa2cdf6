//! One async function per subcommand. Each returns the JSON object printed
//! on stdout; fatal errors propagate to `main`.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use meshgen_core::audit::{self, AuditReport, CleanReport};
use meshgen_core::endpoint_pool::{parse_endpoints, Endpoint};
use meshgen_core::observer::TracingObserver;
use meshgen_core::prompts::load_prompts;
use meshgen_core::retry::RetryPolicy;
use meshgen_core::scheduler::ConcurrencyLimits;
use meshgen_pipeline::generate::{GenerateConfig, GeneratePipeline};
use meshgen_pipeline::judge::{JudgeConfig, JudgePipeline};
use meshgen_pipeline::render::RenderPipeline;
use meshgen_pipeline::report::RunSummary;
use meshgen_pipeline::RunOptions;
use meshgen_remote::download::HttpImageFetcher;
use meshgen_remote::generate::HttpGenerator;
use meshgen_remote::health::{HealthChecker, HealthStatus};
use meshgen_remote::judge::{HttpJudge, JudgeSettings};
use meshgen_remote::render::HttpRenderer;
use serde::Serialize;
use tokio_util::sync::CancellationToken;

use crate::args::{AuditArgs, CleanArgs, GenerateArgs, HealthArgs, JudgeArgs, RenderArgs};

/// What a command reports back to `main`.
#[derive(Debug)]
pub struct CommandOutput {
    pub value: serde_json::Value,
    pub success: bool,
    pub interrupted: bool,
}

impl CommandOutput {
    fn from_summary<T: Serialize>(summary: &RunSummary, report: &T) -> anyhow::Result<Self> {
        Ok(Self {
            value: serde_json::to_value(report)?,
            success: summary.success,
            interrupted: summary.interrupted,
        })
    }

    fn finished<T: Serialize>(success: bool, report: &T) -> anyhow::Result<Self> {
        Ok(Self {
            value: serde_json::to_value(report)?,
            success,
            interrupted: false,
        })
    }
}

fn run_options(retry: RetryPolicy, cancel: &CancellationToken) -> RunOptions {
    RunOptions::new(retry, Arc::new(TracingObserver)).with_cancellation(cancel.clone())
}

/// Refuse to dispatch unless every endpoint answers its health check within
/// `wait_secs`.
async fn require_healthy(
    endpoints: &[Endpoint],
    wait_secs: Option<u64>,
    cancel: &CancellationToken,
) -> anyhow::Result<()> {
    let Some(wait_secs) = wait_secs else {
        return Ok(());
    };

    let checker = HealthChecker::new()?;
    let statuses = checker
        .check_all(endpoints, Duration::from_secs(wait_secs), cancel)
        .await;
    let unhealthy: Vec<String> = statuses
        .iter()
        .filter(|s| !s.healthy)
        .map(|s| match &s.error {
            Some(error) => format!("{} ({error})", s.endpoint),
            None => s.endpoint.to_string(),
        })
        .collect();

    if !unhealthy.is_empty() {
        anyhow::bail!(
            "endpoints not healthy after {wait_secs}s: {}",
            unhealthy.join(", ")
        );
    }
    tracing::info!(endpoints = endpoints.len(), "All endpoints healthy");
    Ok(())
}

// ---------------------------------------------------------------------------
// Pipelines
// ---------------------------------------------------------------------------

pub async fn generate(args: GenerateArgs, cancel: &CancellationToken) -> anyhow::Result<CommandOutput> {
    let endpoints = parse_endpoints(&args.endpoints)?;
    let prompts = load_prompts(&args.prompts).await?;
    require_healthy(&endpoints, args.wait_healthy_secs, cancel).await?;

    tracing::info!(
        prompts = prompts.len(),
        endpoints = endpoints.len(),
        output = %args.output.display(),
        "Starting generation",
    );

    let config = GenerateConfig {
        seed: args.seed,
        naming: args.naming.into(),
        ..GenerateConfig::new(args.output)
    };
    let pipeline = GeneratePipeline::new(
        HttpImageFetcher::new()?,
        HttpGenerator::new()?,
        run_options(args.retry.policy(), cancel),
    );

    let report = pipeline.run(&endpoints, prompts, &config).await?;
    CommandOutput::from_summary(&report.summary, &report)
}

pub async fn render(args: RenderArgs, cancel: &CancellationToken) -> anyhow::Result<CommandOutput> {
    let endpoints = parse_endpoints(&args.endpoints)?;
    require_healthy(&endpoints, args.wait_healthy_secs, cancel).await?;

    let pipeline = RenderPipeline::new(
        HttpRenderer::new()?,
        run_options(args.retry.policy(), cancel),
    );

    let report = pipeline.run(&endpoints, &args.input, &args.output).await?;
    CommandOutput::from_summary(&report.summary, &report)
}

pub async fn judge(args: JudgeArgs, cancel: &CancellationToken) -> anyhow::Result<CommandOutput> {
    let endpoint = Endpoint::parse(&args.endpoint)?;
    let prompts = load_prompts(&args.prompts).await?;

    let settings = JudgeSettings {
        temperature: args.temperature,
        max_tokens: args.max_tokens,
        timeout: Duration::from_secs(args.timeout_secs),
        api_key: args.api_key,
        ..JudgeSettings::new(args.model)
    };
    tracing::info!(
        prompts = prompts.len(),
        endpoint = %endpoint,
        model = %settings.model,
        "Starting duels",
    );

    let config = JudgeConfig {
        seed: args.seed,
        limits: ConcurrencyLimits::fixed(args.max_concurrent, args.max_in_flight),
        ..JudgeConfig::new(args.images_1, args.images_2, args.output)
    };
    let pipeline = JudgePipeline::new(
        HttpImageFetcher::new()?,
        HttpJudge::new(settings)?,
        run_options(args.retry.policy(), cancel),
    );

    let report = pipeline.run(&endpoint, prompts, &config).await?;
    CommandOutput::from_summary(&report.summary, &report)
}

// ---------------------------------------------------------------------------
// Maintenance
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize)]
struct HealthReport {
    success: bool,
    endpoints: Vec<HealthStatus>,
}

pub async fn health(args: HealthArgs, cancel: &CancellationToken) -> anyhow::Result<CommandOutput> {
    let endpoints = parse_endpoints(&args.endpoints)?;
    let checker = HealthChecker::new()?;

    let endpoints = checker
        .check_all(&endpoints, Duration::from_secs(args.wait_secs), cancel)
        .await;
    let success = endpoints.iter().all(|s| s.healthy);
    CommandOutput::finished(success, &HealthReport { success, endpoints })
}

#[derive(Debug, Serialize)]
struct MissingReport {
    success: bool,
    #[serde(flatten)]
    audit: AuditReport,
    #[serde(skip_serializing_if = "Option::is_none")]
    written: Option<PathBuf>,
}

pub async fn missing(args: AuditArgs) -> anyhow::Result<CommandOutput> {
    let prompts = load_prompts(&args.prompts).await?;
    let report = audit::audit(&prompts, &args.results, &args.extension).await?;
    tracing::info!(
        total = report.total_prompts,
        missing = report.missing.len(),
        extra = ?audit::extra_stems(&report),
        match_rate = report.match_rate,
        "Audited results",
    );

    if let Some(path) = &args.write {
        audit::write_missing(path, &report.missing)
            .await
            .with_context(|| format!("writing missing prompts to {}", path.display()))?;
        tracing::info!(
            path = %path.display(),
            missing = report.missing.len(),
            "Wrote retry prompts file",
        );
    }

    CommandOutput::finished(
        true,
        &MissingReport {
            success: true,
            audit: report,
            written: args.write,
        },
    )
}

#[derive(Debug, Serialize)]
struct CleanSummary {
    success: bool,
    #[serde(flatten)]
    clean: CleanReport,
}

pub async fn clean(args: CleanArgs) -> anyhow::Result<CommandOutput> {
    let prompts = load_prompts(&args.prompts).await?;
    let report = audit::audit(&prompts, &args.results, &args.extension).await?;
    let clean = audit::remove_extra(&report, args.dry_run).await?;

    tracing::info!(
        removed = clean.removed.len(),
        freed_bytes = clean.freed_bytes,
        dry_run = clean.dry_run,
        "Cleanup finished",
    );
    CommandOutput::finished(true, &CleanSummary { success: true, clean })
}
