//! Command-line surface. Every tuning flag can also be set through an
//! environment variable (or a `.env` file).

use std::path::PathBuf;
use std::time::Duration;

use clap::{Args, Parser, Subcommand, ValueEnum};
use meshgen_core::retry::{self, RetryPolicy};
use meshgen_core::storage::{OutputNaming, MODEL_EXTENSION};
use meshgen_pipeline::judge::{JUDGE_MAX_CONCURRENT, JUDGE_MAX_IN_FLIGHT};
use meshgen_remote::judge::{DEFAULT_API_KEY, DEFAULT_MAX_TOKENS, DEFAULT_TEMPERATURE};

#[derive(Parser, Debug)]
#[command(name = "meshgen")]
#[command(about = "Dispatch 3D generation, rendering and judging across GPU endpoints")]
#[command(version)]
pub struct Cli {
    /// Increase log verbosity (-v info, -vv debug, -vvv trace). Ignored
    /// when RUST_LOG is set.
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Emit logs as JSON lines instead of human-readable text
    #[arg(long, global = true, env = "MESHGEN_LOG_JSON")]
    pub log_json: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Generate one .ply model per prompt image
    Generate(GenerateArgs),
    /// Render .ply/.glb models to PNG previews
    Render(RenderArgs),
    /// Run position-balanced duels between two sets of renders
    Judge(JudgeArgs),
    /// Check that endpoints answer GET /health
    Health(HealthArgs),
    /// List prompts without a result file
    Missing(AuditArgs),
    /// Delete result files that match no prompt
    Clean(CleanArgs),
}

/// Retry tuning shared by the pipelines.
#[derive(Args, Debug, Clone)]
pub struct RetryArgs {
    /// Attempts per remote call, including the first
    #[arg(long, default_value_t = retry::DEFAULT_MAX_ATTEMPTS, env = "MESHGEN_MAX_ATTEMPTS")]
    pub max_attempts: u32,

    /// Delay after the first failed attempt, in milliseconds
    #[arg(long, default_value_t = retry::DEFAULT_BASE_DELAY.as_millis() as u64, env = "MESHGEN_BACKOFF_BASE_MS")]
    pub backoff_base_ms: u64,

    /// Upper bound on a single backoff delay, in milliseconds
    #[arg(long, default_value_t = retry::DEFAULT_MAX_DELAY.as_millis() as u64, env = "MESHGEN_BACKOFF_MAX_MS")]
    pub backoff_max_ms: u64,

    /// Maximum random extra delay per backoff, in milliseconds
    #[arg(long, default_value_t = 0, env = "MESHGEN_JITTER_MS")]
    pub jitter_ms: u64,
}

impl RetryArgs {
    pub fn policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.max_attempts,
            base_delay: Duration::from_millis(self.backoff_base_ms),
            max_delay: Duration::from_millis(self.backoff_max_ms),
            jitter: Duration::from_millis(self.jitter_ms),
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum NamingArg {
    /// `<prompt key>.ply`
    PromptKey,
    /// `<sha256 of the model>.ply`
    ContentHash,
}

impl From<NamingArg> for OutputNaming {
    fn from(value: NamingArg) -> Self {
        match value {
            NamingArg::PromptKey => Self::PromptKey,
            NamingArg::ContentHash => Self::ContentHash,
        }
    }
}

#[derive(Args, Debug)]
pub struct GenerateArgs {
    /// File with one prompt image URL per line
    #[arg(long)]
    pub prompts: PathBuf,

    /// Generation endpoint; repeat or comma-separate for several
    #[arg(long = "endpoint", env = "MESHGEN_ENDPOINTS", value_delimiter = ',', required = true)]
    pub endpoints: Vec<String>,

    #[arg(long, default_value_t = 0, env = "MESHGEN_SEED")]
    pub seed: u64,

    /// Directory for generated models
    #[arg(long, default_value = "results")]
    pub output: PathBuf,

    #[arg(long, value_enum, default_value = "prompt-key")]
    pub naming: NamingArg,

    /// Wait up to this many seconds for every endpoint to become healthy
    /// before dispatching
    #[arg(long, env = "MESHGEN_WAIT_HEALTHY_SECS")]
    pub wait_healthy_secs: Option<u64>,

    #[command(flatten)]
    pub retry: RetryArgs,
}

#[derive(Args, Debug)]
pub struct RenderArgs {
    /// Directory with .ply/.glb models
    #[arg(long)]
    pub input: PathBuf,

    /// Render endpoint; repeat or comma-separate for several
    #[arg(long = "endpoint", env = "MESHGEN_ENDPOINTS", value_delimiter = ',', required = true)]
    pub endpoints: Vec<String>,

    /// Directory for rendered images
    #[arg(long, default_value = "renders")]
    pub output: PathBuf,

    #[arg(long, env = "MESHGEN_WAIT_HEALTHY_SECS")]
    pub wait_healthy_secs: Option<u64>,

    #[command(flatten)]
    pub retry: RetryArgs,
}

#[derive(Args, Debug)]
pub struct JudgeArgs {
    /// File with one prompt image URL per line
    #[arg(long)]
    pub prompts: PathBuf,

    /// Renders of the first model (`<key>.png`)
    #[arg(long = "images-1")]
    pub images_1: PathBuf,

    /// Renders of the second model (`<key>.png`)
    #[arg(long = "images-2")]
    pub images_2: PathBuf,

    /// OpenAI-compatible judge base URL, e.g. http://host:8095/v1
    #[arg(long, env = "MESHGEN_JUDGE_ENDPOINT")]
    pub endpoint: String,

    #[arg(long, default_value_t = 0, env = "MESHGEN_SEED")]
    pub seed: u64,

    /// Duel results file
    #[arg(long, default_value = "duels.json")]
    pub output: PathBuf,

    /// Model name served by the judge endpoint
    #[arg(long, env = "MESHGEN_JUDGE_MODEL")]
    pub model: String,

    #[arg(long, default_value_t = DEFAULT_TEMPERATURE)]
    pub temperature: f32,

    #[arg(long, default_value_t = DEFAULT_MAX_TOKENS)]
    pub max_tokens: u32,

    /// Per-request timeout in seconds
    #[arg(long, default_value_t = 120)]
    pub timeout_secs: u64,

    #[arg(long, default_value = DEFAULT_API_KEY, env = "MESHGEN_JUDGE_API_KEY", hide_env_values = true)]
    pub api_key: String,

    /// Judge calls running at once
    #[arg(long, default_value_t = JUDGE_MAX_CONCURRENT)]
    pub max_concurrent: usize,

    /// Prompts admitted at once (downloading or waiting for the judge)
    #[arg(long, default_value_t = JUDGE_MAX_IN_FLIGHT)]
    pub max_in_flight: usize,

    #[command(flatten)]
    pub retry: RetryArgs,
}

#[derive(Args, Debug)]
pub struct HealthArgs {
    #[arg(long = "endpoint", env = "MESHGEN_ENDPOINTS", value_delimiter = ',', required = true)]
    pub endpoints: Vec<String>,

    /// Keep polling each endpoint for up to this many seconds
    #[arg(long, default_value_t = 0)]
    pub wait_secs: u64,
}

/// Extensions are matched lower-cased and without the dot, so `.PLY` and
/// `ply` select the same files.
fn parse_extension(raw: &str) -> Result<String, String> {
    let extension = raw.trim().trim_start_matches('.').to_ascii_lowercase();
    if extension.is_empty() {
        return Err("extension must not be empty".to_string());
    }
    Ok(extension)
}

#[derive(Args, Debug)]
pub struct AuditArgs {
    /// File with one prompt image URL per line
    #[arg(long)]
    pub prompts: PathBuf,

    /// Directory with result files named `<key>.<extension>`
    #[arg(long)]
    pub results: PathBuf,

    /// Result file extension, with or without the leading dot
    #[arg(long, default_value = MODEL_EXTENSION, value_parser = parse_extension)]
    pub extension: String,

    /// Write the missing prompts' URLs to this file
    #[arg(long)]
    pub write: Option<PathBuf>,
}

#[derive(Args, Debug)]
pub struct CleanArgs {
    #[arg(long)]
    pub prompts: PathBuf,

    #[arg(long)]
    pub results: PathBuf,

    /// Result file extension, with or without the leading dot
    #[arg(long, default_value = MODEL_EXTENSION, value_parser = parse_extension)]
    pub extension: String,

    /// Only report what would be deleted
    #[arg(long)]
    pub dry_run: bool,
}
