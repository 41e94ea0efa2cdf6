//! Serializable run reports printed as the command's final JSON object.

use std::path::PathBuf;

use meshgen_core::endpoint_pool::Endpoint;
use meshgen_core::outcome::{Completed, FailedItem, ResultAggregator};
use meshgen_core::scheduler::BatchStats;
use meshgen_core::types::PromptKey;
use serde::Serialize;

/// Counts and failures common to every pipeline.
#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub success: bool,
    pub interrupted: bool,
    pub submitted: usize,
    pub succeeded: usize,
    pub failed: usize,
    /// Items never started because the run was interrupted.
    pub skipped: usize,
    /// First recorded failure, as `"<key>: <message>"`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub failures: Vec<FailedItem>,
    pub stats: BatchStats,
}

impl RunSummary {
    pub fn new<R>(results: &ResultAggregator<R>, stats: BatchStats) -> Self {
        let interrupted = stats.cancelled;
        let error = results.first_error().or_else(|| {
            interrupted.then(|| format!("interrupted, {} items not started", stats.skipped))
        });

        Self {
            success: results.is_success() && !interrupted,
            interrupted,
            submitted: stats.submitted,
            succeeded: results.succeeded().len(),
            failed: results.failed().len(),
            skipped: stats.skipped,
            error,
            failures: results.failed().to_vec(),
            stats,
        }
    }
}

/// One file written by a pipeline.
#[derive(Debug, Clone, Serialize)]
pub struct OutputFile {
    pub key: PromptKey,
    pub endpoint: Endpoint,
    pub path: PathBuf,
    pub attempts: u32,
}

impl From<Completed<PathBuf>> for OutputFile {
    fn from(done: Completed<PathBuf>) -> Self {
        Self {
            key: done.key,
            endpoint: done.endpoint,
            path: done.value,
            attempts: done.attempts,
        }
    }
}

/// Report of a pipeline whose items each produce one file.
#[derive(Debug, Clone, Serialize)]
pub struct FileReport {
    #[serde(flatten)]
    pub summary: RunSummary,
    pub output_dir: PathBuf,
    /// Written files, sorted by key.
    pub outputs: Vec<OutputFile>,
}

impl FileReport {
    pub(crate) fn new(
        results: ResultAggregator<PathBuf>,
        stats: BatchStats,
        output_dir: PathBuf,
    ) -> Self {
        let summary = RunSummary::new(&results, stats);
        let (done, _) = results.into_parts();
        let mut outputs: Vec<OutputFile> = done.into_iter().map(OutputFile::from).collect();
        outputs.sort_by(|a, b| a.key.cmp(&b.key));

        Self {
            summary,
            output_dir,
            outputs,
        }
    }
}
