//! Reconciliation between a prompts file and a results directory.
//!
//! Finds prompts that have no output yet (to build a retry prompts file)
//! and output files that no prompt accounts for (to clean them up).

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use serde::Serialize;

use crate::error::CoreError;
use crate::prompts::Prompt;
use crate::storage::{file_stem, index_by_stem, write_atomic_path};
use crate::types::PromptKey;

/// A prompt without a matching output file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MissingPrompt {
    pub key: PromptKey,
    pub url: String,
}

/// Result of comparing prompts with a results directory.
#[derive(Debug, Clone, Serialize)]
pub struct AuditReport {
    pub total_prompts: usize,
    pub result_files: usize,
    pub total_bytes: u64,
    pub missing: Vec<MissingPrompt>,
    pub extra: Vec<PathBuf>,
    /// Share of prompts with an output, in percent.
    pub match_rate: f64,
}

/// Result of deleting orphaned output files.
#[derive(Debug, Clone, Serialize)]
pub struct CleanReport {
    pub dry_run: bool,
    pub removed: Vec<PathBuf>,
    pub freed_bytes: u64,
}

/// Compare `prompts` against `<key>.<extension>` files in `results_dir`.
pub async fn audit(
    prompts: &[Prompt],
    results_dir: &Path,
    extension: &str,
) -> Result<AuditReport, CoreError> {
    let files = index_by_stem(results_dir, extension).await?;
    let keys: HashSet<&str> = prompts.iter().map(|p| p.key.as_str()).collect();

    let missing: Vec<MissingPrompt> = prompts
        .iter()
        .filter(|p| !files.contains_key(p.key.as_str()))
        .map(|p| MissingPrompt {
            key: p.key.clone(),
            url: p.url.clone(),
        })
        .collect();

    let extra: Vec<PathBuf> = files
        .iter()
        .filter(|(stem, _)| !keys.contains(stem.as_str()))
        .map(|(_, path)| path.clone())
        .collect();

    let mut total_bytes = 0;
    for path in files.values() {
        total_bytes += tokio::fs::metadata(path)
            .await
            .map_err(|e| CoreError::io(path, e))?
            .len();
    }

    let matched = prompts.len() - missing.len();
    let match_rate = if prompts.is_empty() {
        0.0
    } else {
        matched as f64 / prompts.len() as f64 * 100.0
    };

    Ok(AuditReport {
        total_prompts: prompts.len(),
        result_files: files.len(),
        total_bytes,
        missing,
        extra,
        match_rate,
    })
}

/// Write the URLs of `missing` prompts as a new prompts file.
pub async fn write_missing(path: &Path, missing: &[MissingPrompt]) -> Result<(), CoreError> {
    let mut contents = String::new();
    for prompt in missing {
        contents.push_str(&prompt.url);
        contents.push('\n');
    }

    write_atomic_path(path, contents.as_bytes()).await?;
    Ok(())
}

/// Delete the report's extra files. With `dry_run` nothing is deleted but
/// the report lists what would be.
pub async fn remove_extra(report: &AuditReport, dry_run: bool) -> Result<CleanReport, CoreError> {
    let mut removed = Vec::new();
    let mut freed_bytes = 0;

    for path in &report.extra {
        let size = tokio::fs::metadata(path)
            .await
            .map_err(|e| CoreError::io(path, e))?
            .len();
        if !dry_run {
            tokio::fs::remove_file(path)
                .await
                .map_err(|e| CoreError::io(path, e))?;
            tracing::info!(path = %path.display(), "Deleted orphaned output");
        }
        freed_bytes += size;
        removed.push(path.clone());
    }

    Ok(CleanReport {
        dry_run,
        removed,
        freed_bytes,
    })
}

/// Stems of the report's extra files, for display.
pub fn extra_stems(report: &AuditReport) -> Vec<&str> {
    report.extra.iter().filter_map(|p| file_stem(p)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::prompts::parse_prompts;

    async fn fixture() -> (tempfile::TempDir, Vec<Prompt>) {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.ply"), b"aaaa").unwrap();
        std::fs::write(dir.path().join("orphan.ply"), b"oo").unwrap();
        std::fs::write(dir.path().join("b.png"), b"not a model").unwrap();
        let prompts = parse_prompts("https://x.io/a.png\nhttps://x.io/b.png\nhttps://x.io/c.png\n");
        (dir, prompts)
    }

    #[tokio::test]
    async fn audit_finds_missing_and_extra() {
        let (dir, prompts) = fixture().await;
        let report = audit(&prompts, dir.path(), "ply").await.unwrap();

        assert_eq!(report.total_prompts, 3);
        assert_eq!(report.result_files, 2);
        assert_eq!(report.total_bytes, 6);
        let missing: Vec<_> = report.missing.iter().map(|m| m.key.as_str()).collect();
        assert_eq!(missing, vec!["b", "c"]);
        assert_eq!(extra_stems(&report), vec!["orphan"]);
        assert!((report.match_rate - 100.0 / 3.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn write_missing_produces_prompts_file() {
        let (dir, prompts) = fixture().await;
        let report = audit(&prompts, dir.path(), "ply").await.unwrap();
        let out = dir.path().join("retry.txt");

        write_missing(&out, &report.missing).await.unwrap();

        let reparsed = parse_prompts(&std::fs::read_to_string(&out).unwrap());
        assert_eq!(reparsed.len(), 2);
        assert_eq!(reparsed[0].url, "https://x.io/b.png");
    }

    #[tokio::test]
    async fn dry_run_keeps_files() {
        let (dir, prompts) = fixture().await;
        let report = audit(&prompts, dir.path(), "ply").await.unwrap();

        let clean = remove_extra(&report, true).await.unwrap();
        assert_eq!(clean.freed_bytes, 2);
        assert!(dir.path().join("orphan.ply").exists());
    }

    #[tokio::test]
    async fn clean_removes_only_orphans() {
        let (dir, prompts) = fixture().await;
        let report = audit(&prompts, dir.path(), "ply").await.unwrap();

        let clean = remove_extra(&report, false).await.unwrap();
        assert_eq!(clean.removed.len(), 1);
        assert!(!dir.path().join("orphan.ply").exists());
        assert!(dir.path().join("a.ply").exists());
        assert!(dir.path().join("b.png").exists());
    }
}
