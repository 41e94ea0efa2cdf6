//! Output file naming and crash-safe writes.
//!
//! Files are written to a uniquely named temporary file in the destination
//! directory and renamed into place, so a reader never sees a partially
//! written model or image. Renames within one directory are atomic on the
//! platforms we run on.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::CoreError;
use crate::hashing::sha256_hex;
use crate::types::PromptKey;

/// Extension of generated 3D models.
pub const MODEL_EXTENSION: &str = "ply";

/// Extension of rendered images.
pub const IMAGE_EXTENSION: &str = "png";

/// Model formats accepted by the renderer.
pub const RENDERABLE_EXTENSIONS: &[&str] = &["ply", "glb"];

/// How generated files are named.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum OutputNaming {
    /// `<prompt key>.<ext>`. Prompt keys of the source data are content
    /// hashes of the prompt images, and later stages match on them.
    #[default]
    PromptKey,
    /// `<sha256 of the output bytes>.<ext>`.
    ContentHash,
}

impl OutputNaming {
    /// File name for an output of `key` with the given bytes and extension.
    pub fn file_name(self, key: &PromptKey, bytes: &[u8], extension: &str) -> String {
        match self {
            Self::PromptKey => format!("{key}.{extension}"),
            Self::ContentHash => format!("{}.{extension}", sha256_hex(bytes)),
        }
    }
}

/// Create `dir` and its parents if missing.
pub async fn ensure_dir(dir: &Path) -> Result<(), CoreError> {
    tokio::fs::create_dir_all(dir)
        .await
        .map_err(|e| CoreError::io(dir, e))
}

/// Write `bytes` to `dir/file_name` via a temporary file and a rename.
///
/// An existing file of the same name is replaced. On failure the temporary
/// file is removed and the destination is left untouched.
pub async fn write_atomic(dir: &Path, file_name: &str, bytes: &[u8]) -> Result<PathBuf, CoreError> {
    let final_path = dir.join(file_name);
    let temp_path = dir.join(format!(".{file_name}.{}.tmp", uuid::Uuid::new_v4()));

    if let Err(e) = tokio::fs::write(&temp_path, bytes).await {
        let _ = tokio::fs::remove_file(&temp_path).await;
        return Err(CoreError::io(&temp_path, e));
    }

    if let Err(e) = tokio::fs::rename(&temp_path, &final_path).await {
        let _ = tokio::fs::remove_file(&temp_path).await;
        return Err(CoreError::io(&final_path, e));
    }

    Ok(final_path)
}

/// [`write_atomic`] addressed by full path. Missing parent directories are
/// created.
pub async fn write_atomic_path(path: &Path, bytes: &[u8]) -> Result<PathBuf, CoreError> {
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    let file_name = path
        .file_name()
        .and_then(|n| n.to_str())
        .ok_or_else(|| CoreError::Configuration(format!("Invalid output path: {}", path.display())))?;

    ensure_dir(dir).await?;
    write_atomic(dir, file_name, bytes).await
}

/// Everything before the first `.` of a file name (`abc.v2.ply` -> `abc`).
pub fn file_stem(path: &Path) -> Option<&str> {
    path.file_name()
        .and_then(|n| n.to_str())
        .and_then(|n| n.split('.').next())
        .filter(|s| !s.is_empty())
}

/// Lower-cased extension of `path`, if any.
pub fn extension(path: &Path) -> Option<String> {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
}

/// List regular files in `dir` whose extension is one of `extensions`,
/// sorted by path. Hidden files (including our temporaries) are skipped.
pub async fn list_files(dir: &Path, extensions: &[&str]) -> Result<Vec<PathBuf>, CoreError> {
    let mut entries = tokio::fs::read_dir(dir)
        .await
        .map_err(|e| CoreError::io(dir, e))?;

    let mut files = Vec::new();
    while let Some(entry) = entries.next_entry().await.map_err(|e| CoreError::io(dir, e))? {
        let path = entry.path();
        let is_file = entry
            .file_type()
            .await
            .map(|t| t.is_file())
            .unwrap_or(false);
        let hidden = path
            .file_name()
            .and_then(|n| n.to_str())
            .is_some_and(|n| n.starts_with('.'));
        let wanted = extension(&path).is_some_and(|ext| extensions.contains(&ext.as_str()));

        if is_file && !hidden && wanted {
            files.push(path);
        }
    }

    files.sort();
    Ok(files)
}

/// Index files with the given extension in `dir` by their stem.
///
/// When two files share a stem the first in path order wins.
pub async fn index_by_stem(
    dir: &Path,
    extension: &str,
) -> Result<BTreeMap<String, PathBuf>, CoreError> {
    let mut index = BTreeMap::new();
    for path in list_files(dir, &[extension]).await? {
        if let Some(stem) = file_stem(&path) {
            index.entry(stem.to_string()).or_insert_with(|| path.clone());
        }
    }
    Ok(index)
}

/// Require `dir` to exist and be a directory.
pub async fn require_dir(dir: &Path) -> Result<(), CoreError> {
    let meta = tokio::fs::metadata(dir)
        .await
        .map_err(|e| CoreError::io(dir, e))?;
    if !meta.is_dir() {
        return Err(CoreError::Configuration(format!(
            "{} is not a directory",
            dir.display()
        )));
    }
    Ok(())
}
