//! Prompts file parsing and prompt-key derivation.
//!
//! A prompts file is UTF-8 text with one image URL per line. Surrounding
//! whitespace is trimmed and blank lines are ignored. Each URL maps to a
//! [`PromptKey`] derived from its filename stem.

use std::collections::HashSet;
use std::path::Path;

use crate::error::CoreError;
use crate::hashing::short_hash;
use crate::types::PromptKey;

/// One entry of a prompts file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Prompt {
    pub key: PromptKey,
    pub url: String,
}

// ---------------------------------------------------------------------------
// Key derivation
// ---------------------------------------------------------------------------

/// Derive the prompt key for a URL or local path.
///
/// Strips query string, fragment, scheme and host, takes the last
/// non-empty path segment and keeps the text before its first `.`.
/// Identifiers without a usable stem fall back to a short SHA-256 of the
/// whole identifier, so the key is always deterministic and non-empty.
pub fn derive_prompt_key(identifier: &str) -> PromptKey {
    let trimmed = identifier.trim();
    let clean = trimmed.split('?').next().unwrap_or(trimmed);
    let clean = clean.split('#').next().unwrap_or(clean);

    let path = match clean
        .strip_prefix("https://")
        .or_else(|| clean.strip_prefix("http://"))
    {
        Some(rest) => rest.find('/').map(|i| &rest[i..]).unwrap_or(""),
        None => clean,
    };

    let stem = path
        .rsplit(['/', '\\'])
        .find(|s| !s.is_empty())
        .and_then(|segment| segment.split('.').next())
        .filter(|stem| !stem.is_empty());

    match stem {
        Some(stem) => PromptKey::new(stem),
        None => PromptKey::new(short_hash(trimmed.as_bytes())),
    }
}

// ---------------------------------------------------------------------------
// Parsing
// ---------------------------------------------------------------------------

/// Parse the contents of a prompts file.
///
/// Order is preserved. When two lines map to the same key only the first
/// is kept, since both would target the same output file.
pub fn parse_prompts(contents: &str) -> Vec<Prompt> {
    let mut seen = HashSet::new();
    let mut prompts = Vec::new();

    for line in contents.lines() {
        let url = line.trim();
        if url.is_empty() {
            continue;
        }
        let key = derive_prompt_key(url);
        if !seen.insert(key.clone()) {
            tracing::warn!(prompt_key = %key, url, "Duplicate prompt key, skipping line");
            continue;
        }
        prompts.push(Prompt {
            key,
            url: url.to_string(),
        });
    }

    prompts
}

/// Read and parse a prompts file.
///
/// A missing or unreadable file is an I/O error; a file with no prompts is
/// a configuration error.
pub async fn load_prompts(path: &Path) -> Result<Vec<Prompt>, CoreError> {
    let contents = tokio::fs::read_to_string(path)
        .await
        .map_err(|e| CoreError::io(path, e))?;

    let prompts = parse_prompts(&contents);
    if prompts.is_empty() {
        return Err(CoreError::Configuration(format!(
            "Prompts file {} contains no prompts",
            path.display()
        )));
    }
    Ok(prompts)
}
