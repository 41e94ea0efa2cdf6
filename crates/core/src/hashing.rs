//! Shared SHA-256 hex digest utility.
//!
//! Used for content-derived output filenames and as the fallback prompt key
//! when no filename stem can be derived from a prompt identifier.

use sha2::{Digest, Sha256};

/// Number of hex characters kept by [`short_hash`].
pub const SHORT_HASH_LEN: usize = 16;

/// Compute a SHA-256 hex digest of the given bytes.
pub fn sha256_hex(data: &[u8]) -> String {
    let hash = Sha256::digest(data);
    format!("{hash:x}")
}

/// First [`SHORT_HASH_LEN`] hex characters of the SHA-256 digest.
pub fn short_hash(data: &[u8]) -> String {
    let mut hex = sha256_hex(data);
    hex.truncate(SHORT_HASH_LEN);
    hex
}
