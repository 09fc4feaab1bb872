//! Storage ceilings for captured content.
//!
//! Oversized payloads and response bodies are truncated before they reach the
//! store; a bounded SHA-256 sample digest is appended so the original content
//! can still be matched against an external copy.

use sha2::{Digest, Sha256};
use std::fmt::Write;

/// Default maximum stored length for payloads and response bodies (code points).
pub const DEFAULT_STORAGE_LIMIT: usize = 51_200;

/// Lowest configurable storage limit.
pub const MIN_STORAGE_LIMIT: usize = 1_024;

/// Maximum number of leading code points fed into the truncation digest.
pub const HASH_SAMPLE_MAX_LENGTH: usize = 4_096;

/// Fixed ceiling for the raw request-body snapshot, independent of the
/// configurable storage limit.
pub const RAW_BODY_MAX_LENGTH: usize = 10_000;

/// Marker token prepended to the truncation annotation.
pub const TRUNCATION_MARKER: &str = "[TRUNCATED]";

/// Number of leading code points hashed when content above `storage_limit`
/// is truncated.
pub fn hash_sample_length(storage_limit: usize) -> usize {
    storage_limit.max(1).min(HASH_SAMPLE_MAX_LENGTH)
}

/// Prepare content for storage, truncating and annotating when it exceeds
/// `limit` code points.
///
/// Below the limit the content is returned unchanged. Above it, the output is
/// the first `limit` code points followed by an annotation carrying the
/// truncation marker, a SHA-256 hex digest of the leading hash sample, the
/// original length, and the sample length. Deterministic: identical inputs
/// always produce byte-identical output.
pub fn prepare_for_storage(content: &str, limit: usize) -> String {
    let length = content.chars().count();

    if length <= limit {
        return content.to_string();
    }

    let sample = char_prefix(content, hash_sample_length(limit));
    let digest = hex_digest(sample);
    let truncated = char_prefix(content, limit);

    format!(
        "{}\n\n{} SHA-256 (partial): {}. Original length: {} chars. Hash computed over the first {} chars.",
        truncated,
        TRUNCATION_MARKER,
        digest,
        length,
        sample.chars().count()
    )
}

/// Shorten a raw request body to [`RAW_BODY_MAX_LENGTH`] code points.
///
/// Returns the possibly shortened body and whether truncation occurred. No
/// hash annotation is added here; the overall stored payload is annotated
/// later only if it exceeds the storage limit.
pub fn prepare_raw_body(content: &str) -> (String, bool) {
    if content.chars().count() <= RAW_BODY_MAX_LENGTH {
        return (content.to_string(), false);
    }

    (char_prefix(content, RAW_BODY_MAX_LENGTH).to_string(), true)
}

/// First `limit` code points of `s`, always on a character boundary.
fn char_prefix(s: &str, limit: usize) -> &str {
    match s.char_indices().nth(limit) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}

fn hex_digest(sample: &str) -> String {
    let digest = Sha256::digest(sample.as_bytes());
    let mut out = String::with_capacity(digest.len() * 2);
    for byte in digest {
        let _ = write!(out, "{:02x}", byte);
    }
    out
}
