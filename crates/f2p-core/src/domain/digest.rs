//! Canonical JSON digests.
//!
//! Object keys are sorted recursively and the value is serialized compactly
//! before hashing, so two structurally equal values always hash the same
//! regardless of field order.

use sha2::{Digest, Sha256};

use crate::domain::error::Result;

/// Length of the abbreviated digest used in tags and log lines.
pub const SHORT_DIGEST_LEN: usize = 16;

fn sort_keys(value: &serde_json::Value) -> serde_json::Value {
    match value {
        serde_json::Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            let mut sorted = serde_json::Map::new();
            for key in keys {
                sorted.insert(key.clone(), sort_keys(&map[key]));
            }
            serde_json::Value::Object(sorted)
        }
        serde_json::Value::Array(items) => {
            serde_json::Value::Array(items.iter().map(sort_keys).collect())
        }
        other => other.clone(),
    }
}

/// Serialize `value` in canonical form (sorted keys, no whitespace).
pub fn canonical_json(value: &serde_json::Value) -> Result<String> {
    Ok(serde_json::to_string(&sort_keys(value))?)
}

/// SHA-256 hex digest of the canonical form of `value`.
pub fn compute_digest(value: &serde_json::Value) -> Result<String> {
    let canonical = canonical_json(value)?;
    let mut hasher = Sha256::new();
    hasher.update(canonical.as_bytes());
    Ok(hex::encode(hasher.finalize()))
}

/// First [`SHORT_DIGEST_LEN`] characters of a digest.
pub fn short_digest(digest: &str) -> &str {
    &digest[..SHORT_DIGEST_LEN.min(digest.len())]
}
