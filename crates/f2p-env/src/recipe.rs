//! Environment cache keys.

use f2p_core::{compute_digest, short_digest};
use serde::{Deserialize, Serialize};

use crate::Result;

/// Repository used for cached environment images.
pub const IMAGE_REPOSITORY: &str = "f2p-env";

/// Content digest of everything that determines a built environment.
///
/// Computed over the *sanitized* recipe so the key never depends on secret
/// values.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EnvDigest(String);

impl EnvDigest {
    pub fn compute(
        repository: &str,
        base_revision: &str,
        sanitized_recipe: &str,
        workdir: &str,
    ) -> Result<Self> {
        let value = serde_json::json!({
            "repository": repository,
            "base_revision": base_revision,
            "recipe": sanitized_recipe,
            "workdir": workdir,
        });
        Ok(Self(compute_digest(&value)?))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn short(&self) -> &str {
        short_digest(&self.0)
    }

    /// Deterministic image tag, e.g. `f2p-env:3f9c0a1b2c3d4e5f`.
    pub fn image_tag(&self) -> String {
        format!("{IMAGE_REPOSITORY}:{}", self.short())
    }
}

impl std::fmt::Display for EnvDigest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}
