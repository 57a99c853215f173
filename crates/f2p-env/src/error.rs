//! Error types for f2p-env

use f2p_core::F2pError;
use thiserror::Error;

/// Errors raised while building, using or tearing down an environment.
#[derive(Error, Debug)]
pub enum EnvError {
    /// The environment spec cannot be built as written
    #[error("malformed environment spec: {0}")]
    MalformedSpec(String),

    /// A toolchain command (git, docker, provisioning script) failed
    #[error("{step} failed: {detail}")]
    CommandFailed { step: String, detail: String },

    /// A toolchain command exceeded its deadline
    #[error("{step} timed out after {timeout_secs}s")]
    Timeout { step: String, timeout_secs: u64 },

    /// The handle was already released
    #[error("environment handle {0} already released")]
    Released(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Core(#[from] F2pError),
}

impl From<EnvError> for F2pError {
    fn from(err: EnvError) -> Self {
        match err {
            EnvError::Core(inner) => inner,
            other => F2pError::Build(other.to_string()),
        }
    }
}

/// Result type for environment operations
pub type Result<T> = std::result::Result<T, EnvError>;
