//! f2p-env: isolated execution environments for Fail2Pass evaluation
//!
//! Turns an instance's environment spec into an [`EnvironmentHandle`]:
//! the recipe is sanitized of embedded credentials, keyed by content
//! digest, and provisioned on a Docker or local backend.

pub mod backend;
pub mod builder;
pub mod error;
pub mod handle;
pub mod recipe;
pub mod redact;

pub use backend::{
    BuildLog, DockerBackend, EnvironmentBackend, LocalBackend, Placement, ProvisionRequest,
};
pub use builder::{EnvironmentBuilder, PreparedEnvironment, BUILD_LOG_FILE, REDACTIONS_FILE};
pub use error::{EnvError, Result};
pub use handle::{EnvironmentHandle, HandleGauge};
pub use recipe::EnvDigest;
pub use redact::{
    sanitize_recipe, Redaction, RedactionReport, SanitizedRecipe, SecretPolicy,
    DEFAULT_SECRET_NAMES,
};
